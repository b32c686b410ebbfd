use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

use crate::confirm::DEFAULT_SYSTEM_TOOL_PREFIX;
use crate::display::repaint::DEFAULT_REPAINT_INTERVAL;
use crate::engine::types::ToolDef;
use crate::util::parse_bool_arg;

pub const DEFAULT_APP_NAME: &str = "toolchat";
pub const DEFAULT_ENGINE_URL: &str = "http://127.0.0.1:9090";

#[derive(Parser, Debug, Clone)]
#[command(name = "tchat")]
#[command(version, about = "Chat with a tool through a tool-execution engine", long_about = None)]
pub struct Cli {
    /// Tool reference to run
    pub tool: String,

    /// First chat input
    pub input: Option<String>,

    /// Engine base URL
    #[arg(long, env = "TOOLCHAT_ENGINE_URL", default_value = DEFAULT_ENGINE_URL)]
    pub engine_url: String,

    /// Name used for the cache directory holding trust and history files
    #[arg(long, env = "TOOLCHAT_APP_NAME")]
    pub app_name: Option<String>,

    /// JSON file with inline tool definitions to run instead of TOOL
    #[arg(long)]
    pub eval: Option<PathBuf>,

    /// Repository prefixes trusted without asking (comma separated)
    #[arg(long = "trusted-prefix", env = "TOOLCHAT_TRUSTED_PREFIXES", value_delimiter = ',')]
    pub trusted_prefixes: Vec<String>,

    #[arg(
        long,
        env = "TOOLCHAT_DISABLE_CACHE",
        value_parser = parse_bool_arg,
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true"
    )]
    pub disable_cache: bool,

    #[arg(long = "credential-override")]
    pub credential_overrides: Vec<String>,

    #[arg(long, env = "TOOLCHAT_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Run this tool of the file instead of its first one
    #[arg(long)]
    pub sub_tool: Option<String>,

    /// File holding a chat state to resume
    #[arg(long)]
    pub chat_state: Option<PathBuf>,

    /// Where to keep the chat state after each turn
    #[arg(long)]
    pub save_chat_state_file: Option<PathBuf>,

    #[arg(long, env = "TOOLCHAT_WORKSPACE")]
    pub workspace: Option<PathBuf>,

    /// Whether the user speaks first; detected from the tool when unset
    #[arg(long, value_parser = parse_bool_arg, num_args = 0..=1, default_missing_value = "true")]
    pub user_start_conversation: Option<bool>,

    #[arg(long)]
    pub location: Option<String>,

    /// Append engine events as JSON lines to this file
    #[arg(long, env = "TOOLCHAT_EVENT_LOG")]
    pub event_log: Option<PathBuf>,

    /// Printed when the engine is slow to send the first event
    #[arg(long)]
    pub load_message: Option<String>,

    #[arg(long, env = "TOOLCHAT_SYSTEM_TOOL_PREFIX", default_value = DEFAULT_SYSTEM_TOOL_PREFIX)]
    pub system_tool_prefix: String,

    /// Scope "always" exec grants to the directory they were given in
    #[arg(
        long,
        env = "TOOLCHAT_EXEC_DIRECTORY_SCOPE",
        value_parser = parse_bool_arg,
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true"
    )]
    pub exec_directory_scope: bool,

    #[arg(long, env = "TOOLCHAT_REPAINT_INTERVAL_MS", default_value_t = 200)]
    pub repaint_interval_ms: u64,

    /// Write logs here instead of stderr
    #[arg(long, env = "TOOLCHAT_LOG_FILE")]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Reads the files the flags point at.
    pub fn into_options(self) -> Result<RunOptions> {
        let eval = match &self.eval {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read tool definitions {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("invalid tool definitions in {}", path.display()))?
            }
            None => Vec::new(),
        };

        let chat_state = match &self.chat_state {
            Some(path) => Some(
                std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read chat state {}", path.display()))?,
            ),
            None => None,
        };

        Ok(RunOptions {
            app_name: self.app_name.unwrap_or_default(),
            engine_url: self.engine_url,
            tool: self.tool,
            input: self.input.unwrap_or_default(),
            eval,
            trusted_prefixes: self.trusted_prefixes,
            disable_cache: self.disable_cache,
            credential_overrides: self.credential_overrides,
            cache_dir: self.cache_dir,
            sub_tool: self.sub_tool,
            chat_state,
            save_chat_state_file: self.save_chat_state_file,
            workspace: self.workspace,
            user_start_conversation: self.user_start_conversation,
            location: self.location,
            event_log: self.event_log,
            load_message: self.load_message,
            system_tool_prefix: self.system_tool_prefix,
            exec_directory_scope: self.exec_directory_scope,
            repaint_interval: Duration::from_millis(self.repaint_interval_ms.max(1)),
        })
    }
}

/// Everything a session needs, before defaults are applied.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub app_name: String,
    pub engine_url: String,
    pub tool: String,
    pub input: String,
    pub eval: Vec<ToolDef>,
    pub trusted_prefixes: Vec<String>,
    pub disable_cache: bool,
    pub credential_overrides: Vec<String>,
    pub cache_dir: Option<PathBuf>,
    pub sub_tool: Option<String>,
    /// Serialized chat state to resume, not a path.
    pub chat_state: Option<String>,
    pub save_chat_state_file: Option<PathBuf>,
    pub workspace: Option<PathBuf>,
    pub user_start_conversation: Option<bool>,
    pub location: Option<String>,
    pub event_log: Option<PathBuf>,
    pub load_message: Option<String>,
    pub system_tool_prefix: String,
    pub exec_directory_scope: bool,
    pub repaint_interval: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            app_name: String::new(),
            engine_url: DEFAULT_ENGINE_URL.to_string(),
            tool: String::new(),
            input: String::new(),
            eval: Vec::new(),
            trusted_prefixes: Vec::new(),
            disable_cache: false,
            credential_overrides: Vec::new(),
            cache_dir: None,
            sub_tool: None,
            chat_state: None,
            save_chat_state_file: None,
            workspace: None,
            user_start_conversation: None,
            location: None,
            event_log: None,
            load_message: None,
            system_tool_prefix: DEFAULT_SYSTEM_TOOL_PREFIX.to_string(),
            exec_directory_scope: false,
            repaint_interval: DEFAULT_REPAINT_INTERVAL,
        }
    }
}

impl RunOptions {
    /// Applies defaults and prepares the workspace. A generated workspace
    /// lives as long as the returned [`Config`].
    pub fn complete(mut self) -> Result<Config> {
        if self.app_name.is_empty() {
            self.app_name = DEFAULT_APP_NAME.to_string();
        }
        if self.system_tool_prefix.is_empty() {
            self.system_tool_prefix = DEFAULT_SYSTEM_TOOL_PREFIX.to_string();
        }

        let (workspace, temp_workspace) = match self.workspace.take() {
            Some(dir) => (absolute_workspace(dir)?, None),
            None => {
                let temp = tempfile::Builder::new()
                    .prefix(&format!("{}-workspace-", self.app_name))
                    .tempdir()
                    .context("failed to create a temporary workspace")?;
                (temp.path().to_path_buf(), Some(temp))
            }
        };
        create_private_dir(&workspace)?;
        self.workspace = Some(workspace.clone());

        Ok(Config {
            options: self,
            workspace,
            temp_workspace,
        })
    }
}

fn absolute_workspace(dir: PathBuf) -> Result<PathBuf> {
    if dir.is_absolute() {
        return Ok(dir);
    }
    std::path::absolute(&dir).with_context(|| format!("invalid workspace {}", dir.display()))
}

fn create_private_dir(dir: &Path) -> Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder
        .create(dir)
        .with_context(|| format!("failed to create workspace {}", dir.display()))
}

/// Completed options.
#[derive(Debug)]
pub struct Config {
    pub options: RunOptions,
    workspace: PathBuf,
    temp_workspace: Option<TempDir>,
}

impl Config {
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn is_temporary_workspace(&self) -> bool {
        self.temp_workspace.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        let url = &self.options.engine_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            bail!("Invalid engine URL '{url}': expected http:// or https:// URL");
        }
        if self.options.tool.trim().is_empty() && self.options.eval.is_empty() {
            bail!("a tool reference or inline tool definitions are required");
        }
        Ok(())
    }
}
