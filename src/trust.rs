use crate::confirm::args::ToolArguments;
use crate::error::PersistenceError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const AUTH_FILE_NAME: &str = "authorized.json";
const GITHUB_HTTPS_PREFIX: &str = "https://github.com/";

/// Session-scoped grant for a tool whose arguments start with recorded prefixes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlwaysRule {
    pub tool_name: String,
    pub arg_prefixes: BTreeMap<String, String>,
}

impl AlwaysRule {
    pub fn for_tool(tool_name: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arg_prefixes: BTreeMap::new(),
        }
    }

    pub fn with_prefix(mut self, arg: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.arg_prefixes.insert(arg.into(), prefix.into());
        self
    }

    pub fn matches(&self, tool_name: &str, args: &ToolArguments) -> bool {
        self.tool_name == tool_name
            && self
                .arg_prefixes
                .iter()
                .all(|(name, prefix)| args.text(name).unwrap_or("").starts_with(prefix.as_str()))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TrustRecord {}

#[derive(Debug, Default)]
pub struct TrustStore {
    trusted: BTreeMap<String, TrustRecord>,
    prefixes: Vec<String>,
    always: Vec<AlwaysRule>,
    auth_file: Option<PathBuf>,
}

impl TrustStore {
    /// Store backed by `<cache dir>/<app_name>/authorized.json`.
    pub fn open(app_name: &str, prefixes: Vec<String>) -> Self {
        match dirs::cache_dir() {
            Some(cache) => Self::at_path(cache.join(app_name).join(AUTH_FILE_NAME), prefixes),
            None => {
                tracing::warn!("no cache directory; trusted origins will not persist");
                Self::in_memory(prefixes)
            }
        }
    }

    pub fn at_path(path: impl Into<PathBuf>, prefixes: Vec<String>) -> Self {
        let path = path.into();
        Self {
            trusted: load_records(&path),
            prefixes,
            always: Vec::new(),
            auth_file: Some(path),
        }
    }

    pub fn in_memory(prefixes: Vec<String>) -> Self {
        Self {
            prefixes,
            ..Self::default()
        }
    }

    pub fn auth_file(&self) -> Option<&Path> {
        self.auth_file.as_deref()
    }

    pub fn is_trusted(&self, origin: &str) -> bool {
        if origin.is_empty() {
            return false;
        }
        if self.trusted.contains_key(origin) {
            return true;
        }
        self.prefixes.iter().any(|prefix| {
            origin == prefix
                || origin
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    /// Records `origin` in memory, then rewrites the trust file.
    /// The in-memory grant stands even when the write fails.
    pub fn grant(&mut self, origin: &str) -> Result<(), PersistenceError> {
        if origin.is_empty() || self.trusted.contains_key(origin) {
            return Ok(());
        }
        self.trusted.insert(origin.to_string(), TrustRecord {});
        self.save()
    }

    pub fn is_always_trusted(&self, tool_name: &str, args: &ToolArguments) -> bool {
        self.always.iter().any(|rule| rule.matches(tool_name, args))
    }

    pub fn record_always(&mut self, rule: AlwaysRule) {
        if rule.tool_name.is_empty() || self.always.contains(&rule) {
            return;
        }
        self.always.push(rule);
    }

    pub fn save(&self) -> Result<(), PersistenceError> {
        let path = self.auth_file.as_ref().ok_or(PersistenceError::NoCacheDir)?;
        let data = serde_json::to_vec(&self.trusted)?;
        let io_err = |source| PersistenceError::Io {
            path: path.display().to_string(),
            source,
        };

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(io_err)?;
        }

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(path).map_err(io_err)?;
        file.write_all(&data).map_err(io_err)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(io_err)?;
        }
        Ok(())
    }
}

fn load_records(path: &Path) -> BTreeMap<String, TrustRecord> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), "cannot read trust file: {err}");
            }
            return BTreeMap::new();
        }
    };
    serde_json::from_str(&data).unwrap_or_else(|err| {
        tracing::warn!(path = %path.display(), "ignoring malformed trust file: {err}");
        BTreeMap::new()
    })
}

/// `https://github.com/acme/tools.git` becomes `github.com/acme/tools`;
/// other repository roots are used verbatim.
pub fn normalize_origin(root: &str) -> String {
    match root.strip_prefix("https://") {
        Some(rest) if root.starts_with(GITHUB_HTTPS_PREFIX) => {
            rest.strip_suffix(".git").unwrap_or(rest).to_string()
        }
        _ => root.to_string(),
    }
}
