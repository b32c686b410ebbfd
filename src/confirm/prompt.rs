use super::args::SystemToolCall;
use crate::edit_diff::generate_patch;
use crate::trust::AlwaysRule;
use crate::ui::style::RenderStyle;
use crate::util::lowercase_first;
use std::io::ErrorKind;
use std::path::Path;

pub const CONFIRM_YES_NO: &str = "Confirm (y/n)";
pub const CONFIRM_YES_NO_ALWAYS: &str = "Confirm (y/n/a)";

/// Question shown to the user plus what a positive answer would grant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfirmPrompt {
    pub message: String,
    pub origin: Option<String>,
    pub always: Option<AlwaysRule>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PromptOptions {
    /// Scope exec always-rules to the directory they were granted in.
    pub exec_directory_scope: bool,
}

pub fn origin_prompt(origin: &str) -> ConfirmPrompt {
    ConfirmPrompt {
        message: format!("Do you trust tools from the git repository [{origin}] (y/n)"),
        origin: Some(origin.to_string()),
        always: None,
    }
}

pub fn system_tool_prompt(
    call: &SystemToolCall,
    display_text: &str,
    style: &RenderStyle,
    options: PromptOptions,
) -> ConfirmPrompt {
    let specific = match call {
        SystemToolCall::Write {
            filename: Some(filename),
            content: Some(content),
        } => write_prompt(filename, content, style),
        SystemToolCall::Exec {
            command: Some(command),
            directory,
        } => Some(exec_prompt(command, directory.as_deref(), options)),
        _ => None,
    };

    specific.unwrap_or_else(|| generic_prompt(call.name(), display_text))
}

fn generic_prompt(tool_name: &str, display_text: &str) -> ConfirmPrompt {
    let text = if display_text.is_empty() {
        tool_name.to_string()
    } else {
        lowercase_first(display_text)
    };

    ConfirmPrompt {
        message: format!(
            "Proceed with {text} (or allow all {tool_name} calls)\n{CONFIRM_YES_NO_ALWAYS}"
        ),
        origin: None,
        always: Some(AlwaysRule::for_tool(tool_name)),
    }
}

fn exec_prompt(command: &str, directory: Option<&str>, options: PromptOptions) -> ConfirmPrompt {
    let prefix = exec_prefix(command);
    let mut message = format!("Run \"{command}\"");
    if let Some(directory) = directory {
        message.push_str(&format!(" in directory {directory}"));
    }
    message.push_str(&format!(
        " (or allow all \"{prefix} ...\" commands)\n{CONFIRM_YES_NO_ALWAYS}"
    ));

    let mut rule = AlwaysRule::for_tool("exec").with_prefix("command", prefix);
    if options.exec_directory_scope {
        rule = rule.with_prefix("directory", directory.unwrap_or(""));
    }

    ConfirmPrompt {
        message,
        origin: None,
        always: Some(rule),
    }
}

/// First word of `command`, plus the second when it looks like a subcommand
/// (no leading `-`, no `.`).
pub fn exec_prefix(command: &str) -> String {
    let mut parts = command.split_whitespace();
    let Some(first) = parts.next() else {
        return String::new();
    };
    match parts.next() {
        Some(second) if !second.starts_with('-') && !second.contains('.') => {
            format!("{first} {second}")
        }
        _ => first.to_string(),
    }
}

fn write_prompt(filename: &str, content: &str, style: &RenderStyle) -> Option<ConfirmPrompt> {
    let message = match std::fs::read(filename) {
        Err(err) if err.kind() == ErrorKind::NotFound => {
            let block = style.code_block("", content);
            format!(
                "{}\nWrite to {filename} \n{CONFIRM_YES_NO}",
                block.trim_end_matches('\n')
            )
        }
        Ok(existing) => {
            let base = Path::new(filename)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| filename.to_string());
            let patch = generate_patch(&base, &String::from_utf8_lossy(&existing), content);
            let block = style.code_block("diff", &patch);
            format!(
                "{}\nUpdate {filename}\n{CONFIRM_YES_NO}",
                block.trim_end_matches('\n')
            )
        }
        Err(err) => {
            tracing::debug!(filename, "cannot read write target: {err}");
            return None;
        }
    };

    Some(ConfirmPrompt {
        message,
        origin: None,
        always: None,
    })
}
