use serde_json::{Map, Value};

/// JSON object arguments of a tool call; anything else parses as empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArguments(Map<String, Value>);

impl ToolArguments {
    pub fn parse(input: &str) -> Self {
        match serde_json::from_str::<Value>(input) {
            Ok(Value::Object(map)) => Self(map),
            _ => Self::default(),
        }
    }

    /// String value of `name`; `None` when missing or not a string.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    fn non_empty(&self, name: &str) -> Option<String> {
        self.text(name)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }

    fn non_blank(&self, name: &str) -> Option<String> {
        self.text(name)
            .filter(|value| !value.trim().is_empty())
            .map(str::to_string)
    }
}

/// Typed view of a call to one of the engine's built-in tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemToolCall {
    Write {
        filename: Option<String>,
        content: Option<String>,
    },
    Exec {
        command: Option<String>,
        directory: Option<String>,
    },
    Other {
        name: String,
    },
}

impl SystemToolCall {
    pub fn new(name: &str, args: &ToolArguments) -> Self {
        match name {
            "write" => SystemToolCall::Write {
                filename: args.non_empty("filename"),
                content: args.non_empty("content"),
            },
            "exec" => SystemToolCall::Exec {
                command: args.non_blank("command"),
                directory: args.non_empty("directory"),
            },
            other => SystemToolCall::Other {
                name: other.to_string(),
            },
        }
    }

    pub fn name(&self) -> &str {
        match self {
            SystemToolCall::Write { .. } => "write",
            SystemToolCall::Exec { .. } => "exec",
            SystemToolCall::Other { name } => name,
        }
    }
}

/// Name of the system tool when the first instruction line carries `prefix`
/// (`#!sys.exec` yields `exec`).
pub fn system_tool_name<'a>(instructions: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() {
        return None;
    }
    let first_line = instructions.lines().next()?;
    let name = first_line
        .strip_prefix(prefix)?
        .split_whitespace()
        .next()
        .unwrap_or("");
    Some(name)
}
