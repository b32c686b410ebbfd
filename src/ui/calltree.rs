use super::markdown;
use super::style::RenderStyle;
use crate::engine::root_call;
use crate::engine::types::{CallFrame, TOOL_CALL_HEADER};
use chrono::{DateTime, Duration, Utc};
use crossterm::style::{style as styled, Stylize};
use std::collections::BTreeMap;

const STALE_CHILD_AFTER_MS: i64 = 1000;
const TOOL_ARGS_SEPARATOR: &str = " -> ";

/// Flattens the call tree into display text: the echoed user input, then the
/// root call and everything reachable from it.
pub fn render(
    input: &str,
    calls: &BTreeMap<String, CallFrame>,
    style: &RenderStyle,
    now: DateTime<Utc>,
) -> String {
    let mut out = String::new();

    if !input.is_empty() {
        out.push_str(&format!("{}\n", styled(format!("> {input}")).green()));
    }

    if let Some(root) = root_call(calls) {
        let mut renderer = Renderer {
            calls,
            style,
            now,
            stack: Vec::new(),
            out,
        };
        renderer.call(root);
        out = renderer.out;
    }

    out
}

struct Renderer<'a> {
    calls: &'a BTreeMap<String, CallFrame>,
    style: &'a RenderStyle,
    now: DateTime<Utc>,
    stack: Vec<&'a str>,
    out: String,
}

impl<'a> Renderer<'a> {
    fn call(&mut self, call: &'a CallFrame) {
        if self.stack.contains(&call.id.as_str()) {
            return;
        }

        if !call.display_text.is_empty() {
            self.markdown(&call.display_text);
        }

        self.stack.push(&call.id);

        // Long-running credential/context children have no place in the
        // parent's output yet; surface them while the parent is silent.
        if call.output.is_empty() {
            for child in self.stale_children(call) {
                self.call(child);
            }
        }

        for output in &call.output {
            let (content, tool_call) = match output.content.split_once(TOOL_CALL_HEADER) {
                Some((content, rest)) => (content, Some(rest)),
                None => (output.content.as_str(), None),
            };

            if !content.is_empty() {
                if call.tool.instructions.starts_with("#!") {
                    self.out.push_str(&self.style.boxed(content.trim()));
                } else {
                    self.markdown(content);
                }
            }

            if let Some(rest) = tool_call.filter(|rest| !rest.is_empty()) {
                self.tool_call(&format!("{TOOL_CALL_HEADER}{rest}"));
            }

            for sub_call in self.ordered_sub_calls(output.sub_calls.keys()) {
                self.call(sub_call);
            }
        }

        self.stack.pop();
    }

    fn markdown(&mut self, text: &str) {
        match markdown::render(text, self.style) {
            Ok(rendered) => self.out.push_str(&rendered),
            Err(err) => {
                tracing::trace!("markdown fallback: {err}");
                self.out.push_str(text);
                if !text.ends_with('\n') {
                    self.out.push('\n');
                }
            }
        }
    }

    fn stale_children(&self, parent: &CallFrame) -> Vec<&'a CallFrame> {
        let threshold = Duration::milliseconds(STALE_CHILD_AFTER_MS);
        let mut children: Vec<&'a CallFrame> = self
            .calls
            .values()
            .filter(|child| {
                child.id != parent.id
                    && child.parent_id == parent.id
                    && !child.output.is_empty()
                    && child.end.is_none()
                    && self.now - child.start > threshold
            })
            .collect();
        children.sort_by_key(|child| child.start);
        children
    }

    /// Known sub-calls ordered by start time; ties keep key order.
    fn ordered_sub_calls<'k>(
        &self,
        keys: impl Iterator<Item = &'k String>,
    ) -> Vec<&'a CallFrame> {
        let mut sub_calls: Vec<&'a CallFrame> =
            keys.filter_map(|key| self.calls.get(key)).collect();
        sub_calls.sort_by_key(|call| call.start);
        sub_calls
    }

    fn tool_call(&mut self, text: &str) {
        let width = self.style.tool_args_width();
        let mut lines = Vec::new();

        for line in text.split('\n') {
            let line = line.strip_prefix(TOOL_CALL_HEADER).unwrap_or(line);
            let Some((name, args)) = line.split_once(TOOL_ARGS_SEPARATOR) else {
                continue;
            };
            let name = name.trim();
            let arg_chars = args.chars().count();
            let rendered = if arg_chars > width {
                let head: String = args.chars().take(width).collect();
                format!("{name} {head}...({})", arg_chars - width)
            } else {
                format!("{name} {args}")
            };
            lines.push(rendered.trim().to_string());
        }

        if !lines.is_empty() {
            self.out.push('\n');
            self.out
                .push_str(&self.style.boxed(&format!("Call Arguments:\n\n{}", lines.join("\n"))));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ts(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + seconds, 0).expect("timestamp")
    }

    fn call(value: serde_json::Value) -> CallFrame {
        serde_json::from_value(value).expect("call frame")
    }

    fn insert(calls: &mut BTreeMap<String, CallFrame>, call: CallFrame) {
        calls.insert(call.id.clone(), call);
    }

    fn wide() -> RenderStyle {
        RenderStyle::for_width(120)
    }

    #[test]
    fn test_sub_calls_render_in_start_order() {
        let mut calls = BTreeMap::new();
        insert(&mut calls, call(json!({
            "id": "root", "type": "callChat", "start": ts(0),
            "output": [{"content": "Plan", "subCalls": {
                "a": {"toolID": "x"}, "b": {"toolID": "y"}, "c": {"toolID": "z"}
            }}]
        })));
        insert(&mut calls, call(json!({"id": "a", "type": "callFinish", "parentID": "root",
            "start": ts(3), "output": [{"content": "third"}]})));
        insert(&mut calls, call(json!({"id": "b", "type": "callFinish", "parentID": "root",
            "start": ts(1), "output": [{"content": "first"}]})));
        insert(&mut calls, call(json!({"id": "c", "type": "callFinish", "parentID": "root",
            "start": ts(1), "output": [{"content": "second"}]})));

        let out = render("", &calls, &wide(), ts(10));

        let first = out.find("first").expect("first");
        let second = out.find("second").expect("second");
        let third = out.find("third").expect("third");
        assert!(first < second && second < third, "{out}");
        assert_eq!(out, render("", &calls, &wide(), ts(10)));
    }

    #[test]
    fn test_input_echo_precedes_root_output() {
        let mut calls = BTreeMap::new();
        insert(&mut calls, call(json!({
            "id": "root", "type": "callChat", "start": ts(0),
            "output": [{"content": "Hello back"}]
        })));
        let out = render("hello", &calls, &wide(), ts(1));
        assert!(out.contains("> hello"));
        assert!(out.find("> hello") < out.find("Hello back"));
    }

    #[test]
    fn test_stale_running_child_shown_while_parent_silent() {
        let mut calls = BTreeMap::new();
        insert(&mut calls, call(json!({"id": "root", "type": "callStart", "start": ts(0)})));
        insert(&mut calls, call(json!({"id": "slow", "type": "callProgress", "parentID": "root",
            "start": ts(0), "output": [{"content": "fetching credentials"}]})));
        insert(&mut calls, call(json!({"id": "fresh", "type": "callProgress", "parentID": "root",
            "start": ts(5), "output": [{"content": "just started"}]})));
        insert(&mut calls, call(json!({"id": "done", "type": "callFinish", "parentID": "root",
            "start": ts(0), "end": ts(1), "output": [{"content": "finished already"}]})));

        let out = render("", &calls, &wide(), ts(5));

        assert!(out.contains("fetching credentials"));
        assert!(!out.contains("just started"));
        assert!(!out.contains("finished already"));
    }

    #[test]
    fn test_system_tool_output_is_boxed() {
        let mut calls = BTreeMap::new();
        insert(&mut calls, call(json!({
            "id": "root", "type": "callFinish", "start": ts(0),
            "tool": {"name": "exec", "instructions": "#!sys.exec"},
            "output": [{"content": "total 0\n"}]
        })));
        let out = render("", &calls, &wide(), ts(1));
        assert!(out.contains("│ total 0 │"), "{out}");
    }

    #[test]
    fn test_tool_call_arguments_truncated_to_width() {
        let args = format!("{{\"text\":\"{}\"}}", "x".repeat(100));
        let mut calls = BTreeMap::new();
        insert(&mut calls, call(json!({
            "id": "root", "type": "callChat", "start": ts(0),
            "output": [{"content": format!("Working{TOOL_CALL_HEADER} write -> {args}")}]
        })));
        let style = RenderStyle::for_width(60);

        let out = render("", &calls, &style, ts(1));

        assert!(out.contains("Call Arguments:"));
        let width = style.tool_args_width();
        let remaining = args.chars().count() - width;
        assert!(out.contains(&format!("...({remaining})")), "{out}");
    }

    #[test]
    fn test_cycle_in_sub_calls_terminates() {
        let mut calls = BTreeMap::new();
        insert(&mut calls, call(json!({
            "id": "root", "type": "callChat", "start": ts(0),
            "output": [{"content": "loop", "subCalls": {"child": {}}}]
        })));
        insert(&mut calls, call(json!({
            "id": "child", "type": "callChat", "parentID": "root", "start": ts(1),
            "output": [{"content": "again", "subCalls": {"root": {}}}]
        })));

        let out = render("", &calls, &wide(), ts(2));
        assert_eq!(out.matches("again").count(), 1);
    }

    #[test]
    fn test_escape_sequences_fall_back_to_raw_text() {
        let mut calls = BTreeMap::new();
        insert(&mut calls, call(json!({
            "id": "root", "type": "callChat", "start": ts(0),
            "output": [{"content": "\u{1b}[1mbold\u{1b}[0m"}]
        })));
        let out = render("", &calls, &wide(), ts(1));
        assert_eq!(out, "\u{1b}[1mbold\u{1b}[0m\n");
    }
}
