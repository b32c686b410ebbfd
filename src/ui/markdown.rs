use super::input_metrics::wrap_words;
use super::style::RenderStyle;
use crate::error::RenderError;
use crossterm::style::{style, Stylize};
use regex::{Captures, Regex};
use std::sync::LazyLock;

const INDENT: &str = "  ";
const FENCE: &str = "```";

static BOLD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*").expect("static regex is valid"));
static CODE_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("static regex is valid"));
static LIST_ITEM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*)(?:[-*+]|\d+\.)\s+(.*)$").expect("static regex is valid")
});

/// Renders a small markdown subset (headings, lists, fenced code, bold and
/// inline code) to indented, word-wrapped ANSI text.
pub fn render(text: &str, style: &RenderStyle) -> Result<String, RenderError> {
    if text.contains('\x1b') {
        return Err(RenderError::EscapeSequence);
    }

    let wrap = style.markdown_wrap().saturating_sub(INDENT.len());
    let mut out = String::new();
    let mut fence: Option<(String, Vec<&str>)> = None;

    for line in text.lines() {
        if let Some((lang, body)) = fence.as_mut() {
            if line.trim_start().starts_with(FENCE) {
                out.push_str(&style.code_block(lang, &body.join("\n")));
                fence = None;
            } else {
                body.push(line);
            }
            continue;
        }

        let trimmed = line.trim_start();
        if let Some(lang) = trimmed.strip_prefix(FENCE) {
            fence = Some((lang.trim().to_string(), Vec::new()));
            continue;
        }

        if trimmed.is_empty() {
            out.push('\n');
        } else if let Some(heading) = heading_text(trimmed) {
            out.push_str(INDENT);
            out.push_str(&style_heading(heading));
            out.push('\n');
        } else if let Some(caps) = LIST_ITEM.captures(line) {
            let depth = caps[1].len() / 2;
            let lead = format!("{INDENT}{}• ", "  ".repeat(depth));
            let hang = " ".repeat(lead.chars().count());
            let wrapped = wrap_words(&caps[2], wrap.saturating_sub(hang.len()));
            for (index, part) in wrapped.split('\n').enumerate() {
                out.push_str(if index == 0 { &lead } else { &hang });
                out.push_str(&inline(part));
                out.push('\n');
            }
        } else {
            for part in wrap_words(line, wrap).split('\n') {
                out.push_str(INDENT);
                out.push_str(&inline(part));
                out.push('\n');
            }
        }
    }

    if let Some((lang, body)) = fence {
        out.push_str(&style.code_block(&lang, &body.join("\n")));
    }

    Ok(out)
}

fn heading_text(line: &str) -> Option<&str> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    line[hashes..].strip_prefix(' ').map(str::trim)
}

fn style_heading(text: &str) -> String {
    style(text).bold().cyan().to_string()
}

fn inline(text: &str) -> String {
    let bolded = BOLD.replace_all(text, |caps: &Captures| style(&caps[1]).bold().to_string());
    CODE_SPAN
        .replace_all(&bolded, |caps: &Captures| style(&caps[1]).yellow().to_string())
        .into_owned()
}
