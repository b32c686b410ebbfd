use super::input_metrics::{display_width, truncate_to_display_width};
use crossterm::style::{style, Stylize};

pub const DEFAULT_TERMINAL_WIDTH: u16 = 80;
const BOX_MARGIN_LEFT: usize = 4;
const BOX_PADDING: usize = 1;
const MARKDOWN_WRAP_MARGIN: usize = 10;
const TOOL_ARGS_MARGIN: usize = 33;
const TAB: &str = "    ";

/// Layout parameters derived from the terminal width for one render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderStyle {
    width: usize,
}

impl RenderStyle {
    pub fn for_width(width: u16) -> Self {
        Self {
            width: usize::from(width),
        }
    }

    pub fn current() -> Self {
        let width = crossterm::terminal::size()
            .map(|(cols, _)| cols)
            .ok()
            .filter(|cols| *cols > 0)
            .unwrap_or(DEFAULT_TERMINAL_WIDTH);
        Self::for_width(width)
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn markdown_wrap(&self) -> usize {
        self.width.saturating_sub(MARKDOWN_WRAP_MARGIN)
    }

    pub fn box_max_width(&self) -> usize {
        self.width.saturating_sub(BOX_MARGIN_LEFT)
    }

    pub fn tool_args_width(&self) -> usize {
        self.width.saturating_sub(TOOL_ARGS_MARGIN)
    }

    /// Bordered block indented four columns, followed by one blank line.
    pub fn boxed(&self, text: &str) -> String {
        self.boxed_with(text, str::to_string)
    }

    /// Box around `content`; `diff` content is colored per line.
    pub fn code_block(&self, lang: &str, content: &str) -> String {
        if lang == "diff" {
            self.boxed_with(content, color_diff_line)
        } else {
            self.boxed(content)
        }
    }

    fn boxed_with(&self, text: &str, paint: impl Fn(&str) -> String) -> String {
        let lines: Vec<String> = text
            .trim_end_matches('\n')
            .split('\n')
            .map(|line| line.trim_end_matches('\r').replace('\t', TAB))
            .collect();

        let chrome = BOX_MARGIN_LEFT + 2 + BOX_PADDING * 2;
        let max_inner = self.box_max_width().saturating_sub(chrome).max(1);
        let inner = lines
            .iter()
            .map(|line| display_width(line))
            .max()
            .unwrap_or(0)
            .min(max_inner);

        let margin = " ".repeat(BOX_MARGIN_LEFT);
        let pad = " ".repeat(BOX_PADDING);
        let rule = "─".repeat(inner + BOX_PADDING * 2);

        let mut out = format!("{margin}┌{rule}┐\n");
        for line in &lines {
            let clipped = truncate_to_display_width(line, inner);
            let fill = " ".repeat(inner - display_width(&clipped));
            out.push_str(&format!("{margin}│{pad}{}{fill}{pad}│\n", paint(&clipped)));
        }
        out.push_str(&format!("{margin}└{rule}┘\n\n"));
        out
    }
}

fn color_diff_line(line: &str) -> String {
    if line.starts_with("+++") || line.starts_with("---") {
        style(line).bold().to_string()
    } else if line.starts_with('+') {
        style(line).green().to_string()
    } else if line.starts_with('-') {
        style(line).red().to_string()
    } else if line.starts_with("@@") {
        style(line).cyan().to_string()
    } else {
        line.to_string()
    }
}
