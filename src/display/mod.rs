pub mod area;
pub mod repaint;

use crate::confirm::{Answer, Asker};
use crate::readline::LineReader;
use crate::terminal::Surface;
use anyhow::Result;
use regex::Regex;
use repaint::Repaint;
use std::sync::LazyLock;
use std::time::Duration;

static TRAILING_STYLED_BLANKS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"( ?\x1b\[[0-9;]+m ?)+\n+$").expect("static regex is valid")
});

/// Live progress area plus line input for one session.
pub struct Display<S: Surface + 'static, R: LineReader> {
    repaint: Repaint<S>,
    reader: R,
}

impl<S: Surface + 'static, R: LineReader> Display<S, R> {
    pub fn new(surface: S, reader: R, interval: Duration) -> Self {
        Self {
            repaint: Repaint::new(surface, interval),
            reader,
        }
    }

    /// Replaces the live text. Empty text keeps what is shown.
    pub fn progress(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        let text = TRAILING_STYLED_BLANKS.replace(text, "");
        self.repaint.set_content(text);
    }

    pub fn content(&self) -> String {
        self.repaint.content()
    }

    /// Ends the turn with `text` written in full.
    pub async fn finished(&self, text: &str) {
        if text.ends_with('\n') {
            self.repaint.finish(text).await;
        } else {
            self.repaint.finish(&format!("{text}\n")).await;
        }
    }

    /// Reads a non-empty line after `<text>> `.
    pub async fn prompt(&mut self, text: &str) -> Result<Option<String>> {
        let prompt = format!("{text}>");
        self.reader.set_prompt(&prompt);
        let reader = &mut self.reader;
        self.repaint.interactive(|| reader.read_line(false)).await
    }

    /// Shows all but the last line of `text` in the area; the last line
    /// becomes the input prompt.
    fn set_multi_line_prompt(&mut self, text: &str) {
        let lines: Vec<&str> = text.split('\n').collect();
        let (last, above) = lines.split_last().unwrap_or((&"", &[]));
        self.reader.set_prompt(last);
        if !above.is_empty() {
            let content = self.repaint.content();
            let question = above.join("\n");
            self.repaint.set_content(if content.is_empty() {
                format!("{question}\n")
            } else {
                format!("{content}\n{question}\n")
            });
        }
    }

    pub async fn close(&mut self) -> Result<()> {
        self.repaint.close().await;
        self.reader.close()
    }
}

impl<S: Surface + 'static, R: LineReader> Asker for Display<S, R> {
    async fn ask(&mut self, text: &str, sensitive: bool) -> Result<Option<String>> {
        self.set_multi_line_prompt(text);
        let reader = &mut self.reader;
        if sensitive {
            self.repaint.interactive(|| reader.read_password()).await
        } else {
            self.repaint.interactive(|| reader.read_line(true)).await
        }
    }

    async fn ask_yes_no(&mut self, text: &str) -> Result<Option<Answer>> {
        self.set_multi_line_prompt(text);
        loop {
            let reader = &mut self.reader;
            let Some(line) = self.repaint.interactive(|| reader.read_line(true)).await? else {
                return Ok(None);
            };
            if let Some(answer) = Answer::parse(&line) {
                return Ok(Some(answer));
            }
        }
    }
}
