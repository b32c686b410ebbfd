use crate::util::sha256_hex;
use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::style::{style, Stylize};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use rustyline::error::ReadlineError;
use rustyline::{Config, DefaultEditor};
use std::io::Write;
use std::path::PathBuf;

/// Blocking line input. `Ok(None)` means the user aborted (interrupt or EOF).
pub trait LineReader {
    fn set_prompt(&mut self, prompt: &str);
    fn read_line(&mut self, allow_empty: bool) -> Result<Option<String>>;
    fn read_password(&mut self) -> Result<Option<String>>;
    fn close(&mut self) -> Result<()>;
}

/// `<cache dir>/<app>/chat-<sha256(tool)>.history`
pub fn history_file(app_name: &str, tool: &str) -> Option<PathBuf> {
    let dir = dirs::cache_dir()?.join(app_name);
    Some(dir.join(format!("chat-{}.history", sha256_hex(tool))))
}

pub struct RustylineReader {
    editor: DefaultEditor,
    prompt: String,
    history: Option<PathBuf>,
}

impl RustylineReader {
    pub fn new(app_name: &str, tool: &str) -> Result<Self> {
        let config = Config::builder().auto_add_history(true).build();
        let mut editor = DefaultEditor::with_config(config).context("line editor unavailable")?;

        let history = history_file(app_name, tool);
        if let Some(path) = &history {
            if let Some(parent) = path.parent() {
                if let Err(err) = std::fs::create_dir_all(parent) {
                    tracing::debug!(path = %parent.display(), "no history dir: {err}");
                }
            }
            if path.exists() {
                if let Err(err) = editor.load_history(path) {
                    tracing::warn!(path = %path.display(), "ignoring unreadable history: {err}");
                }
            }
        }

        Ok(Self {
            editor,
            prompt: prompt_text(">"),
            history,
        })
    }
}

fn prompt_text(prompt: &str) -> String {
    format!("{} ", style(prompt).green())
}

impl LineReader for RustylineReader {
    fn set_prompt(&mut self, prompt: &str) {
        self.prompt = prompt_text(prompt);
    }

    fn read_line(&mut self, allow_empty: bool) -> Result<Option<String>> {
        loop {
            match self.editor.readline(&self.prompt) {
                Ok(line) => {
                    let line = line.trim();
                    if line.is_empty() && !allow_empty {
                        continue;
                    }
                    return Ok(Some(line.to_string()));
                }
                Err(ReadlineError::Interrupted | ReadlineError::Eof) => return Ok(None),
                Err(err) => return Err(err).context("failed to read line"),
            }
        }
    }

    fn read_password(&mut self) -> Result<Option<String>> {
        let mut out = std::io::stdout();
        write!(out, "{}", self.prompt)?;
        out.flush()?;

        enable_raw_mode().context("failed to enable raw mode")?;
        let result = read_masked(&mut out);
        let restored = disable_raw_mode();
        write!(out, "\r\n")?;
        out.flush()?;
        restored.context("failed to restore terminal mode")?;
        result
    }

    fn close(&mut self) -> Result<()> {
        if let Some(path) = &self.history {
            self.editor
                .save_history(path)
                .with_context(|| format!("failed to save history to {}", path.display()))?;
        }
        Ok(())
    }
}

fn read_masked(out: &mut impl Write) -> Result<Option<String>> {
    let mut secret = String::new();
    loop {
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind == KeyEventKind::Release {
            continue;
        }
        match key.code {
            KeyCode::Enter => return Ok(Some(secret)),
            KeyCode::Char('c' | 'd') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Ok(None)
            }
            KeyCode::Backspace => {
                if secret.pop().is_some() {
                    write!(out, "\x08 \x08")?;
                    out.flush()?;
                }
            }
            KeyCode::Char(ch) => {
                secret.push(ch);
                write!(out, "*")?;
                out.flush()?;
            }
            _ => {}
        }
    }
}
