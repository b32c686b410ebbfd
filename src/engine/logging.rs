use super::types::Frame;
use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde_json::json;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only JSON-lines record of engine frames.
pub struct EventLog {
    path: PathBuf,
    file: File,
}

impl EventLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open event log {}", path.display()))?;
        Ok(Self { path, file })
    }

    /// Appends `{"time": ..., "event": frame}`; progress frames are not recorded.
    pub fn record(&mut self, frame: &Frame) -> Result<bool> {
        if frame.is_progress() {
            return Ok(false);
        }
        let entry = json!({
            "time": Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
            "event": frame,
        });
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');
        self.file
            .write_all(&line)
            .with_context(|| format!("failed to append to event log {}", self.path.display()))?;
        tracing::trace!(path = %self.path.display(), "event logged");
        Ok(true)
    }
}
