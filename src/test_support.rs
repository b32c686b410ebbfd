use crate::readline::LineReader;
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Mutex as AsyncMutex;

/// Process-wide lock for tests that mutate environment variables.
/// Use `.blocking_lock()` in sync tests and `.lock().await` in async tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

#[derive(Debug, Default)]
struct Script {
    lines: VecDeque<Option<String>>,
    prompts: Vec<String>,
    reads: usize,
    closed: bool,
}

/// Line reader fed from a script. `None` entries (and running out of lines)
/// read as a user abort.
#[derive(Debug, Clone, Default)]
pub struct ScriptedReader {
    inner: Arc<Mutex<Script>>,
}

impl ScriptedReader {
    pub fn new<I, T>(lines: I) -> Self
    where
        I: IntoIterator<Item = Option<T>>,
        T: Into<String>,
    {
        let reader = Self::default();
        reader.lock().lines = lines.into_iter().map(|line| line.map(Into::into)).collect();
        reader
    }

    /// Every prompt set so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.lock().prompts.clone()
    }

    pub fn reads(&self) -> usize {
        self.lock().reads
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next(&self) -> Option<String> {
        let mut script = self.lock();
        script.reads += 1;
        script.lines.pop_front().flatten()
    }
}

impl LineReader for ScriptedReader {
    fn set_prompt(&mut self, prompt: &str) {
        self.lock().prompts.push(prompt.to_string());
    }

    fn read_line(&mut self, allow_empty: bool) -> Result<Option<String>> {
        loop {
            match self.next() {
                Some(line) if line.trim().is_empty() && !allow_empty => continue,
                Some(line) => return Ok(Some(line.trim().to_string())),
                None => return Ok(None),
            }
        }
    }

    fn read_password(&mut self) -> Result<Option<String>> {
        Ok(self.next())
    }

    fn close(&mut self) -> Result<()> {
        self.lock().closed = true;
        Ok(())
    }
}
