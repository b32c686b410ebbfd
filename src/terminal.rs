use crossterm::{cursor::Show, execute, terminal::disable_raw_mode};
use std::io::{self, Stdout, Write};
use std::sync::{Arc, Mutex, Once};

pub const FALLBACK_SIZE: (u16, u16) = (80, 24);
static PANIC_HOOK_INSTALLED: Once = Once::new();

/// Output device the display paints on.
pub trait Surface: Write + Send {
    /// `(columns, rows)`.
    fn size(&self) -> (u16, u16);
}

pub struct StdoutSurface {
    out: Stdout,
}

impl StdoutSurface {
    pub fn new() -> Self {
        Self { out: io::stdout() }
    }
}

impl Default for StdoutSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for StdoutSurface {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.out.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

impl Surface for StdoutSurface {
    fn size(&self) -> (u16, u16) {
        crossterm::terminal::size()
            .ok()
            .filter(|(cols, rows)| *cols > 0 && *rows > 0)
            .unwrap_or(FALLBACK_SIZE)
    }
}

#[derive(Debug, Default)]
struct Recording {
    pending: Vec<u8>,
    frames: Vec<String>,
}

/// In-memory surface: every flush of non-empty output becomes one frame.
#[derive(Debug, Clone)]
pub struct RecordingSurface {
    size: (u16, u16),
    inner: Arc<Mutex<Recording>>,
}

impl RecordingSurface {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            size: (cols, rows),
            inner: Arc::new(Mutex::new(Recording::default())),
        }
    }

    pub fn frames(&self) -> Vec<String> {
        self.lock().frames.clone()
    }

    /// Everything flushed so far, concatenated.
    pub fn output(&self) -> String {
        self.lock().frames.concat()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recording> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Write for RecordingSurface {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().pending.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut inner = self.lock();
        if !inner.pending.is_empty() {
            let frame = String::from_utf8_lossy(&inner.pending).into_owned();
            inner.pending.clear();
            inner.frames.push(frame);
        }
        Ok(())
    }
}

impl Surface for RecordingSurface {
    fn size(&self) -> (u16, u16) {
        self.size
    }
}

/// Restores the cursor (and cooked mode) before the default panic output.
pub fn install_panic_hook_once() {
    PANIC_HOOK_INSTALLED.call_once(|| {
        let original_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |panic_info| {
            restore();
            original_hook(panic_info);
        }));
    });
}

pub fn restore() {
    let _ = disable_raw_mode();
    let _ = execute!(io::stdout(), Show);
}
