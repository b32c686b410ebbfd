use crate::terminal::Surface;
use crate::ui::input_metrics::rows_spanned;
use crossterm::{
    cursor::{Hide, MoveToColumn, MoveUp, Show},
    queue,
    style::Print,
    terminal::{Clear, ClearType},
};
use std::io;

/// The rows at the bottom of the terminal owned by the live display.
pub struct Area<S> {
    surface: S,
    written: String,
    extra_rows: usize,
    cursor_hidden: bool,
}

impl<S: Surface> Area<S> {
    pub fn new(surface: S) -> Self {
        Self {
            surface,
            written: String::new(),
            extra_rows: 0,
            cursor_hidden: false,
        }
    }

    pub fn size(&self) -> (u16, u16) {
        self.surface.size()
    }

    pub fn written(&self) -> &str {
        &self.written
    }

    /// Brings the area to `text`, appending when it only grew.
    pub fn update(&mut self, text: &str) -> io::Result<()> {
        let mut buf = Vec::new();
        if !self.cursor_hidden {
            queue!(buf, Hide)?;
            self.cursor_hidden = true;
        }
        self.queue_text(&mut buf, text)?;
        self.emit(&buf)
    }

    /// Final write of `text`; the cursor is shown and the area forgets what it
    /// wrote so the next update starts below.
    pub fn finish(&mut self, text: &str) -> io::Result<()> {
        let mut buf = Vec::new();
        self.queue_text(&mut buf, text)?;
        queue!(buf, Show)?;
        self.written.clear();
        self.extra_rows = 0;
        self.cursor_hidden = false;
        self.emit(&buf)
    }

    pub fn show_cursor(&mut self) -> io::Result<()> {
        if !self.cursor_hidden {
            return Ok(());
        }
        self.cursor_hidden = false;
        let mut buf = Vec::new();
        queue!(buf, Show)?;
        self.emit(&buf)
    }

    pub fn hide_cursor(&mut self) -> io::Result<()> {
        if self.cursor_hidden {
            return Ok(());
        }
        self.cursor_hidden = true;
        let mut buf = Vec::new();
        queue!(buf, Hide)?;
        self.emit(&buf)
    }

    /// Rows printed below the area by someone else (an interactive read).
    pub fn add_rows(&mut self, rows: usize) {
        self.extra_rows += rows;
    }

    fn queue_text(&mut self, buf: &mut Vec<u8>, text: &str) -> io::Result<()> {
        if self.extra_rows == 0 {
            if let Some(rest) = text.strip_prefix(self.written.as_str()) {
                if !rest.is_empty() {
                    queue!(buf, Print(rest))?;
                }
                self.written = text.to_string();
                return Ok(());
            }
        }

        let (cols, _) = self.surface.size();
        let up = rows_spanned(&self.written, usize::from(cols)) - 1 + self.extra_rows;
        queue!(buf, MoveToColumn(0))?;
        if up > 0 {
            queue!(buf, MoveUp(u16::try_from(up).unwrap_or(u16::MAX)))?;
        }
        queue!(buf, Clear(ClearType::FromCursorDown), Print(text))?;

        self.written = text.to_string();
        self.extra_rows = 0;
        Ok(())
    }

    fn emit(&mut self, buf: &[u8]) -> io::Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        self.surface.write_all(buf)?;
        self.surface.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::RecordingSurface;

    const HIDE: &str = "\x1b[?25l";
    const SHOW: &str = "\x1b[?25h";

    #[test]
    fn test_growing_text_appends_suffix_only() {
        let surface = RecordingSurface::new(80, 24);
        let mut area = Area::new(surface.clone());

        area.update("Hello").expect("update");
        area.update("Hello, world").expect("update");

        let frames = surface.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], format!("{HIDE}Hello"));
        assert_eq!(frames[1], ", world");
    }

    #[test]
    fn test_changed_text_rewrites_from_area_start() {
        let surface = RecordingSurface::new(80, 24);
        let mut area = Area::new(surface.clone());

        area.update("line one\nline two").expect("update");
        area.update("line one\nline 2").expect("update");

        let frames = surface.frames();
        assert_eq!(frames[1], "\x1b[1G\x1b[1A\x1b[Jline one\nline 2");
    }

    #[test]
    fn test_interactive_rows_force_rewrite() {
        let surface = RecordingSurface::new(80, 24);
        let mut area = Area::new(surface.clone());

        area.update("ask\n").expect("update");
        area.add_rows(1);
        area.update("ask\nmore").expect("update");

        let frames = surface.frames();
        assert_eq!(frames[1], "\x1b[1G\x1b[2A\x1b[Jask\nmore");
    }

    #[test]
    fn test_finish_shows_cursor_and_resets() {
        let surface = RecordingSurface::new(80, 24);
        let mut area = Area::new(surface.clone());

        area.update("working").expect("update");
        area.finish("working done\n").expect("finish");
        assert_eq!(area.written(), "");

        area.update("next").expect("update");
        let frames = surface.frames();
        assert_eq!(frames[1], format!(" done\n{SHOW}"));
        assert_eq!(frames[2], format!("{HIDE}next"));
    }
}
