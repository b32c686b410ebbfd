use super::area::Area;
use crate::terminal::Surface;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_REPAINT_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Default)]
struct ContentState {
    content: String,
    last_painted: String,
    finished: bool,
}

/// Last-write-wins content cell painted onto an [`Area`] by a background
/// ticker. The area mutex is the paint lock: holding it (for a blocking read)
/// suspends painting.
pub struct Repaint<S: Surface + 'static> {
    state: Arc<Mutex<ContentState>>,
    area: Arc<AsyncMutex<Area<S>>>,
    stop: CancellationToken,
}

impl<S: Surface + 'static> Repaint<S> {
    /// Starts the ticker; must be called inside a tokio runtime.
    pub fn new(surface: S, interval: Duration) -> Self {
        let state = Arc::new(Mutex::new(ContentState::default()));
        let area = Arc::new(AsyncMutex::new(Area::new(surface)));
        let stop = CancellationToken::new();

        let ticker_state = Arc::clone(&state);
        let ticker_area = Arc::clone(&area);
        let ticker_stop = stop.clone();
        tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + interval, interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker_stop.cancelled() => break,
                    _ = ticks.tick() => {
                        let mut area = ticker_area.lock().await;
                        paint_locked(&ticker_state, &mut area);
                    }
                }
            }
        });

        Self { state, area, stop }
    }

    /// Replaces the content; painted by the next tick.
    pub fn set_content(&self, text: impl Into<String>) {
        lock(&self.state).content = text.into();
    }

    pub fn content(&self) -> String {
        lock(&self.state).content.clone()
    }

    /// Paints now unless the content is already on screen.
    pub async fn paint(&self) {
        let mut area = self.area.lock().await;
        paint_locked(&self.state, &mut area);
    }

    /// Writes `text` in full as the final frame of this turn, then resets so
    /// the display can be reused.
    pub async fn finish(&self, text: &str) {
        {
            let mut state = lock(&self.state);
            state.content = text.to_string();
            state.finished = true;
        }
        let mut area = self.area.lock().await;
        if let Err(err) = area.finish(text) {
            tracing::debug!("final paint failed: {err}");
        }
        *lock(&self.state) = ContentState::default();
    }

    /// Runs a blocking `read` with painting suspended and the cursor visible.
    /// The runtime must be multi-threaded.
    pub async fn interactive<R>(&self, read: impl FnOnce() -> R) -> R {
        let mut area = self.area.lock().await;
        paint_locked(&self.state, &mut area);
        if let Err(err) = area.show_cursor() {
            tracing::debug!("cannot show cursor: {err}");
        }
        let result = tokio::task::block_in_place(read);
        if let Err(err) = area.hide_cursor() {
            tracing::debug!("cannot hide cursor: {err}");
        }
        area.add_rows(1);
        result
    }

    /// Stops the ticker and leaves the cursor visible.
    pub async fn close(&self) {
        self.stop.cancel();
        let mut area = self.area.lock().await;
        if let Err(err) = area.show_cursor() {
            tracing::debug!("cannot show cursor: {err}");
        }
    }
}

impl<S: Surface + 'static> Drop for Repaint<S> {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

fn lock(state: &Mutex<ContentState>) -> MutexGuard<'_, ContentState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn paint_locked<S: Surface>(state: &Mutex<ContentState>, area: &mut Area<S>) {
    let text = {
        let mut state = lock(state);
        if state.finished || state.content == state.last_painted {
            return;
        }
        state.last_painted = state.content.clone();
        state.content.clone()
    };

    let (_, rows) = area.size();
    if let Err(err) = area.update(clip_to_rows(&text, usize::from(rows))) {
        tracing::debug!("paint failed: {err}");
    }
}

/// The last `rows` lines of `text`.
pub fn clip_to_rows(text: &str, rows: usize) -> &str {
    let lines = text.split('\n').count();
    if lines <= rows {
        return text;
    }
    let skip = lines - rows;
    match text.match_indices('\n').nth(skip - 1) {
        Some((index, _)) => &text[index + 1..],
        None => text,
    }
}
