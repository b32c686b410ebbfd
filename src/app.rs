use crate::config::RunOptions;
use crate::confirm::{Confirmer, Outcome};
use crate::display::Display;
use crate::engine::logging::EventLog;
use crate::engine::types::{Frame, RunRequest, RunState};
use crate::engine::{Engine, Run};
use crate::readline::LineReader;
use crate::terminal::Surface;
use crate::ui::calltree;
use crate::ui::style::RenderStyle;
use anyhow::{Context, Result};
use chrono::Utc;
use crossterm::style::{style, Stylize};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const LOAD_MESSAGE_DELAY: Duration = Duration::from_secs(1);
const INTERRUPTED_TEXT: &str = "Interrupted\n\n";
const RESUMING_PROMPT: &str = "Resuming conversation";

/// What ends the current turn.
pub trait InterruptSignal: Clone + Send + 'static {
    fn interrupted(&self) -> impl Future<Output = ()> + Send;
}

/// Ctrl-C (SIGINT).
#[derive(Debug, Clone, Copy, Default)]
pub struct CtrlC;

impl InterruptSignal for CtrlC {
    async fn interrupted(&self) {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!("cannot listen for Ctrl-C: {err}");
            std::future::pending::<()>().await;
        }
    }
}

/// Interrupt triggered from code. A trigger with no turn listening is kept
/// for the next one.
#[derive(Debug, Clone, Default)]
pub struct ManualInterrupt {
    notify: Arc<Notify>,
}

impl ManualInterrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.notify.notify_one();
    }
}

impl InterruptSignal for ManualInterrupt {
    async fn interrupted(&self) {
        self.notify.notified().await;
    }
}

/// Cancellation for one turn, fired by the interrupt signal.
struct TurnInterrupt {
    cancel: CancellationToken,
    listener: JoinHandle<()>,
}

impl TurnInterrupt {
    fn arm<I: InterruptSignal>(signal: &I) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let signal = signal.clone();
        let listener = tokio::spawn(async move {
            tokio::select! {
                _ = signal.interrupted() => {
                    tracing::debug!("turn interrupted");
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        });
        Self { cancel, listener }
    }

    fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for TurnInterrupt {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

/// The chat loop: streams each turn to the display, answers authorization
/// requests, then asks for the next input.
pub struct Session<E, S, R, I>
where
    E: Engine,
    S: Surface + 'static,
    R: LineReader,
    I: InterruptSignal,
{
    engine: E,
    display: Display<S, R>,
    confirmer: Confirmer,
    interrupt: I,
    options: RunOptions,
}

impl<E, S, R, I> Session<E, S, R, I>
where
    E: Engine,
    S: Surface + 'static,
    R: LineReader,
    I: InterruptSignal,
{
    /// `options` must already be completed (workspace set).
    pub fn new(
        engine: E,
        display: Display<S, R>,
        confirmer: Confirmer,
        interrupt: I,
        options: RunOptions,
    ) -> Self {
        Self {
            engine,
            display,
            confirmer,
            interrupt,
            options,
        }
    }

    /// Runs until the user aborts or a run finishes without error.
    pub async fn run(mut self) -> Result<()> {
        let result = self.run_turns().await;
        if let Err(err) = self.display.close().await {
            tracing::warn!("failed to close display: {err}");
        }
        result
    }

    async fn run_turns(&mut self) -> Result<()> {
        let user_starts = match self.options.user_start_conversation {
            Some(value) => value,
            None => self.detect_user_start().await?,
        };

        let mut input = self.options.input.clone();
        if input.is_empty() && user_starts {
            match self.display.prompt("").await? {
                Some(line) => input = line,
                None => return Ok(()),
            }
        }
        if input.is_empty() && self.options.chat_state.is_some() {
            match self.display.prompt(RESUMING_PROMPT).await? {
                Some(line) => input = line,
                None => return Ok(()),
            }
        }

        let mut event_log = match &self.options.event_log {
            Some(path) => Some(EventLog::open(path)?),
            None => None,
        };

        let mut interrupt = TurnInterrupt::arm(&self.interrupt);
        let mut load_deadline = self
            .options
            .load_message
            .as_ref()
            .map(|_| Instant::now() + LOAD_MESSAGE_DELAY);
        let mut run = self
            .engine
            .start(self.first_request(input.clone()), interrupt.token())
            .await
            .context("failed to start the run")?;

        loop {
            tracing::debug!(input = %input, "turn started");
            if self
                .stream_turn(&mut run, &input, &mut event_log, &mut load_deadline)
                .await?
                == Outcome::UserAbort
            {
                return Ok(());
            }
            tracing::debug!(state = ?run.state(), "turn finished");
            self.save_chat_state(&run);

            let mut check_state = true;
            loop {
                if check_state && run.state().is_terminal() && !run.is_interrupted() {
                    match run.err() {
                        Some(err) => self.print_error(err).await,
                        None => return Ok(()),
                    }
                }

                interrupt = TurnInterrupt::arm(&self.interrupt);
                let prompt = match run.responding_tool() {
                    "" => String::new(),
                    name => format!("@{name}"),
                };
                let Some(line) = self.display.prompt(&prompt).await? else {
                    return Ok(());
                };
                input = line;

                match self
                    .engine
                    .start(run.next_chat_request(&input), interrupt.token())
                    .await
                {
                    Ok(next) => {
                        run = next;
                        break;
                    }
                    Err(err) => {
                        self.print_error(&err.to_string()).await;
                        check_state = false;
                    }
                }
            }
        }
    }

    /// The user speaks first when the first tool is a chat tool without
    /// instructions.
    async fn detect_user_start(&self) -> Result<bool> {
        let tools = if self.options.eval.is_empty() {
            self.engine
                .parse(&self.options.tool)
                .await
                .with_context(|| format!("failed to parse {}", self.options.tool))?
        } else {
            self.options.eval.clone()
        };
        Ok(tools
            .first()
            .is_some_and(|tool| tool.chat && tool.instructions.is_empty()))
    }

    fn first_request(&self, input: String) -> RunRequest {
        let options = &self.options;
        let file = if options.eval.is_empty() {
            options.tool.clone()
        } else {
            String::new()
        };
        RunRequest {
            file,
            tools: options.eval.clone(),
            input,
            confirm: true,
            prompt: true,
            include_events: true,
            disable_cache: options.disable_cache,
            credential_overrides: options.credential_overrides.clone(),
            cache_dir: options
                .cache_dir
                .as_ref()
                .map(|dir| dir.display().to_string()),
            sub_tool: options.sub_tool.clone(),
            workspace: options
                .workspace
                .as_ref()
                .map(|dir| dir.display().to_string())
                .unwrap_or_default(),
            chat_state: options.chat_state.clone(),
            location: options.location.clone(),
        }
    }

    async fn stream_turn(
        &mut self,
        run: &mut Run,
        input: &str,
        event_log: &mut Option<EventLog>,
        load_deadline: &mut Option<Instant>,
    ) -> Result<Outcome> {
        let mut text = String::new();

        while let Some(frame) = self.next_frame(run, load_deadline).await {
            if let Some(log) = event_log.as_mut() {
                log.record(&frame)?;
            }

            let render_style = RenderStyle::current();
            if frame.call.is_some() {
                text = calltree::render(input, run.calls(), &render_style, Utc::now());
                self.display.progress(&text);
            }

            let outcome = self
                .confirmer
                .handle_prompt(&self.engine, &frame, &mut self.display)
                .await;
            if self.settle(outcome, run)? == Outcome::UserAbort {
                return Ok(Outcome::UserAbort);
            }

            let outcome = self
                .confirmer
                .handle_confirm(&self.engine, &frame, &mut self.display, &render_style)
                .await;
            if self.settle(outcome, run)? == Outcome::UserAbort {
                return Ok(Outcome::UserAbort);
            }
        }

        if run.is_interrupted() {
            text = INTERRUPTED_TEXT.to_string();
        }
        self.display.finished(&text).await;
        Ok(Outcome::Continue)
    }

    /// Errors from an interrupted turn are expected and dropped.
    fn settle(&self, outcome: Result<Outcome>, run: &Run) -> Result<Outcome> {
        match outcome {
            Err(err) if run.is_interrupted() => {
                tracing::debug!("ignoring error after interrupt: {err:#}");
                Ok(Outcome::Continue)
            }
            other => other,
        }
    }

    /// Next frame; shows the load message once if the engine stays silent
    /// past the deadline.
    async fn next_frame(
        &self,
        run: &mut Run,
        load_deadline: &mut Option<Instant>,
    ) -> Option<Frame> {
        if let Some(deadline) = *load_deadline {
            tokio::select! {
                frame = run.next_event() => {
                    *load_deadline = None;
                    return frame;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    *load_deadline = None;
                    if let Some(message) = &self.options.load_message {
                        self.display.progress(message);
                    }
                }
            }
        }
        run.next_event().await
    }

    fn save_chat_state(&self, run: &Run) {
        let Some(path) = &self.options.save_chat_state_file else {
            return;
        };
        let result = if run.state() == RunState::Finished {
            match std::fs::remove_file(path) {
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            }
        } else {
            write_private(path, run.chat_state().unwrap_or_default())
        };
        if let Err(err) = result {
            tracing::debug!(path = %path.display(), "chat state not saved: {err}");
        }
    }

    async fn print_error(&self, err: &str) {
        self.display
            .finished(&style(err).red().to_string())
            .await;
    }
}

fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    use std::io::Write;

    let mut options = std::fs::OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents.as_bytes())
}
