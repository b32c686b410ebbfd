pub mod client;
pub mod logging;
pub mod mock;
pub mod stream;
pub mod types;

use crate::error::EngineError;
use std::collections::BTreeMap;
use std::future::Future;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use types::{
    AuthResponse, CallFrame, EventType, Frame, PromptResponse, RunRequest, RunState, ToolDef,
};

pub const FRAME_CHANNEL_CAPACITY: usize = 64;

pub type FrameSender = mpsc::Sender<Result<Frame, EngineError>>;

/// Tool-execution engine the session drives.
pub trait Engine: Send + Sync {
    /// Tool definitions declared by `tool`, in file order.
    fn parse(&self, tool: &str) -> impl Future<Output = Result<Vec<ToolDef>, EngineError>> + Send;

    /// Starts a run; frames stop arriving once `cancel` fires.
    fn start(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Run, EngineError>> + Send;

    fn confirm(&self, response: AuthResponse)
        -> impl Future<Output = Result<(), EngineError>> + Send;

    fn prompt_response(
        &self,
        response: PromptResponse,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;
}

/// One turn of a conversation: the frame stream plus the state folded from it.
#[derive(Debug)]
pub struct Run {
    request: RunRequest,
    frames: mpsc::Receiver<Result<Frame, EngineError>>,
    cancel: CancellationToken,
    calls: BTreeMap<String, CallFrame>,
    state: RunState,
    finished: bool,
    err: Option<String>,
    chat_state: Option<String>,
    responding_tool: String,
}

impl Run {
    /// A run fed by the returned sender. Dropping the sender ends the stream.
    pub fn new(request: RunRequest, cancel: CancellationToken) -> (Self, FrameSender) {
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let run = Self {
            request,
            frames: rx,
            cancel,
            calls: BTreeMap::new(),
            state: RunState::Creating,
            finished: false,
            err: None,
            chat_state: None,
            responding_tool: String::new(),
        };
        (run, tx)
    }

    /// Next frame, or `None` once the stream ends or the run is interrupted.
    pub async fn next_event(&mut self) -> Option<Frame> {
        let item = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            item = self.frames.recv() => item,
        };

        match item {
            Some(Ok(frame)) => {
                self.apply(&frame);
                Some(frame)
            }
            Some(Err(err)) => {
                self.fail(err.to_string());
                None
            }
            None => {
                if self.cancel.is_cancelled() {
                    if !self.state.is_terminal() {
                        self.fail("run interrupted".to_string());
                    }
                } else if !self.finished {
                    self.fail(EngineError::StreamClosed.to_string());
                }
                None
            }
        }
    }

    fn apply(&mut self, frame: &Frame) {
        if let Some(run) = &frame.run {
            match run.event_type {
                EventType::RunStart => {
                    if self.state == RunState::Creating {
                        self.state = RunState::Running;
                    }
                }
                EventType::RunFinish => {
                    self.finished = true;
                    if let Some(chat_state) = &run.chat_state {
                        self.chat_state = Some(chat_state.clone());
                    }
                    if let Some(tool) = &run.responding_tool {
                        self.responding_tool = tool.name.clone();
                    }
                    match run.error.as_deref().filter(|err| !err.is_empty()) {
                        Some(err) => self.fail(err.to_string()),
                        None => self.state = run.state.unwrap_or(RunState::Finished),
                    }
                }
                _ => {}
            }
        }

        if let Some(call) = &frame.call {
            if self.state == RunState::Creating {
                self.state = RunState::Running;
            }
            self.calls.insert(call.id.clone(), call.clone());
        }
    }

    fn fail(&mut self, err: String) {
        tracing::debug!(error = %err, "run ended with error");
        self.state = RunState::Error;
        self.err = Some(err);
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn err(&self) -> Option<&str> {
        self.err.as_deref()
    }

    /// Chat state to continue from: the one this turn produced, else the one
    /// it was started with.
    pub fn chat_state(&self) -> Option<&str> {
        self.chat_state
            .as_deref()
            .or(self.request.chat_state.as_deref())
    }

    pub fn responding_tool(&self) -> &str {
        &self.responding_tool
    }

    pub fn calls(&self) -> &BTreeMap<String, CallFrame> {
        &self.calls
    }

    pub fn is_interrupted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn root_call(&self) -> Option<&CallFrame> {
        root_call(&self.calls)
    }

    /// Request continuing this conversation with `input`.
    pub fn next_chat_request(&self, input: &str) -> RunRequest {
        RunRequest {
            input: input.to_string(),
            chat_state: self.chat_state().map(str::to_string),
            ..self.request.clone()
        }
    }
}

/// The call without a parent; the earliest one when there are several.
pub fn root_call(calls: &BTreeMap<String, CallFrame>) -> Option<&CallFrame> {
    calls
        .values()
        .filter(|call| call.parent_id.is_empty())
        .min_by_key(|call| call.start)
}
