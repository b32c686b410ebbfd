use super::types::{AuthResponse, Frame, PromptResponse, RunRequest, ToolDef};
use super::{Engine, Run};
use crate::error::EngineError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct ScriptedRun {
    frames: Vec<Frame>,
    hold_open: bool,
}

#[derive(Debug, Default)]
struct MockState {
    tools: Vec<ToolDef>,
    runs: VecDeque<ScriptedRun>,
    requests: Vec<RunRequest>,
    confirms: Vec<AuthResponse>,
    prompt_responses: Vec<PromptResponse>,
}

/// Engine that replays scripted frame sequences and records every response.
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<MockState>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tools(self, tools: Vec<ToolDef>) -> Self {
        self.lock().tools = tools;
        self
    }

    /// Queues a run that ends after its frames.
    pub fn push_run(&self, frames: Vec<Frame>) {
        self.lock().runs.push_back(ScriptedRun {
            frames,
            hold_open: false,
        });
    }

    /// Queues a run that stays open after its frames until cancelled.
    pub fn push_held_run(&self, frames: Vec<Frame>) {
        self.lock().runs.push_back(ScriptedRun {
            frames,
            hold_open: true,
        });
    }

    pub fn requests(&self) -> Vec<RunRequest> {
        self.lock().requests.clone()
    }

    pub fn confirms(&self) -> Vec<AuthResponse> {
        self.lock().confirms.clone()
    }

    pub fn prompt_responses(&self) -> Vec<PromptResponse> {
        self.lock().prompt_responses.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Engine for MockEngine {
    async fn parse(&self, _tool: &str) -> Result<Vec<ToolDef>, EngineError> {
        Ok(self.lock().tools.clone())
    }

    async fn start(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<Run, EngineError> {
        let script = {
            let mut state = self.lock();
            state.requests.push(request.clone());
            state.runs.pop_front()
        };
        let script =
            script.ok_or_else(|| EngineError::Rejected("MockEngine: no more runs scripted".into()))?;

        let (run, tx) = Run::new(request, cancel.clone());
        tokio::spawn(async move {
            for frame in script.frames {
                if tx.send(Ok(frame)).await.is_err() {
                    return;
                }
            }
            if script.hold_open {
                cancel.cancelled().await;
            }
        });
        Ok(run)
    }

    async fn confirm(&self, response: AuthResponse) -> Result<(), EngineError> {
        self.lock().confirms.push(response);
        Ok(())
    }

    async fn prompt_response(&self, response: PromptResponse) -> Result<(), EngineError> {
        self.lock().prompt_responses.push(response);
        Ok(())
    }
}
