pub mod args;
pub mod prompt;

use crate::engine::types::{AuthResponse, CallFrame, EventType, Frame, PromptResponse};
use crate::engine::Engine;
use crate::trust::{normalize_origin, TrustStore};
use crate::ui::style::RenderStyle;
use anyhow::Result;
use args::{system_tool_name, SystemToolCall, ToolArguments};
use prompt::{origin_prompt, system_tool_prompt, ConfirmPrompt, PromptOptions};
use std::collections::BTreeMap;

pub const DEFAULT_SYSTEM_TOOL_PREFIX: &str = "#!sys.";
pub const REJECTION_REASON: &str =
    "User rejected action, abort the current operation and ask the user how to proceed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Yes,
    No,
    Always,
}

impl Answer {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_lowercase().as_str() {
            "y" | "yes" => Some(Answer::Yes),
            "n" | "no" => Some(Answer::No),
            "a" | "always" => Some(Answer::Always),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    UserAbort,
}

/// Source of user answers. `None` means the user aborted (interrupt or EOF).
#[allow(async_fn_in_trait)]
pub trait Asker {
    async fn ask(&mut self, text: &str, sensitive: bool) -> Result<Option<String>>;
    async fn ask_yes_no(&mut self, text: &str) -> Result<Option<Answer>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Trusted,
    Ask(ConfirmPrompt),
}

/// Decides which authorization requests need the user and remembers grants.
pub struct Confirmer {
    store: TrustStore,
    system_tool_prefix: String,
    options: PromptOptions,
}

impl Confirmer {
    pub fn new(store: TrustStore, system_tool_prefix: impl Into<String>, options: PromptOptions) -> Self {
        Self {
            store,
            system_tool_prefix: system_tool_prefix.into(),
            options,
        }
    }

    pub fn store(&self) -> &TrustStore {
        &self.store
    }

    pub fn is_prompt_event(frame: &Frame) -> bool {
        frame
            .prompt
            .as_ref()
            .is_some_and(|prompt| prompt.event_type == EventType::Prompt)
    }

    pub fn is_confirm_event(frame: &Frame) -> bool {
        frame
            .call
            .as_ref()
            .is_some_and(|call| call.event_type == EventType::CallConfirm)
    }

    pub fn resolve(&self, call: &CallFrame, style: &RenderStyle) -> Resolution {
        let origin = call
            .tool
            .source
            .repo
            .as_ref()
            .map(|repo| normalize_origin(&repo.root))
            .filter(|origin| !origin.is_empty());

        if let Some(origin) = origin {
            if self.store.is_trusted(&origin) {
                return Resolution::Trusted;
            }
            return Resolution::Ask(origin_prompt(&origin));
        }

        let Some(tool_name) = system_tool_name(&call.tool.instructions, &self.system_tool_prefix)
        else {
            return Resolution::Trusted;
        };

        let args = ToolArguments::parse(&call.input);
        if self.store.is_always_trusted(tool_name, &args) {
            return Resolution::Trusted;
        }

        let system_call = SystemToolCall::new(tool_name, &args);
        Resolution::Ask(system_tool_prompt(
            &system_call,
            &call.display_text,
            style,
            self.options,
        ))
    }

    /// Records what a positive answer grants: the origin durably, the
    /// always-rule for the session when the answer was `Always`.
    pub fn commit(&mut self, prompt: &ConfirmPrompt, answer: Answer) {
        if answer == Answer::No {
            return;
        }
        if let Some(origin) = &prompt.origin {
            if let Err(err) = self.store.grant(origin) {
                tracing::debug!(origin, "trusted origin not persisted: {err}");
            }
        }
        if answer == Answer::Always {
            if let Some(rule) = &prompt.always {
                self.store.record_always(rule.clone());
            }
        }
    }

    pub async fn handle_prompt<E: Engine, A: Asker>(
        &mut self,
        engine: &E,
        frame: &Frame,
        asker: &mut A,
    ) -> Result<Outcome> {
        let Some(prompt) = frame
            .prompt
            .as_ref()
            .filter(|prompt| prompt.event_type == EventType::Prompt)
        else {
            return Ok(Outcome::Continue);
        };

        let mut responses = BTreeMap::new();
        for (index, field) in prompt.fields.iter().enumerate() {
            let text = if index > 0 {
                field.clone()
            } else if prompt.fields.len() == 1 {
                format!("{}\n", prompt.message)
            } else {
                format!("{}\n{field}", prompt.message)
            };

            match asker.ask(&text, prompt.sensitive).await? {
                Some(value) => {
                    responses.insert(field.clone(), value);
                }
                None => return Ok(Outcome::UserAbort),
            }
        }

        engine
            .prompt_response(PromptResponse {
                id: prompt.id.clone(),
                responses,
            })
            .await?;
        Ok(Outcome::Continue)
    }

    pub async fn handle_confirm<E: Engine, A: Asker>(
        &mut self,
        engine: &E,
        frame: &Frame,
        asker: &mut A,
        style: &RenderStyle,
    ) -> Result<Outcome> {
        let Some(call) = frame
            .call
            .as_ref()
            .filter(|call| call.event_type == EventType::CallConfirm)
        else {
            return Ok(Outcome::Continue);
        };

        let (accept, message) = match self.resolve(call, style) {
            Resolution::Trusted => (true, String::new()),
            Resolution::Ask(prompt) => {
                let Some(answer) = asker.ask_yes_no(&prompt.message).await? else {
                    return Ok(Outcome::UserAbort);
                };
                if answer == Answer::No {
                    (false, REJECTION_REASON.to_string())
                } else {
                    self.commit(&prompt, answer);
                    (true, String::new())
                }
            }
        };

        engine
            .confirm(AuthResponse {
                id: call.id.clone(),
                accept,
                message,
            })
            .await?;
        Ok(Outcome::Continue)
    }
}
