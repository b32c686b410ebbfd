use super::stream::{StreamItem, StreamParser};
use super::types::{AuthResponse, PromptResponse, RunRequest, ToolDef};
use super::{Engine, FrameSender, Run};
use crate::error::EngineError;
use crate::util::is_local_endpoint_url;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::pin::Pin;
use tokio_util::sync::CancellationToken;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, EngineError>> + Send>>;

#[derive(Debug, Deserialize)]
struct ParseResponse {
    #[serde(default)]
    tools: Vec<ToolDef>,
}

/// Engine reached over HTTP; runs stream back as server-sent events.
#[derive(Clone)]
pub struct HttpEngine {
    http: reqwest::Client,
    base_url: String,
}

impl HttpEngine {
    pub fn new(base_url: &str) -> Self {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.starts_with("http://") && !is_local_endpoint_url(&base_url) {
            tracing::warn!(url = %base_url, "engine URL is plaintext HTTP on a non-local host");
        }
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, EngineError> {
        let url = self.url(path);
        tracing::debug!(url = %url, "engine request");
        let response = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|error| map_engine_request_error(error, &url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EngineError::Status {
                url,
                status: status.as_u16(),
            });
        }
        Ok(response)
    }
}

impl Engine for HttpEngine {
    async fn parse(&self, tool: &str) -> Result<Vec<ToolDef>, EngineError> {
        let url = self.url("parse");
        let response = self.post("parse", &json!({ "file": tool })).await?;
        let body = response
            .bytes()
            .await
            .map_err(|error| map_engine_request_error(error, &url))?;
        let parsed: ParseResponse = serde_json::from_slice(&body)?;
        Ok(parsed.tools)
    }

    async fn start(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<Run, EngineError> {
        let response = self.post("run", &request).await?;
        let url = self.url("run");
        let bytes = response
            .bytes_stream()
            .map(move |item| item.map_err(|error| map_engine_request_error(error, &url)));
        Ok(run_from_bytes(request, Box::pin(bytes), cancel))
    }

    async fn confirm(&self, response: AuthResponse) -> Result<(), EngineError> {
        let path = format!("confirm/{}", response.id);
        self.post(&path, &response).await.map(|_| ())
    }

    async fn prompt_response(&self, response: PromptResponse) -> Result<(), EngineError> {
        let path = format!("prompt-response/{}", response.id);
        self.post(&path, &response).await.map(|_| ())
    }
}

/// Run whose frames are decoded from an event-stream body by a background task.
pub fn run_from_bytes(request: RunRequest, bytes: ByteStream, cancel: CancellationToken) -> Run {
    let (run, tx) = Run::new(request, cancel.clone());
    tokio::spawn(pump_frames(bytes, tx, cancel));
    run
}

async fn pump_frames(mut bytes: ByteStream, tx: FrameSender, cancel: CancellationToken) {
    let mut parser = StreamParser::new();
    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("run cancelled; dropping engine stream");
                return;
            }
            chunk = bytes.next() => chunk,
        };

        match chunk {
            Some(Ok(chunk)) => {
                for item in parser.process(&chunk) {
                    match item {
                        StreamItem::Frame(frame) => {
                            if tx.send(Ok(*frame)).await.is_err() {
                                return;
                            }
                        }
                        StreamItem::Done => return,
                    }
                }
            }
            Some(Err(err)) => {
                let _ = tx.send(Err(err)).await;
                return;
            }
            None => {
                let rest = parser.flush();
                if !rest.trim().is_empty() {
                    tracing::warn!(data = %rest, "engine stream ended mid-event");
                }
                return;
            }
        }
    }
}

fn map_engine_request_error(error: reqwest::Error, request_url: &str) -> EngineError {
    if let Some(status) = error.status() {
        return EngineError::Status {
            url: request_url.to_string(),
            status: status.as_u16(),
        };
    }
    if error.is_connect() {
        return EngineError::Connect {
            url: request_url.to_string(),
            source: error,
        };
    }
    EngineError::Request {
        url: request_url.to_string(),
        source: error,
    }
}
