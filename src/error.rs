use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot reach engine at '{url}': {source}")]
    Connect {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("engine request to '{url}' failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("engine endpoint '{url}' returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("failed to decode engine payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("engine stream closed before the run finished")]
    StreamClosed,
    #[error("{0}")]
    Rejected(String),
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize trust store: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("no cache directory available for trust store")]
    NoCacheDir,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("text already carries terminal escape sequences")]
    EscapeSequence,
}
