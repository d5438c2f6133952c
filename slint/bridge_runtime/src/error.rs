use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("malformed call: {0}")]
    Decode(String),

    #[error("invalid selector or element prefix: {0}")]
    InvalidSelector(String),

    #[error("element not registered: {0}")]
    ElementNotFound(String),

    #[error("no such element id: {0}")]
    NotFound(String),

    #[error("no pending call for correlation id {0}")]
    UnknownCorrelation(String),

    #[error("ui dispatch queue full (cap={0})")]
    QueueFull(usize),

    #[error("ui dispatch queue closed")]
    QueueClosed,

    #[error("ui pump is bound to another thread")]
    WrongThread,

    #[error("synchronous call to {0} would block the ui thread")]
    UiThreadBlocked(String),

    #[error("call {id} to {selector} timed out")]
    Timeout { id: String, selector: String },

    #[error("native side failed: {0}")]
    Native(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("driver is already running")]
    AlreadyRunning,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Decode(err.to_string())
    }
}

/// Failure raised by application code while handling an inbound call.
///
/// Never crosses the boundary as an error: the inbound router folds it into the
/// reply payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn unknown_method(method: &str) -> Self {
        Self(format!("unknown method: {method}"))
    }
}
