use std::any::Any;
use std::sync::Arc;

use thiserror::Error;

/// Failure stored inside a promise.
///
/// Raised by user work or by a continuation, then forwarded unchanged through
/// every combinator except `recover`. Cloneable so that every observer of a
/// settled promise sees the same failure.
#[derive(Debug, Clone, Error)]
pub enum WorkError {
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Source(Arc<dyn std::error::Error + Send + Sync>),

    #[error("task panicked: {0}")]
    Panicked(String),

    #[error("executor is shut down, task rejected")]
    Rejected,

    #[error("task dropped before producing a result")]
    Canceled,
}

impl WorkError {
    /// A failure described only by a message.
    pub fn msg(message: impl Into<String>) -> Self {
        WorkError::Failed(message.into())
    }

    /// Wraps any error, keeping it reachable through `source()`.
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        WorkError::Source(Arc::new(error))
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        WorkError::Panicked(message)
    }
}

impl From<String> for WorkError {
    fn from(message: String) -> Self {
        WorkError::Failed(message)
    }
}

impl From<&str> for WorkError {
    fn from(message: &str) -> Self {
        WorkError::Failed(message.to_string())
    }
}

impl From<std::io::Error> for WorkError {
    fn from(error: std::io::Error) -> Self {
        WorkError::new(error)
    }
}

/// Errors surfaced to callers of the runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// A promise settled with a failure and was joined.
    #[error("composition failed: {0}")]
    Completion(#[source] WorkError),

    #[error("executor is shut down")]
    ExecutorClosed,

    #[error("timeout")]
    Timeout,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<WorkError> for Error {
    fn from(error: WorkError) -> Self {
        match error {
            WorkError::Rejected => Error::ExecutorClosed,
            other => Error::Completion(other),
        }
    }
}

impl Error {
    /// The stored failure behind a `Completion` error.
    pub fn work_error(&self) -> Option<&WorkError> {
        match self {
            Error::Completion(e) => Some(e),
            _ => None,
        }
    }
}
