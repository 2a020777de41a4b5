//! Stream adapter error types.

use knn_runtime::RuntimeError;
use thiserror::Error;

/// Errors surfaced to the engine by the stream adapters.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Managed call, binding or reference failure
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// The managed stream ended before the requested bytes arrived
    #[error("Unexpected end of stream: requested {requested} bytes, copied {copied}")]
    UnexpectedEof { requested: usize, copied: usize },

    /// Caller buffer shorter than the requested transfer
    #[error("Buffer too small: need {needed} bytes, have {actual}")]
    BufferTooSmall { needed: usize, actual: usize },

    /// `elem_size * elem_count` does not fit in memory
    #[error("Transfer size overflows: {elem_size} x {elem_count}")]
    Overflow { elem_size: usize, elem_count: usize },

    /// Operation the adapter cannot provide
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// A required managed collaborator was null
    #[error("Missing collaborator: {0}")]
    MissingCollaborator(&'static str),

    /// The managed side broke the stream contract
    #[error("Protocol violation: {0}")]
    Protocol(String),
}

impl StreamError {
    /// Whether the failure was raised by the managed side.
    pub fn is_exception(&self) -> bool {
        matches!(self, StreamError::Runtime(e) if e.is_exception())
    }
}
