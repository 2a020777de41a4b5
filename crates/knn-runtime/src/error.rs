//! Managed runtime error types.

use thiserror::Error;

/// Errors raised while crossing into the managed runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The managed side raised an exception
    #[error("Managed exception {class}: {message}")]
    Exception { class: String, message: String },

    /// A class does not expose the requested member
    #[error("Method not found: {class}.{name}{signature}")]
    MethodNotFound {
        class: String,
        name: String,
        signature: String,
    },

    /// Reference is null, deleted, or belongs to another call
    #[error("Invalid reference: {0:#x}")]
    InvalidReference(u64),

    /// Object or value has the wrong type for the operation
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: String,
    },

    /// Array region outside the array
    #[error("Array region {start}+{len} exceeds length {length}")]
    OutOfBounds {
        start: usize,
        len: usize,
        length: usize,
    },

    /// Too many live transient references in one call
    #[error("Local reference capacity exceeded ({0})")]
    LocalCapacityExceeded(usize),

    /// Failure reported by the native bridge itself
    #[error("Bridge error: {0}")]
    Bridge(String),
}

impl RuntimeError {
    /// Whether the error originated as a managed-side exception.
    pub fn is_exception(&self) -> bool {
        matches!(self, RuntimeError::Exception { .. })
    }
}
