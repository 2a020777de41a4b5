//! Index error types.

use knn_stream::StreamError;
use knn_types::VectorEncoding;
use thiserror::Error;

/// Errors that can occur while building, storing, loading or searching an index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Stream adapter or managed runtime failure
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// Dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Serialized bytes are not a valid index
    #[error("Invalid index format: {0}")]
    InvalidFormat(String),

    /// Serialized by a newer format version
    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u32),

    /// Vector encoding does not match the index
    #[error("Encoding mismatch: index stores {expected}, got {actual}")]
    EncodingMismatch {
        expected: VectorEncoding,
        actual: VectorEncoding,
    },

    /// Float queries against int8 codes need an ADC load
    #[error("Float query against int8 codes requires an ADC load")]
    AdcRequired,

    /// Externally stored vectors ran out during load
    #[error("Vector source ended after {loaded} of {expected} vectors")]
    MissingVectors { loaded: u64, expected: u64 },

    /// Search needs shared state that was never attached
    #[error("Shared index state required but not set")]
    SharedStateMissing,

    /// Shared state built for a different index
    #[error("Shared index state does not match index: {0}")]
    SharedStateMismatch(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}
