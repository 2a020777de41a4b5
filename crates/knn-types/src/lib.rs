//! # knn-types
//!
//! Shared types for the knn-stream bridge.
//!
//! - [`VectorEncoding`]: the two vector record encodings the bridge can serve
//! - [`Metric`]: distance metric tags carried in serialized indexes
//! - [`Settings`]: layered configuration for the bridge and its tools

pub mod config;
pub mod encoding;
pub mod error;

pub use config::{IndexSettings, RuntimeSettings, Settings, StreamSettings};
pub use encoding::{Metric, VectorEncoding, FLOAT_SIZE};
pub use error::ConfigError;
