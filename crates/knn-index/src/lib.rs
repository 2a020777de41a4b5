//! # knn-index
//!
//! A flat vector index that loads and stores itself through managed streams.
//!
//! - [`FlatIndex`]: exhaustive search over `f32` or `int8` vectors
//! - [`orchestrator`]: store to a writable stream, load from a readable one,
//!   optionally widening `int8` codes for ADC scoring
//! - [`shared`]: precomputed state some indexes need before searching
//! - [`format`]: the serialized layout

pub mod error;
pub mod flat;
pub mod format;
pub mod orchestrator;
pub mod shared;

pub use error::IndexError;
pub use flat::{FlatIndex, Query, SearchResult, VectorStorage};
pub use format::{IndexHeader, Storage};
pub use orchestrator::{
    load_index_with_stream, load_index_with_stream_adc, read_index_header, write_index,
    LoadOptions, StoreOptions,
};
pub use shared::{
    free_shared_state, init_shared_state, is_shared_state_required, set_shared_state,
    SharedIndexState,
};
