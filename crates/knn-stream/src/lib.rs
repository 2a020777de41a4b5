//! # knn-stream
//!
//! Serves a vector engine's IO contract from managed index streams.
//!
//! The engine serializes an index through [`IoWriter`] and deserializes it
//! through [`IoReader`]. [`StreamWriter`] and [`StreamReader`] implement
//! those traits on top of a managed writable or readable stream, moving bytes
//! through the [`InputMediator`] and [`OutputMediator`] without buffering the
//! whole index in native memory.
//!
//! The reader also has a vector-record path: records come straight from the
//! stream's vector source and are widened to `f32` when the managed side
//! stores them as `int8` codes.

pub mod convert;
pub mod error;
pub mod io;
pub mod mediator;
pub mod reader;
pub mod writer;

pub use error::StreamError;
pub use io::{transfer_len, IoReader, IoWriter};
pub use mediator::{InputMediator, OutputMediator};
pub use reader::{StreamReader, VectorMiss};
pub use writer::StreamWriter;
