//! Host-side helpers for streams registered with the local runtime.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use knn_types::VectorEncoding;

/// Original-precision vectors a readable stream can replay.
///
/// A supply holds one encoding; asking its source for the other encoding
/// yields no record.
#[derive(Debug, Clone, PartialEq)]
pub enum VectorSupply {
    Float(Vec<Vec<f32>>),
    Int8(Vec<Vec<i8>>),
}

impl VectorSupply {
    pub fn encoding(&self) -> VectorEncoding {
        match self {
            VectorSupply::Float(_) => VectorEncoding::Float32,
            VectorSupply::Int8(_) => VectorEncoding::Int8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            VectorSupply::Float(vectors) => vectors.len(),
            VectorSupply::Int8(vectors) => vectors.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory sink that can be registered as a writable stream while the
/// host keeps a handle to inspect what was written.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
