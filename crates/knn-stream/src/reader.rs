//! Stream reader adapter.
//!
//! Serves the engine's [`IoReader`] contract from a managed readable stream.
//! Raw reads go through the [`InputMediator`]. Vector records come from the
//! stream's vector source, which is bound on first use and held through a
//! durable reference until the reader is dropped.

use knn_runtime::signatures::{
    SOURCE_NEXT_BYTE_VECTOR, SOURCE_NEXT_FLOAT_VECTOR, STREAM_FULL_PRECISION_VECTORS,
};
use knn_runtime::{DurableRef, Elements, LocalRef, MethodId, ObjRef, ReturnKind, RuntimeError};
use knn_types::VectorEncoding;
use thiserror::Error;
use tracing::debug;

use crate::convert::{self, ConvertError};
use crate::error::StreamError;
use crate::io::{transfer_len, IoReader};
use crate::mediator::InputMediator;

/// Why a vector record read returned `false`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VectorMiss {
    /// The vector source or its accessor could not be bound
    #[error("vector source unavailable: {0}")]
    Binding(String),

    /// The source has no more records
    #[error("vector source exhausted")]
    Exhausted,

    /// The managed accessor raised
    #[error("vector accessor raised: {0}")]
    Exception(String),

    /// Widened record size differs from what the engine expects
    #[error("record is {actual} bytes widened, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    /// Engine buffer shorter than the record
    #[error("destination holds {actual} bytes, record needs {needed}")]
    DestinationTooSmall { needed: usize, actual: usize },

    /// Any other runtime failure during the read
    #[error("runtime failure: {0}")]
    Runtime(String),
}

impl VectorMiss {
    fn from_call(err: RuntimeError) -> Self {
        if err.is_exception() {
            VectorMiss::Exception(err.to_string())
        } else {
            VectorMiss::Runtime(err.to_string())
        }
    }
}

impl From<ConvertError> for VectorMiss {
    fn from(err: ConvertError) -> Self {
        match err {
            ConvertError::SizeMismatch { expected, actual } => {
                VectorMiss::SizeMismatch { expected, actual }
            }
            ConvertError::DestinationTooSmall { needed, actual } => {
                VectorMiss::DestinationTooSmall { needed, actual }
            }
        }
    }
}

/// Binding to the stream's vector source. Resolution is tried once; both
/// outcomes stick.
enum SourceState<'e> {
    Unresolved,
    Bound(DurableRef<'e>),
    Failed(String),
}

/// Engine-facing reader over a managed readable stream.
pub struct StreamReader<'e> {
    input: InputMediator<'e>,
    source: SourceState<'e>,
    accessors: [Option<MethodId>; 2],
    last_miss: Option<VectorMiss>,
    records: u64,
}

impl<'e> StreamReader<'e> {
    pub fn new(input: InputMediator<'e>) -> Self {
        Self {
            input,
            source: SourceState::Unresolved,
            accessors: [None, None],
            last_miss: None,
            records: 0,
        }
    }

    /// Reason the most recent vector read returned `false`, cleared by the
    /// next successful one.
    pub fn last_miss(&self) -> Option<&VectorMiss> {
        self.last_miss.as_ref()
    }

    /// Vector records delivered so far.
    pub fn records_read(&self) -> u64 {
        self.records
    }

    /// Whether a vector source binding is currently held.
    pub fn has_vector_source(&self) -> bool {
        matches!(self.source, SourceState::Bound(_))
    }

    fn vector_source(&mut self) -> Result<ObjRef, VectorMiss> {
        match &self.source {
            SourceState::Bound(source) => return Ok(source.get()),
            SourceState::Failed(reason) => return Err(VectorMiss::Binding(reason.clone())),
            SourceState::Unresolved => {}
        }

        match self.bind_source() {
            Ok(source) => {
                let obj = source.get();
                debug!(source = %obj, "Bound vector source");
                self.source = SourceState::Bound(source);
                Ok(obj)
            }
            Err(miss) => {
                debug!(reason = %miss, "Vector source unavailable");
                let reason = match &miss {
                    VectorMiss::Binding(reason) => reason.clone(),
                    other => other.to_string(),
                };
                self.source = SourceState::Failed(reason);
                Err(miss)
            }
        }
    }

    fn bind_source(&self) -> Result<DurableRef<'e>, VectorMiss> {
        let handle = self.input.handle();
        let env = handle.env();
        let stream = handle.stream();

        let factory = env
            .method(stream, &STREAM_FULL_PRECISION_VECTORS)
            .map_err(|e| VectorMiss::Binding(e.to_string()))?;
        let source = env
            .call_method(stream, factory, ReturnKind::Object, &[])
            .and_then(|value| value.into_object())
            .map_err(|e| VectorMiss::Binding(e.to_string()))?
            .ok_or_else(|| VectorMiss::Binding(format!("{} returned null", factory_name())))?;

        let local = LocalRef::new(env, source);
        local
            .promote()
            .map_err(|e| VectorMiss::Binding(e.to_string()))
    }

    fn accessor(
        &mut self,
        source: ObjRef,
        encoding: VectorEncoding,
    ) -> Result<MethodId, VectorMiss> {
        let slot = encoding.tag() as usize;
        if let Some(method) = self.accessors[slot] {
            return Ok(method);
        }
        let member = match encoding {
            VectorEncoding::Float32 => &SOURCE_NEXT_FLOAT_VECTOR,
            VectorEncoding::Int8 => &SOURCE_NEXT_BYTE_VECTOR,
        };
        let method = self
            .input
            .handle()
            .env()
            .method(source, member)
            .map_err(|e| VectorMiss::Binding(e.to_string()))?;
        self.accessors[slot] = Some(method);
        Ok(method)
    }

    fn next_record(
        &mut self,
        dst: &mut [u8],
        expected_byte_size: usize,
        encoding: VectorEncoding,
    ) -> Result<(), VectorMiss> {
        let source = self.vector_source()?;
        let accessor = self.accessor(source, encoding)?;
        let env = self.input.handle().env();

        let array = env
            .call_method(source, accessor, ReturnKind::Object, &[])
            .and_then(|value| value.into_object())
            .map_err(VectorMiss::from_call)?
            .ok_or(VectorMiss::Exhausted)?;
        let array = LocalRef::new(env, array);

        match encoding {
            VectorEncoding::Float32 => {
                let elements = Elements::floats(env, array.get()).map_err(VectorMiss::from_call)?;
                convert::copy_floats(&elements, expected_byte_size, dst)?;
            }
            VectorEncoding::Int8 => {
                let elements = Elements::bytes(env, array.get()).map_err(VectorMiss::from_call)?;
                convert::widen_int8(&elements, expected_byte_size, dst)?;
            }
        }
        Ok(())
    }
}

fn factory_name() -> &'static str {
    STREAM_FULL_PRECISION_VECTORS.name
}

impl IoReader for StreamReader<'_> {
    fn name(&self) -> &str {
        "StreamReader"
    }

    fn read(
        &mut self,
        dst: &mut [u8],
        elem_size: usize,
        elem_count: usize,
    ) -> Result<usize, StreamError> {
        let total = transfer_len(elem_size, elem_count)?;
        if dst.len() < total {
            return Err(StreamError::BufferTooSmall {
                needed: total,
                actual: dst.len(),
            });
        }
        self.input.copy_bytes(total, &mut dst[..total])?;
        Ok(elem_count)
    }

    fn read_vector(
        &mut self,
        dst: &mut [u8],
        expected_byte_size: usize,
        encoding: VectorEncoding,
    ) -> bool {
        match self.next_record(dst, expected_byte_size, encoding) {
            Ok(()) => {
                self.records += 1;
                self.last_miss = None;
                true
            }
            Err(miss) => {
                debug!(%encoding, expected_byte_size, reason = %miss, "Vector record not read");
                self.last_miss = Some(miss);
                false
            }
        }
    }
}

impl std::fmt::Debug for StreamReader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamReader")
            .field("input", &self.input)
            .field("vector_source", &self.has_vector_source())
            .field("records", &self.records)
            .finish()
    }
}
