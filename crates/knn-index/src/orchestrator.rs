//! Load and store orchestration.
//!
//! Each operation builds one adapter over the stream it was handed, runs the
//! engine's (de)serializer against it and tears it down before returning.
//! Nothing here retains the execution context or the stream.

use knn_runtime::{Env, ObjRef};
use knn_stream::{InputMediator, IoWriter, OutputMediator, StreamReader, StreamWriter};
use knn_types::config::DEFAULT_COPY_CHUNK_SIZE;
use knn_types::Settings;
use tracing::{debug, info};

use crate::error::IndexError;
use crate::flat::FlatIndex;
use crate::format::{self, IndexHeader, Storage};

/// Options for [`write_index`].
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// Bytes per managed write call
    pub copy_chunk_size: usize,
    /// Leave vectors out; they are replayed from the managed side on load
    pub external_vectors: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            copy_chunk_size: DEFAULT_COPY_CHUNK_SIZE,
            external_vectors: false,
        }
    }
}

impl StoreOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            copy_chunk_size: settings.stream.copy_chunk_size,
            external_vectors: settings.index.external_vectors,
        }
    }

    pub fn with_external_vectors(mut self, external: bool) -> Self {
        self.external_vectors = external;
        self
    }

    fn storage(&self) -> Storage {
        if self.external_vectors {
            Storage::External
        } else {
            Storage::Inline
        }
    }
}

/// Options for the load operations.
#[derive(Debug, Clone, Copy)]
pub struct LoadOptions {
    /// Bytes per managed read call
    pub copy_chunk_size: usize,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            copy_chunk_size: DEFAULT_COPY_CHUNK_SIZE,
        }
    }
}

impl LoadOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            copy_chunk_size: settings.stream.copy_chunk_size,
        }
    }
}

/// Serialize `index` to the managed writable stream `output` and flush it.
pub fn write_index(
    env: &dyn Env,
    output: Option<ObjRef>,
    index: &FlatIndex,
    options: &StoreOptions,
) -> Result<(), IndexError> {
    let mut writer = StreamWriter::new(OutputMediator::new(env, output, options.copy_chunk_size)?);
    index.write_to(&mut writer, options.storage())?;
    writer.flush()?;

    info!(
        vectors = index.len(),
        bytes = writer.bytes_written(),
        external = options.external_vectors,
        "Stored index"
    );
    Ok(())
}

fn load(
    env: &dyn Env,
    input: Option<ObjRef>,
    options: &LoadOptions,
    adc: bool,
) -> Result<FlatIndex, IndexError> {
    let mut reader = StreamReader::new(InputMediator::new(env, input, options.copy_chunk_size)?);
    let index = FlatIndex::read_from(&mut reader, adc)?;
    if let Some(miss) = reader.last_miss() {
        debug!(reason = %miss, "Last vector read missed");
    }
    info!(
        vectors = index.len(),
        replayed = reader.records_read(),
        adc,
        "Loaded index"
    );
    Ok(index)
}

/// Deserialize an index from the managed readable stream `input`.
pub fn load_index_with_stream(
    env: &dyn Env,
    input: Option<ObjRef>,
    options: &LoadOptions,
) -> Result<FlatIndex, IndexError> {
    load(env, input, options, false)
}

/// As [`load_index_with_stream`], widening `int8` codes to `f32` so float
/// queries can be scored against them.
pub fn load_index_with_stream_adc(
    env: &dyn Env,
    input: Option<ObjRef>,
    options: &LoadOptions,
) -> Result<FlatIndex, IndexError> {
    load(env, input, options, true)
}

/// Read only the header of the index in `input`.
pub fn read_index_header(
    env: &dyn Env,
    input: Option<ObjRef>,
    options: &LoadOptions,
) -> Result<IndexHeader, IndexError> {
    let mut reader = StreamReader::new(InputMediator::new(env, input, options.copy_chunk_size)?);
    format::read_header(&mut reader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use knn_runtime::{LocalRuntime, SharedBuffer, VectorSupply};
    use knn_stream::StreamError;
    use knn_types::{Metric, VectorEncoding};
    use std::io::Cursor;

    fn small_index() -> FlatIndex {
        let mut index = FlatIndex::new(2, Metric::InnerProduct, VectorEncoding::Float32).unwrap();
        index.add_float(5, &[1.0, 2.0]).unwrap();
        index.add_float(6, &[3.0, 4.0]).unwrap();
        index
    }

    #[test]
    fn test_store_flushes() {
        let runtime = LocalRuntime::new();
        let sink = SharedBuffer::new();
        let output = runtime.register_output(sink.clone());
        let env = runtime.attach();

        write_index(&env, Some(output), &small_index(), &StoreOptions::default()).unwrap();
        assert_eq!(runtime.calls("flush"), 1);
        assert_eq!(sink.len(), format::HEADER_LEN + 2 * 8 + 4 * 4);
    }

    #[test]
    fn test_null_streams_rejected() {
        let runtime = LocalRuntime::new();
        let env = runtime.attach();
        assert!(matches!(
            write_index(&env, None, &small_index(), &StoreOptions::default()),
            Err(IndexError::Stream(StreamError::MissingCollaborator(_)))
        ));
        assert!(load_index_with_stream(&env, None, &LoadOptions::default()).is_err());
    }

    #[test]
    fn test_truncated_stream_fails_load() {
        let runtime = LocalRuntime::new();
        let sink = SharedBuffer::new();
        let output = runtime.register_output(sink.clone());
        let env = runtime.attach();
        write_index(&env, Some(output), &small_index(), &StoreOptions::default()).unwrap();

        let mut bytes = sink.contents();
        bytes.truncate(bytes.len() - 3);
        let input = runtime.register_input(Cursor::new(bytes));
        assert!(matches!(
            load_index_with_stream(&env, Some(input), &LoadOptions::default()),
            Err(IndexError::Stream(StreamError::UnexpectedEof { .. }))
        ));
    }

    #[test]
    fn test_read_header_only() {
        let runtime = LocalRuntime::new();
        let sink = SharedBuffer::new();
        let output = runtime.register_output(sink.clone());
        let env = runtime.attach();
        let options = StoreOptions::default().with_external_vectors(true);
        write_index(&env, Some(output), &small_index(), &options).unwrap();

        let input = runtime.register_input_with_vectors(
            Cursor::new(sink.contents()),
            VectorSupply::Float(vec![vec![1.0, 2.0], vec![3.0, 4.0]]),
        );
        let header = read_index_header(&env, Some(input), &LoadOptions::default()).unwrap();
        assert_eq!(header.storage, Storage::External);
        assert_eq!(header.count, 2);
        assert_eq!(runtime.calls("getFullPrecisionVectors"), 0);
    }
}
