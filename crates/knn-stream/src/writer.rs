//! Stream writer adapter.

use tracing::warn;

use crate::error::StreamError;
use crate::io::{transfer_len, IoWriter};
use crate::mediator::OutputMediator;

/// Engine-facing writer over a managed writable stream.
///
/// Bytes are forwarded as they are written; nothing is buffered on the
/// native side. The owner flushes before dropping it.
#[derive(Debug)]
pub struct StreamWriter<'e> {
    output: OutputMediator<'e>,
    written: u64,
    unflushed: usize,
}

impl<'e> StreamWriter<'e> {
    pub fn new(output: OutputMediator<'e>) -> Self {
        Self {
            output,
            written: 0,
            unflushed: 0,
        }
    }

    /// Bytes handed to the managed stream so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }
}

impl IoWriter for StreamWriter<'_> {
    fn name(&self) -> &str {
        "StreamWriter"
    }

    fn write(
        &mut self,
        src: &[u8],
        elem_size: usize,
        elem_count: usize,
    ) -> Result<usize, StreamError> {
        let total = transfer_len(elem_size, elem_count)?;
        if total == 0 {
            return Ok(elem_count);
        }
        if src.len() < total {
            return Err(StreamError::BufferTooSmall {
                needed: total,
                actual: src.len(),
            });
        }
        self.output.write_bytes(&src[..total])?;
        self.written += total as u64;
        self.unflushed += total;
        Ok(elem_count)
    }

    fn flush(&mut self) -> Result<(), StreamError> {
        self.output.flush()?;
        self.unflushed = 0;
        Ok(())
    }

    fn file_descriptor(&self) -> Result<i32, StreamError> {
        Err(StreamError::Unsupported("file_descriptor"))
    }
}

impl Drop for StreamWriter<'_> {
    fn drop(&mut self) {
        if self.unflushed > 0 {
            warn!(bytes = self.unflushed, "Stream writer dropped with unflushed bytes");
        }
    }
}
