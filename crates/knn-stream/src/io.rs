//! Engine IO contract.
//!
//! The engine's serializer pulls bytes through an [`IoReader`] and pushes
//! them through an [`IoWriter`]. Both count in elements: a call moves
//! `elem_size * elem_count` bytes and returns `elem_count`, never less.

use knn_types::VectorEncoding;

use crate::error::StreamError;

/// Source of an index's serialized bytes.
pub trait IoReader {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Fill `dst[..elem_size * elem_count]` and return `elem_count`.
    fn read(
        &mut self,
        dst: &mut [u8],
        elem_size: usize,
        elem_count: usize,
    ) -> Result<usize, StreamError>;

    /// Copy the next vector record into `dst` as native-endian `f32`s.
    ///
    /// `expected_byte_size` is the size of the record once widened to floats.
    /// Returns `false` when no record could be produced; `dst` is then
    /// untouched.
    fn read_vector(
        &mut self,
        dst: &mut [u8],
        expected_byte_size: usize,
        encoding: VectorEncoding,
    ) -> bool;
}

/// Sink for an index's serialized bytes.
pub trait IoWriter {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Write `src[..elem_size * elem_count]` and return `elem_count`.
    fn write(
        &mut self,
        src: &[u8],
        elem_size: usize,
        elem_count: usize,
    ) -> Result<usize, StreamError>;

    fn flush(&mut self) -> Result<(), StreamError>;

    /// OS file descriptor backing the writer, when there is one.
    fn file_descriptor(&self) -> Result<i32, StreamError>;
}

/// Byte length of an element transfer.
pub fn transfer_len(elem_size: usize, elem_count: usize) -> Result<usize, StreamError> {
    elem_size
        .checked_mul(elem_count)
        .ok_or(StreamError::Overflow {
            elem_size,
            elem_count,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_len() {
        assert_eq!(transfer_len(4, 3).unwrap(), 12);
        assert_eq!(transfer_len(0, 100).unwrap(), 0);
        assert!(matches!(
            transfer_len(usize::MAX, 2),
            Err(StreamError::Overflow { elem_count: 2, .. })
        ));
    }
}
