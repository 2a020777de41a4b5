//! Vector record conversion.
//!
//! Records reach the engine as native-endian `f32`s whatever their managed
//! encoding. The size check always runs against the widened length and
//! happens before anything is written.

use knn_types::{VectorEncoding, FLOAT_SIZE};
use thiserror::Error;

/// Why a record could not be copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConvertError {
    #[error("record is {actual} bytes widened, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("destination holds {actual} bytes, record needs {needed}")]
    DestinationTooSmall { needed: usize, actual: usize },
}

/// Copy `values` into `dst`, widening each one to `f32` through `widen`.
pub fn widen_into<T: Copy>(
    values: &[T],
    expected_byte_size: usize,
    dst: &mut [u8],
    widen: impl Fn(T) -> f32,
) -> Result<(), ConvertError> {
    let actual = VectorEncoding::widened_byte_len(values.len()).unwrap_or(usize::MAX);
    if actual != expected_byte_size {
        return Err(ConvertError::SizeMismatch {
            expected: expected_byte_size,
            actual,
        });
    }
    if dst.len() < actual {
        return Err(ConvertError::DestinationTooSmall {
            needed: actual,
            actual: dst.len(),
        });
    }

    for (out, value) in dst.chunks_exact_mut(FLOAT_SIZE).zip(values) {
        out.copy_from_slice(&widen(*value).to_ne_bytes());
    }
    Ok(())
}

/// Full-precision records are copied as they are.
pub fn copy_floats(
    values: &[f32],
    expected_byte_size: usize,
    dst: &mut [u8],
) -> Result<(), ConvertError> {
    widen_into(values, expected_byte_size, dst, |v| v)
}

/// Integer codes are widened by value: `-2` becomes `-2.0`.
pub fn widen_int8(
    values: &[i8],
    expected_byte_size: usize,
    dst: &mut [u8],
) -> Result<(), ConvertError> {
    widen_into(values, expected_byte_size, dst, f32::from)
}

/// Decode native-endian `f32`s, the inverse of the copies above.
pub fn floats_from_ne_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(FLOAT_SIZE)
        .map(|c| f32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}
