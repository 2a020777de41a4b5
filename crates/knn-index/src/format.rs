//! Serialized index layout.
//!
//! All integers are little endian.
//!
//! ```text
//! magic    [u8; 4]  "KNNF"
//! version  u32
//! metric   u8
//! encoding u8
//! storage  u8       0 = inline, 1 = external
//! reserved u8
//! dim      u32
//! count    u64
//! ids      [i64; count]
//! payload  [f32 | i8; count * dim]   inline storage only
//! ```
//!
//! With external storage the payload stays on the managed side and is
//! replayed record by record on load.

use knn_stream::{IoReader, IoWriter};
use knn_types::{Metric, VectorEncoding};
use serde::Serialize;

use crate::error::IndexError;

pub const MAGIC: [u8; 4] = *b"KNNF";
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_LEN: usize = 24;
/// Largest vector dimension a header may declare.
pub const MAX_DIMENSION: u32 = 1 << 16;

/// Bytes requested from the reader per raw read while loading.
const READ_CHUNK: usize = 64 * 1024;

/// Where vector payloads live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Storage {
    Inline,
    External,
}

impl Storage {
    fn tag(self) -> u8 {
        match self {
            Storage::Inline => 0,
            Storage::External => 1,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Storage::Inline),
            1 => Some(Storage::External),
            _ => None,
        }
    }
}

/// Decoded index header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexHeader {
    pub version: u32,
    pub metric: Metric,
    pub encoding: VectorEncoding,
    pub storage: Storage,
    pub dimension: u32,
    pub count: u64,
}

impl IndexHeader {
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&MAGIC);
        out[4..8].copy_from_slice(&self.version.to_le_bytes());
        out[8] = self.metric.tag();
        out[9] = self.encoding.tag();
        out[10] = self.storage.tag();
        out[12..16].copy_from_slice(&self.dimension.to_le_bytes());
        out[16..24].copy_from_slice(&self.count.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8; HEADER_LEN]) -> Result<Self, IndexError> {
        if bytes[0..4] != MAGIC {
            return Err(IndexError::InvalidFormat("bad magic".to_string()));
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != FORMAT_VERSION {
            return Err(IndexError::UnsupportedVersion(version));
        }
        let metric = Metric::from_tag(bytes[8])
            .ok_or_else(|| IndexError::InvalidFormat(format!("unknown metric tag {}", bytes[8])))?;
        let encoding = VectorEncoding::from_tag(bytes[9]).ok_or_else(|| {
            IndexError::InvalidFormat(format!("unknown encoding tag {}", bytes[9]))
        })?;
        let storage = Storage::from_tag(bytes[10]).ok_or_else(|| {
            IndexError::InvalidFormat(format!("unknown storage tag {}", bytes[10]))
        })?;
        let dimension = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]);
        if dimension == 0 || dimension > MAX_DIMENSION {
            return Err(IndexError::InvalidFormat(format!(
                "dimension {} outside 1..={}",
                dimension, MAX_DIMENSION
            )));
        }
        let mut count = [0u8; 8];
        count.copy_from_slice(&bytes[16..24]);

        Ok(Self {
            version,
            metric,
            encoding,
            storage,
            dimension,
            count: u64::from_le_bytes(count),
        })
    }

    /// Number of stored elements, `count * dimension`.
    pub fn elements(&self) -> Result<usize, IndexError> {
        usize::try_from(self.count)
            .ok()
            .and_then(|count| count.checked_mul(self.dimension as usize))
            .ok_or_else(|| IndexError::InvalidFormat(format!("{} vectors overflow", self.count)))
    }
}

pub fn write_header(writer: &mut dyn IoWriter, header: &IndexHeader) -> Result<(), IndexError> {
    let bytes = header.encode();
    writer.write(&bytes, 1, bytes.len())?;
    Ok(())
}

pub fn read_header(reader: &mut dyn IoReader) -> Result<IndexHeader, IndexError> {
    let mut bytes = [0u8; HEADER_LEN];
    reader.read(&mut bytes, 1, HEADER_LEN)?;
    IndexHeader::decode(&bytes)
}

/// Read `count` elements of `elem_size` bytes each.
///
/// The buffer grows only as bytes arrive, so a header claiming more data
/// than the stream holds ends in an EOF error rather than a huge allocation.
pub fn read_elements(
    reader: &mut dyn IoReader,
    elem_size: usize,
    count: usize,
) -> Result<Vec<u8>, IndexError> {
    if elem_size == 0 {
        return Err(IndexError::InvalidParameter("zero element size".to_string()));
    }
    let len = elem_size
        .checked_mul(count)
        .ok_or_else(|| IndexError::InvalidFormat(format!("{} elements overflow", count)))?;
    let per_read = (READ_CHUNK / elem_size).max(1);

    let mut bytes = Vec::with_capacity(len.min(READ_CHUNK));
    let mut remaining = count;
    while remaining > 0 {
        let take = remaining.min(per_read);
        let start = bytes.len();
        bytes.resize(start + take * elem_size, 0);
        reader.read(&mut bytes[start..], elem_size, take)?;
        remaining -= take;
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use knn_stream::StreamError;

    /// Serves bytes from a slice, recording the largest request.
    struct SliceReader {
        data: Vec<u8>,
        pos: usize,
        largest: usize,
    }

    impl IoReader for SliceReader {
        fn name(&self) -> &str {
            "slice"
        }

        fn read(
            &mut self,
            dst: &mut [u8],
            elem_size: usize,
            elem_count: usize,
        ) -> Result<usize, StreamError> {
            let n = elem_size * elem_count;
            self.largest = self.largest.max(n);
            let available = self.data.len() - self.pos;
            if available < n {
                return Err(StreamError::UnexpectedEof {
                    requested: n,
                    copied: available,
                });
            }
            dst[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(elem_count)
        }

        fn read_vector(&mut self, _: &mut [u8], _: usize, _: VectorEncoding) -> bool {
            false
        }
    }

    fn slice_reader(data: Vec<u8>) -> SliceReader {
        SliceReader {
            data,
            pos: 0,
            largest: 0,
        }
    }

    fn header() -> IndexHeader {
        IndexHeader {
            version: FORMAT_VERSION,
            metric: Metric::InnerProduct,
            encoding: VectorEncoding::Int8,
            storage: Storage::External,
            dimension: 3,
            count: 7,
        }
    }

    #[test]
    fn test_header_layout() {
        let bytes = header().encode();
        assert_eq!(&bytes[0..4], b"KNNF");
        assert_eq!(bytes[4], 1);
        assert_eq!(&bytes[8..12], &[1, 1, 1, 0]);
        assert_eq!(bytes[12], 3);
        assert_eq!(bytes[16], 7);
        assert_eq!(IndexHeader::decode(&bytes).unwrap(), header());
    }

    #[test]
    fn test_rejects_bad_header() {
        let mut bytes = header().encode();
        bytes[0] = b'X';
        assert!(matches!(
            IndexHeader::decode(&bytes),
            Err(IndexError::InvalidFormat(_))
        ));

        let mut bytes = header().encode();
        bytes[4] = 9;
        assert!(matches!(
            IndexHeader::decode(&bytes),
            Err(IndexError::UnsupportedVersion(9))
        ));

        let mut bytes = header().encode();
        bytes[10] = 5;
        assert!(IndexHeader::decode(&bytes).is_err());
    }

    #[test]
    fn test_rejects_oversized_dimension() {
        let mut h = header();
        h.dimension = MAX_DIMENSION + 1;
        assert!(matches!(
            IndexHeader::decode(&h.encode()),
            Err(IndexError::InvalidFormat(_))
        ));

        h.dimension = MAX_DIMENSION;
        assert_eq!(IndexHeader::decode(&h.encode()).unwrap().dimension, MAX_DIMENSION);
    }

    #[test]
    fn test_read_elements_in_bounded_chunks() {
        let data: Vec<u8> = (0..200_000u32).map(|v| v as u8).collect();
        let mut reader = slice_reader(data.clone());
        let bytes = read_elements(&mut reader, 4, 50_000).unwrap();
        assert_eq!(bytes, data);
        assert!(reader.largest <= READ_CHUNK);
    }

    #[test]
    fn test_read_elements_short_stream_fails_without_allocating() {
        let mut reader = slice_reader(vec![0u8; 16]);
        let result = read_elements(&mut reader, 8, 1usize << 50);
        assert!(matches!(
            result,
            Err(IndexError::Stream(StreamError::UnexpectedEof { .. }))
        ));
        assert!(reader.largest <= READ_CHUNK);
    }

    #[test]
    fn test_element_count_overflow() {
        let mut h = header();
        h.count = u64::MAX;
        h.dimension = u32::MAX;
        assert!(h.elements().is_err());
    }
}
