//! Exhaustive vector index.
//!
//! Scores every stored vector against the query. Vectors are stored either
//! as `f32` or as `int8` codes; an ADC load widens `int8` codes to `f32` so
//! float queries can be scored against them.

use std::sync::Arc;

use knn_stream::convert::floats_from_ne_bytes;
use knn_stream::{IoReader, IoWriter};
use knn_types::{Metric, VectorEncoding, FLOAT_SIZE};
use serde::Serialize;
use tracing::debug;

use crate::error::IndexError;
use crate::format::{self, IndexHeader, Storage, FORMAT_VERSION, MAX_DIMENSION};
use crate::shared::SharedIndexState;

/// Stored vector payload, row-major.
#[derive(Debug, Clone, PartialEq)]
pub enum VectorStorage {
    Float32(Vec<f32>),
    Int8(Vec<i8>),
}

impl VectorStorage {
    fn empty(encoding: VectorEncoding) -> Self {
        match encoding {
            VectorEncoding::Float32 => VectorStorage::Float32(Vec::new()),
            VectorEncoding::Int8 => VectorStorage::Int8(Vec::new()),
        }
    }

    pub fn encoding(&self) -> VectorEncoding {
        match self {
            VectorStorage::Float32(_) => VectorEncoding::Float32,
            VectorStorage::Int8(_) => VectorEncoding::Int8,
        }
    }
}

/// Search query in either encoding.
#[derive(Debug, Clone, Copy)]
pub enum Query<'a> {
    Float(&'a [f32]),
    Int8(&'a [i8]),
}

impl Query<'_> {
    fn len(&self) -> usize {
        match self {
            Query::Float(q) => q.len(),
            Query::Int8(q) => q.len(),
        }
    }

    fn widened(&self) -> Vec<f32> {
        match self {
            Query::Float(q) => q.to_vec(),
            Query::Int8(q) => q.iter().map(|&v| f32::from(v)).collect(),
        }
    }
}

/// Result of a search
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub id: i64,
    /// Squared distance for L2 (lower is closer), inner product otherwise
    pub score: f32,
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Flat index over `dimension`-sized vectors with caller-assigned ids.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimension: usize,
    metric: Metric,
    ids: Vec<i64>,
    storage: VectorStorage,
    adc: bool,
    shared: Option<Arc<SharedIndexState>>,
}

impl FlatIndex {
    pub fn new(
        dimension: usize,
        metric: Metric,
        encoding: VectorEncoding,
    ) -> Result<Self, IndexError> {
        if dimension == 0 || dimension > MAX_DIMENSION as usize {
            return Err(IndexError::InvalidParameter(format!(
                "dimension must be in 1..={}, got {}",
                MAX_DIMENSION, dimension
            )));
        }
        Ok(Self {
            dimension,
            metric,
            ids: Vec::new(),
            storage: VectorStorage::empty(encoding),
            adc: false,
            shared: None,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Encoding vectors are held in.
    pub fn encoding(&self) -> VectorEncoding {
        self.storage.encoding()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    /// Whether `int8` codes were widened on load.
    pub fn is_adc(&self) -> bool {
        self.adc
    }

    fn check_dimension(&self, actual: usize) -> Result<(), IndexError> {
        if actual != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual,
            });
        }
        Ok(())
    }

    fn detach_shared(&mut self) {
        if self.shared.take().is_some() {
            debug!("Index changed, shared state detached");
        }
    }

    pub fn add_float(&mut self, id: i64, vector: &[f32]) -> Result<(), IndexError> {
        self.check_dimension(vector.len())?;
        match &mut self.storage {
            VectorStorage::Float32(values) => values.extend_from_slice(vector),
            VectorStorage::Int8(_) => {
                return Err(IndexError::EncodingMismatch {
                    expected: VectorEncoding::Int8,
                    actual: VectorEncoding::Float32,
                })
            }
        }
        self.ids.push(id);
        self.detach_shared();
        Ok(())
    }

    pub fn add_int8(&mut self, id: i64, vector: &[i8]) -> Result<(), IndexError> {
        self.check_dimension(vector.len())?;
        match &mut self.storage {
            VectorStorage::Int8(values) => values.extend_from_slice(vector),
            VectorStorage::Float32(_) => {
                return Err(IndexError::EncodingMismatch {
                    expected: VectorEncoding::Float32,
                    actual: VectorEncoding::Int8,
                })
            }
        }
        self.ids.push(id);
        self.detach_shared();
        Ok(())
    }

    /// Stored vector at `position`, widened to `f32`.
    pub fn vector(&self, position: usize) -> Option<Vec<f32>> {
        if position >= self.len() {
            return None;
        }
        let range = position * self.dimension..(position + 1) * self.dimension;
        Some(match &self.storage {
            VectorStorage::Float32(values) => values[range].to_vec(),
            VectorStorage::Int8(values) => values[range].iter().map(|&v| f32::from(v)).collect(),
        })
    }

    fn dot_at(&self, position: usize, query: &[f32]) -> f32 {
        let range = position * self.dimension..(position + 1) * self.dimension;
        match &self.storage {
            VectorStorage::Float32(values) => dot(&values[range], query),
            VectorStorage::Int8(values) => values[range]
                .iter()
                .zip(query)
                .map(|(&v, q)| f32::from(v) * q)
                .sum(),
        }
    }

    /// Squared norm of every stored vector.
    pub(crate) fn squared_norms(&self) -> Vec<f32> {
        (0..self.len())
            .map(|position| match self.vector(position) {
                Some(v) => dot(&v, &v),
                None => 0.0,
            })
            .collect()
    }

    /// Shared state attached with [`set_shared_state`](crate::shared::set_shared_state).
    pub fn shared_state(&self) -> Option<&Arc<SharedIndexState>> {
        self.shared.as_ref()
    }

    pub(crate) fn attach_shared(&mut self, state: Arc<SharedIndexState>) {
        self.shared = Some(state);
    }

    /// Return the `k` closest vectors, best first.
    pub fn search(&self, query: Query<'_>, k: usize) -> Result<Vec<SearchResult>, IndexError> {
        self.check_dimension(query.len())?;
        match (&self.storage, query) {
            (VectorStorage::Int8(_), Query::Float(_)) => return Err(IndexError::AdcRequired),
            (VectorStorage::Float32(_), Query::Int8(_)) if !self.adc => {
                return Err(IndexError::EncodingMismatch {
                    expected: VectorEncoding::Float32,
                    actual: VectorEncoding::Int8,
                })
            }
            _ => {}
        }

        let norms = match self.metric {
            Metric::L2 => Some(
                self.shared
                    .as_ref()
                    .ok_or(IndexError::SharedStateMissing)?
                    .norms(),
            ),
            Metric::InnerProduct => None,
        };

        let query = query.widened();
        let query_norm = dot(&query, &query);
        let mut results: Vec<SearchResult> = self
            .ids
            .iter()
            .enumerate()
            .map(|(position, &id)| {
                let ip = self.dot_at(position, &query);
                let score = match norms {
                    Some(norms) => query_norm - 2.0 * ip + norms[position],
                    None => ip,
                };
                SearchResult { id, score }
            })
            .collect();

        match self.metric {
            Metric::L2 => results.sort_by(|a, b| a.score.total_cmp(&b.score)),
            Metric::InnerProduct => results.sort_by(|a, b| b.score.total_cmp(&a.score)),
        }
        results.truncate(k);
        Ok(results)
    }

    /// Header describing this index when written with `storage`.
    pub fn header(&self, storage: Storage) -> IndexHeader {
        IndexHeader {
            version: FORMAT_VERSION,
            metric: self.metric,
            encoding: self.encoding(),
            storage,
            dimension: self.dimension as u32,
            count: self.len() as u64,
        }
    }

    /// Serialize through `writer`. External storage leaves out the payload.
    pub fn write_to(&self, writer: &mut dyn IoWriter, storage: Storage) -> Result<(), IndexError> {
        format::write_header(writer, &self.header(storage))?;

        let ids: Vec<u8> = self.ids.iter().flat_map(|id| id.to_le_bytes()).collect();
        writer.write(&ids, 8, self.ids.len())?;

        if storage == Storage::Inline {
            let (bytes, elements): (Vec<u8>, usize) = match &self.storage {
                VectorStorage::Float32(values) => {
                    (values.iter().flat_map(|v| v.to_le_bytes()).collect(), values.len())
                }
                VectorStorage::Int8(values) => {
                    (values.iter().map(|&v| v as u8).collect(), values.len())
                }
            };
            writer.write(&bytes, self.encoding().element_width(), elements)?;
        }

        debug!(
            writer = writer.name(),
            vectors = self.len(),
            ?storage,
            "Serialized index"
        );
        Ok(())
    }

    /// Deserialize from `reader`. With `adc`, `int8` codes are widened to `f32`.
    pub fn read_from(reader: &mut dyn IoReader, adc: bool) -> Result<Self, IndexError> {
        let header = format::read_header(reader)?;
        let count = usize::try_from(header.count)
            .map_err(|_| IndexError::InvalidFormat(format!("{} vectors overflow", header.count)))?;
        let elements = header.elements()?;

        let ids = format::read_elements(reader, 8, count)?
            .chunks_exact(8)
            .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
            .collect();

        let storage = match header.storage {
            Storage::Inline => {
                let width = header.encoding.element_width();
                let payload = format::read_elements(reader, width, elements)?;
                match header.encoding {
                    VectorEncoding::Float32 => VectorStorage::Float32(
                        payload
                            .chunks_exact(FLOAT_SIZE)
                            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                            .collect(),
                    ),
                    VectorEncoding::Int8 if adc => VectorStorage::Float32(
                        payload.iter().map(|&v| f32::from(v as i8)).collect(),
                    ),
                    VectorEncoding::Int8 => {
                        VectorStorage::Int8(payload.iter().map(|&v| v as i8).collect())
                    }
                }
            }
            Storage::External => Self::replay_vectors(reader, &header, adc)?,
        };

        debug!(
            reader = reader.name(),
            vectors = count,
            dimension = header.dimension,
            adc,
            "Deserialized index"
        );
        Ok(Self {
            dimension: header.dimension as usize,
            metric: header.metric,
            ids,
            storage,
            adc: adc && header.encoding == VectorEncoding::Int8,
            shared: None,
        })
    }

    /// Pull externally stored vectors through the reader's vector path.
    /// Records always arrive widened to `f32`.
    fn replay_vectors(
        reader: &mut dyn IoReader,
        header: &IndexHeader,
        adc: bool,
    ) -> Result<VectorStorage, IndexError> {
        let record_len = header.dimension as usize * FLOAT_SIZE;
        let mut record = vec![0u8; record_len];
        let mut values = Vec::new();

        for loaded in 0..header.count {
            if !reader.read_vector(&mut record, record_len, header.encoding) {
                return Err(IndexError::MissingVectors {
                    loaded,
                    expected: header.count,
                });
            }
            values.extend(floats_from_ne_bytes(&record));
        }

        Ok(match (header.encoding, adc) {
            // Widened codes are exact, so narrowing restores them.
            (VectorEncoding::Int8, false) => {
                VectorStorage::Int8(values.into_iter().map(|v| v as i8).collect())
            }
            _ => VectorStorage::Float32(values),
        })
    }
}
