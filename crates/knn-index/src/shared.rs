//! Shared index state.
//!
//! Some indexes need precomputed state before they can be searched. For the
//! flat index that is the squared-norm table used to score L2 queries. The
//! state is built once, may be shared by several loaded copies of the same
//! index, and is attached explicitly after loading.

use std::sync::Arc;

use knn_types::Metric;
use tracing::debug;

use crate::error::IndexError;
use crate::flat::FlatIndex;

/// Precomputed search state for one index.
#[derive(Debug, Clone, PartialEq)]
pub struct SharedIndexState {
    dimension: usize,
    metric: Metric,
    norms: Vec<f32>,
}

impl SharedIndexState {
    /// Dimension of the index the state was built from.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Squared norm of each vector, by position.
    pub fn norms(&self) -> &[f32] {
        &self.norms
    }

    pub fn len(&self) -> usize {
        self.norms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.norms.is_empty()
    }
}

/// Whether `index` needs shared state before it can be searched.
pub fn is_shared_state_required(index: &FlatIndex) -> bool {
    index.metric() == Metric::L2
}

/// Build shared state for `index` without attaching it.
pub fn init_shared_state(index: &FlatIndex) -> Result<Arc<SharedIndexState>, IndexError> {
    if !is_shared_state_required(index) {
        return Err(IndexError::InvalidParameter(format!(
            "{} index does not use shared state",
            index.metric()
        )));
    }
    let state = SharedIndexState {
        dimension: index.dimension(),
        metric: index.metric(),
        norms: index.squared_norms(),
    };
    debug!(vectors = state.len(), "Initialized shared index state");
    Ok(Arc::new(state))
}

/// Attach `state` to `index`.
///
/// The metric, dimension and vector count must match the index the state was
/// built from. Vector contents are not compared: state from a different index
/// of the same shape is accepted and yields wrong L2 scores.
pub fn set_shared_state(
    index: &mut FlatIndex,
    state: Arc<SharedIndexState>,
) -> Result<(), IndexError> {
    if state.metric != index.metric() {
        return Err(IndexError::SharedStateMismatch(format!(
            "built for {}, index is {}",
            state.metric,
            index.metric()
        )));
    }
    if state.dimension != index.dimension() {
        return Err(IndexError::SharedStateMismatch(format!(
            "built for dimension {}, index has {}",
            state.dimension,
            index.dimension()
        )));
    }
    if state.len() != index.len() {
        return Err(IndexError::SharedStateMismatch(format!(
            "covers {} vectors, index has {}",
            state.len(),
            index.len()
        )));
    }
    index.attach_shared(state);
    Ok(())
}

/// Release the caller's handle on `state`. Indexes it is attached to keep
/// their own.
pub fn free_shared_state(state: Arc<SharedIndexState>) {
    debug!(
        remaining = Arc::strong_count(&state) - 1,
        "Released shared index state"
    );
    drop(state);
}
