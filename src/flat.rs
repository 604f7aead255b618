//! Exhaustive (brute-force) nearest-neighbor search.

use crate::distance::DistanceMetric;
use crate::error::{IndexError, Result};
use crate::rank::top_k;
use crate::store::VectorStore;

/// Exact nearest-neighbor index: every query scans every stored vector.
///
/// O(n·d) per query, so it only makes sense for small collections, but it is
/// exact. The approximate indexes use it as the ground-truth oracle in their
/// recall tests.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    store: VectorStore,
    metric: DistanceMetric,
}

impl FlatIndex {
    /// Create a flat index for vectors of the given dimension.
    pub fn new(dimension: usize, metric: DistanceMetric) -> Result<Self> {
        if dimension == 0 {
            return Err(IndexError::InvalidParameter(
                "dimension must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            store: VectorStore::new(dimension),
            metric,
        })
    }

    /// No-op: flat indexes require no training and are always trained.
    pub fn train(&mut self, _samples: &[f32]) -> Result<()> {
        Ok(())
    }

    /// Add a vector, returning its identifier.
    pub fn add(&mut self, vector: &[f32]) -> Result<u32> {
        self.store.append(vector)
    }

    /// Return the `k` nearest stored vectors to `query`.
    ///
    /// Results are sorted by ascending distance (ties by ascending
    /// identifier) and contain exactly `min(k, len)` entries.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u32, f32)>> {
        if query.len() != self.dimension() {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension(),
                actual: query.len(),
            });
        }
        let candidates: Vec<(u32, f32)> = self
            .store
            .iter()
            .enumerate()
            .map(|(id, v)| (id as u32, self.metric.distance(query, v)))
            .collect();
        Ok(top_k(candidates, k))
    }

    /// Get a stored vector by identifier.
    pub fn get(&self, id: u32) -> Result<&[f32]> {
        self.store.get(id)
    }

    /// Vector dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.store.dimension()
    }

    /// Number of stored vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the index holds no vectors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Configured distance metric.
    #[must_use]
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub(crate) fn store(&self) -> &VectorStore {
        &self.store
    }

    pub(crate) fn from_parts(store: VectorStore, metric: DistanceMetric) -> Self {
        Self { store, metric }
    }
}
