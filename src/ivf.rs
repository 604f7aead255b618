//! Inverted-file (IVF) index.
//!
//! Buckets vectors by their nearest coarse centroid and probes only the
//! `nprobe` buckets nearest the query. Recall degrades exactly when the true
//! nearest neighbor lives in a bucket outside the probed set; that trade-off
//! is entirely a function of `nprobe` versus `nlist` and the data
//! distribution. With `nprobe == nlist` the search is exhaustive and matches
//! [`FlatIndex`](crate::FlatIndex) exactly.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::distance::DistanceMetric;
use crate::error::{IndexError, Result};
use crate::kmeans::KMeans;
use crate::rank::top_k;
use crate::store::{sample_count, VectorStore};

/// IVF tuning parameters.
///
/// Raising `nlist` sharpens partitioning but needs more training data and
/// makes each probe cover less of the collection; raising `nprobe` buys recall
/// at the cost of scanning more buckets. The defaults are starting points, not
/// policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IvfParams {
    /// Number of coarse clusters (inverted lists).
    pub nlist: usize,
    /// Default number of buckets probed per query.
    pub nprobe: usize,
}

impl Default for IvfParams {
    fn default() -> Self {
        Self {
            nlist: 16,
            nprobe: 1,
        }
    }
}

/// Inverted-file index over exact vectors.
///
/// Lifecycle: construct (untrained) → [`train`](IvfIndex::train) →
/// [`add`](IvfIndex::add) / [`search`](IvfIndex::search). Training is
/// one-shot: retraining requires building a new index.
#[derive(Debug, Clone)]
pub struct IvfIndex {
    store: VectorStore,
    metric: DistanceMetric,
    params: IvfParams,
    quantizer: Option<KMeans>,
    /// Per-centroid identifier buckets.
    buckets: Vec<Vec<u32>>,
    /// id -> centroid index, fixed at insertion time. Assignments are not
    /// retroactively updated.
    assignments: Vec<u32>,
    seed: u64,
    max_iterations: usize,
}

impl IvfIndex {
    /// Create an untrained IVF index.
    pub fn new(dimension: usize, metric: DistanceMetric, params: IvfParams) -> Result<Self> {
        if dimension == 0 {
            return Err(IndexError::InvalidParameter(
                "dimension must be greater than 0".to_string(),
            ));
        }
        if params.nlist == 0 || params.nprobe == 0 {
            return Err(IndexError::InvalidParameter(
                "nlist and nprobe must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            store: VectorStore::new(dimension),
            metric,
            params,
            quantizer: None,
            buckets: Vec::new(),
            assignments: Vec::new(),
            seed: 0,
            max_iterations: crate::kmeans::DEFAULT_MAX_ITERATIONS,
        })
    }

    /// Configure a deterministic training seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Bound k-means refinement iterations during training.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Train the coarse quantizer on `samples` (row-major flat buffer).
    ///
    /// Fails with [`IndexError::InvalidState`] if the index is already
    /// trained and with [`IndexError::InsufficientData`] if there are fewer
    /// samples than `nlist`.
    pub fn train(&mut self, samples: &[f32]) -> Result<()> {
        if self.quantizer.is_some() {
            return Err(IndexError::InvalidState(
                "index is already trained; build a new index to retrain".to_string(),
            ));
        }
        let num_samples = sample_count(samples, self.dimension())?;

        let mut kmeans = KMeans::new(self.dimension(), self.params.nlist, self.metric)?
            .with_seed(self.seed)
            .with_max_iterations(self.max_iterations);
        kmeans.fit(samples, num_samples)?;

        self.buckets = vec![Vec::new(); self.params.nlist];
        self.quantizer = Some(kmeans);
        Ok(())
    }

    /// Add a vector, returning its identifier.
    ///
    /// The vector is assigned to its nearest centroid at insertion time.
    pub fn add(&mut self, vector: &[f32]) -> Result<u32> {
        let quantizer = self.quantizer.as_ref().ok_or(IndexError::NotTrained {
            operation: "add",
        })?;
        let centroid = quantizer.assign(vector)?;
        let id = self.store.append(vector)?;
        self.assignments.push(centroid as u32);
        self.buckets[centroid].push(id);
        Ok(id)
    }

    /// Search with the configured default `nprobe`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u32, f32)>> {
        self.search_with_probes(query, k, self.params.nprobe)
    }

    /// Search the `nprobe` buckets nearest `query` for the `k` nearest
    /// vectors.
    ///
    /// `nprobe` is clamped to `nlist`. A trained but empty index returns an
    /// empty result, not an error.
    pub fn search_with_probes(
        &self,
        query: &[f32],
        k: usize,
        nprobe: usize,
    ) -> Result<Vec<(u32, f32)>> {
        let quantizer = self.quantizer.as_ref().ok_or(IndexError::NotTrained {
            operation: "search",
        })?;
        if query.len() != self.dimension() {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension(),
                actual: query.len(),
            });
        }
        if nprobe == 0 {
            return Err(IndexError::InvalidParameter(
                "nprobe must be greater than 0".to_string(),
            ));
        }
        if self.store.is_empty() {
            return Ok(Vec::new());
        }

        let probes = nearest_centroids(quantizer.centroids(), self.metric, query, nprobe);

        let mut candidates = Vec::new();
        for &bucket in &probes {
            for &id in &self.buckets[bucket] {
                let vector = self.store.get(id)?;
                candidates.push((id, self.metric.distance(query, vector)));
            }
        }
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

    /// Whether training has completed.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.quantizer.is_some()
    }

    /// Configured distance metric.
    #[must_use]
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Configured parameters.
    #[must_use]
    pub fn params(&self) -> IvfParams {
        self.params
    }

    /// Trained coarse centroids, if any.
    #[must_use]
    pub fn centroids(&self) -> Option<&[Vec<f32>]> {
        self.quantizer.as_ref().map(|q| q.centroids())
    }

    pub(crate) fn store(&self) -> &VectorStore {
        &self.store
    }

    pub(crate) fn assignments(&self) -> &[u32] {
        &self.assignments
    }

    /// Rebuild from persisted parts, revalidating structure.
    pub(crate) fn from_parts(
        metric: DistanceMetric,
        params: IvfParams,
        centroids: Option<Vec<Vec<f32>>>,
        store: VectorStore,
        assignments: Vec<u32>,
    ) -> Result<Self> {
        let dimension = store.dimension();
        let quantizer = match centroids {
            Some(centroids) => {
                if centroids.len() != params.nlist {
                    return Err(IndexError::CorruptState(format!(
                        "expected {} centroids, found {}",
                        params.nlist,
                        centroids.len()
                    )));
                }
                Some(KMeans::from_centroids(dimension, metric, centroids)?)
            }
            None => None,
        };

        if assignments.len() != store.len() {
            return Err(IndexError::CorruptState(
                "assignment count disagrees with vector count".to_string(),
            ));
        }
        if quantizer.is_none() && !store.is_empty() {
            return Err(IndexError::CorruptState(
                "stored vectors without a trained quantizer".to_string(),
            ));
        }

        let mut buckets = vec![Vec::new(); if quantizer.is_some() { params.nlist } else { 0 }];
        for (id, &centroid) in assignments.iter().enumerate() {
            let centroid = centroid as usize;
            if centroid >= params.nlist {
                return Err(IndexError::CorruptState(format!(
                    "assignment to centroid {centroid} out of range"
                )));
            }
            buckets[centroid].push(id as u32);
        }

        let mut index = Self::new(dimension, metric, params)?;
        index.store = store;
        index.quantizer = quantizer;
        index.buckets = buckets;
        index.assignments = assignments;
        Ok(index)
    }
}

/// Rank centroids by distance to `query` and return the nearest `nprobe`
/// indices (ascending distance, ties by lower index).
pub(crate) fn nearest_centroids(
    centroids: &[Vec<f32>],
    metric: DistanceMetric,
    query: &[f32],
    nprobe: usize,
) -> SmallVec<[usize; 8]> {
    let mut ranked: Vec<(u32, f32)> = centroids
        .iter()
        .enumerate()
        .map(|(idx, c)| (idx as u32, metric.distance(query, c)))
        .collect();
    ranked = top_k(ranked, nprobe.min(centroids.len()));
    ranked.into_iter().map(|(idx, _)| idx as usize).collect()
}
