//! k-means clustering (Lloyd's algorithm).
//!
//! Shared by the IVF coarse quantizer and per-segment PQ codebook training.
//! Training is reproducible: given identical inputs and seed, repeated runs
//! produce identical centroids and assignments, including the reinitialization
//! of empty clusters.

use log::{debug, warn};
use rayon::prelude::*;

use crate::distance::DistanceMetric;
use crate::error::{IndexError, Result};

/// Default iteration bound for [`KMeans::fit`].
pub const DEFAULT_MAX_ITERATIONS: usize = 25;

/// k-means quantizer: learns `k` centroids from a training sample and assigns
/// any vector to its nearest centroid.
///
/// The centroid set is immutable after [`fit`](KMeans::fit) completes; indexes
/// that consult it share it by reference.
#[derive(Debug, Clone)]
pub struct KMeans {
    /// Centroids (k x dimension). Empty until trained.
    centroids: Vec<Vec<f32>>,
    dimension: usize,
    k: usize,
    metric: DistanceMetric,
    max_iterations: usize,
    seed: Option<u64>,
}

impl KMeans {
    /// Create a new k-means quantizer with `k` clusters.
    pub fn new(dimension: usize, k: usize, metric: DistanceMetric) -> Result<Self> {
        if dimension == 0 || k == 0 {
            return Err(IndexError::InvalidParameter(
                "dimension and k must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            centroids: Vec::new(),
            dimension,
            k,
            metric,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            seed: None,
        })
    }

    /// Configure a deterministic seed for initialization.
    ///
    /// When set, repeated `fit(...)` calls on the same inputs produce
    /// identical results.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Bound the number of refinement iterations.
    #[must_use]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Train on `num_samples` vectors stored row-major in `samples`.
    ///
    /// Initialization samples `k` distinct training vectors (without
    /// replacement) as starting centroids, then iterates: assign every sample
    /// to its nearest centroid, recompute each centroid as the componentwise
    /// mean of its assigned samples. A centroid left with zero assigned
    /// samples is reinitialized to a random training vector drawn from the
    /// same seeded RNG, so the degenerate case stays reproducible. Stops early
    /// when no assignment changes between iterations.
    ///
    /// A quantizer trains once: calling `fit` again on a trained instance is
    /// [`IndexError::InvalidState`], since replacing the centroids would
    /// invalidate every assignment already derived from them.
    pub fn fit(&mut self, samples: &[f32], num_samples: usize) -> Result<()> {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        if self.is_trained() {
            return Err(IndexError::InvalidState(
                "quantizer is already trained".to_string(),
            ));
        }
        if num_samples < self.k {
            return Err(IndexError::InsufficientData {
                samples: num_samples,
                required: self.k,
            });
        }
        if samples.len() < num_samples * self.dimension {
            return Err(IndexError::InvalidParameter(
                "sample buffer shorter than num_samples * dimension".to_string(),
            ));
        }

        let seed = self.seed.unwrap_or_else(|| rand::rng().random());
        let mut rng = StdRng::seed_from_u64(seed);

        // Initial centroids: k distinct samples, chosen without replacement.
        self.centroids = rand::seq::index::sample(&mut rng, num_samples, self.k)
            .into_iter()
            .map(|i| self.sample(samples, i).to_vec())
            .collect();

        let mut previous: Option<Vec<usize>> = None;
        for iteration in 0..self.max_iterations {
            let assignments = self.assign_all(samples, num_samples);
            if previous.as_ref() == Some(&assignments) {
                debug!("k-means converged after {iteration} iterations");
                break;
            }

            let mut sums = vec![vec![0.0f32; self.dimension]; self.k];
            let mut counts = vec![0usize; self.k];
            for (i, &cluster) in assignments.iter().enumerate() {
                counts[cluster] += 1;
                for (acc, &x) in sums[cluster].iter_mut().zip(self.sample(samples, i)) {
                    *acc += x;
                }
            }

            for (cluster, (sum, &count)) in sums.iter().zip(counts.iter()).enumerate() {
                if count > 0 {
                    self.centroids[cluster] = sum.iter().map(|&s| s / count as f32).collect();
                } else {
                    // Empty cluster: reinitialize to a random sample rather
                    // than letting the centroid degenerate.
                    warn!("k-means: cluster {cluster} is empty, reinitializing");
                    let pick = rng.random_range(0..num_samples);
                    self.centroids[cluster] = self.sample(samples, pick).to_vec();
                }
            }

            previous = Some(assignments);
        }

        Ok(())
    }

    /// Assign a vector to its nearest centroid. Ties break toward the lowest
    /// centroid index.
    pub fn assign(&self, vector: &[f32]) -> Result<usize> {
        if self.centroids.is_empty() {
            return Err(IndexError::NotTrained {
                operation: "assign",
            });
        }
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(self.nearest(vector))
    }

    /// Assign every sample to its nearest centroid.
    ///
    /// The per-sample scans are independent, so they run in parallel; the
    /// result is identical to a sequential pass.
    pub fn assign_all(&self, samples: &[f32], num_samples: usize) -> Vec<usize> {
        samples[..num_samples * self.dimension]
            .par_chunks_exact(self.dimension)
            .map(|v| self.nearest(v))
            .collect()
    }

    fn nearest(&self, vector: &[f32]) -> usize {
        let mut best = 0;
        let mut best_dist = f32::INFINITY;
        for (idx, centroid) in self.centroids.iter().enumerate() {
            let dist = self.metric.distance(vector, centroid);
            // Strict less-than keeps the lowest index on ties.
            if dist < best_dist {
                best_dist = dist;
                best = idx;
            }
        }
        best
    }

    fn sample<'a>(&self, samples: &'a [f32], idx: usize) -> &'a [f32] {
        let start = idx * self.dimension;
        &samples[start..start + self.dimension]
    }

    /// Trained centroids, in index order.
    #[must_use]
    pub fn centroids(&self) -> &[Vec<f32>] {
        &self.centroids
    }

    /// Whether training has completed.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    /// Number of clusters.
    #[must_use]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Vector dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Rebuild a trained quantizer from persisted centroids.
    pub(crate) fn from_centroids(
        dimension: usize,
        metric: DistanceMetric,
        centroids: Vec<Vec<f32>>,
    ) -> Result<Self> {
        if centroids.is_empty() || centroids.iter().any(|c| c.len() != dimension) {
            return Err(IndexError::CorruptState(
                "centroid set is empty or dimension-inconsistent".to_string(),
            ));
        }
        let k = centroids.len();
        Ok(Self {
            centroids,
            dimension,
            k,
            metric,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            seed: None,
        })
    }
}
