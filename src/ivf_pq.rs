//! IVF-PQ: inverted file with product-quantized storage.
//!
//! Vectors are bucketed by their nearest coarse centroid (IVF) and stored as
//! compact PQ codes instead of raw floats. Search probes the `nprobe` nearest
//! buckets and ranks candidates by ADC approximate distance. This stacks two
//! approximations (coarse bucketing and quantized distances), so it is the
//! most lossy configuration: recall decreases monotonically as `code_bits`
//! decreases, all else fixed.

use serde::{Deserialize, Serialize};

use crate::distance::DistanceMetric;
use crate::error::{IndexError, Result};
use crate::ivf::nearest_centroids;
use crate::kmeans::KMeans;
use crate::pq::ProductQuantizer;
use crate::rank::top_k;
use crate::store::sample_count;

/// IVF-PQ tuning parameters.
///
/// `nlist`/`nprobe` behave as in [`IvfParams`](crate::IvfParams). More
/// segments or more code bits mean more memory and better accuracy; fewer of
/// either compress harder and lose recall.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IvfPqParams {
    /// Number of coarse clusters (inverted lists).
    pub nlist: usize,
    /// Default number of buckets probed per query.
    pub nprobe: usize,
    /// PQ segments per vector (`m`); must divide the dimension.
    pub num_segments: usize,
    /// Bits per PQ code (`nbits`), in `1..=8`.
    pub code_bits: u32,
}

impl Default for IvfPqParams {
    fn default() -> Self {
        Self {
            nlist: 16,
            nprobe: 1,
            num_segments: 4,
            code_bits: 8,
        }
    }
}

/// Composite IVF + PQ index: coarse bucketing for pruning, PQ codes for
/// compact storage and fast approximate distances.
#[derive(Debug, Clone)]
pub struct IvfPqIndex {
    dimension: usize,
    metric: DistanceMetric,
    params: IvfPqParams,
    coarse: Option<KMeans>,
    pq: Option<ProductQuantizer>,
    /// Flattened codes, stride `num_segments`, in identifier order.
    codes: Vec<u8>,
    /// id -> coarse centroid index, fixed at insertion time.
    assignments: Vec<u32>,
    buckets: Vec<Vec<u32>>,
    num_vectors: usize,
    seed: u64,
    max_iterations: usize,
}

impl IvfPqIndex {
    /// Create an untrained IVF-PQ index.
    pub fn new(dimension: usize, metric: DistanceMetric, params: IvfPqParams) -> Result<Self> {
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
        // Validates segmentation and code width up front.
        ProductQuantizer::new(dimension, params.num_segments, params.code_bits, metric)?;
        Ok(Self {
            dimension,
            metric,
            params,
            coarse: None,
            pq: None,
            codes: Vec::new(),
            assignments: Vec::new(),
            buckets: Vec::new(),
            num_vectors: 0,
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

    /// Train the coarse quantizer and the per-segment PQ codebooks on
    /// `samples` (row-major flat buffer).
    pub fn train(&mut self, samples: &[f32]) -> Result<()> {
        if self.coarse.is_some() {
            return Err(IndexError::InvalidState(
                "index is already trained; build a new index to retrain".to_string(),
            ));
        }
        let num_samples = sample_count(samples, self.dimension)?;

        let mut coarse = KMeans::new(self.dimension, self.params.nlist, self.metric)?
            .with_seed(self.seed)
            .with_max_iterations(self.max_iterations);
        coarse.fit(samples, num_samples)?;

        let mut pq = ProductQuantizer::new(
            self.dimension,
            self.params.num_segments,
            self.params.code_bits,
            self.metric,
        )?;
        pq.fit(samples, self.seed)?;

        self.buckets = vec![Vec::new(); self.params.nlist];
        self.coarse = Some(coarse);
        self.pq = Some(pq);
        Ok(())
    }

    /// Add a vector, returning its identifier.
    ///
    /// The vector is coarse-assigned for bucketing and PQ-encoded for
    /// storage; the raw floats are not retained.
    pub fn add(&mut self, vector: &[f32]) -> Result<u32> {
        let coarse = self.coarse.as_ref().ok_or(IndexError::NotTrained {
            operation: "add",
        })?;
        let pq = self.pq.as_ref().ok_or(IndexError::NotTrained {
            operation: "add",
        })?;

        let centroid = coarse.assign(vector)?;
        let codes = pq.encode(vector)?;

        let id = crate::store::next_id(self.num_vectors)?;
        self.codes.extend_from_slice(&codes);
        self.assignments.push(centroid as u32);
        self.buckets[centroid].push(id);
        self.num_vectors += 1;
        Ok(id)
    }

    /// Search with the configured default `nprobe`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u32, f32)>> {
        self.search_with_probes(query, k, self.params.nprobe)
    }

    /// Search the `nprobe` nearest buckets, ranking candidates by ADC
    /// approximate distance.
    ///
    /// Returned distances are PQ approximations, not exact distances.
    pub fn search_with_probes(
        &self,
        query: &[f32],
        k: usize,
        nprobe: usize,
    ) -> Result<Vec<(u32, f32)>> {
        let coarse = self.coarse.as_ref().ok_or(IndexError::NotTrained {
            operation: "search",
        })?;
        let pq = self.pq.as_ref().ok_or(IndexError::NotTrained {
            operation: "search",
        })?;
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if nprobe == 0 {
            return Err(IndexError::InvalidParameter(
                "nprobe must be greater than 0".to_string(),
            ));
        }
        if self.num_vectors == 0 {
            return Ok(Vec::new());
        }

        let table = pq.distance_table(query)?;
        let probes = nearest_centroids(coarse.centroids(), self.metric, query, nprobe);

        let stride = self.params.num_segments;
        let mut candidates = Vec::new();
        for &bucket in &probes {
            for &id in &self.buckets[bucket] {
                let start = id as usize * stride;
                let codes = &self.codes[start..start + stride];
                candidates.push((id, pq.distance_with_table(&table, codes)));
            }
        }
        Ok(top_k(candidates, k))
    }

    /// Reconstruct the (lossy) stored vector for an identifier.
    pub fn reconstruct(&self, id: u32) -> Result<Vec<f32>> {
        let pq = self.pq.as_ref().ok_or(IndexError::NotTrained {
            operation: "reconstruct",
        })?;
        let idx = id as usize;
        if idx >= self.num_vectors {
            return Err(IndexError::NotFound(id));
        }
        let start = idx * self.params.num_segments;
        pq.decode(&self.codes[start..start + self.params.num_segments])
    }

    /// Vector dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.num_vectors
    }

    /// Whether the index holds no vectors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_vectors == 0
    }

    /// Whether training has completed.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.coarse.is_some()
    }

    /// Configured distance metric.
    #[must_use]
    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    /// Configured parameters.
    #[must_use]
    pub fn params(&self) -> IvfPqParams {
        self.params
    }

    /// Trained coarse centroids, if any.
    #[must_use]
    pub fn centroids(&self) -> Option<&[Vec<f32>]> {
        self.coarse.as_ref().map(|q| q.centroids())
    }

    /// Trained product quantizer, if any.
    #[must_use]
    pub fn quantizer(&self) -> Option<&ProductQuantizer> {
        self.pq.as_ref()
    }

    pub(crate) fn codes(&self) -> &[u8] {
        &self.codes
    }

    pub(crate) fn assignments(&self) -> &[u32] {
        &self.assignments
    }

    /// Rebuild from persisted parts, revalidating structure.
    pub(crate) fn from_parts(
        dimension: usize,
        metric: DistanceMetric,
        params: IvfPqParams,
        coarse_centroids: Option<Vec<Vec<f32>>>,
        pq: Option<ProductQuantizer>,
        codes: Vec<u8>,
        assignments: Vec<u32>,
    ) -> Result<Self> {
        let mut index = Self::new(dimension, metric, params)
            .map_err(|e| IndexError::CorruptState(e.to_string()))?;

        match (coarse_centroids, pq) {
            (Some(centroids), Some(pq)) => {
                if centroids.len() != params.nlist {
                    return Err(IndexError::CorruptState(format!(
                        "expected {} coarse centroids, found {}",
                        params.nlist,
                        centroids.len()
                    )));
                }
                index.coarse = Some(KMeans::from_centroids(dimension, metric, centroids)?);
                index.pq = Some(pq);
            }
            (None, None) => {
                if !codes.is_empty() || !assignments.is_empty() {
                    return Err(IndexError::CorruptState(
                        "stored codes without trained quantizers".to_string(),
                    ));
                }
                return Ok(index);
            }
            _ => {
                return Err(IndexError::CorruptState(
                    "coarse centroids and PQ codebooks must be persisted together".to_string(),
                ));
            }
        }

        if codes.len() % params.num_segments != 0 {
            return Err(IndexError::CorruptState(
                "code buffer is not a multiple of the segment count".to_string(),
            ));
        }
        let num_vectors = codes.len() / params.num_segments;
        if assignments.len() != num_vectors {
            return Err(IndexError::CorruptState(
                "assignment count disagrees with code count".to_string(),
            ));
        }

        let mut buckets = vec![Vec::new(); params.nlist];
        for (id, &centroid) in assignments.iter().enumerate() {
            let centroid = centroid as usize;
            if centroid >= params.nlist {
                return Err(IndexError::CorruptState(format!(
                    "assignment to centroid {centroid} out of range"
                )));
            }
            buckets[centroid].push(id as u32);
        }

        index.codes = codes;
        index.assignments = assignments;
        index.buckets = buckets;
        index.num_vectors = num_vectors;
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flatten(vectors: &[Vec<f32>]) -> Vec<f32> {
        vectors.iter().flatten().copied().collect()
    }

    fn clustered_samples() -> Vec<Vec<f32>> {
        let mut samples = Vec::new();
        for i in 0..8 {
            let jitter = i as f32 * 0.01;
            samples.push(vec![jitter, 0.1 - jitter, jitter, 0.0]);
            samples.push(vec![10.0 + jitter, 10.1, 10.0 - jitter, 10.0]);
        }
        samples
    }

    fn trained_index() -> IvfPqIndex {
        let params = IvfPqParams {
            nlist: 2,
            nprobe: 2,
            num_segments: 2,
            code_bits: 2,
        };
        let mut index = IvfPqIndex::new(4, DistanceMetric::L2, params)
            .unwrap()
            .with_seed(11);
        index.train(&flatten(&clustered_samples())).unwrap();
        index
    }

    #[test]
    fn new_rejects_indivisible_segmentation() {
        let params = IvfPqParams {
            num_segments: 3,
            ..IvfPqParams::default()
        };
        assert!(matches!(
            IvfPqIndex::new(4, DistanceMetric::L2, params),
            Err(IndexError::InvalidSegmentation { .. })
        ));
    }

    #[test]
    fn add_before_train_is_not_trained() {
        let mut index =
            IvfPqIndex::new(4, DistanceMetric::L2, IvfPqParams::default()).unwrap();
        assert!(matches!(
            index.add(&[0.0; 4]),
            Err(IndexError::NotTrained { .. })
        ));
    }

    #[test]
    fn trained_but_empty_search_returns_empty() {
        let index = trained_index();
        assert!(index.search(&[0.0; 4], 3).unwrap().is_empty());
    }

    #[test]
    fn search_finds_the_near_cluster() {
        let mut index = trained_index();
        let samples = clustered_samples();
        for v in &samples {
            index.add(v).unwrap();
        }
        let results = index
            .search_with_probes(&[0.05, 0.05, 0.05, 0.0], 4, 1)
            .unwrap();
        assert!(!results.is_empty());
        for (id, _) in results {
            let v = index.reconstruct(id).unwrap();
            assert!(v[0] < 5.0, "probe leaked into the far cluster: {v:?}");
        }
    }

    #[test]
    fn results_are_sorted_with_id_tiebreak() {
        let mut index = trained_index();
        for v in clustered_samples() {
            index.add(&v).unwrap();
        }
        let results = index.search(&[5.0, 5.0, 5.0, 5.0], 16).unwrap();
        for w in results.windows(2) {
            assert!(
                w[0].1 < w[1].1 || (w[0].1 == w[1].1 && w[0].0 < w[1].0),
                "unsorted results: {w:?}"
            );
        }
    }

    #[test]
    fn reconstruct_unknown_id_is_not_found() {
        let index = trained_index();
        assert!(matches!(
            index.reconstruct(3),
            Err(IndexError::NotFound(3))
        ));
    }
}
