//! Product Quantization (PQ).
//!
//! Splits each vector into `m` equal-length segments and quantizes every
//! segment independently against a small per-segment codebook of `2^nbits`
//! centroids. Stored vectors are replaced by `m` one-byte codes, and distances
//! are reconstructed from code-to-centroid distances without decoding.
//!
//! The fast path is asymmetric distance computation (ADC): the query stays
//! exact, and its per-segment distances to every codeword are precomputed
//! once into a lookup table. Distance to any stored code is then `m` table
//! lookups and additions.

use serde::{Deserialize, Serialize};

use crate::distance::DistanceMetric;
use crate::error::{IndexError, Result};
use crate::kmeans::KMeans;
use crate::store::sample_count;

/// Product quantizer: `m` independent codebooks, one per vector segment.
///
/// Codebooks are immutable after [`fit`](ProductQuantizer::fit).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductQuantizer {
    dimension: usize,
    num_segments: usize,
    code_bits: u32,
    segment_dim: usize,
    metric: DistanceMetric,
    /// `[segment][code][segment_dim]`. Empty until trained.
    codebooks: Vec<Vec<Vec<f32>>>,
}

impl ProductQuantizer {
    /// Create an untrained product quantizer.
    ///
    /// `code_bits` must be in `1..=8` so codes fit in a byte; `dimension`
    /// must divide evenly into `num_segments` segments.
    pub fn new(
        dimension: usize,
        num_segments: usize,
        code_bits: u32,
        metric: DistanceMetric,
    ) -> Result<Self> {
        if dimension == 0 || num_segments == 0 {
            return Err(IndexError::InvalidParameter(
                "dimension and num_segments must be greater than 0".to_string(),
            ));
        }
        if !(1..=8).contains(&code_bits) {
            return Err(IndexError::InvalidParameter(format!(
                "code_bits must be in 1..=8, got {code_bits}"
            )));
        }
        if dimension % num_segments != 0 {
            return Err(IndexError::InvalidSegmentation {
                dimension,
                segments: num_segments,
            });
        }
        Ok(Self {
            dimension,
            num_segments,
            code_bits,
            segment_dim: dimension / num_segments,
            metric,
            codebooks: Vec::new(),
        })
    }

    /// Train one codebook per segment with k-means over the segment slices of
    /// `samples` (row-major flat buffer).
    ///
    /// Requires at least `2^code_bits` samples, otherwise
    /// [`IndexError::InsufficientData`]. Codebooks train once: a second `fit`
    /// on a trained quantizer is [`IndexError::InvalidState`], since replacing
    /// them would orphan every code already emitted.
    pub fn fit(&mut self, samples: &[f32], seed: u64) -> Result<()> {
        if self.is_trained() {
            return Err(IndexError::InvalidState(
                "quantizer is already trained".to_string(),
            ));
        }
        let num_samples = sample_count(samples, self.dimension)?;
        let codebook_size = self.codebook_size();

        let mut codebooks = Vec::with_capacity(self.num_segments);
        for segment in 0..self.num_segments {
            let offset = segment * self.segment_dim;
            let mut sub: Vec<f32> = Vec::with_capacity(num_samples * self.segment_dim);
            for i in 0..num_samples {
                let start = i * self.dimension + offset;
                sub.extend_from_slice(&samples[start..start + self.segment_dim]);
            }

            let mut kmeans = KMeans::new(self.segment_dim, codebook_size, self.metric)?
                .with_seed(seed.wrapping_add(segment as u64));
            kmeans.fit(&sub, num_samples)?;
            codebooks.push(kmeans.centroids().to_vec());
        }

        self.codebooks = codebooks;
        Ok(())
    }

    /// Encode a vector as `m` codebook indices.
    pub fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        self.require_trained("encode")?;
        self.check_dimension(vector.len())?;

        let mut codes = Vec::with_capacity(self.num_segments);
        for (segment, codebook) in self.codebooks.iter().enumerate() {
            let sub = self.segment_of(vector, segment);
            let mut best = 0usize;
            let mut best_dist = f32::INFINITY;
            for (code, codeword) in codebook.iter().enumerate() {
                let dist = self.metric.distance(sub, codeword);
                if dist < best_dist {
                    best_dist = dist;
                    best = code;
                }
            }
            codes.push(best as u8);
        }
        Ok(codes)
    }

    /// Reconstruct the (lossy) vector a code stands for.
    ///
    /// The result is the concatenation of the selected codewords. It matches
    /// the original only when the original coincided with centroids.
    pub fn decode(&self, codes: &[u8]) -> Result<Vec<f32>> {
        self.require_trained("decode")?;
        self.check_codes(codes)?;

        let mut vector = Vec::with_capacity(self.dimension);
        for (segment, &code) in codes.iter().enumerate() {
            vector.extend_from_slice(&self.codebooks[segment][code as usize]);
        }
        Ok(vector)
    }

    /// Approximate distance from an exact query to an encoded vector: the sum
    /// of per-segment distances from the query segment to the selected
    /// codeword. Avoids decoding.
    pub fn approximate_distance(&self, query: &[f32], codes: &[u8]) -> Result<f32> {
        self.require_trained("approximate_distance")?;
        self.check_dimension(query.len())?;
        self.check_codes(codes)?;

        let mut total = 0.0;
        for (segment, &code) in codes.iter().enumerate() {
            let sub = self.segment_of(query, segment);
            total += self.metric.distance(sub, &self.codebooks[segment][code as usize]);
        }
        Ok(total)
    }

    /// Precompute the ADC lookup table for a query: distances from every
    /// query segment to every codeword.
    ///
    /// Layout is segment-major: `table[segment * codebook_size + code]`.
    pub fn distance_table(&self, query: &[f32]) -> Result<Vec<f32>> {
        self.require_trained("distance_table")?;
        self.check_dimension(query.len())?;

        let mut table = Vec::with_capacity(self.num_segments * self.codebook_size());
        for (segment, codebook) in self.codebooks.iter().enumerate() {
            let sub = self.segment_of(query, segment);
            for codeword in codebook {
                table.push(self.metric.distance(sub, codeword));
            }
        }
        Ok(table)
    }

    /// Distance via a precomputed ADC table: `m` lookups and additions.
    #[inline]
    #[must_use]
    pub fn distance_with_table(&self, table: &[f32], codes: &[u8]) -> f32 {
        let stride = self.codebook_size();
        codes
            .iter()
            .enumerate()
            .map(|(segment, &code)| table[segment * stride + code as usize])
            .sum()
    }

    /// Number of segments (`m`).
    #[must_use]
    pub fn num_segments(&self) -> usize {
        self.num_segments
    }

    /// Bits per code (`nbits`).
    #[must_use]
    pub fn code_bits(&self) -> u32 {
        self.code_bits
    }

    /// Codewords per segment (`2^nbits`).
    #[must_use]
    pub fn codebook_size(&self) -> usize {
        1usize << self.code_bits
    }

    /// Components per segment.
    #[must_use]
    pub fn segment_dim(&self) -> usize {
        self.segment_dim
    }

    /// Full vector dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Whether training has completed.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        !self.codebooks.is_empty()
    }

    /// Trained codebooks.
    #[must_use]
    pub fn codebooks(&self) -> &[Vec<Vec<f32>>] {
        &self.codebooks
    }

    fn segment_of<'a>(&self, vector: &'a [f32], segment: usize) -> &'a [f32] {
        let start = segment * self.segment_dim;
        &vector[start..start + self.segment_dim]
    }

    fn require_trained(&self, operation: &'static str) -> Result<()> {
        if self.codebooks.is_empty() {
            return Err(IndexError::NotTrained { operation });
        }
        Ok(())
    }

    fn check_dimension(&self, actual: usize) -> Result<()> {
        if actual != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual,
            });
        }
        Ok(())
    }

    fn check_codes(&self, codes: &[u8]) -> Result<()> {
        if codes.len() != self.num_segments {
            return Err(IndexError::InvalidParameter(format!(
                "expected {} codes, got {}",
                self.num_segments,
                codes.len()
            )));
        }
        let size = self.codebook_size();
        if let Some(&bad) = codes.iter().find(|&&c| (c as usize) >= size) {
            return Err(IndexError::InvalidParameter(format!(
                "code {bad} out of range for codebook size {size}"
            )));
        }
        Ok(())
    }

    /// Rebuild a trained quantizer from persisted codebooks.
    pub(crate) fn from_parts(
        dimension: usize,
        num_segments: usize,
        code_bits: u32,
        metric: DistanceMetric,
        codebooks: Vec<Vec<Vec<f32>>>,
    ) -> Result<Self> {
        let mut pq = Self::new(dimension, num_segments, code_bits, metric)
            .map_err(|e| IndexError::CorruptState(e.to_string()))?;
        if codebooks.len() != num_segments
            || codebooks
                .iter()
                .any(|cb| cb.len() != pq.codebook_size() || cb.iter().any(|c| c.len() != pq.segment_dim))
        {
            return Err(IndexError::CorruptState(
                "codebook shape disagrees with header".to_string(),
            ));
        }
        pq.codebooks = codebooks;
        Ok(pq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flatten(vectors: &[Vec<f32>]) -> Vec<f32> {
        vectors.iter().flatten().copied().collect()
    }

    fn trained_pq() -> ProductQuantizer {
        // Four well-separated corners in 4-d, two segments of 2.
        let samples = flatten(&[
            vec![0.0, 0.0, 0.0, 0.0],
            vec![0.0, 0.1, 0.1, 0.0],
            vec![10.0, 10.0, 10.0, 10.0],
            vec![10.1, 10.0, 10.0, 10.1],
        ]);
        let mut pq = ProductQuantizer::new(4, 2, 1, DistanceMetric::L2).unwrap();
        pq.fit(&samples, 42).unwrap();
        pq
    }

    #[test]
    fn new_rejects_indivisible_dimension() {
        let err = ProductQuantizer::new(10, 3, 8, DistanceMetric::L2).unwrap_err();
        assert!(matches!(
            err,
            IndexError::InvalidSegmentation {
                dimension: 10,
                segments: 3
            }
        ));
    }

    #[test]
    fn new_rejects_codes_wider_than_a_byte() {
        assert!(matches!(
            ProductQuantizer::new(8, 2, 9, DistanceMetric::L2),
            Err(IndexError::InvalidParameter(_))
        ));
    }

    #[test]
    fn encode_before_fit_is_not_trained() {
        let pq = ProductQuantizer::new(4, 2, 2, DistanceMetric::L2).unwrap();
        assert!(matches!(
            pq.encode(&[0.0; 4]),
            Err(IndexError::NotTrained { .. })
        ));
    }

    #[test]
    fn refit_of_trained_quantizer_is_invalid_state() {
        let mut pq = trained_pq();
        let samples = flatten(&[vec![0.0; 4], vec![1.0; 4], vec![2.0; 4]]);
        let codebooks = pq.codebooks().to_vec();

        assert!(matches!(
            pq.fit(&samples, 7),
            Err(IndexError::InvalidState(_))
        ));
        // The rejected call must not have touched the codebooks.
        assert_eq!(pq.codebooks(), codebooks.as_slice());
    }

    #[test]
    fn fit_with_too_few_samples_is_insufficient_data() {
        // 2^8 codewords but only 4 samples.
        let samples = flatten(&vec![vec![0.0; 4]; 4]);
        let mut pq = ProductQuantizer::new(4, 2, 8, DistanceMetric::L2).unwrap();
        assert!(matches!(
            pq.fit(&samples, 0),
            Err(IndexError::InsufficientData { .. })
        ));
    }

    #[test]
    fn decode_of_encode_is_bounded_reconstruction() {
        let pq = trained_pq();
        let original = [0.0, 0.05, 0.05, 0.0];
        let decoded = pq.decode(&pq.encode(&original).unwrap()).unwrap();
        let err = DistanceMetric::L2.distance(&original, &decoded);
        // Reconstruction lands on the near-origin codewords, far from the
        // 10.0 cluster.
        assert!(err < 1.0, "reconstruction error too large: {err}");
    }

    #[test]
    fn decode_is_exact_for_a_codeword() {
        let pq = trained_pq();
        let centroid: Vec<f32> = pq.codebooks()[0][0]
            .iter()
            .chain(pq.codebooks()[1][0].iter())
            .copied()
            .collect();
        let decoded = pq.decode(&pq.encode(&centroid).unwrap()).unwrap();
        assert_eq!(decoded, centroid);
    }

    #[test]
    fn distance_table_matches_approximate_distance() {
        let pq = trained_pq();
        let query = [1.0, 2.0, 9.0, 8.0];
        let codes = pq.encode(&[10.0, 10.0, 0.1, 0.0]).unwrap();
        let direct = pq.approximate_distance(&query, &codes).unwrap();
        let table = pq.distance_table(&query).unwrap();
        let via_table = pq.distance_with_table(&table, &codes);
        assert!((direct - via_table).abs() < 1e-5);
    }

    #[test]
    fn decode_rejects_out_of_range_code() {
        let pq = trained_pq();
        // code_bits = 1 so only codes 0 and 1 are valid.
        assert!(matches!(
            pq.decode(&[0, 2]),
            Err(IndexError::InvalidParameter(_))
        ));
    }

    #[test]
    fn encode_rejects_wrong_dimension() {
        let pq = trained_pq();
        assert!(matches!(
            pq.encode(&[0.0; 3]),
            Err(IndexError::DimensionMismatch { .. })
        ));
    }
}
