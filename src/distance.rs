//! Distance metrics for dense vectors.
//!
//! Both metrics are framed as a *minimization*: squared Euclidean is already a
//! distance, and inner product is negated so that "more similar" means
//! "smaller". This lets every index share a single top-k machinery regardless
//! of metric.

use serde::{Deserialize, Serialize};

use crate::kernels;

/// Distance metric for dense vectors.
///
/// Fixed per index at construction time and recorded in the persisted layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DistanceMetric {
    /// Squared Euclidean (L2) distance.
    ///
    /// The square root is skipped: it is monotonic, so rankings are identical
    /// and every comparison saves a `sqrt`.
    L2,
    /// Negative inner product, for maximum-inner-product search.
    ///
    /// Not a metric in the mathematical sense: `distance(a, a)` is not zero
    /// in general. It is commutative, which is all the indexes rely on.
    InnerProduct,
}

impl DistanceMetric {
    /// Compute the distance between two vectors.
    ///
    /// If dimensions mismatch, this returns `f32::INFINITY` so the pair is
    /// never selected as a nearest neighbor.
    #[inline]
    #[must_use]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return f32::INFINITY;
        }
        match self {
            DistanceMetric::L2 => kernels::l2_distance_squared(a, b),
            DistanceMetric::InnerProduct => -kernels::dot(a, b),
        }
    }
}
