//! Top-k selection over (id, distance) candidates.

use std::cmp::Ordering;

#[inline]
fn by_distance_then_id(a: &(u32, f32), b: &(u32, f32)) -> Ordering {
    a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0))
}

/// Select the `k` smallest candidates, sorted by ascending distance with ties
/// broken by ascending identifier.
///
/// Partially selects before sorting, so cost is O(n + k log k) rather than
/// O(n log n) when `k << n`.
#[must_use]
pub fn top_k(mut candidates: Vec<(u32, f32)>, k: usize) -> Vec<(u32, f32)> {
    if k == 0 {
        return Vec::new();
    }
    if candidates.len() > k {
        candidates.select_nth_unstable_by(k - 1, by_distance_then_id);
        candidates.truncate(k);
    }
    candidates.sort_unstable_by(by_distance_then_id);
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_k_smallest_sorted() {
        let candidates = vec![(0, 3.0), (1, 1.0), (2, 2.0), (3, 0.5)];
        let top = top_k(candidates, 2);
        assert_eq!(top, vec![(3, 0.5), (1, 1.0)]);
    }

    #[test]
    fn ties_break_by_ascending_id() {
        let candidates = vec![(5, 1.0), (2, 1.0), (9, 1.0)];
        let top = top_k(candidates, 3);
        assert_eq!(top, vec![(2, 1.0), (5, 1.0), (9, 1.0)]);
    }

    #[test]
    fn k_larger_than_candidates_returns_all() {
        let candidates = vec![(1, 2.0), (0, 1.0)];
        let top = top_k(candidates, 10);
        assert_eq!(top, vec![(0, 1.0), (1, 2.0)]);
    }

    #[test]
    fn k_zero_returns_empty() {
        assert!(top_k(vec![(0, 1.0)], 0).is_empty());
    }
}
