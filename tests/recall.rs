//! Recall behavior of the approximate indexes against flat ground truth.

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vicinal::{DistanceMetric, FlatIndex, IvfIndex, IvfParams, IvfPqIndex, IvfPqParams};

fn random_vectors(rng: &mut StdRng, count: usize, dim: usize) -> Vec<Vec<f32>> {
    (0..count)
        .map(|_| (0..dim).map(|_| rng.random_range(-1.0f32..1.0)).collect())
        .collect()
}

fn flatten(vectors: &[Vec<f32>]) -> Vec<f32> {
    vectors.iter().flatten().copied().collect()
}

fn recall_at_k(ground_truth: &[(u32, f32)], retrieved: &[(u32, f32)], k: usize) -> f32 {
    let gt: HashSet<u32> = ground_truth.iter().take(k).map(|&(id, _)| id).collect();
    let ret: HashSet<u32> = retrieved.iter().take(k).map(|&(id, _)| id).collect();
    gt.intersection(&ret).count() as f32 / k as f32
}

#[test]
fn ivf_full_probe_is_exact() {
    let mut rng = StdRng::seed_from_u64(42);
    let vectors = random_vectors(&mut rng, 120, 6);
    let samples = flatten(&vectors);

    let params = IvfParams {
        nlist: 8,
        nprobe: 8,
    };
    let mut ivf = IvfIndex::new(6, DistanceMetric::L2, params)
        .unwrap()
        .with_seed(7);
    ivf.train(&samples).unwrap();

    let mut flat = FlatIndex::new(6, DistanceMetric::L2).unwrap();
    for v in &vectors {
        ivf.add(v).unwrap();
        flat.add(v).unwrap();
    }

    for _ in 0..10 {
        let query: Vec<f32> = (0..6).map(|_| rng.random_range(-1.0f32..1.0)).collect();
        let exact = flat.search(&query, 10).unwrap();
        let probed = ivf.search_with_probes(&query, 10, 8).unwrap();
        assert_eq!(exact, probed, "full probe must match flat exactly");
    }
}

#[test]
fn ivf_full_probe_is_exact_for_inner_product() {
    let mut rng = StdRng::seed_from_u64(11);
    let vectors = random_vectors(&mut rng, 60, 4);
    let samples = flatten(&vectors);

    let params = IvfParams {
        nlist: 4,
        nprobe: 4,
    };
    let mut ivf = IvfIndex::new(4, DistanceMetric::InnerProduct, params)
        .unwrap()
        .with_seed(3);
    ivf.train(&samples).unwrap();

    let mut flat = FlatIndex::new(4, DistanceMetric::InnerProduct).unwrap();
    for v in &vectors {
        ivf.add(v).unwrap();
        flat.add(v).unwrap();
    }

    let query = [0.3, -0.2, 0.9, 0.1];
    assert_eq!(
        flat.search(&query, 5).unwrap(),
        ivf.search_with_probes(&query, 5, 4).unwrap()
    );
}

#[test]
fn more_probes_never_lose_recall() {
    let mut rng = StdRng::seed_from_u64(99);
    let vectors = random_vectors(&mut rng, 200, 8);
    let samples = flatten(&vectors);

    let params = IvfParams {
        nlist: 10,
        nprobe: 1,
    };
    let mut ivf = IvfIndex::new(8, DistanceMetric::L2, params)
        .unwrap()
        .with_seed(5);
    ivf.train(&samples).unwrap();

    let mut flat = FlatIndex::new(8, DistanceMetric::L2).unwrap();
    for v in &vectors {
        ivf.add(v).unwrap();
        flat.add(v).unwrap();
    }

    let queries = random_vectors(&mut rng, 10, 8);
    let mut last = -1.0f32;
    for nprobe in [1, 2, 5, 10] {
        let mut total = 0.0;
        for query in &queries {
            let exact = flat.search(query, 10).unwrap();
            let approx = ivf.search_with_probes(query, 10, nprobe).unwrap();
            total += recall_at_k(&exact, &approx, 10);
        }
        let recall = total / queries.len() as f32;
        assert!(
            recall >= last,
            "recall dropped from {last} to {recall} at nprobe={nprobe}"
        );
        last = recall;
    }
    // Full probe recovers ground truth exactly.
    assert!((last - 1.0).abs() < 1e-6);
}

#[test]
fn more_code_bits_never_lose_recall() {
    let mut rng = StdRng::seed_from_u64(1234);
    let vectors = random_vectors(&mut rng, 64, 8);
    let samples = flatten(&vectors);

    let mut flat = FlatIndex::new(8, DistanceMetric::L2).unwrap();
    for v in &vectors {
        flat.add(v).unwrap();
    }
    let queries = random_vectors(&mut rng, 8, 8);

    // Full probe isolates the quantization error from the bucketing error.
    let recall_for_bits = |code_bits: u32| -> f32 {
        let params = IvfPqParams {
            nlist: 4,
            nprobe: 4,
            num_segments: 2,
            code_bits,
        };
        let mut index = IvfPqIndex::new(8, DistanceMetric::L2, params)
            .unwrap()
            .with_seed(21);
        index.train(&samples).unwrap();
        for v in &vectors {
            index.add(v).unwrap();
        }
        let mut total = 0.0;
        for query in &queries {
            let exact = flat.search(query, 8).unwrap();
            let approx = index.search_with_probes(query, 8, 4).unwrap();
            total += recall_at_k(&exact, &approx, 8);
        }
        total / queries.len() as f32
    };

    let coarse = recall_for_bits(1);
    let fine = recall_for_bits(6);
    assert!(
        fine >= coarse,
        "recall degraded with more code bits: {coarse} -> {fine}"
    );
    // 2^6 codewords over 64 training vectors reconstructs every point, so
    // full-probe search is effectively exact.
    assert!(fine > 0.99, "expected near-perfect recall, got {fine}");
}
