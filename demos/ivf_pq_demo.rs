//! IVF-PQ walkthrough: train, add, search, persist.
//!
//! Builds the same dataset into a flat index (exact) and an IVF-PQ index
//! (approximate), then compares results and round-trips the approximate
//! index through its binary format.
//!
//! ```bash
//! cargo run --example ivf_pq_demo --release
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vicinal::{
    DistanceMetric, FlatIndex, Index, IvfPqIndex, IvfPqParams, Result, VectorIndex,
};

const DIM: usize = 16;
const NUM_VECTORS: usize = 2_000;

fn main() -> Result<()> {
    println!("IVF-PQ: bucketed search over compressed codes");
    println!("=============================================\n");

    let mut rng = StdRng::seed_from_u64(42);
    let vectors: Vec<Vec<f32>> = (0..NUM_VECTORS)
        .map(|_| (0..DIM).map(|_| rng.random_range(-1.0f32..1.0)).collect())
        .collect();
    let samples: Vec<f32> = vectors.iter().flatten().copied().collect();

    let mut flat = FlatIndex::new(DIM, DistanceMetric::L2)?;
    for v in &vectors {
        flat.add(v)?;
    }

    let params = IvfPqParams {
        nlist: 32,
        nprobe: 4,
        num_segments: 4,
        code_bits: 8,
    };
    let mut index = IvfPqIndex::new(DIM, DistanceMetric::L2, params)?.with_seed(7);
    index.train(&samples)?;
    for v in &vectors {
        index.add(v)?;
    }

    println!(
        "indexed {} vectors: {} raw floats vs {} code bytes per vector\n",
        index.len(),
        DIM * 4,
        params.num_segments,
    );

    let query: Vec<f32> = (0..DIM).map(|_| rng.random_range(-1.0f32..1.0)).collect();
    let exact = flat.search(&query, 5)?;
    let approx = index.search(&query, 5)?;

    println!("exact top-5:  {exact:?}");
    println!("approx top-5: {approx:?}\n");

    // Round-trip through the binary format.
    let mut bytes = Vec::new();
    let handle = Index::IvfPq(index);
    handle.save(&mut bytes)?;
    let loaded = Index::load(&mut bytes.as_slice())?;
    assert_eq!(handle.search(&query, 5)?, loaded.search(&query, 5)?);
    println!(
        "persisted {} bytes; loaded index answers identically",
        bytes.len()
    );

    Ok(())
}
