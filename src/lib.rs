//! `vicinal`: approximate nearest-neighbor search primitives.
//!
//! Three index families over a shared vector store and metric layer:
//!
//! - [`FlatIndex`]: exhaustive exact search, O(n·d) per query. The
//!   ground-truth oracle for everything else.
//! - [`IvfIndex`]: inverted file. A k-means coarse quantizer buckets vectors
//!   by nearest centroid; queries probe only the `nprobe` nearest buckets,
//!   trading recall for speed.
//! - [`IvfPqIndex`]: inverted file over product-quantized codes. Vectors are
//!   stored as `m` one-byte codebook indices instead of raw floats, and
//!   distances are estimated from precomputed code-to-centroid tables.
//!
//! ## Choosing parameters
//!
//! | Parameter | ↑ Effect |
//! |-----------|----------|
//! | `nprobe` | Better recall, slower search |
//! | `nlist` | Sharper partitioning, more training data needed |
//! | `num_segments` / `code_bits` | More memory, better accuracy |
//!
//! The right trade-off is data- and application-specific; the defaults on the
//! params structs are starting points, not policy.
//!
//! ## Lifecycle and concurrency
//!
//! IVF and IVF-PQ follow train → add → search; flat indexes are always
//! trained. Training and insertion are single-writer (`&mut self`); search
//! takes `&self` and never mutates index structures, so concurrent reads are
//! safe once the index is populated. Training parallelizes the per-sample
//! assignment step internally without changing any observable result.
//!
//! ## Persistence
//!
//! [`Index::save`] and [`Index::load`] move an index's full trained state
//! through a versioned binary layout; see [`persistence`].

pub mod distance;
pub mod error;
pub mod flat;
pub mod index;
pub mod ivf;
pub mod ivf_pq;
pub mod kernels;
pub mod kmeans;
pub mod persistence;
pub mod pq;
pub mod rank;
pub mod store;

pub use distance::DistanceMetric;
pub use error::{IndexError, Result};
pub use flat::FlatIndex;
pub use index::{Index, IndexKind, VectorIndex};
pub use ivf::{IvfIndex, IvfParams};
pub use ivf_pq::{IvfPqIndex, IvfPqParams};
pub use kmeans::KMeans;
pub use pq::ProductQuantizer;
pub use store::VectorStore;
