//! Unified index surface: one trait over the concrete index types and an
//! enum handle for kind-generic callers (and persistence).

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::distance::DistanceMetric;
use crate::error::Result;
use crate::flat::FlatIndex;
use crate::ivf::{IvfIndex, IvfParams};
use crate::ivf_pq::{IvfPqIndex, IvfPqParams};

/// The index families this crate implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    /// Exhaustive exact search.
    Flat,
    /// Inverted file over exact vectors.
    Ivf,
    /// Inverted file over PQ codes.
    IvfPq,
}

/// Common lifecycle shared by every index: train (where required), append
/// vectors, search.
///
/// `train` and `add` follow a single-writer discipline: they are `&mut self`
/// and callers must serialize them externally. `search` is `&self` and free
/// of side effects on index structures, so concurrent reads are safe once
/// training and population are done.
pub trait VectorIndex {
    /// Train on a row-major flat sample buffer. A no-op for flat indexes.
    fn train(&mut self, samples: &[f32]) -> Result<()>;

    /// Add a vector, returning its identifier.
    fn add(&mut self, vector: &[f32]) -> Result<u32>;

    /// Return the `k` nearest vectors as (id, distance), ascending by
    /// distance with ties broken by ascending identifier.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u32, f32)>>;

    /// Vector dimension.
    fn dimension(&self) -> usize;

    /// Number of stored vectors.
    fn len(&self) -> usize;

    /// Whether the index holds no vectors.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the index is ready for `add`/`search`.
    fn is_trained(&self) -> bool;

    /// Configured distance metric.
    fn metric(&self) -> DistanceMetric;

    /// Which index family this is.
    fn kind(&self) -> IndexKind;
}

impl VectorIndex for FlatIndex {
    fn train(&mut self, samples: &[f32]) -> Result<()> {
        self.train(samples)
    }

    fn add(&mut self, vector: &[f32]) -> Result<u32> {
        self.add(vector)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u32, f32)>> {
        self.search(query, k)
    }

    fn dimension(&self) -> usize {
        self.dimension()
    }

    fn len(&self) -> usize {
        self.len()
    }

    fn is_trained(&self) -> bool {
        true
    }

    fn metric(&self) -> DistanceMetric {
        self.metric()
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Flat
    }
}

impl VectorIndex for IvfIndex {
    fn train(&mut self, samples: &[f32]) -> Result<()> {
        self.train(samples)
    }

    fn add(&mut self, vector: &[f32]) -> Result<u32> {
        self.add(vector)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u32, f32)>> {
        self.search(query, k)
    }

    fn dimension(&self) -> usize {
        self.dimension()
    }

    fn len(&self) -> usize {
        self.len()
    }

    fn is_trained(&self) -> bool {
        self.is_trained()
    }

    fn metric(&self) -> DistanceMetric {
        self.metric()
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Ivf
    }
}

impl VectorIndex for IvfPqIndex {
    fn train(&mut self, samples: &[f32]) -> Result<()> {
        self.train(samples)
    }

    fn add(&mut self, vector: &[f32]) -> Result<u32> {
        self.add(vector)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u32, f32)>> {
        self.search(query, k)
    }

    fn dimension(&self) -> usize {
        self.dimension()
    }

    fn len(&self) -> usize {
        self.len()
    }

    fn is_trained(&self) -> bool {
        self.is_trained()
    }

    fn metric(&self) -> DistanceMetric {
        self.metric()
    }

    fn kind(&self) -> IndexKind {
        IndexKind::IvfPq
    }
}

/// Kind-generic index handle.
///
/// Constructors mirror `create_index(kind, dimension, metric, params)`;
/// [`Index::save`] and [`Index::load`] are the persistence boundary.
#[derive(Debug, Clone)]
pub enum Index {
    Flat(FlatIndex),
    Ivf(IvfIndex),
    IvfPq(IvfPqIndex),
}

impl Index {
    /// Create a flat (exact) index.
    pub fn flat(dimension: usize, metric: DistanceMetric) -> Result<Self> {
        Ok(Self::Flat(FlatIndex::new(dimension, metric)?))
    }

    /// Create an IVF index.
    pub fn ivf(dimension: usize, metric: DistanceMetric, params: IvfParams) -> Result<Self> {
        Ok(Self::Ivf(IvfIndex::new(dimension, metric, params)?))
    }

    /// Create an IVF-PQ index.
    pub fn ivf_pq(
        dimension: usize,
        metric: DistanceMetric,
        params: IvfPqParams,
    ) -> Result<Self> {
        Ok(Self::IvfPq(IvfPqIndex::new(dimension, metric, params)?))
    }

    /// Serialize the index's full trained state to a byte stream.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        crate::persistence::save(self, writer)
    }

    /// Reconstruct an index from a byte stream produced by [`Index::save`].
    pub fn load<R: Read>(reader: &mut R) -> Result<Self> {
        crate::persistence::load(reader)
    }
}

impl VectorIndex for Index {
    fn train(&mut self, samples: &[f32]) -> Result<()> {
        match self {
            Self::Flat(i) => i.train(samples),
            Self::Ivf(i) => i.train(samples),
            Self::IvfPq(i) => i.train(samples),
        }
    }

    fn add(&mut self, vector: &[f32]) -> Result<u32> {
        match self {
            Self::Flat(i) => i.add(vector),
            Self::Ivf(i) => i.add(vector),
            Self::IvfPq(i) => i.add(vector),
        }
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u32, f32)>> {
        match self {
            Self::Flat(i) => i.search(query, k),
            Self::Ivf(i) => i.search(query, k),
            Self::IvfPq(i) => i.search(query, k),
        }
    }

    fn dimension(&self) -> usize {
        match self {
            Self::Flat(i) => i.dimension(),
            Self::Ivf(i) => i.dimension(),
            Self::IvfPq(i) => i.dimension(),
        }
    }

    fn len(&self) -> usize {
        match self {
            Self::Flat(i) => i.len(),
            Self::Ivf(i) => i.len(),
            Self::IvfPq(i) => i.len(),
        }
    }

    fn is_trained(&self) -> bool {
        match self {
            Self::Flat(_) => true,
            Self::Ivf(i) => i.is_trained(),
            Self::IvfPq(i) => i.is_trained(),
        }
    }

    fn metric(&self) -> DistanceMetric {
        match self {
            Self::Flat(i) => i.metric(),
            Self::Ivf(i) => i.metric(),
            Self::IvfPq(i) => i.metric(),
        }
    }

    fn kind(&self) -> IndexKind {
        match self {
            Self::Flat(_) => IndexKind::Flat,
            Self::Ivf(_) => IndexKind::Ivf,
            Self::IvfPq(_) => IndexKind::IvfPq,
        }
    }
}
