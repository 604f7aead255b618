//! Append-only vector storage.

use crate::error::{IndexError, Result};

/// Flat, append-only storage for fixed-dimension vectors.
///
/// Vectors are stored contiguously (structure-of-arrays), and a vector's
/// position is its identifier: a `u32` assigned at append time, stable for the
/// store's lifetime, and never reused. Existing entries are never mutated and
/// deletion is not supported.
#[derive(Debug, Clone, Default)]
pub struct VectorStore {
    data: Vec<f32>,
    dimension: usize,
}

impl VectorStore {
    /// Create an empty store for vectors of the given dimension.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            data: Vec::new(),
            dimension,
        }
    }

    /// Append a vector, returning its identifier.
    ///
    /// Identifiers are `u32`, so a store holds at most `u32::MAX + 1` vectors;
    /// appending past that is [`IndexError::InvalidState`].
    pub fn append(&mut self, vector: &[f32]) -> Result<u32> {
        if vector.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let id = next_id(self.len())?;
        self.data.extend_from_slice(vector);
        Ok(id)
    }

    /// Get a vector by identifier.
    pub fn get(&self, id: u32) -> Result<&[f32]> {
        let idx = id as usize;
        if idx >= self.len() {
            return Err(IndexError::NotFound(id));
        }
        let start = idx * self.dimension;
        Ok(&self.data[start..start + self.dimension])
    }

    /// Number of stored vectors.
    #[must_use]
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    /// Whether the store holds no vectors.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Vector dimension.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Iterate over stored vectors in identifier order.
    pub fn iter(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimension)
    }

    /// The underlying flat buffer (row-major, identifier order).
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }
}

pub(crate) fn next_id(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| {
        IndexError::InvalidState("vector identifier space exhausted".to_string())
    })
}

/// Interpret a flat row-major buffer as vectors of `dimension`, returning the
/// vector count.
pub(crate) fn sample_count(samples: &[f32], dimension: usize) -> Result<usize> {
    if samples.len() % dimension != 0 {
        return Err(IndexError::InvalidParameter(format!(
            "buffer length {} is not a multiple of dimension {dimension}",
            samples.len()
        )));
    }
    Ok(samples.len() / dimension)
}
