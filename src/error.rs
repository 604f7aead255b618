//! Error types for `vicinal`.

use thiserror::Error;

/// Errors that can occur during index construction, training, search, or
/// persistence.
///
/// All variants are synchronous, local failures raised at the point of the
/// violated precondition. Nothing here is retried internally: every variant
/// signals either caller misuse or malformed persisted data.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Vector length disagrees with the index dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A structural operation was attempted before required training.
    #[error("index is not trained: call train() before {operation}")]
    NotTrained { operation: &'static str },

    /// Fewer training samples than required clusters.
    #[error("insufficient training data: {samples} samples for {required} clusters")]
    InsufficientData { samples: usize, required: usize },

    /// Dimension is not divisible by the requested PQ segment count.
    #[error("dimension {dimension} is not divisible by {segments} segments")]
    InvalidSegmentation { dimension: usize, segments: usize },

    /// Unknown vector identifier.
    #[error("no vector with id {0}")]
    NotFound(u32),

    /// Persisted state failed structural validation at load time.
    #[error("corrupt index state: {0}")]
    CorruptState(String),

    /// Invalid parameter value.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Operation not allowed in the index's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// I/O error at the persistence boundary.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;
