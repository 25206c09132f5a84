//! Error kinds for the core.
//!
//! Argument validation fails fast at the entry point. IO errors propagate
//! without retry. Invariant checks on load paths are enforced
//! unconditionally, even in release builds.

use thiserror::Error;

/// The four error kinds the core ever returns.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Structural misuse: mismatched dimensions, `M > D`, `K` larger than
    /// the training set, negative iteration counts, normalizing a zero
    /// vector, and similar caller mistakes.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A persisted file has an unrecognized magic number, version,
    /// bits-per-dimension, or `K`.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Underlying read/write failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An invariant was violated while loading persisted state (e.g.
    /// `sum(subSizes) != D`, a length mismatch between a header and its
    /// payload).
    #[error("corruption: {0}")]
    Corruption(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        CoreError::InvalidArgument(msg.into())
    }

    pub fn unsupported_format(msg: impl Into<String>) -> Self {
        CoreError::UnsupportedFormat(msg.into())
    }

    pub fn corruption(msg: impl Into<String>) -> Self {
        CoreError::Corruption(msg.into())
    }
}
