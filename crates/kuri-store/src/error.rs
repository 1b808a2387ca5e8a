//! Storage error types.

use thiserror::Error;

/// Storage errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The requested file does not exist (fresh node, no snapshot yet).
    #[error("not found")]
    NotFound,

    /// A magic number, format version, or checksum did not match.
    #[error("corruption: {reason}")]
    Corruption { reason: String },

    /// Underlying filesystem failure (open, short read/write, rename).
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl StoreError {
    pub(crate) fn corruption(reason: impl Into<String>) -> Self {
        StoreError::Corruption {
            reason: reason.into(),
        }
    }
}

/// Storage result type.
pub type Result<T> = std::result::Result<T, StoreError>;
