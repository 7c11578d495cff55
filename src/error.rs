//! Error types for the chunkstore engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the storage engine and object pool
#[derive(Error, Debug)]
pub enum Error {
    /// Key has no live entry in the storage index
    #[error("key not found: {key}")]
    NotFound { key: String },

    /// Create on a key that already has a live entry
    #[error("duplicate key: {key}")]
    DuplicateKey { key: String },

    /// The backing memory region could not be grown
    #[error("chunk allocation failed for size {size}: {reason}")]
    AllocationFailed { size: usize, reason: String },

    /// Chunk capacity below the enforced minimum
    #[error("chunk capacity {capacity} is below the minimum of {minimum} bytes")]
    InvalidCapacity { capacity: usize, minimum: usize },

    /// Converter failed to encode a value
    #[error("encoding failed: {0}")]
    Encoding(String),

    /// Converter failed to decode a stored record
    #[error("decoding failed: {0}")]
    Decoding(String),

    /// A background worker is no longer accepting work
    #[error("background worker stopped: {0}")]
    WorkerStopped(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Build a `NotFound` from any debuggable key.
    pub(crate) fn not_found<K: std::fmt::Debug>(key: &K) -> Self {
        Error::NotFound {
            key: format!("{key:?}"),
        }
    }

    /// Build a `DuplicateKey` from any debuggable key.
    pub(crate) fn duplicate_key<K: std::fmt::Debug>(key: &K) -> Self {
        Error::DuplicateKey {
            key: format!("{key:?}"),
        }
    }
}
