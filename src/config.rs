//! Configuration for the storage engine and object pool

use crate::error::{Error, Result};

/// Enforced minimum chunk capacity in bytes.
pub const MIN_CHUNK_CAPACITY: usize = 4096;

/// Default chunk capacity in bytes (4KiB).
pub const DEFAULT_CHUNK_CAPACITY: usize = 4096;

/// Configuration for [`ElasticStorage`](crate::storage::ElasticStorage).
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Capacity of each chunk in bytes. Must be at least [`MIN_CHUNK_CAPACITY`].
    pub chunk_capacity: usize,
    /// Initial capacity hint for the key→location index.
    pub initial_index_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            chunk_capacity: DEFAULT_CHUNK_CAPACITY,
            initial_index_capacity: 16,
        }
    }
}

impl StorageConfig {
    /// Validate the configuration, rejecting under-minimum chunk capacities.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_capacity < MIN_CHUNK_CAPACITY {
            return Err(Error::InvalidCapacity {
                capacity: self.chunk_capacity,
                minimum: MIN_CHUNK_CAPACITY,
            });
        }
        Ok(())
    }
}

/// Caching mode of an [`ObjectPool`](crate::pool::ObjectPool).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolMode {
    /// No caching at all: every read decodes from the backing storage.
    None,
    /// Entries are reclaimed as soon as no caller holds a strong reference.
    Weak,
    /// Entries are held strongly and evicted oldest-first under memory
    /// pressure once the pool exceeds its keep budget.
    Soft,
}

/// Configuration for [`ObjectPool`](crate::pool::ObjectPool).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Caching mode.
    pub mode: PoolMode,
    /// Number of entries a `Soft` pool keeps through a pressure sweep.
    /// Ignored by the other modes.
    pub soft_keep_budget: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            mode: PoolMode::Weak,
            soft_keep_budget: 1024,
        }
    }
}
