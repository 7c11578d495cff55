//! Chunkstore - Off-Heap Chunked Storage Engine with Object Pooling
//!
//! A storage and caching engine for holding very large numbers of elements
//! without growing the normal allocation path of the collections that use
//! it. Element bytes live in large fixed-capacity chunks allocated straight
//! from the system allocator; a decoded-object cache sits in front so
//! repeated reads avoid decode costs.
//!
//! # Architecture
//!
//! ```text
//! Collection façade (list/map/set, external)
//!         │
//!         ▼
//! ObjectPool  ── cache map (weak/soft slots) ──▶ cleaner worker
//!         │           ▲                              ▲
//!         │ write-behind queue (FIFO)        PressureNotifier
//!         ▼                                   (timer fallback)
//!     mover worker ──▶ Converter ──▶ ElasticStorage ──▶ Chunk sequence
//! ```
//!
//! Writes are cached immediately and persisted asynchronously by the mover;
//! reads that miss the cache wait for the queue to drain, then decode from
//! storage (read-your-writes). Deletes are logical; an explicit
//! [`purge`](storage::Storage::purge) compacts tombstoned space. Nothing is
//! durable across process restarts.
//!
//! # Modules
//!
//! - [`config`] - Chunk capacity and pool caching mode configuration
//! - [`convert`] - Object↔bytes converter boundary
//! - [`error`] - Error types
//! - [`pool`] - Object pool (cache + write-behind)
//! - [`pressure`] - Memory-pressure notification singleton
//! - [`storage`] - Chunked byte-level storage engine
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use chunkstore::{ElasticStorage, JsonConverter, ObjectPool};
//!
//! # fn main() -> chunkstore::Result<()> {
//! let pool: ObjectPool<String, Vec<String>> = ObjectPool::new(
//!     ElasticStorage::new(),
//!     Box::new(JsonConverter::new()),
//! )?;
//!
//! pool.create("tags".to_string(), Arc::new(vec!["a".to_string()]))?;
//! let tags = pool.read(&"tags".to_string())?;
//! assert_eq!(tags.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod convert;
pub mod error;
pub mod pool;
pub mod pressure;
pub mod storage;

pub use config::{PoolConfig, PoolMode, StorageConfig, DEFAULT_CHUNK_CAPACITY, MIN_CHUNK_CAPACITY};
pub use convert::{Converter, JsonConverter, RawConverter};
pub use error::{Error, Result};
pub use pool::{ObjectPool, PoolStats};
pub use pressure::{PressureCallback, PressureNotifier, PressureSource, TimerSource};
pub use storage::{ElasticStorage, Location, Storage, StorageStats};
