//! Elastic chunked byte storage
//!
//! Append-only key→location engine over a growing sequence of fixed-size
//! chunks. A logical offset `p` maps to chunk `p / capacity` at in-chunk
//! offset `p % capacity`; values crossing a chunk boundary are split into
//! consecutive per-chunk copies. Old chunks are never reallocated or moved,
//! so appends stay amortized O(1) and space held by deleted entries is
//! reclaimed only by an explicit compacting purge.

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::{Hash, Hasher};

use parking_lot::RwLock;
use tracing::debug;

use super::chunk::Chunk;
use super::Storage;
use crate::config::StorageConfig;
use crate::error::{Error, Result};

/// Byte-offset range identifying a stored value inside the virtual
/// concatenation of all chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// First logical byte of the value
    pub start: u64,
    /// One past the last logical byte (`end - start` is the length)
    pub end: u64,
    /// Hash of the value bytes, kept for fast negative containment checks
    pub content_hash: u64,
}

impl Location {
    /// Byte length of the stored value.
    #[inline]
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize
    }

    /// Whether the stored value is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Point-in-time counters for a storage instance.
#[derive(Debug, Clone)]
pub struct StorageStats {
    /// Live (non-deleted) keys
    pub live_keys: usize,
    /// Bytes referenced by live entries
    pub live_bytes: u64,
    /// Total bytes appended so far (live + tombstoned)
    pub cursor: u64,
    /// Allocated chunks
    pub chunk_count: usize,
}

fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    hasher.write(bytes);
    hasher.finish()
}

/// Mutable state guarded by the storage lock: the chunk sequence, the
/// monotonic write cursor and the key→location index move together.
struct Inner<K> {
    capacity: usize,
    chunks: Vec<Chunk>,
    cursor: u64,
    index: HashMap<K, Location>,
}

impl<K: Eq + Hash> Inner<K> {
    fn with_capacity(capacity: usize, index_capacity: usize) -> Self {
        Self {
            capacity,
            chunks: Vec::new(),
            cursor: 0,
            index: HashMap::with_capacity(index_capacity),
        }
    }

    /// Append `bytes` at the cursor, allocating chunks lazily and splitting
    /// across chunk boundaries. Advances the cursor by `bytes.len()`.
    fn append(&mut self, bytes: &[u8]) -> Result<()> {
        let mut written = 0;
        while written < bytes.len() {
            let chunk_idx = (self.cursor / self.capacity as u64) as usize;
            let offset = (self.cursor % self.capacity as u64) as usize;
            while self.chunks.len() <= chunk_idx {
                self.chunks.push(Chunk::new(self.capacity)?);
            }
            let take = usize::min(self.capacity - offset, bytes.len() - written);
            self.chunks[chunk_idx].write_at(offset, &bytes[written..written + take]);
            self.cursor += take as u64;
            written += take;
        }
        Ok(())
    }

    /// Copy the byte range of `location` out into a fresh, independent copy.
    fn copy_out(&self, location: &Location) -> Vec<u8> {
        let mut out = vec![0u8; location.len()];
        let mut read = 0;
        while read < out.len() {
            let pos = location.start + read as u64;
            let chunk_idx = (pos / self.capacity as u64) as usize;
            let offset = (pos % self.capacity as u64) as usize;
            let take = usize::min(self.capacity - offset, out.len() - read);
            self.chunks[chunk_idx].read_into(offset, &mut out[read..read + take]);
            read += take;
        }
        out
    }
}

/// Elastic thread-safe storage for byte values.
///
/// This is the engine underneath [`ObjectPool`](crate::pool::ObjectPool)
/// and any collection façade. Byte values live in fixed-capacity chunks
/// allocated straight from the system allocator; a readers-writer lock
/// guards the chunk sequence, cursor and index, so concurrent readers are
/// permitted and a purge swaps in its compacted state atomically.
pub struct ElasticStorage<K> {
    inner: RwLock<Inner<K>>,
}

impl<K> ElasticStorage<K>
where
    K: Eq + Hash + Clone + Debug,
{
    /// Create a storage with the default configuration (4KiB chunks).
    pub fn new() -> Self {
        let config = StorageConfig::default();
        Self {
            inner: RwLock::new(Inner::with_capacity(
                config.chunk_capacity,
                config.initial_index_capacity,
            )),
        }
    }

    /// Create a storage with a custom configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidCapacity` if the chunk capacity is below the
    /// enforced minimum.
    pub fn with_config(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        debug!(
            chunk_capacity = config.chunk_capacity,
            "elastic storage created"
        );
        Ok(Self {
            inner: RwLock::new(Inner::with_capacity(
                config.chunk_capacity,
                config.initial_index_capacity,
            )),
        })
    }

    /// Capacity of each chunk in bytes.
    pub fn chunk_capacity(&self) -> usize {
        self.inner.read().capacity
    }

    /// The location of a key's value, if live. Exposed for diagnostics.
    pub fn location(&self, key: &K) -> Option<Location> {
        self.inner.read().index.get(key).copied()
    }

    /// Point-in-time storage counters.
    pub fn stats(&self) -> StorageStats {
        let inner = self.inner.read();
        StorageStats {
            live_keys: inner.index.len(),
            live_bytes: inner.index.values().map(|l| l.len() as u64).sum(),
            cursor: inner.cursor,
            chunk_count: inner.chunks.len(),
        }
    }
}

impl<K> Default for ElasticStorage<K>
where
    K: Eq + Hash + Clone + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> std::fmt::Debug for ElasticStorage<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("ElasticStorage")
            .field("chunk_capacity", &inner.capacity)
            .field("live_keys", &inner.index.len())
            .field("cursor", &inner.cursor)
            .field("chunk_count", &inner.chunks.len())
            .finish()
    }
}

impl<K> Storage<K, Vec<u8>> for ElasticStorage<K>
where
    K: Eq + Hash + Clone + Debug,
{
    fn create(&self, key: K, value: Vec<u8>) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.index.contains_key(&key) {
            return Err(Error::duplicate_key(&key));
        }
        let start = inner.cursor;
        inner.append(&value)?;
        let location = Location {
            start,
            end: inner.cursor,
            content_hash: hash_bytes(&value),
        };
        inner.index.insert(key, location);
        Ok(())
    }

    fn read(&self, key: &K) -> Result<Vec<u8>> {
        let inner = self.inner.read();
        let location = inner.index.get(key).ok_or_else(|| Error::not_found(key))?;
        Ok(inner.copy_out(location))
    }

    fn update(&self, key: K, value: Vec<u8>) -> Result<Vec<u8>> {
        let mut inner = self.inner.write();
        let old_location = inner
            .index
            .remove(&key)
            .ok_or_else(|| Error::not_found(&key))?;
        let old = inner.copy_out(&old_location);
        let start = inner.cursor;
        if let Err(e) = inner.append(&value) {
            // The old bytes are still in place, so a failed append must not
            // destroy the entry; any partially appended bytes become
            // tombstoned space for the next purge.
            inner.index.insert(key, old_location);
            return Err(e);
        }
        let location = Location {
            start,
            end: inner.cursor,
            content_hash: hash_bytes(&value),
        };
        inner.index.insert(key, location);
        Ok(old)
    }

    fn delete(&self, key: &K) -> Result<Vec<u8>> {
        let mut inner = self.inner.write();
        let location = inner
            .index
            .remove(key)
            .ok_or_else(|| Error::not_found(key))?;
        // Logical delete: the bytes stay in place until the next purge.
        Ok(inner.copy_out(&location))
    }

    fn contains_key(&self, key: &K) -> bool {
        self.inner.read().index.contains_key(key)
    }

    fn contains(&self, value: &Vec<u8>) -> bool {
        let inner = self.inner.read();
        let hash = hash_bytes(value);
        inner
            .index
            .values()
            .filter(|loc| loc.content_hash == hash && loc.len() == value.len())
            .any(|loc| inner.copy_out(loc) == *value)
    }

    fn clear(&self) {
        let mut inner = self.inner.write();
        inner.index.clear();
        inner.chunks.clear();
        inner.cursor = 0;
        debug!("elastic storage cleared");
    }

    fn size(&self) -> usize {
        self.inner.read().index.len()
    }

    fn key_set(&self) -> HashSet<K> {
        self.inner.read().index.keys().cloned().collect()
    }

    /// Copies every live value into a freshly allocated chunk sequence, then
    /// swaps the chunk sequence, index and cursor in one step. The write
    /// lock is held for the whole pass, so readers see either the old or the
    /// fully compacted state, never anything in between.
    fn purge(&self) -> Result<()> {
        let mut inner = self.inner.write();
        let mut compacted = Inner::with_capacity(inner.capacity, inner.index.len().max(16));
        let keys: Vec<K> = inner.index.keys().cloned().collect();
        for key in keys {
            let location = inner.index[&key];
            let bytes = inner.copy_out(&location);
            let start = compacted.cursor;
            compacted.append(&bytes)?;
            compacted.index.insert(
                key,
                Location {
                    start,
                    end: compacted.cursor,
                    content_hash: location.content_hash,
                },
            );
        }
        let reclaimed = inner.cursor - compacted.cursor;
        // Swapping drops the old chunk sequence, releasing its memory.
        *inner = compacted;
        debug!(reclaimed_bytes = reclaimed, "storage purge complete");
        Ok(())
    }
}
