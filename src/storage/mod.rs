//! Byte-level storage engine
//!
//! The engine stores values as byte ranges inside an ordered sequence of
//! fixed-capacity [`Chunk`]s allocated outside any collection-managed
//! growth path. A key→[`Location`] index tracks where each live value
//! lives; deletes are logical (index removal only) and the space held by
//! tombstoned values is reclaimed by an explicit compacting
//! [`purge`](Storage::purge).

mod chunk;
mod elastic;

pub use chunk::Chunk;
pub use elastic::{ElasticStorage, Location, StorageStats};

use std::collections::HashSet;
use std::hash::Hash;

use crate::error::Result;

/// Key-value storage contract shared by the byte-level engine and the
/// object pool that decorates it. Collection façades (list/map/set types)
/// consume this trait and never touch chunks or locations directly.
pub trait Storage<K, V>
where
    K: Eq + Hash,
{
    /// Store a value under a new key. Fails with `Error::DuplicateKey` if
    /// the key already has a live entry.
    fn create(&self, key: K, value: V) -> Result<()>;

    /// Fetch the value for a key. Absent keys are a structured
    /// `Error::NotFound`, never ambiguous with a present-but-empty value.
    fn read(&self, key: &K) -> Result<V>;

    /// Replace the value for an existing key, returning the previous value.
    fn update(&self, key: K, value: V) -> Result<V>;

    /// Remove a key, returning its last value. The backing bytes are not
    /// released until the next `purge`.
    fn delete(&self, key: &K) -> Result<V>;

    /// Whether the key has a live entry.
    fn contains_key(&self, key: &K) -> bool;

    /// Whether any live entry equals `value`. Linear scan; O(n).
    fn contains(&self, value: &V) -> bool;

    /// Release every entry and all backing memory. The storage stays usable.
    fn clear(&self);

    /// Number of live (non-deleted) keys.
    fn size(&self) -> usize;

    /// Snapshot of the live key set.
    fn key_set(&self) -> HashSet<K>;

    /// Compact the backing storage, reclaiming space held by deleted
    /// entries. Never triggered implicitly.
    fn purge(&self) -> Result<()>;
}
