//! Object pool: decoded-value cache plus asynchronous write-behind
//!
//! The pool presents the same storage contract as the byte-level engine it
//! decorates, but keeps decoded values in a cache keyed by their storage
//! key and defers durable writes to a background mover, so the hot write
//! path never waits on encoding or chunk management. Read-your-writes
//! consistency is preserved by the drain rule: any operation that has to
//! consult the backing storage first waits until the write-behind queue is
//! empty.
//!
//! Per-key lifecycle: absent → cached+queued → cached+persisted →
//! evicted (reclaimed; durable copy remains) → absent (explicit delete).

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, warn};

use super::entry::CacheSlot;
use crate::config::{PoolConfig, PoolMode};
use crate::convert::Converter;
use crate::error::{Error, Result};
use crate::pressure::{PressureCallback, PressureNotifier};
use crate::storage::{ElasticStorage, Storage};

/// Work items drained by the mover, strictly in enqueue order.
enum Job<K, V> {
    Write(K, Arc<V>),
    Stop,
}

/// State shared between callers and the two background workers.
struct Shared<K, V> {
    storage: ElasticStorage<K>,
    converter: Box<dyn Converter<V>>,
    cache: Mutex<HashMap<K, CacheSlot<V>>>,
    /// Writes enqueued but not yet applied to storage.
    pending: Mutex<usize>,
    /// Signaled by the mover whenever `pending` reaches zero.
    drained: Condvar,
    /// Side channel for write-behind failures, which have no caller to
    /// propagate to.
    last_error: Mutex<Option<Error>>,
    /// Cooperative stop for the cleaner (the mover stops via `Job::Stop`).
    stop: AtomicBool,
}

/// Wakes the cleaner; registered with the pressure notifier.
struct CleanerSignal {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

impl CleanerSignal {
    fn new() -> Self {
        Self {
            signaled: Mutex::new(false),
            condvar: Condvar::new(),
        }
    }

    fn notify(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.condvar.notify_one();
    }
}

impl PressureCallback for CleanerSignal {
    fn on_pressure(&self) {
        self.notify();
    }
}

struct Workers<K, V> {
    tx: Sender<Job<K, V>>,
    mover: Option<JoinHandle<()>>,
    cleaner: Option<JoinHandle<()>>,
}

/// Point-in-time counters for a pool instance.
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// Entries currently in the cache map (dead weak slots included until
    /// the next cleaner sweep)
    pub cached_entries: usize,
    /// Writes enqueued but not yet persisted
    pub pending_writes: usize,
    /// Configured caching mode
    pub mode: PoolMode,
}

/// Cache + write-behind decorator over [`ElasticStorage`].
///
/// Values are encoded/decoded by the injected [`Converter`] only at the
/// storage boundary; cache hits return the live `Arc` without any decode.
/// Two dedicated workers run per pool: the *mover* drains the write-behind
/// queue into storage, the *cleaner* sweeps reclaimed cache entries when
/// the [`PressureNotifier`] fires. `clear()` is the only way to abort
/// them; none of the blocking waits are otherwise cancellable.
pub struct ObjectPool<K, V> {
    shared: Arc<Shared<K, V>>,
    signal: Arc<CleanerSignal>,
    workers: Mutex<Workers<K, V>>,
    config: PoolConfig,
}

impl<K, V> ObjectPool<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Create a pool with the default configuration (weak caching),
    /// subscribed to the process-wide pressure notifier.
    pub fn new(storage: ElasticStorage<K>, converter: Box<dyn Converter<V>>) -> Result<Self> {
        Self::with_config(
            storage,
            converter,
            PoolConfig::default(),
            PressureNotifier::global(),
        )
    }

    /// Create a pool with a custom configuration and pressure notifier.
    pub fn with_config(
        storage: ElasticStorage<K>,
        converter: Box<dyn Converter<V>>,
        config: PoolConfig,
        notifier: &PressureNotifier,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            storage,
            converter,
            cache: Mutex::new(HashMap::new()),
            pending: Mutex::new(0),
            drained: Condvar::new(),
            last_error: Mutex::new(None),
            stop: AtomicBool::new(false),
        });
        let signal = Arc::new(CleanerSignal::new());

        if config.mode != PoolMode::None {
            let callback = Arc::clone(&signal) as Arc<dyn PressureCallback>;
            notifier.subscribe(Arc::downgrade(&callback));
        }

        let workers = Self::spawn_workers(&shared, &signal, &config)?;
        debug!(mode = ?config.mode, "object pool started");

        Ok(Self {
            shared,
            signal,
            workers: Mutex::new(workers),
            config,
        })
    }

    /// Cache the value (per the configured mode), enqueue the durable write
    /// and return immediately. Durability is not guaranteed on return; a
    /// later write for the same key wins once the queue drains.
    pub fn create(&self, key: K, value: Arc<V>) -> Result<()> {
        self.cache_insert(key.clone(), &value);

        // The workers lock keeps the enqueue atomic with respect to clear():
        // an entry is either counted and sent to the live queue, or it sees
        // the restarted one.
        let workers = self.workers.lock();
        {
            let mut pending = self.shared.pending.lock();
            *pending += 1;
        }
        if let Err(e) = workers.tx.send(Job::Write(key, value)) {
            let mut pending = self.shared.pending.lock();
            *pending -= 1;
            if *pending == 0 {
                self.shared.drained.notify_all();
            }
            return Err(Error::WorkerStopped(format!(
                "write-behind queue closed: {e}"
            )));
        }
        Ok(())
    }

    /// Return the cached value if it is still live; otherwise wait for the
    /// write-behind queue to drain, decode from storage and repopulate the
    /// cache.
    pub fn read(&self, key: &K) -> Result<Arc<V>> {
        if self.config.mode != PoolMode::None {
            let mut cache = self.shared.cache.lock();
            if let Some(slot) = cache.get_mut(key) {
                if let Some(value) = slot.get() {
                    return Ok(value);
                }
            }
        }

        self.wait_drained();
        let bytes = self.shared.storage.read(key)?;
        let value = Arc::new(self.shared.converter.decode(&bytes)?);
        self.cache_insert(key.clone(), &value);
        Ok(value)
    }

    /// Replace the value for an existing key, returning the previous value.
    /// Applied synchronously after a drain (an update has a past to respect,
    /// unlike a create).
    pub fn update(&self, key: K, value: Arc<V>) -> Result<Arc<V>> {
        self.wait_drained();
        let bytes = self.shared.converter.encode(value.as_ref())?;
        let old_bytes = self.shared.storage.update(key.clone(), bytes)?;
        let old = self.shared.converter.decode(&old_bytes)?;
        self.cache_insert(key, &value);
        Ok(Arc::new(old))
    }

    /// Remove a key from storage and cache, returning its last value.
    pub fn delete(&self, key: &K) -> Result<Arc<V>> {
        self.wait_drained();
        let bytes = self.shared.storage.delete(key)?;
        self.shared.cache.lock().remove(key);
        let old = self.shared.converter.decode(&bytes)?;
        Ok(Arc::new(old))
    }

    /// Whether the key has a durable entry (after drain).
    pub fn contains_key(&self, key: &K) -> bool {
        self.wait_drained();
        self.shared.storage.contains_key(key)
    }

    /// Whether any stored value decodes equal to `value`. Linear scan; O(n).
    pub fn contains(&self, value: &V) -> bool
    where
        V: PartialEq,
    {
        self.wait_drained();
        for key in self.shared.storage.key_set() {
            if let Ok(bytes) = self.shared.storage.read(&key) {
                if let Ok(decoded) = self.shared.converter.decode(&bytes) {
                    if decoded == *value {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Number of live keys (after drain).
    pub fn size(&self) -> usize {
        self.wait_drained();
        self.shared.storage.size()
    }

    /// Snapshot of the live key set (after drain).
    pub fn key_set(&self) -> HashSet<K> {
        self.wait_drained();
        self.shared.storage.key_set()
    }

    /// Compact the backing storage (after drain).
    pub fn purge(&self) -> Result<()> {
        self.wait_drained();
        self.shared.storage.purge()
    }

    /// Stop both workers, release every cache entry and the backing
    /// storage, then reinitialize to an empty, ready state.
    pub fn clear(&self) {
        let mut workers = self.workers.lock();

        // The stop job travels the queue behind any earlier writes, so the
        // mover finishes its backlog before exiting; the cleaner stops on
        // the flag. Both are joined before resources are released.
        self.shared.stop.store(true, Ordering::Release);
        let _ = workers.tx.send(Job::Stop);
        self.signal.notify();

        if let Some(handle) = workers.mover.take() {
            if handle.join().is_err() {
                warn!("mover panicked during clear");
            }
        }
        if let Some(handle) = workers.cleaner.take() {
            if handle.join().is_err() {
                warn!("cleaner panicked during clear");
            }
        }

        self.shared.cache.lock().clear();
        self.shared.storage.clear();
        *self.shared.last_error.lock() = None;

        self.shared.stop.store(false, Ordering::Release);
        *self.signal.signaled.lock() = false;
        match Self::spawn_workers(&self.shared, &self.signal, &self.config) {
            Ok(fresh) => *workers = fresh,
            Err(e) => error!(error = %e, "failed to restart pool workers after clear"),
        }
    }

    /// Block until every enqueued write has been applied to storage.
    pub fn wait_drained(&self) {
        let mut pending = self.shared.pending.lock();
        while *pending > 0 {
            self.shared.drained.wait(&mut pending);
        }
    }

    /// Last error reported by the write-behind mover, if any; taking it
    /// clears the slot. Failed entries are dropped, never retried.
    pub fn take_background_error(&self) -> Option<Error> {
        self.shared.last_error.lock().take()
    }

    /// Point-in-time pool counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            cached_entries: self.shared.cache.lock().len(),
            pending_writes: *self.shared.pending.lock(),
            mode: self.config.mode,
        }
    }

    fn cache_insert(&self, key: K, value: &Arc<V>) {
        let slot = match self.config.mode {
            PoolMode::None => return,
            PoolMode::Weak => CacheSlot::Weak(Arc::downgrade(value)),
            PoolMode::Soft => CacheSlot::Soft {
                value: Arc::clone(value),
                last_touch: Instant::now(),
            },
        };
        self.shared.cache.lock().insert(key, slot);
    }

    fn spawn_workers(
        shared: &Arc<Shared<K, V>>,
        signal: &Arc<CleanerSignal>,
        config: &PoolConfig,
    ) -> Result<Workers<K, V>> {
        let (tx, rx) = channel::unbounded();

        let mover = {
            let shared = Arc::clone(shared);
            thread::Builder::new()
                .name("chunkstore-mover".into())
                .spawn(move || Self::mover_loop(shared, rx))
                .map_err(|e| Error::Internal(format!("failed to spawn mover: {e}")))?
        };

        let cleaner = if config.mode == PoolMode::None {
            None
        } else {
            let shared = Arc::clone(shared);
            let signal = Arc::clone(signal);
            let mode = config.mode;
            let budget = config.soft_keep_budget;
            let handle = thread::Builder::new()
                .name("chunkstore-cleaner".into())
                .spawn(move || Self::cleaner_loop(shared, signal, mode, budget))
                .map_err(|e| Error::Internal(format!("failed to spawn cleaner: {e}")))?;
            Some(handle)
        };

        Ok(Workers {
            tx,
            mover: Some(mover),
            cleaner,
        })
    }

    /// Drains the queue in enqueue order, one entry at a time. A failed
    /// entry is logged, recorded in the side channel and dropped; the loop
    /// itself never wedges.
    fn mover_loop(shared: Arc<Shared<K, V>>, rx: Receiver<Job<K, V>>) {
        debug!("write-behind mover started");
        loop {
            match rx.recv() {
                Ok(Job::Write(key, value)) => {
                    if let Err(e) = Self::apply_write(&shared, &key, value.as_ref()) {
                        error!(key = ?key, error = %e, "write-behind entry failed, entry dropped");
                        *shared.last_error.lock() = Some(e);
                    }
                    let mut pending = shared.pending.lock();
                    *pending -= 1;
                    if *pending == 0 {
                        shared.drained.notify_all();
                    }
                }
                Ok(Job::Stop) | Err(_) => break,
            }
        }
        // Entries enqueued after a stop are discarded along with the queue;
        // zero the counter so no drain-waiter hangs.
        let mut pending = shared.pending.lock();
        *pending = 0;
        shared.drained.notify_all();
        debug!("write-behind mover stopped");
    }

    fn apply_write(shared: &Shared<K, V>, key: &K, value: &V) -> Result<()> {
        let bytes = shared.converter.encode(value)?;
        if shared.storage.contains_key(key) {
            // The caller wrote the same key twice before the first write
            // landed; last write wins.
            shared.storage.update(key.clone(), bytes).map(|_| ())
        } else {
            shared.storage.create(key.clone(), bytes)
        }
    }

    /// Waits for a pressure signal, then removes reclaimed weak entries or
    /// evicts soft entries beyond the keep budget, oldest first.
    fn cleaner_loop(
        shared: Arc<Shared<K, V>>,
        signal: Arc<CleanerSignal>,
        mode: PoolMode,
        budget: usize,
    ) {
        debug!("cache cleaner started");
        loop {
            {
                let mut signaled = signal.signaled.lock();
                while !*signaled && !shared.stop.load(Ordering::Acquire) {
                    signal.condvar.wait(&mut signaled);
                }
                if shared.stop.load(Ordering::Acquire) {
                    break;
                }
                *signaled = false;
            }
            Self::sweep(&shared, mode, budget);
        }
        debug!("cache cleaner stopped");
    }

    fn sweep(shared: &Shared<K, V>, mode: PoolMode, budget: usize) {
        let mut cache = shared.cache.lock();
        match mode {
            PoolMode::Weak => {
                let before = cache.len();
                cache.retain(|_, slot| !slot.is_dead());
                let swept = before - cache.len();
                if swept > 0 {
                    debug!(swept, "reclaimed cache entries removed");
                }
            }
            PoolMode::Soft => {
                if cache.len() > budget {
                    let mut ages: Vec<(K, Instant)> = cache
                        .iter()
                        .filter_map(|(key, slot)| slot.soft_age().map(|age| (key.clone(), age)))
                        .collect();
                    ages.sort_by_key(|(_, age)| *age);
                    let excess = cache.len() - budget;
                    for (key, _) in ages.into_iter().take(excess) {
                        cache.remove(&key);
                    }
                    debug!(evicted = excess, "soft cache entries evicted under pressure");
                }
            }
            PoolMode::None => {}
        }
    }
}

impl<K, V> Storage<K, Arc<V>> for ObjectPool<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: PartialEq + Send + Sync + 'static,
{
    fn create(&self, key: K, value: Arc<V>) -> Result<()> {
        ObjectPool::create(self, key, value)
    }

    fn read(&self, key: &K) -> Result<Arc<V>> {
        ObjectPool::read(self, key)
    }

    fn update(&self, key: K, value: Arc<V>) -> Result<Arc<V>> {
        ObjectPool::update(self, key, value)
    }

    fn delete(&self, key: &K) -> Result<Arc<V>> {
        ObjectPool::delete(self, key)
    }

    fn contains_key(&self, key: &K) -> bool {
        ObjectPool::contains_key(self, key)
    }

    fn contains(&self, value: &Arc<V>) -> bool {
        ObjectPool::contains(self, value.as_ref())
    }

    fn clear(&self) {
        ObjectPool::clear(self)
    }

    fn size(&self) -> usize {
        ObjectPool::size(self)
    }

    fn key_set(&self) -> HashSet<K> {
        ObjectPool::key_set(self)
    }

    fn purge(&self) -> Result<()> {
        ObjectPool::purge(self)
    }
}

impl<K, V> Drop for ObjectPool<K, V> {
    fn drop(&mut self) {
        self.shared.stop.store(true, Ordering::Release);
        let workers = self.workers.get_mut();
        let _ = workers.tx.send(Job::Stop);
        self.signal.notify();
        if let Some(handle) = workers.mover.take() {
            let _ = handle.join();
        }
        if let Some(handle) = workers.cleaner.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::RawConverter;
    use assert_matches::assert_matches;

    fn raw_pool(mode: PoolMode) -> ObjectPool<String, Vec<u8>> {
        ObjectPool::with_config(
            ElasticStorage::new(),
            Box::new(RawConverter),
            PoolConfig {
                mode,
                ..Default::default()
            },
            PressureNotifier::global(),
        )
        .unwrap()
    }

    #[test]
    fn test_create_then_read_before_and_after_drain() {
        let pool = raw_pool(PoolMode::Weak);
        pool.create("a".to_string(), Arc::new(vec![1, 2, 3])).unwrap();

        // Before drain the value is observable from the cache or after
        // waiting; after drain it is durable.
        assert_eq!(*pool.read(&"a".to_string()).unwrap(), vec![1, 2, 3]);
        pool.wait_drained();
        assert_eq!(*pool.read(&"a".to_string()).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_cache_hit_returns_same_allocation() {
        let pool = raw_pool(PoolMode::Soft);
        let value = Arc::new(vec![9u8; 16]);
        pool.create("k".to_string(), Arc::clone(&value)).unwrap();

        let first = pool.read(&"k".to_string()).unwrap();
        let second = pool.read(&"k".to_string()).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &value));
    }

    #[test]
    fn test_none_mode_never_caches() {
        let pool = raw_pool(PoolMode::None);
        pool.create("k".to_string(), Arc::new(vec![5])).unwrap();

        let first = pool.read(&"k".to_string()).unwrap();
        let second = pool.read(&"k".to_string()).unwrap();
        // Each read decodes a fresh copy.
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(pool.stats().cached_entries, 0);
    }

    #[test]
    fn test_write_behind_ordering_same_key() {
        let pool = raw_pool(PoolMode::Weak);
        pool.create("k".to_string(), Arc::new(vec![1])).unwrap();
        pool.update("k".to_string(), Arc::new(vec![2])).unwrap();

        assert_eq!(*pool.read(&"k".to_string()).unwrap(), vec![2]);
    }

    #[test]
    fn test_double_create_last_write_wins() {
        let pool = raw_pool(PoolMode::Weak);
        pool.create("k".to_string(), Arc::new(vec![1])).unwrap();
        pool.create("k".to_string(), Arc::new(vec![2])).unwrap();
        pool.wait_drained();

        assert_eq!(*pool.read(&"k".to_string()).unwrap(), vec![2]);
        assert!(pool.take_background_error().is_none());
    }

    #[test]
    fn test_delete_returns_old_value() {
        let pool = raw_pool(PoolMode::Weak);
        pool.create("k".to_string(), Arc::new(vec![3, 4])).unwrap();

        let old = pool.delete(&"k".to_string()).unwrap();
        assert_eq!(*old, vec![3, 4]);
        assert_matches!(pool.read(&"k".to_string()), Err(Error::NotFound { .. }));
    }

    #[test]
    fn test_update_absent_key_is_not_found() {
        let pool = raw_pool(PoolMode::Weak);
        assert_matches!(
            pool.update("nope".to_string(), Arc::new(vec![1])),
            Err(Error::NotFound { .. })
        );
    }

    #[test]
    fn test_clear_leaves_pool_usable() {
        let pool = raw_pool(PoolMode::Weak);
        pool.create("a".to_string(), Arc::new(vec![1])).unwrap();
        pool.clear();

        assert_eq!(pool.size(), 0);
        pool.create("b".to_string(), Arc::new(vec![2])).unwrap();
        assert_eq!(*pool.read(&"b".to_string()).unwrap(), vec![2]);
    }

    #[test]
    fn test_contains_decode_compare() {
        let pool = raw_pool(PoolMode::Weak);
        pool.create("a".to_string(), Arc::new(vec![1, 2])).unwrap();

        assert!(ObjectPool::contains(&pool, &vec![1, 2]));
        assert!(!ObjectPool::contains(&pool, &vec![2, 1]));
    }

    #[test]
    fn test_cleaner_subscribes_unless_caching_disabled() {
        use crate::pressure::TimerSource;
        use std::time::Duration;

        let notifier =
            PressureNotifier::with_source(Box::new(TimerSource::new(Duration::from_secs(3600))));

        let caching: ObjectPool<String, Vec<u8>> = ObjectPool::with_config(
            ElasticStorage::new(),
            Box::new(RawConverter),
            PoolConfig::default(),
            &notifier,
        )
        .unwrap();
        assert_eq!(notifier.subscriber_count(), 1);

        let uncached: ObjectPool<String, Vec<u8>> = ObjectPool::with_config(
            ElasticStorage::new(),
            Box::new(RawConverter),
            PoolConfig {
                mode: PoolMode::None,
                ..Default::default()
            },
            &notifier,
        )
        .unwrap();
        assert_eq!(notifier.subscriber_count(), 1);

        drop(caching);
        drop(uncached);
    }

    #[test]
    fn test_background_error_side_channel() {
        struct FailingConverter;
        impl Converter<Vec<u8>> for FailingConverter {
            fn encode(&self, value: &Vec<u8>) -> Result<Vec<u8>> {
                if value.first() == Some(&0xFF) {
                    Err(Error::Encoding("poisoned value".into()))
                } else {
                    Ok(value.clone())
                }
            }
            fn decode(&self, bytes: &[u8]) -> Result<Vec<u8>> {
                Ok(bytes.to_vec())
            }
        }

        let pool: ObjectPool<String, Vec<u8>> = ObjectPool::with_config(
            ElasticStorage::new(),
            Box::new(FailingConverter),
            PoolConfig::default(),
            PressureNotifier::global(),
        )
        .unwrap();

        pool.create("bad".to_string(), Arc::new(vec![0xFF, 1])).unwrap();
        pool.create("good".to_string(), Arc::new(vec![1])).unwrap();
        pool.wait_drained();

        // The failed entry was dropped, the queue kept draining.
        assert_matches!(pool.take_background_error(), Some(Error::Encoding(_)));
        assert!(pool.take_background_error().is_none());
        assert_eq!(pool.size(), 1);
        assert!(pool.contains_key(&"good".to_string()));
    }
}
