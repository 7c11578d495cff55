//! Cache slots held by the object pool

use std::sync::{Arc, Weak};
use std::time::Instant;

/// One cached, decoded value.
///
/// `Weak` slots are reclaimable the moment no caller holds a strong
/// reference; `Soft` slots keep the value alive and are only evicted by the
/// cleaner under memory pressure, oldest-first. The write-behind queue holds
/// its own strong reference until the entry is persisted, so a value just
/// written is always still reachable through its weak slot.
pub(crate) enum CacheSlot<V> {
    Weak(Weak<V>),
    Soft { value: Arc<V>, last_touch: Instant },
}

impl<V> CacheSlot<V> {
    /// The live value, if any. Touches soft slots for eviction ordering.
    pub(crate) fn get(&mut self) -> Option<Arc<V>> {
        match self {
            CacheSlot::Weak(weak) => weak.upgrade(),
            CacheSlot::Soft { value, last_touch } => {
                *last_touch = Instant::now();
                Some(Arc::clone(value))
            }
        }
    }

    /// Whether the underlying value has been reclaimed.
    pub(crate) fn is_dead(&self) -> bool {
        match self {
            CacheSlot::Weak(weak) => weak.strong_count() == 0,
            CacheSlot::Soft { .. } => false,
        }
    }

    /// Last-touch instant of a soft slot.
    pub(crate) fn soft_age(&self) -> Option<Instant> {
        match self {
            CacheSlot::Weak(_) => None,
            CacheSlot::Soft { last_touch, .. } => Some(*last_touch),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weak_slot_dies_with_last_strong_ref() {
        let value = Arc::new(7u32);
        let mut slot = CacheSlot::Weak(Arc::downgrade(&value));

        assert!(!slot.is_dead());
        assert_eq!(slot.get().as_deref(), Some(&7));

        drop(value);
        assert!(slot.is_dead());
        assert!(slot.get().is_none());
    }

    #[test]
    fn test_soft_slot_survives_without_outside_refs() {
        let mut slot = CacheSlot::Soft {
            value: Arc::new(7u32),
            last_touch: Instant::now(),
        };
        assert!(!slot.is_dead());
        assert_eq!(slot.get().as_deref(), Some(&7));
        assert!(slot.soft_age().is_some());
    }
}
