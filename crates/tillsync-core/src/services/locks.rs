//! Per-key async mutexes.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A map of lazily created async mutexes, one per key.
///
/// Each slot carries a value `V` that the holder of the guard may read and
/// update, so the same type serves as a plain critical section (`V = ()`) or
/// as a per-key watermark.
pub struct KeyedLocks<K, V = ()> {
    slots: DashMap<K, Arc<Mutex<V>>>,
}

impl<K, V> Default for KeyedLocks<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }
}

impl<K, V> KeyedLocks<K, V>
where
    K: Eq + Hash + Clone,
    V: Default,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<V> {
        // The map shard guard is released before awaiting
        let slot = Arc::clone(self.slots.entry(key.clone()).or_default().value());
        slot.lock_owned().await
    }

    /// Drop idle slots. Slot values are discarded with them.
    pub fn prune(&self) {
        self.prune_where(|_, _| false);
    }

    /// Drop idle slots for which `keep` returns false. Held slots always stay.
    pub fn prune_where(&self, mut keep: impl FnMut(&K, &V) -> bool) {
        self.slots.retain(|key, slot| {
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            slot.try_lock().map_or(true, |value| keep(key, &value))
        });
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
