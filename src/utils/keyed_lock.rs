use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type SlotMap<K> = Mutex<HashMap<K, Arc<AsyncMutex<()>>>>;

/// One async mutex per key, created on demand and dropped once nobody holds
/// or waits for it. Waiters on the same key are served in arrival order;
/// different keys never contend beyond the short map lookup.
pub struct KeyedSlots<K> {
    slots: Arc<SlotMap<K>>,
}

impl<K> Default for KeyedSlots<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> KeyedSlots<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Waits for the slot of `key`, giving up after `wait`.
    pub async fn acquire_within(&self, key: K, wait: Duration) -> Option<SlotGuard<K>> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(
                slots
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };

        match tokio::time::timeout(wait, slot.lock_owned()).await {
            Ok(guard) => Some(SlotGuard {
                key,
                guard: Some(guard),
                slots: Arc::clone(&self.slots),
            }),
            Err(_) => {
                release_idle(&self.slots, &key);
                None
            }
        }
    }

    /// Non-blocking probe, used by tests and diagnostics.
    pub fn is_held(&self, key: &K) -> bool {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(key).is_some_and(|slot| slot.try_lock().is_err())
    }

    /// Number of keys that currently have a holder or waiters.
    pub fn active_keys(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Held slot. Dropping it releases the slot, on every exit path.
pub struct SlotGuard<K>
where
    K: Eq + Hash + Clone,
{
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
    slots: Arc<SlotMap<K>>,
}

impl<K> SlotGuard<K>
where
    K: Eq + Hash + Clone,
{
    pub fn key(&self) -> &K {
        &self.key
    }
}

impl<K> Drop for SlotGuard<K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        // unlock first so the map entry is only shared by waiters
        drop(self.guard.take());
        release_idle(&self.slots, &self.key);
    }
}

fn release_idle<K: Eq + Hash>(slots: &SlotMap<K>, key: &K) {
    let mut slots = slots.lock().unwrap_or_else(PoisonError::into_inner);
    if slots
        .get(key)
        .is_some_and(|slot| Arc::strong_count(slot) == 1)
    {
        slots.remove(key);
    }
}
