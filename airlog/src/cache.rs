//! A map whose entries are locked independently.
//!
//! Each key owns its own mutex, so writers and readers of different keys
//! never wait on each other. The outer map lock is held only long enough to
//! find (or lazily create) a key's slot, never while the slot's value is
//! being read or written.
//!
//! For read-modify-write sequences, [`KeyedCache::acquire`] returns a
//! [`KeyGuard`] that holds the key's lock until it is dropped or
//! [released](KeyGuard::release). Access to the slot goes through the guard,
//! so there is no way to touch a value without holding its lock.
//!
//! ```rust
//! use airlog::KeyedCache;
//!
//! let cache: KeyedCache<&str, u32> = KeyedCache::new();
//! cache.set("hits", 1);
//!
//! let mut guard = cache.acquire("hits");
//! let next = guard.get().copied().unwrap_or(0) + 1;
//! guard.set(next);
//! guard.release();
//!
//! assert_eq!(cache.get(&"hits"), Some(2));
//! ```

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::{ArcMutexGuard, Mutex, RawMutex, RwLock};

type Slot<V> = Arc<Mutex<Option<V>>>;

/// A concurrent map with one lock per key.
#[derive(Debug)]
pub struct KeyedCache<K, V> {
    slots: RwLock<HashMap<K, Slot<V>>>,
}

impl<K, V> Default for KeyedCache<K, V> {
    fn default() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone, V> KeyedCache<K, V> {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the slot for `key`, creating it on first use.
    fn slot(&self, key: &K) -> Slot<V> {
        if let Some(slot) = self.slots.read().get(key) {
            return Arc::clone(slot);
        }
        let mut slots = self.slots.write();
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    /// Returns the slot for `key` without creating it.
    fn existing_slot(&self, key: &K) -> Option<Slot<V>> {
        self.slots.read().get(key).map(Arc::clone)
    }

    /// Stores `value` under `key`, holding only that key's lock.
    pub fn set(&self, key: K, value: V) {
        let slot = self.slot(&key);
        *slot.lock() = Some(value);
    }

    /// Returns a copy of the value under `key`, holding only that key's lock.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.existing_slot(key)?.lock().clone()
    }

    /// Locks `key` until the returned guard is dropped.
    ///
    /// Other callers of `set`, `get` or `acquire` on the same key block
    /// meanwhile; other keys are unaffected.
    pub fn acquire(&self, key: K) -> KeyGuard<V> {
        KeyGuard {
            guard: self.slot(&key).lock_arc(),
        }
    }

    /// True if `key` currently holds a value.
    ///
    /// Takes that key's lock, so it waits while the key is acquired.
    pub fn contains_key(&self, key: &K) -> bool {
        self.existing_slot(key)
            .is_some_and(|slot| slot.lock().is_some())
    }

    /// Number of keys that have been set or acquired.
    ///
    /// Does not take any key's lock; a key whose value was taken still counts.
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    /// True if no key has been set or acquired.
    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// Keys that have been set or acquired, in no particular order.
    pub fn keys(&self) -> Vec<K> {
        self.slots.read().keys().cloned().collect()
    }
}

/// Exclusive access to one key of a [`KeyedCache`].
pub struct KeyGuard<V> {
    guard: ArcMutexGuard<RawMutex, Option<V>>,
}

impl<V> KeyGuard<V> {
    /// The current value, if any.
    pub fn get(&self) -> Option<&V> {
        (*self.guard).as_ref()
    }

    /// Mutable access to the current value, if any.
    pub fn get_mut(&mut self) -> Option<&mut V> {
        (*self.guard).as_mut()
    }

    /// Replaces the value.
    pub fn set(&mut self, value: V) {
        *self.guard = Some(value);
    }

    /// Removes and returns the value.
    pub fn take(&mut self) -> Option<V> {
        (*self.guard).take()
    }

    /// Unlocks the key. Dropping the guard does the same.
    pub fn release(self) {}
}

impl<V: std::fmt::Debug> std::fmt::Debug for KeyGuard<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyGuard").field("value", &*self.guard).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let cache = KeyedCache::new();
        assert_eq!(cache.get(&"a"), None::<u32>);
        assert!(cache.is_empty());

        cache.set("a", 1);
        cache.set("b", 2);
        cache.set("a", 3);

        assert_eq!(cache.get(&"a"), Some(3));
        assert_eq!(cache.len(), 2);
        assert!(cache.contains_key(&"b"));
        assert!(!cache.contains_key(&"c"));

        let mut keys = cache.keys();
        keys.sort_unstable();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_guard_read_modify_write() {
        let cache: KeyedCache<u8, Vec<u32>> = KeyedCache::new();

        let mut guard = cache.acquire(1);
        assert!(guard.get().is_none());
        guard.set(vec![1]);
        if let Some(values) = guard.get_mut() {
            values.push(2);
        }
        drop(guard);

        assert_eq!(cache.get(&1), Some(vec![1, 2]));
    }

    #[test]
    fn test_take_empties_slot() {
        let cache = KeyedCache::new();
        cache.set(7, "x".to_string());

        let mut guard = cache.acquire(7);
        assert_eq!(guard.take().as_deref(), Some("x"));
        guard.release();

        assert!(!cache.contains_key(&7));
        assert_eq!(cache.get(&7), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_acquire_creates_empty_slot() {
        let cache: KeyedCache<&str, i32> = KeyedCache::new();
        let guard = cache.acquire("pending");
        assert!(guard.get().is_none());
        drop(guard);
        assert_eq!(cache.len(), 1);
        assert!(!cache.contains_key(&"pending"));
    }
}
