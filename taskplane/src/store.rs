//! In-process concurrent store backing the board and queue
//!
//! A deliberately small seam: all shared mutable maps in the system go
//! through `MemStore` instead of ambient singletons, so a durable backend
//! can replace it behind the same surface. `update` is the single-writer
//! primitive — the closure runs under the key's shard lock, which is what
//! makes claim compare-and-swap atomic.

use dashmap::DashMap;

/// Concurrent keyed store with per-key serialized writes
pub struct MemStore<T> {
    inner: DashMap<String, T>,
}

impl<T: Clone> MemStore<T> {
    pub fn new() -> Self {
        Self {
            inner: DashMap::new(),
        }
    }

    /// Snapshot read; may lag concurrent writers
    pub fn get(&self, key: &str) -> Option<T> {
        self.inner.get(key).map(|v| v.clone())
    }

    /// Insert only if absent. Returns false when the key already exists
    /// (write-once stores treat that as an error).
    pub fn insert(&self, key: &str, value: T) -> bool {
        match self.inner.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    /// Unconditional write
    pub fn put(&self, key: &str, value: T) {
        self.inner.insert(key.to_string(), value);
    }

    /// Run `f` against the value under the key's lock.
    ///
    /// This is the compare-and-swap primitive: check-and-mutate inside the
    /// closure is atomic with respect to every other writer of the key.
    pub fn update<R>(&self, key: &str, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.inner.get_mut(key).map(|mut v| f(v.value_mut()))
    }

    pub fn remove(&self, key: &str) -> Option<T> {
        self.inner.remove(key).map(|(_, v)| v)
    }

    /// Eventually-consistent snapshot of all values
    pub fn list(&self) -> Vec<T> {
        self.inner.iter().map(|e| e.value().clone()).collect()
    }

    /// Snapshot of keys only
    pub fn keys(&self) -> Vec<String> {
        self.inner.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<T: Clone> Default for MemStore<T> {
    fn default() -> Self {
        Self::new()
    }
}
