//! Concurrent keyed map with periodic compaction
//!
//! Hash-table backends do not always return memory to the allocator when
//! entries are deleted, so long-lived maps under add/delete churn can retain
//! far more storage than their live entries need. `CompactingMap` counts
//! deletions and rebuilds its backing table into a fresh allocation once the
//! count crosses a threshold, without callers having to manage compaction.

use ahash::RandomState;
use parking_lot::RwLock;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide default for the compaction threshold.
static DEFAULT_COMPACTION_THRESHOLD: AtomicU64 = AtomicU64::new(1000);

/// Set the process-wide default compaction threshold.
///
/// Applies to maps created afterwards; passing 0 restores the built-in
/// default of 1000. Intended to be called once before concurrent use begins.
pub fn set_default_compaction_threshold(threshold: u64) {
    let threshold = if threshold == 0 { 1000 } else { threshold };
    DEFAULT_COMPACTION_THRESHOLD.store(threshold, Ordering::Relaxed);
}

struct Inner<K, V> {
    map: HashMap<K, V, RandomState>,
    delete_count: u64,
}

/// Thread-safe map from key to value.
///
/// Reads (`get`, `len`, `for_each`, `keys`) take the shared lock; writes
/// (`insert`, `remove`, `get_or_insert_with`) take the exclusive lock.
pub struct CompactingMap<K, V> {
    threshold: u64,
    inner: RwLock<Inner<K, V>>,
}

impl<K: Eq + Hash, V> CompactingMap<K, V> {
    /// Create an empty map using the process-wide compaction threshold.
    pub fn new() -> Self {
        Self::with_threshold(0)
    }

    /// Create an empty map with an explicit compaction threshold.
    ///
    /// A threshold of 0 falls back to the process-wide default.
    pub fn with_threshold(threshold: u64) -> Self {
        let threshold = if threshold == 0 {
            DEFAULT_COMPACTION_THRESHOLD.load(Ordering::Relaxed)
        } else {
            threshold
        };
        Self {
            threshold,
            inner: RwLock::new(Inner {
                map: HashMap::with_hasher(RandomState::new()),
                delete_count: 0,
            }),
        }
    }

    /// Insert or update an entry.
    pub fn insert(&self, key: K, value: V) {
        self.inner.write().map.insert(key, value);
    }

    /// Look up an entry, cloning the value out.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
        V: Clone,
    {
        self.inner.read().map.get(key).cloned()
    }

    /// True when an entry exists for `key`.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.inner.read().map.contains_key(key)
    }

    /// Return the existing value for `key`, or insert the one produced by
    /// `init`. The boolean is true when the key was already present.
    pub fn get_or_insert_with(&self, key: K, init: impl FnOnce() -> V) -> (V, bool)
    where
        V: Clone,
    {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.map.get(&key) {
            return (existing.clone(), true);
        }
        let value = init();
        inner.map.insert(key, value.clone());
        (value, false)
    }

    /// Remove an entry, rebuilding the backing table once enough deletions
    /// have accumulated.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let mut inner = self.inner.write();
        let removed = inner.map.remove(key);
        if removed.is_some() {
            inner.delete_count += 1;
            if inner.delete_count >= self.threshold {
                let mut fresh =
                    HashMap::with_capacity_and_hasher(inner.map.len(), RandomState::new());
                fresh.extend(inner.map.drain());
                inner.map = fresh;
                inner.delete_count = 0;
            }
        }
        removed
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.inner.read().map.len()
    }

    /// True when the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.read().map.is_empty()
    }

    /// Visit every entry under the shared lock. The visitor returns false to
    /// stop early.
    pub fn for_each(&self, mut visitor: impl FnMut(&K, &V) -> bool) {
        let inner = self.inner.read();
        for (key, value) in &inner.map {
            if !visitor(key, value) {
                break;
            }
        }
    }

    /// Snapshot of the current keys.
    pub fn keys(&self) -> Vec<K>
    where
        K: Clone,
    {
        self.inner.read().map.keys().cloned().collect()
    }
}

impl<K: Eq + Hash, V> Default for CompactingMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
