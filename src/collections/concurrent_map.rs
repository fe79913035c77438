//! Concurrent associative container behind a narrow interface.
//!
//! # Iteration Guarantee
//! `range_snapshot` clones every entry into an owned `Vec` while holding each
//! shard's read lock only long enough to copy it. Callers iterate the copy, so
//! they may freely `put`/`delete` on the same map (including the entry they are
//! looking at) without deadlocking. An entry inserted or removed concurrently
//! with the snapshot is either in it or not; no entry is ever torn.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;

/// A cloneable handle to a shared concurrent map.
pub struct ConcurrentMap<K, V> {
    inner: Arc<DashMap<K, V>>,
}

impl<K, V> Clone for ConcurrentMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Default for ConcurrentMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }
}

impl<K, V> ConcurrentMap<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone out the value for `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.get(key).map(|r| r.value().clone())
    }

    /// Insert or replace, returning the previous value.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        self.inner.insert(key, value)
    }

    /// Insert only if absent. Returns `false` when the key already existed.
    pub fn put_if_absent(&self, key: K, value: V) -> bool {
        match self.inner.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    /// Remove and return the value for `key`.
    pub fn delete(&self, key: &K) -> Option<V> {
        self.inner.remove(key).map(|(_, v)| v)
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.contains_key(key)
    }

    /// Point-in-time copy of all entries.
    pub fn range_snapshot(&self) -> Vec<(K, V)> {
        self.inner
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    /// Point-in-time copy of all values.
    pub fn values(&self) -> Vec<V> {
        self.inner.iter().map(|r| r.value().clone()).collect()
    }

    /// Remove every entry for which `remove` returns true. Returns the removed values.
    pub fn remove_where<F>(&self, mut remove: F) -> Vec<V>
    where
        F: FnMut(&K, &V) -> bool,
    {
        let doomed: Vec<K> = self
            .range_snapshot()
            .into_iter()
            .filter(|(k, v)| remove(k, v))
            .map(|(k, _)| k)
            .collect();

        doomed.iter().filter_map(|k| self.delete(k)).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.inner.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_operations() {
        let map = ConcurrentMap::new();
        assert!(map.get(&"a").is_none());

        assert!(map.put("a", 1).is_none());
        assert_eq!(map.put("a", 2), Some(1));
        assert_eq!(map.get(&"a"), Some(2));
        assert!(!map.put_if_absent("a", 3));
        assert_eq!(map.get(&"a"), Some(2));

        assert_eq!(map.delete(&"a"), Some(2));
        assert!(map.is_empty());
    }

    #[test]
    fn test_mutation_during_snapshot_iteration() {
        let map = ConcurrentMap::new();
        for i in 0..100 {
            map.put(i, i * 2);
        }

        for (k, _) in map.range_snapshot() {
            map.delete(&k);
            map.put(k + 1000, 0);
        }
        assert_eq!(map.len(), 100);
        assert!(map.get(&5).is_none());
        assert!(map.contains(&1005));
    }

    #[test]
    fn test_remove_where() {
        let map = ConcurrentMap::new();
        for i in 0..10 {
            map.put(i, i);
        }
        let removed = map.remove_where(|_, v| v % 2 == 0);
        assert_eq!(removed.len(), 5);
        assert_eq!(map.len(), 5);
    }

    #[test]
    fn test_concurrent_writers() {
        let map = ConcurrentMap::new();
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let map = map.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        map.put(t * 1000 + i, i);
                        let _ = map.range_snapshot();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(map.len(), 1000);
    }
}
