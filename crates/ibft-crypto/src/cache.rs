//! Capacity-bounded caches with recency eviction

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::hash::Hash;

/// Capacity-bounded key/value cache shared across threads
///
/// Implementations evict entries on their own when full; callers never see
/// an error from `put`.
pub trait RecencyCache<K, V>: Send + Sync {
    /// Look up a key, refreshing its recency
    fn get(&self, key: &K) -> Option<V>;

    /// Insert or replace a value
    fn put(&self, key: K, value: V);

    /// Whether the key is present (does not refresh recency)
    fn contains(&self, key: &K) -> bool;

    /// Current number of entries
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries
    fn capacity(&self) -> usize;

    /// Drop every entry
    fn clear(&self);
}

/// Least-recently-used cache
///
/// Entries are kept in an insertion-ordered map; the front is the least
/// recently used entry and is evicted first.
pub struct LruCache<K, V> {
    entries: Mutex<IndexMap<K, V>>,
    capacity: usize,
}

impl<K: Hash + Eq + Clone, V: Clone> LruCache<K, V> {
    /// Create a cache holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(IndexMap::with_capacity(capacity)),
            capacity,
        }
    }

    /// Keys from least to most recently used
    pub fn keys(&self) -> Vec<K> {
        self.entries.lock().keys().cloned().collect()
    }
}

impl<K, V> RecencyCache<K, V> for LruCache<K, V>
where
    K: Hash + Eq + Clone + Send,
    V: Clone + Send,
{
    fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        let value = entries.shift_remove(key)?;
        entries.insert(key.clone(), value.clone());
        Some(value)
    }

    fn put(&self, key: K, value: V) {
        let mut entries = self.entries.lock();
        entries.shift_remove(&key);
        while entries.len() >= self.capacity {
            entries.shift_remove_index(0);
        }
        entries.insert(key, value);
    }

    fn contains(&self, key: &K) -> bool {
        self.entries.lock().contains_key(key)
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = LruCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);

        // touch "a" so "b" becomes the eviction candidate
        assert_eq!(cache.get(&"a"), Some(1));
        cache.put("c", 3);

        assert!(cache.contains(&"a"));
        assert!(!cache.contains(&"b"));
        assert!(cache.contains(&"c"));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_replace_does_not_grow() {
        let cache = LruCache::new(3);
        cache.put(1u32, "x");
        cache.put(1u32, "y");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&1), Some("y"));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let cache: LruCache<u8, u8> = LruCache::new(0);
        assert_eq!(cache.capacity(), 1);
        cache.put(1, 1);
        cache.put(2, 2);
        assert_eq!(cache.keys(), vec![2]);
    }

    #[test]
    fn test_shared_across_threads() {
        use std::sync::Arc;

        let cache: Arc<dyn RecencyCache<u64, u64>> = Arc::new(LruCache::new(64));
        let handles: Vec<_> = (0..4u64)
            .map(|t| {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    for i in 0..100u64 {
                        cache.put(t * 1000 + i, i);
                        let _ = cache.get(&(t * 1000 + i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cache.len(), 64);
    }
}
