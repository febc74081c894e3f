//! LRU card cache bounded by entry count and serialized byte size.
//!
//! Entries are serialized values; byte accounting uses the stored string
//! length. A hit promotes the entry to most-recently-used. Keys embed the
//! version id so `invalidate_version` can sweep a whole index generation.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

struct CacheEntry {
    value: Arc<str>,
    bytes: usize,
}

struct LruInner {
    // Insertion order doubles as recency order: front is LRU, back is MRU.
    map: IndexMap<String, CacheEntry>,
    total_bytes: usize,
}

/// Dual-bounded LRU cache for serialized symbol cards.
pub struct LruCardCache {
    inner: Mutex<LruInner>,
    max_entries: usize,
    max_size_bytes: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LruCardCache {
    pub fn new(max_entries: usize, max_size_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(LruInner {
                map: IndexMap::new(),
                total_bytes: 0,
            }),
            max_entries: max_entries.max(1),
            max_size_bytes: max_size_bytes.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Canonical key shape: `repo:version:symbol:detail`.
    pub fn key(repo_id: &str, version_id: &str, symbol_id: &str, detail: &str) -> String {
        format!("{repo_id}:{version_id}:{symbol_id}:{detail}")
    }

    /// Fetch and promote. Counts a hit or a miss.
    pub fn get(&self, key: &str) -> Option<Arc<str>> {
        let mut inner = self.inner.lock();
        match inner.map.shift_remove(key) {
            Some(entry) => {
                let value = Arc::clone(&entry.value);
                // Reinsert at the back: most recently used.
                inner.map.insert(key.to_string(), entry);
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace, evicting from the LRU end while over either bound.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Arc<str>>) {
        let key = key.into();
        let value: Arc<str> = value.into();
        let bytes = value.len();

        let mut inner = self.inner.lock();
        if let Some(old) = inner.map.shift_remove(&key) {
            inner.total_bytes -= old.bytes;
        }
        inner.map.insert(key, CacheEntry { value, bytes });
        inner.total_bytes += bytes;

        while (inner.map.len() > self.max_entries || inner.total_bytes > self.max_size_bytes)
            && !inner.map.is_empty()
        {
            if let Some((_, evicted)) = inner.map.shift_remove_index(0) {
                inner.total_bytes -= evicted.bytes;
            }
        }
    }

    /// Remove every entry whose key embeds the version id.
    pub fn invalidate_version(&self, version_id: &str) {
        let needle = format!(":{version_id}:");
        let mut inner = self.inner.lock();
        let mut removed_bytes = 0usize;
        inner.map.retain(|key, entry| {
            if key.contains(&needle) {
                removed_bytes += entry.bytes;
                false
            } else {
                true
            }
        });
        inner.total_bytes -= removed_bytes;
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().map.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }

    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn miss_count(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_promotes_and_eviction_drops_lru() {
        let cache = LruCardCache::new(2, 1024 * 1024);
        cache.set("k1", "v1");
        cache.set("k2", "v2");
        assert_eq!(cache.get("k1").as_deref(), Some("v1"));

        cache.set("k3", "v3");
        // k1 was promoted by the get, so k2 is the LRU victim.
        assert!(cache.contains("k1"));
        assert!(!cache.contains("k2"));
        assert!(cache.contains("k3"));
    }

    #[test]
    fn three_inserts_without_access_drop_the_oldest() {
        let cache = LruCardCache::new(2, 1024 * 1024);
        cache.set("k1", "v1");
        cache.set("k2", "v2");
        cache.set("k3", "v3");
        assert!(!cache.contains("k1"));
        assert!(cache.contains("k2"));
        assert!(cache.contains("k3"));
    }

    #[test]
    fn byte_bound_evicts_independently_of_entry_bound() {
        let cache = LruCardCache::new(100, 10);
        cache.set("a", "12345");
        cache.set("b", "12345");
        assert_eq!(cache.size_bytes(), 10);

        cache.set("c", "123");
        // 13 bytes exceeds the bound; "a" goes.
        assert!(!cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
        assert_eq!(cache.size_bytes(), 8);
    }

    #[test]
    fn replacing_a_key_adjusts_accounting() {
        let cache = LruCardCache::new(10, 100);
        cache.set("k", "aaaa");
        assert_eq!(cache.size_bytes(), 4);
        cache.set("k", "aa");
        assert_eq!(cache.size_bytes(), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn hit_and_miss_counters() {
        let cache = LruCardCache::new(4, 1024);
        cache.set("k", "v");
        assert!(cache.get("k").is_some());
        assert!(cache.get("absent").is_none());
        assert_eq!(cache.hit_count(), 1);
        assert_eq!(cache.miss_count(), 1);
    }

    #[test]
    fn version_invalidation_sweeps_matching_keys() {
        let cache = LruCardCache::new(10, 1024);
        cache.set(LruCardCache::key("r", "v1", "s1", "card"), "a");
        cache.set(LruCardCache::key("r", "v1", "s2", "card"), "b");
        cache.set(LruCardCache::key("r", "v2", "s1", "card"), "c");

        cache.invalidate_version("v1");
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&LruCardCache::key("r", "v2", "s1", "card")));
        assert_eq!(cache.size_bytes(), 1);
    }

    #[test]
    fn oversized_value_evicts_everything_including_itself() {
        let cache = LruCardCache::new(10, 4);
        cache.set("k", "way too large");
        assert!(cache.is_empty());
        assert_eq!(cache.size_bytes(), 0);
    }
}
