//! Process-wide extraction cache shared by every archive reader: a
//! normalized path maps to either a previously extracted body or a
//! remembered miss, bounded by a soft byte budget rather than an item
//! count, since archive entries vary from a few bytes to tens of
//! megabytes.

use lru::LruCache;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub enum CacheEntry {
    Hit(Arc<Vec<u8>>),
    Miss,
}

impl CacheEntry {
    fn byte_len(&self) -> u64 {
        match self {
            CacheEntry::Hit(bytes) => bytes.len() as u64,
            CacheEntry::Miss => 0,
        }
    }
}

pub struct ExtractionCache {
    inner: Mutex<LruCache<String, CacheEntry>>,
    max_bytes: u64,
    current_bytes: AtomicU64,
}

impl ExtractionCache {
    pub fn new(max_bytes: u64) -> Self {
        Self { inner: Mutex::new(LruCache::unbounded()), max_bytes, current_bytes: AtomicU64::new(0) }
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.inner.lock().get(key).cloned()
    }

    pub fn insert_hit(&self, key: String, bytes: Arc<Vec<u8>>) {
        self.insert(key, CacheEntry::Hit(bytes));
    }

    pub fn insert_miss(&self, key: String) {
        self.insert(key, CacheEntry::Miss);
    }

    fn insert(&self, key: String, entry: CacheEntry) {
        let added = entry.byte_len();
        let mut guard = self.inner.lock();
        if let Some(old) = guard.put(key, entry) {
            self.current_bytes.fetch_sub(old.byte_len(), Ordering::Relaxed);
        }
        self.current_bytes.fetch_add(added, Ordering::Relaxed);
        while self.current_bytes.load(Ordering::Relaxed) > self.max_bytes {
            match guard.pop_lru() {
                Some((_, evicted)) => {
                    self.current_bytes.fetch_sub(evicted.byte_len(), Ordering::Relaxed);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn current_bytes(&self) -> u64 {
        self.current_bytes.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_then_get_returns_same_bytes() {
        let cache = ExtractionCache::new(1024);
        let bytes = Arc::new(vec![1, 2, 3]);
        cache.insert_hit("a".into(), bytes.clone());
        match cache.get("a") {
            Some(CacheEntry::Hit(got)) => assert_eq!(got, bytes),
            _ => panic!("expected a cached hit"),
        }
    }

    #[test]
    fn miss_is_cached_distinctly_from_absent_key() {
        let cache = ExtractionCache::new(1024);
        assert!(cache.get("missing").is_none());
        cache.insert_miss("missing".into());
        assert!(matches!(cache.get("missing"), Some(CacheEntry::Miss)));
    }

    #[test]
    fn byte_budget_evicts_oldest_entries() {
        let cache = ExtractionCache::new(10);
        cache.insert_hit("a".into(), Arc::new(vec![0u8; 6]));
        cache.insert_hit("b".into(), Arc::new(vec![0u8; 6]));
        assert!(cache.current_bytes() <= 10);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
    }
}
