//! In-memory LRU over deserialized bitmaps
//!
//! The metadata store persists bitmaps as opaque blobs; this cache keeps
//! the hot ones deserialized. Writes go through the store and update the
//! cache entry in place, so cached bitmaps are never stale.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;

use crate::bitmap::DocSet;

pub struct BitmapCache {
    inner: Mutex<LruCache<String, Arc<DocSet>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl BitmapCache {
    pub fn new(entries: usize) -> Self {
        let cap = NonZeroUsize::new(entries.max(1)).expect("non-zero capacity");
        Self {
            inner: Mutex::new(LruCache::new(cap)),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<DocSet>> {
        let mut cache = self.inner.lock();
        match cache.get(name) {
            Some(set) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(Arc::clone(set))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, name: &str, set: Arc<DocSet>) {
        self.inner.lock().put(name.to_string(), set);
    }

    pub fn invalidate(&self, name: &str) {
        self.inner.lock().pop(name);
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap;

    #[test]
    fn test_get_put() {
        let cache = BitmapCache::new(4);
        assert!(cache.get("tag:a").is_none());

        cache.put("tag:a", Arc::new(bitmap::of_one(1)));
        let set = cache.get("tag:a").unwrap();
        assert!(set.contains(1));
        assert!(cache.hit_rate() > 0.0);
    }

    #[test]
    fn test_eviction_order() {
        let cache = BitmapCache::new(2);
        cache.put("a", Arc::new(bitmap::of_one(1)));
        cache.put("b", Arc::new(bitmap::of_one(2)));
        // Touch "a" so "b" is the LRU entry
        cache.get("a");
        cache.put("c", Arc::new(bitmap::of_one(3)));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_invalidate() {
        let cache = BitmapCache::new(4);
        cache.put("a", Arc::new(bitmap::of_one(1)));
        cache.invalidate("a");
        assert!(cache.get("a").is_none());
    }
}
