//! Bounded LRU cache from query text to embedding.
//!
//! Keys are BLAKE3 digests of the raw text, so arbitrarily long queries cost
//! a fixed 64-character key. Eviction is strict least-recently-used: a `get`
//! promotes its entry and an insert beyond capacity drops the oldest one.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;

pub const DEFAULT_CAPACITY: usize = 1000;

pub trait EmbeddingCache: Send + Sync {
    fn get(&self, text: &str) -> Option<Vec<f32>>;
    fn set(&self, text: &str, embedding: Vec<f32>);
    fn clear(&self);
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn cache_key(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

pub struct LruEmbeddingCache {
    entries: Mutex<LruCache<String, Vec<f32>>>,
}

impl LruEmbeddingCache {
    /// A capacity of 0 selects [`DEFAULT_CAPACITY`].
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .or(NonZeroUsize::new(DEFAULT_CAPACITY))
            .unwrap_or(NonZeroUsize::MIN);
        Self { entries: Mutex::new(LruCache::new(capacity)) }
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Vec<f32>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for LruEmbeddingCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EmbeddingCache for LruEmbeddingCache {
    fn get(&self, text: &str) -> Option<Vec<f32>> {
        let key = cache_key(text);
        self.lock().get(&key).cloned()
    }

    fn set(&self, text: &str, embedding: Vec<f32>) {
        self.lock().put(cache_key(text), embedding);
    }

    fn clear(&self) {
        self.lock().clear();
    }

    fn len(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_fixed_length_digests() {
        let long = "x".repeat(10_000);
        assert_eq!(cache_key(&long).len(), 64);
        assert_ne!(cache_key("a"), cache_key("b"));
    }

    #[test]
    fn update_keeps_single_entry() {
        let cache = LruEmbeddingCache::new(2);
        cache.set("q", vec![1.0]);
        cache.set("q", vec![2.0]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("q"), Some(vec![2.0]));
    }

    #[test]
    fn update_refreshes_recency() {
        let cache = LruEmbeddingCache::new(2);
        cache.set("a", vec![1.0]);
        cache.set("b", vec![2.0]);
        cache.set("a", vec![3.0]);
        cache.set("c", vec![4.0]);
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(vec![3.0]));
    }
}
