use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use ragdb_core::metrics::InMemoryMetrics;
use ragdb_core::traits::EmbeddingProvider;
use ragdb_core::Result;
use ragdb_embed::provider::{CACHE_HIT, CACHE_MISS};
use ragdb_embed::{CachedEmbeddingProvider, EmbeddingCache, HashEmbedder, LruEmbeddingCache};

/// Records every text it was asked to embed.
#[derive(Default)]
struct CountingProvider {
    single_calls: AtomicUsize,
    batches: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl EmbeddingProvider for CountingProvider {
    fn dimensions(&self) -> usize {
        2
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.single_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![text.len() as f32, 1.0])
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batches.lock().expect("lock").push(texts.to_vec());
        Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
    }
}

#[test]
fn lru_evicts_least_recently_used() {
    let cache = LruEmbeddingCache::new(3);
    cache.set("a", vec![1.0]);
    cache.set("b", vec![2.0]);
    cache.set("c", vec![3.0]);

    // Touch "a" so "b" becomes the oldest.
    assert!(cache.get("a").is_some());
    cache.set("d", vec![4.0]);

    assert_eq!(cache.len(), 3);
    assert!(cache.get("b").is_none(), "least recently accessed entry evicted");
    assert_eq!(cache.get("a"), Some(vec![1.0]));
    assert_eq!(cache.get("c"), Some(vec![3.0]));
    assert_eq!(cache.get("d"), Some(vec![4.0]));
}

#[test]
fn lru_capacity_plus_one_drops_first_insert() {
    let cache = LruEmbeddingCache::new(2);
    cache.set("first", vec![1.0]);
    cache.set("second", vec![2.0]);
    cache.set("third", vec![3.0]);
    assert!(cache.get("first").is_none());
    assert_eq!(cache.len(), 2);

    cache.clear();
    assert!(cache.is_empty());
}

#[test]
fn zero_capacity_uses_default() {
    assert_eq!(LruEmbeddingCache::new(0).capacity(), 1000);
}

#[tokio::test]
async fn single_embed_hits_cache_on_repeat() -> anyhow::Result<()> {
    let inner = Arc::new(CountingProvider::default());
    let metrics = Arc::new(InMemoryMetrics::new());
    let provider = CachedEmbeddingProvider::new(inner.clone(), Arc::new(LruEmbeddingCache::new(10)))
        .with_metrics(metrics.clone());

    let first = provider.embed("hello").await?;
    let second = provider.embed("hello").await?;

    assert_eq!(first, second);
    assert_eq!(inner.single_calls.load(Ordering::SeqCst), 1, "second call served from cache");
    assert_eq!(metrics.operation(CACHE_HIT).count, 1);
    assert_eq!(metrics.operation(CACHE_MISS).count, 1);
    Ok(())
}

#[tokio::test]
async fn batch_generates_only_misses_and_keeps_order() -> anyhow::Result<()> {
    let inner = Arc::new(CountingProvider::default());
    let cache = Arc::new(LruEmbeddingCache::new(10));
    cache.set("bb", vec![99.0, 99.0]);
    let provider = CachedEmbeddingProvider::new(inner.clone(), cache);

    let texts: Vec<String> = ["a", "bb", "ccc"].iter().map(|s| s.to_string()).collect();
    let out = provider.embed_batch(&texts).await?;

    assert_eq!(out, vec![vec![1.0, 1.0], vec![99.0, 99.0], vec![3.0, 1.0]]);
    let batches = inner.batches.lock().expect("lock").clone();
    assert_eq!(batches, vec![vec!["a".to_string(), "ccc".to_string()]], "one call for the misses");

    // Everything is cached now.
    provider.embed_batch(&texts).await?;
    assert_eq!(inner.batches.lock().expect("lock").len(), 1);
    Ok(())
}

#[tokio::test]
async fn hash_embedder_is_deterministic_and_normalised() -> anyhow::Result<()> {
    let embedder = HashEmbedder::new(16);
    let a = embedder.embed("Rust ownership rules").await?;
    let b = embedder.embed("rust OWNERSHIP rules").await?;
    assert_eq!(a, b, "case-insensitive tokens");
    let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() < 1e-4);
    assert_eq!(embedder.dimensions(), 16);
    Ok(())
}
