use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use ragdb_core::metrics::{MetricsCollector, NoopMetrics};
use ragdb_core::traits::EmbeddingProvider;
use ragdb_core::{Error, Result};

use crate::cache::EmbeddingCache;

pub const CACHE_HIT: &str = "embedding_cache_hit";
pub const CACHE_MISS: &str = "embedding_cache_miss";

/// Serves embeddings from a cache and asks the wrapped provider only for misses.
pub struct CachedEmbeddingProvider {
    inner: Arc<dyn EmbeddingProvider>,
    cache: Arc<dyn EmbeddingCache>,
    metrics: Arc<dyn MetricsCollector>,
}

impl CachedEmbeddingProvider {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, cache: Arc<dyn EmbeddingCache>) -> Self {
        Self { inner, cache, metrics: Arc::new(NoopMetrics) }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn cache(&self) -> &Arc<dyn EmbeddingCache> {
        &self.cache
    }

    fn record(&self, event: &str, n: usize) {
        for _ in 0..n {
            self.metrics.record_operation(event, Duration::ZERO, true);
        }
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbeddingProvider {
    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(hit) = self.cache.get(text) {
            self.record(CACHE_HIT, 1);
            return Ok(hit);
        }
        self.record(CACHE_MISS, 1);
        let embedding = self.inner.embed(text).await?;
        self.cache.set(text, embedding.clone());
        Ok(embedding)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut missing_idx = Vec::new();
        let mut missing_texts = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            match self.cache.get(text) {
                Some(hit) => out.push(Some(hit)),
                None => {
                    out.push(None);
                    missing_idx.push(i);
                    missing_texts.push(text.clone());
                }
            }
        }
        self.record(CACHE_HIT, texts.len() - missing_idx.len());
        self.record(CACHE_MISS, missing_idx.len());
        debug!(total = texts.len(), misses = missing_idx.len(), "batch embedding lookup");

        if !missing_texts.is_empty() {
            let generated = self.inner.embed_batch(&missing_texts).await?;
            if generated.len() != missing_texts.len() {
                return Err(Error::Embedding(format!(
                    "provider returned {} embeddings for {} texts",
                    generated.len(),
                    missing_texts.len()
                )));
            }
            for ((idx, text), embedding) in missing_idx.into_iter().zip(missing_texts).zip(generated) {
                self.cache.set(&text, embedding.clone());
                out[idx] = Some(embedding);
            }
        }

        out.into_iter()
            .map(|e| e.ok_or_else(|| Error::Embedding("missing embedding after batch fill".into())))
            .collect()
    }
}
