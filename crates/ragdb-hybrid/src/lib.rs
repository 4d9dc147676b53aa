//! Hybrid retrieval over a [`DocumentStore`]: a vector leg, a BM25 keyword
//! leg, and fusion of the two.

pub mod fusion;
pub mod rerank;

use std::sync::Arc;

use tracing::debug;

use ragdb_core::traits::EmbeddingProvider;
use ragdb_core::types::{DistanceMetric, Metadata, MetadataValue, SearchResult};
use ragdb_core::{ensure_active, CancellationToken, Error, Result};
use ragdb_store::{validate_tenant_id, DocumentStore, SearchOptions, DEFAULT_SEARCH_LIMIT};
use ragdb_text::Bm25;

pub use fusion::{fuse_weighted, min_max_normalize, reciprocal_rank_fusion, Weights, RRF_K};
pub use rerank::{Reranker, RrfReranker, ScoreFnReranker};

/// Upper bound on candidates fetched per leg.
pub const MAX_CANDIDATES: usize = 100;

#[derive(Debug, Clone)]
pub struct HybridSearchOptions {
    /// 0 means [`DEFAULT_SEARCH_LIMIT`].
    pub limit: usize,
    pub vector_weight: f32,
    pub keyword_weight: f32,
    pub filters: Metadata,
    pub metric: DistanceMetric,
    /// Keyword hits scoring below this are dropped.
    pub min_keyword_score: Option<f32>,
}

impl Default for HybridSearchOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_SEARCH_LIMIT,
            vector_weight: 0.5,
            keyword_weight: 0.5,
            filters: Metadata::new(),
            metric: DistanceMetric::default(),
            min_keyword_score: None,
        }
    }
}

impl HybridSearchOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_weights(mut self, vector: f32, keyword: f32) -> Self {
        self.vector_weight = vector;
        self.keyword_weight = keyword;
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn with_min_keyword_score(mut self, score: f32) -> Self {
        self.min_keyword_score = Some(score);
        self
    }

    fn effective_limit(&self) -> usize {
        if self.limit == 0 {
            DEFAULT_SEARCH_LIMIT
        } else {
            self.limit
        }
    }
}

/// Per-leg candidate count for a final `limit`.
pub fn candidate_limit(limit: usize) -> usize {
    limit.saturating_mul(3).min(MAX_CANDIDATES)
}

pub struct HybridSearchEngine {
    store: Arc<DocumentStore>,
    bm25: Bm25,
}

impl HybridSearchEngine {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store, bm25: Bm25::default() }
    }

    pub fn with_bm25(mut self, bm25: Bm25) -> Self {
        self.bm25 = bm25;
        self
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Fused vector + keyword search. Scores are fused relevance in [0, 1],
    /// higher is better.
    ///
    /// A leg with weight 0 is not run. The keyword leg fails with
    /// [`Error::Bm25LimitExceeded`] when the tenant holds more documents than
    /// the store's BM25 ceiling.
    pub async fn search(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        query_text: &str,
        query_embedding: &[f32],
        options: &HybridSearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let weights = Weights::normalized(options.vector_weight, options.keyword_weight)?;
        validate_tenant_id(tenant)?;
        ensure_active(cancel)?;
        let limit = options.effective_limit();
        let candidates = candidate_limit(limit);

        let vector_leg = async {
            if weights.vector == 0.0 {
                return Ok(Vec::new());
            }
            let vector_options = SearchOptions {
                limit: candidates,
                filters: options.filters.clone(),
                metric: options.metric,
            };
            self.store.search(cancel, tenant, query_embedding, &vector_options).await
        };
        let keyword_leg = async {
            if weights.keyword == 0.0 {
                return Ok(Vec::new());
            }
            self.keyword_search(cancel, tenant, query_text, candidates, &options.filters, options.min_keyword_score)
                .await
        };
        let (vector, keyword) = tokio::try_join!(vector_leg, keyword_leg)?;
        debug!(tenant, vector_hits = vector.len(), keyword_hits = keyword.len(), "hybrid legs complete");

        Ok(fuse_weighted(vector, keyword, weights, limit))
    }

    /// Embed `query_text` with `provider`, then [`search`](Self::search).
    pub async fn search_with_text(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        query_text: &str,
        provider: &dyn EmbeddingProvider,
        options: &HybridSearchOptions,
    ) -> Result<Vec<SearchResult>> {
        ensure_active(cancel)?;
        let embedding = provider.embed(query_text).await?;
        self.search(cancel, tenant, query_text, &embedding, options).await
    }

    /// BM25 over every document of the tenant that passes `filters`.
    ///
    /// Only documents containing at least one query term are returned, best
    /// first, at most `limit` of them.
    pub async fn keyword_search(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        query_text: &str,
        limit: usize,
        filters: &Metadata,
        min_score: Option<f32>,
    ) -> Result<Vec<SearchResult>> {
        let ceiling = self.store.max_documents_for_bm25();
        if ceiling > 0 {
            let count = self.store.count_documents(cancel, tenant).await?;
            if count > ceiling {
                return Err(Error::Bm25LimitExceeded { count, limit: ceiling });
            }
        }

        let docs = self.store.scan_documents(cancel, tenant, filters).await?;
        let corpus: Vec<&str> = docs.iter().map(|d| d.text.as_str()).collect();
        let scores = self.bm25.score(&corpus, query_text);

        let mut hits: Vec<SearchResult> = docs
            .into_iter()
            .zip(scores)
            .filter(|(_, s)| s.matched_terms > 0 && min_score.map_or(true, |min| s.score >= min))
            .map(|(document, s)| SearchResult { document, score: s.score })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);
        Ok(hits)
    }

    /// Vector search for `query_text`, then re-scored by `reranker`.
    pub async fn search_with_rerank(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        query_text: &str,
        provider: &dyn EmbeddingProvider,
        reranker: &dyn Reranker,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let results = self.store.search_with_text(cancel, tenant, query_text, provider, options).await?;
        reranker.rerank(query_text, results).await
    }
}
