use async_trait::async_trait;

use ragdb_core::types::SearchResult;
use ragdb_core::Result;

use crate::fusion::{reciprocal_rank_fusion, RRF_K};

/// Re-scores a ranked result list for a query.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, results: Vec<SearchResult>) -> Result<Vec<SearchResult>>;
}

/// Replaces scores with `1 / (k + rank)`, keeping the incoming order.
#[derive(Debug, Clone, Copy)]
pub struct RrfReranker {
    k: f32,
}

impl Default for RrfReranker {
    fn default() -> Self {
        Self { k: RRF_K }
    }
}

impl RrfReranker {
    /// Non-positive `k` falls back to 60.
    pub fn new(k: f32) -> Self {
        if k > 0.0 {
            Self { k }
        } else {
            Self::default()
        }
    }

    pub fn k(&self) -> f32 {
        self.k
    }

    pub fn combine_ranked_lists(&self, lists: &[Vec<SearchResult>]) -> Vec<SearchResult> {
        reciprocal_rank_fusion(lists, self.k)
    }
}

#[async_trait]
impl Reranker for RrfReranker {
    async fn rerank(&self, _query: &str, mut results: Vec<SearchResult>) -> Result<Vec<SearchResult>> {
        for (rank, result) in results.iter_mut().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let rank = (rank + 1) as f32;
            result.score = 1.0 / (self.k + rank);
        }
        Ok(results)
    }
}

/// Scores each result with a caller-supplied function and sorts descending.
pub struct ScoreFnReranker<F> {
    score: F,
}

impl<F> ScoreFnReranker<F>
where
    F: Fn(&str, &SearchResult) -> f32 + Send + Sync,
{
    pub fn new(score: F) -> Self {
        Self { score }
    }
}

#[async_trait]
impl<F> Reranker for ScoreFnReranker<F>
where
    F: Fn(&str, &SearchResult) -> f32 + Send + Sync,
{
    async fn rerank(&self, query: &str, mut results: Vec<SearchResult>) -> Result<Vec<SearchResult>> {
        for result in &mut results {
            result.score = (self.score)(query, result);
        }
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(results)
    }
}
