use std::collections::HashMap;

use ragdb_core::types::{MetadataValue, SearchResult};
use ragdb_core::{Error, Result};

/// Rank offset of reciprocal rank fusion.
pub const RRF_K: f32 = 60.0;

pub const VECTOR_RANK_KEY: &str = "vector_rank";
pub const KEYWORD_RANK_KEY: &str = "keyword_rank";

/// Leg weights, scaled to sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub vector: f32,
    pub keyword: f32,
}

impl Weights {
    pub fn normalized(vector: f32, keyword: f32) -> Result<Self> {
        if !vector.is_finite() || !keyword.is_finite() || vector < 0.0 || keyword < 0.0 {
            return Err(Error::validation("search weights must be finite and non-negative"));
        }
        let total = vector + keyword;
        if total == 0.0 {
            return Err(Error::validation("at least one of vector_weight or keyword_weight must be non-zero"));
        }
        Ok(Self { vector: vector / total, keyword: keyword / total })
    }
}

/// Map `scores` onto [0, 1]. A leg whose scores are all equal maps to 1.
pub fn min_max_normalize(scores: &[f32]) -> Vec<f32> {
    let (min, max) = scores
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &s| (lo.min(s), hi.max(s)));
    let span = max - min;
    scores
        .iter()
        .map(|&s| if span > f32::EPSILON { (s - min) / span } else { 1.0 })
        .collect()
}

/// Accumulates scores per document id, remembering first-seen order.
#[derive(Default)]
struct Accumulator {
    order: Vec<SearchResult>,
    by_id: HashMap<String, usize>,
}

impl Accumulator {
    fn add(&mut self, mut result: SearchResult, score: f32, rank_key: Option<(&str, usize)>) {
        let slot = match self.by_id.get(result.id()) {
            Some(&i) => {
                self.order[i].score += score;
                i
            }
            None => {
                let i = self.order.len();
                self.by_id.insert(result.id().to_string(), i);
                result.score = score;
                self.order.push(result);
                i
            }
        };
        if let Some((key, rank)) = rank_key {
            let rank = i64::try_from(rank).unwrap_or(i64::MAX);
            self.order[slot].document.metadata.insert(key.to_string(), MetadataValue::Integer(rank));
        }
    }

    fn into_sorted(self, limit: Option<usize>) -> Vec<SearchResult> {
        let mut out = self.order;
        // Stable: equal scores keep first-seen order.
        out.sort_by(|a, b| b.score.total_cmp(&a.score));
        if let Some(limit) = limit {
            out.truncate(limit);
        }
        out
    }
}

/// Weighted fusion of a vector leg (distances, lower is better) and a
/// keyword leg (BM25, higher is better).
///
/// Distances become `1 - d`, each leg is min-max normalised, and a document's
/// fused score is the weighted sum over the legs it appears in. Results carry
/// their per-leg rank in the `vector_rank` / `keyword_rank` metadata keys.
pub fn fuse_weighted(
    vector: Vec<SearchResult>,
    keyword: Vec<SearchResult>,
    weights: Weights,
    limit: usize,
) -> Vec<SearchResult> {
    let mut acc = Accumulator::default();

    let relevance: Vec<f32> = vector.iter().map(|r| 1.0 - r.score).collect();
    for (rank, (result, norm)) in vector.into_iter().zip(min_max_normalize(&relevance)).enumerate() {
        acc.add(result, norm * weights.vector, Some((VECTOR_RANK_KEY, rank)));
    }

    let bm25: Vec<f32> = keyword.iter().map(|r| r.score).collect();
    for (rank, (result, norm)) in keyword.into_iter().zip(min_max_normalize(&bm25)).enumerate() {
        acc.add(result, norm * weights.keyword, Some((KEYWORD_RANK_KEY, rank)));
    }

    acc.into_sorted(Some(limit))
}

/// Reciprocal rank fusion: each list contributes `1 / (k + rank)` (rank from
/// 1) to every document it contains. Higher is better.
pub fn reciprocal_rank_fusion(lists: &[Vec<SearchResult>], k: f32) -> Vec<SearchResult> {
    let mut acc = Accumulator::default();
    for list in lists {
        for (rank, result) in list.iter().enumerate() {
            #[allow(clippy::cast_precision_loss)]
            let score = 1.0 / (k + (rank + 1) as f32);
            acc.add(result.clone(), score, None);
        }
    }
    acc.into_sorted(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragdb_core::types::Document;

    fn hit(id: &str, score: f32) -> SearchResult {
        SearchResult { document: Document::new(id, id, vec![]), score }
    }

    #[test]
    fn constant_leg_normalises_to_one() {
        assert_eq!(min_max_normalize(&[0.3, 0.3]), vec![1.0, 1.0]);
        assert_eq!(min_max_normalize(&[1.0, 3.0, 2.0]), vec![0.0, 1.0, 0.5]);
        assert!(min_max_normalize(&[]).is_empty());
    }

    #[test]
    fn zero_weights_are_rejected() {
        assert!(Weights::normalized(0.0, 0.0).is_err());
        assert!(Weights::normalized(-1.0, 2.0).is_err());
        assert_eq!(Weights::normalized(3.0, 1.0).ok(), Some(Weights { vector: 0.75, keyword: 0.25 }));
    }

    #[test]
    fn overlapping_documents_sum_their_legs() {
        let vector = vec![hit("a", 0.1), hit("b", 0.5)];
        let keyword = vec![hit("b", 4.0), hit("c", 1.0)];
        let fused = fuse_weighted(vector, keyword, Weights { vector: 0.5, keyword: 0.5 }, 10);

        let ids: Vec<&str> = fused.iter().map(SearchResult::id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!((fused[0].score - 0.5).abs() < 1e-6);
        assert!((fused[1].score - 0.5).abs() < 1e-6);
        assert!(fused[2].score.abs() < 1e-6);
        assert_eq!(fused[1].document.metadata.get(VECTOR_RANK_KEY), Some(&MetadataValue::Integer(1)));
        assert_eq!(fused[1].document.metadata.get(KEYWORD_RANK_KEY), Some(&MetadataValue::Integer(0)));
    }

    #[test]
    fn rrf_rewards_agreement() {
        let first = vec![hit("a", 0.0), hit("b", 0.0)];
        let second = vec![hit("b", 0.0), hit("c", 0.0)];
        let fused = reciprocal_rank_fusion(&[first, second], RRF_K);

        assert_eq!(fused[0].id(), "b");
        assert!((fused[0].score - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-6);
        assert_eq!(fused.len(), 3);
    }
}
