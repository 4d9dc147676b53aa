use std::sync::Arc;

use ragdb_core::traits::EmbeddingProvider;
use ragdb_core::types::{Document, SearchResult};
use ragdb_core::{CancellationToken, Error};
use ragdb_embed::HashEmbedder;
use ragdb_hybrid::{HybridSearchEngine, HybridSearchOptions, Reranker, RrfReranker, ScoreFnReranker};
use ragdb_store::{DocumentStore, SearchOptions, StoreOptions};
use ragdb_vector::MemoryEngine;

const DIM: usize = 64;
const TENANT: &str = "homestead";

const CORPUS: [(&str, &str, &str); 5] = [
    ("solar", "energy.md", "solar panel wiring guide"),
    ("rain", "water.md", "rainwater collection barrels and gutters"),
    ("compost", "soil.md", "composting toilets explained"),
    ("stove", "energy.md", "wood stove maintenance"),
    ("well", "water.md", "hand pump for a shallow well"),
];

async fn setup() -> anyhow::Result<(HybridSearchEngine, HashEmbedder)> {
    let engine = MemoryEngine::new();
    let store = DocumentStore::open(&engine, "memory://hybrid", StoreOptions::new(DIM)).await?;
    let embedder = HashEmbedder::new(DIM);

    let mut docs = Vec::new();
    for (id, source, text) in CORPUS {
        docs.push(Document::new(id, text, embedder.embed(text).await?).with_source(source));
    }
    store.add_documents(&CancellationToken::new(), TENANT, &docs).await?;
    Ok((HybridSearchEngine::new(Arc::new(store)), embedder))
}

fn ids(results: &[SearchResult]) -> Vec<&str> {
    results.iter().map(SearchResult::id).collect()
}

#[tokio::test]
async fn vector_only_weights_reproduce_vector_ranking() -> anyhow::Result<()> {
    let (hybrid, embedder) = setup().await?;
    let cancel = CancellationToken::new();
    let query = embedder.embed("pump water from a well").await?;

    // The keyword leg is skipped entirely, so its ceiling cannot trip.
    hybrid.store().set_max_documents_for_bm25(1);

    let fused = hybrid
        .search(&cancel, TENANT, "pump water", &query, &HybridSearchOptions::default().with_limit(3).with_weights(1.0, 0.0))
        .await?;
    let plain = hybrid.store().search(&cancel, TENANT, &query, &SearchOptions::default().with_limit(3)).await?;

    assert_eq!(ids(&fused), ids(&plain));
    Ok(())
}

#[tokio::test]
async fn keyword_leg_respects_the_document_ceiling() -> anyhow::Result<()> {
    let engine = MemoryEngine::new();
    let store = DocumentStore::open(&engine, "memory://ceiling", StoreOptions::new(2).with_bm25_limit(2)).await?;
    let cancel = CancellationToken::new();
    let docs: Vec<Document> =
        (0..3).map(|i| Document::new(format!("d{i}"), format!("note {i}"), vec![1.0, 0.0])).collect();
    store.add_documents(&cancel, "t1", &docs).await?;
    let hybrid = HybridSearchEngine::new(Arc::new(store));

    let err = hybrid.search(&cancel, "t1", "note", &[1.0, 0.0], &HybridSearchOptions::default()).await.unwrap_err();
    assert!(matches!(err, Error::Bm25LimitExceeded { count: 3, limit: 2 }), "{err}");
    let message = err.to_string();
    assert!(message.contains('3') && message.contains('2'), "{message}");

    hybrid.store().set_max_documents_for_bm25(0);
    let hits = hybrid.search(&cancel, "t1", "note", &[1.0, 0.0], &HybridSearchOptions::default()).await?;
    assert_eq!(hits.len(), 3);
    Ok(())
}

#[tokio::test]
async fn keyword_only_returns_matching_documents() -> anyhow::Result<()> {
    let (hybrid, _) = setup().await?;
    let cancel = CancellationToken::new();

    let options = HybridSearchOptions::default().with_weights(0.0, 1.0);
    let hits = hybrid.search(&cancel, TENANT, "wood stove", &[], &options).await?;
    assert_eq!(ids(&hits), vec!["stove"]);
    assert!((hits[0].score - 1.0).abs() < 1e-6);

    let none = hybrid.search(&cancel, TENANT, "submarine", &[], &options).await?;
    assert!(none.is_empty());
    Ok(())
}

#[tokio::test]
async fn agreement_between_legs_wins() -> anyhow::Result<()> {
    let (hybrid, embedder) = setup().await?;
    let cancel = CancellationToken::new();

    let hits = hybrid
        .search_with_text(&cancel, TENANT, "solar panel wiring guide", &embedder, &HybridSearchOptions::default())
        .await?;
    assert_eq!(hits[0].id(), "solar");
    assert!((hits[0].score - 1.0).abs() < 1e-5, "top of both legs: {}", hits[0].score);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    Ok(())
}

#[tokio::test]
async fn filters_and_minimum_keyword_score_apply() -> anyhow::Result<()> {
    let (hybrid, embedder) = setup().await?;
    let cancel = CancellationToken::new();
    let query = embedder.embed("water").await?;

    let options = HybridSearchOptions::default().with_filter("source_name", "water.md");
    let hits = hybrid.search(&cancel, TENANT, "well", &query, &options).await?;
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.document.source_name == "water.md"));

    let strict = HybridSearchOptions::default().with_weights(0.0, 1.0).with_min_keyword_score(1_000.0);
    assert!(hybrid.search(&cancel, TENANT, "well", &query, &strict).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn zero_weights_are_rejected() -> anyhow::Result<()> {
    let (hybrid, _) = setup().await?;
    let options = HybridSearchOptions::default().with_weights(0.0, 0.0);
    let res = hybrid.search(&CancellationToken::new(), TENANT, "x", &[], &options).await;
    assert!(matches!(res, Err(Error::Validation(_))));
    Ok(())
}

#[tokio::test]
async fn rerankers_rescore_results() -> anyhow::Result<()> {
    let (hybrid, embedder) = setup().await?;
    let cancel = CancellationToken::new();

    let by_length = ScoreFnReranker::new(|_query: &str, r: &SearchResult| r.document.text.len() as f32);
    let hits = hybrid
        .search_with_rerank(&cancel, TENANT, "energy", &embedder, &by_length, &SearchOptions::default())
        .await?;
    assert_eq!(hits[0].id(), "rain", "longest text first");

    let rrf = RrfReranker::default();
    let ranked = rrf.rerank("energy", hits.clone()).await?;
    assert!((ranked[0].score - 1.0 / 61.0).abs() < 1e-6);
    assert_eq!(ids(&ranked), ids(&hits), "rrf keeps the incoming order");

    let mut reversed = hits.clone();
    reversed.reverse();
    let combined = rrf.combine_ranked_lists(&[hits.clone(), reversed]);
    assert_eq!(combined.len(), hits.len());
    Ok(())
}
