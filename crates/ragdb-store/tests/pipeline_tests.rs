use std::sync::Arc;

use indicatif::ProgressBar;

use ragdb_core::chunking::{chunk_document, ParagraphChunker};
use ragdb_core::logging::init_tracing;
use ragdb_core::metrics::InMemoryMetrics;
use ragdb_core::progress::progress_bar_callback;
use ragdb_core::traits::EmbeddingProvider;
use ragdb_core::types::MetadataValue;
use ragdb_core::CancellationToken;
use ragdb_embed::{CachedEmbeddingProvider, HashEmbedder, LruEmbeddingCache};
use ragdb_store::{DocumentStore, SearchOptions, StoreOptions};
use ragdb_vector::MemoryEngine;

const DIM: usize = 48;

const GUIDE: &str = "Rainwater barrels should sit on a level base.\n\n\
Clean the gutters before the wet season.\n\n\
A first-flush diverter keeps debris out of the tank.";

#[tokio::test]
async fn chunk_embed_ingest_and_query() -> anyhow::Result<()> {
    init_tracing("ragdb=debug");
    let cancel = CancellationToken::new();
    let engine = MemoryEngine::new();
    let store = DocumentStore::open(&engine, "memory://pipeline", StoreOptions::new(DIM).with_batch_size(2)).await?;

    let metrics = Arc::new(InMemoryMetrics::new());
    let provider = CachedEmbeddingProvider::new(Arc::new(HashEmbedder::new(DIM)), Arc::new(LruEmbeddingCache::new(16)))
        .with_metrics(metrics.clone());

    let docs = chunk_document(GUIDE, "water_guide", &ParagraphChunker, &provider).await?;
    assert_eq!(docs.len(), 3);
    assert_eq!(docs[2].id, "water_guide_chunk_2");
    assert_eq!(docs[2].metadata.get("chunk_index"), Some(&MetadataValue::Integer(2)));

    let bar = ProgressBar::hidden();
    store
        .add_documents_with_progress(&cancel, "farm", &docs, Some(progress_bar_callback(bar.clone())))
        .await?;
    assert_eq!(bar.position(), 3);
    assert!(bar.is_finished());
    assert_eq!(engine.stats().add_calls(), 2, "three chunks in batches of two");

    // The query text equals a chunk, so its embedding comes from the cache.
    let hits = store
        .search_with_text(&cancel, "farm", "Clean the gutters before the wet season.", &provider, &SearchOptions::default())
        .await?;
    assert_eq!(hits[0].id(), "water_guide_chunk_1");
    assert_eq!(metrics.operation("embedding_cache_hit").count, 1);
    assert_eq!(provider.dimensions(), DIM);

    store.delete_by_source_name(&cancel, "farm", "water_guide").await?;
    assert_eq!(store.count_documents(&cancel, "farm").await?, 0);
    store.close().await?;
    assert_eq!(engine.stats().close_calls(), 1);
    Ok(())
}
