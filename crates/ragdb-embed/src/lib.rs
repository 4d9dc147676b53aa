//! Embedding helpers: an LRU query cache, a caching provider wrapper and a
//! deterministic hash embedder for offline runs.

pub mod cache;
pub mod hash;
pub mod provider;

pub use cache::{EmbeddingCache, LruEmbeddingCache};
pub use hash::HashEmbedder;
pub use provider::CachedEmbeddingProvider;
