//! Lexical relevance: tokenization and BM25 scoring.

pub mod bm25;
pub mod tokenize;

pub use bm25::{Bm25, Bm25Score};
pub use tokenize::tokenize;
