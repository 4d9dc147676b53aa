//! Splitting source text into chunks ready for embedding.

use crate::error::{Error, Result};
use crate::traits::EmbeddingProvider;
use crate::types::{Document, Metadata, MetadataValue};

/// A piece of a source text with its position and chunker-specific metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub index: usize,
    pub metadata: Metadata,
}

pub trait ChunkingStrategy: Send + Sync {
    fn chunk(&self, text: &str) -> Vec<Chunk>;
}

fn meta(pairs: &[(&str, usize)]) -> Metadata {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), MetadataValue::Integer(i64::try_from(*v).unwrap_or(i64::MAX))))
        .collect()
}

/// Character windows of `size` with `overlap` characters shared between neighbours.
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    size: usize,
    overlap: usize,
}

impl FixedSizeChunker {
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::validation("chunk size must be positive"));
        }
        if overlap >= size {
            return Err(Error::validation(format!(
                "overlap ({overlap}) must be less than chunk size ({size})"
            )));
        }
        Ok(Self { size, overlap })
    }
}

impl ChunkingStrategy for FixedSizeChunker {
    fn chunk(&self, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        let mut chunks = Vec::new();
        let mut start = 0;
        while start < chars.len() {
            let end = (start + self.size).min(chars.len());
            chunks.push(Chunk {
                text: chars[start..end].iter().collect(),
                index: chunks.len(),
                metadata: meta(&[("start", start), ("end", end)]),
            });
            if end == chars.len() {
                break;
            }
            start += self.size - self.overlap;
        }
        chunks
    }
}

/// Groups of up to `max_sentences` sentences.
#[derive(Debug, Clone)]
pub struct SentenceChunker {
    max_sentences: usize,
}

impl SentenceChunker {
    pub fn new(max_sentences: usize) -> Result<Self> {
        if max_sentences == 0 {
            return Err(Error::validation("max sentences must be positive"));
        }
        Ok(Self { max_sentences })
    }
}

impl ChunkingStrategy for SentenceChunker {
    fn chunk(&self, text: &str) -> Vec<Chunk> {
        let sentences = split_sentences(text);
        sentences
            .chunks(self.max_sentences)
            .enumerate()
            .map(|(index, group)| {
                let first = index * self.max_sentences;
                Chunk {
                    text: group.join(" "),
                    index,
                    metadata: meta(&[("sentence_start", first), ("sentence_end", first + group.len())]),
                }
            })
            .collect()
    }
}

/// A sentence ends at `.`, `!` or `?` followed by whitespace or end of text.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        current.push(c);
        let terminal = matches!(c, '.' | '!' | '?');
        if terminal && chars.peek().map_or(true, |n| n.is_whitespace()) {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

/// One chunk per blank-line separated paragraph; single newlines when there are no blank lines.
#[derive(Debug, Clone, Default)]
pub struct ParagraphChunker;

impl ChunkingStrategy for ParagraphChunker {
    fn chunk(&self, text: &str) -> Vec<Chunk> {
        let mut paragraphs: Vec<&str> = text.split("\n\n").collect();
        if paragraphs.len() == 1 {
            paragraphs = text.split('\n').collect();
        }
        paragraphs
            .into_iter()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .enumerate()
            .map(|(index, p)| Chunk { text: p.to_string(), index, metadata: meta(&[("paragraph_index", index)]) })
            .collect()
    }
}

/// Approximates tokens as four characters each.
#[derive(Debug, Clone)]
pub struct TokenChunker {
    inner: FixedSizeChunker,
}

impl TokenChunker {
    pub const CHARS_PER_TOKEN: usize = 4;

    pub fn new(max_tokens: usize, overlap: usize) -> Result<Self> {
        if max_tokens == 0 {
            return Err(Error::validation("max tokens must be positive"));
        }
        if overlap >= max_tokens {
            return Err(Error::validation(format!(
                "overlap ({overlap}) must be less than max tokens ({max_tokens})"
            )));
        }
        let inner = FixedSizeChunker::new(max_tokens * Self::CHARS_PER_TOKEN, overlap * Self::CHARS_PER_TOKEN)?;
        Ok(Self { inner })
    }
}

impl ChunkingStrategy for TokenChunker {
    fn chunk(&self, text: &str) -> Vec<Chunk> {
        self.inner.chunk(text)
    }
}

/// Paragraph chunks, with long paragraphs split into overlapping word windows.
#[derive(Debug, Clone)]
pub struct WordWindowChunker {
    pub max_words: usize,
    pub overlap_percent: f32,
}

impl Default for WordWindowChunker {
    fn default() -> Self {
        Self { max_words: 300, overlap_percent: 0.2 }
    }
}

impl WordWindowChunker {
    fn split_with_overlap(&self, paragraph: &str) -> Vec<String> {
        let words: Vec<&str> = paragraph.split_whitespace().collect();
        let per_chunk = self.max_words.max(1);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let overlap = ((per_chunk as f32 * self.overlap_percent) as usize).min(per_chunk - 1);
        let mut out = Vec::new();
        let mut start = 0;
        while start < words.len() {
            let end = (start + per_chunk).min(words.len());
            out.push(words[start..end].join(" "));
            if end >= words.len() {
                break;
            }
            start = end - overlap;
        }
        out
    }
}

impl ChunkingStrategy for WordWindowChunker {
    fn chunk(&self, text: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for paragraph in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            let pieces = if paragraph.split_whitespace().count() <= self.max_words {
                vec![paragraph.to_string()]
            } else {
                self.split_with_overlap(paragraph)
            };
            for piece in pieces {
                let index = chunks.len();
                chunks.push(Chunk { text: piece, index, metadata: Metadata::new() });
            }
        }
        chunks
    }
}

/// Chunk `text` and embed every chunk in one batch call.
///
/// Ids take the form `<source_name>_chunk_<index>`; each document carries
/// `chunk_index` plus the chunker's own metadata.
pub async fn chunk_document(
    text: &str,
    source_name: &str,
    chunker: &dyn ChunkingStrategy,
    provider: &dyn EmbeddingProvider,
) -> Result<Vec<Document>> {
    let chunks = chunker.chunk(text);
    if chunks.is_empty() {
        return Ok(Vec::new());
    }
    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let embeddings = provider.embed_batch(&texts).await?;
    if embeddings.len() != chunks.len() {
        return Err(Error::Embedding(format!(
            "provider returned {} embeddings for {} chunks",
            embeddings.len(),
            chunks.len()
        )));
    }
    Ok(chunks
        .into_iter()
        .zip(embeddings)
        .map(|(chunk, embedding)| {
            let mut metadata = chunk.metadata;
            metadata.insert("chunk_index".into(), MetadataValue::Integer(i64::try_from(chunk.index).unwrap_or(i64::MAX)));
            Document {
                id: format!("{}_chunk_{}", source_name, chunk.index),
                text: chunk.text,
                source_name: source_name.to_string(),
                embedding,
                metadata,
            }
        })
        .collect())
}
