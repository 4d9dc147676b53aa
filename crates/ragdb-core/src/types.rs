//! Domain types shared by the store, retrieval and backup layers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::filter::Predicate;

pub type DocumentId = String;
pub type Metadata = BTreeMap<String, MetadataValue>;

/// A JSON-compatible scalar stored in document metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl From<&str> for MetadataValue {
    fn from(s: &str) -> Self {
        MetadataValue::String(s.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(s: String) -> Self {
        MetadataValue::String(s)
    }
}

impl From<i64> for MetadataValue {
    fn from(v: i64) -> Self {
        MetadataValue::Integer(v)
    }
}

impl From<f64> for MetadataValue {
    fn from(v: f64) -> Self {
        MetadataValue::Float(v)
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        MetadataValue::Bool(v)
    }
}

/// A text chunk owned by one tenant.
///
/// - `id`: unique within the tenant
/// - `source_name`: the document the chunk was cut from, used for grouped deletes
/// - `embedding`: must match the store's configured dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub text: String,
    pub source_name: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    pub fn new(id: impl Into<String>, text: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            source_name: String::new(),
            embedding,
            metadata: Metadata::new(),
        }
    }

    pub fn with_source(mut self, source_name: impl Into<String>) -> Self {
        self.source_name = source_name.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A document returned from a query.
///
/// The meaning of `score` depends on the producer: raw distance (lower is
/// better) for vector search, fused relevance (higher is better) for hybrid
/// search and reciprocal-rank fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub document: Document,
    pub score: f32,
}

impl SearchResult {
    pub fn id(&self) -> &str {
        &self.document.id
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    L2,
    Dot,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexType {
    #[default]
    IvfPq,
    Auto,
}

/// Vector index parameters for one tenant table. Zero counts let the engine choose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub index_type: IndexType,
    pub metric: DistanceMetric,
    pub num_partitions: u32,
    pub num_sub_vectors: u32,
    pub replace: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_type: IndexType::IvfPq,
            metric: DistanceMetric::Cosine,
            num_partitions: 0,
            num_sub_vectors: 0,
            replace: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddMode {
    Append,
    Overwrite,
}

/// Columns of the fixed per-tenant table layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Id,
    Text,
    SourceName,
    Embedding,
    Metadata,
}

impl Column {
    pub const ALL: [Column; 5] =
        [Column::Id, Column::Text, Column::SourceName, Column::Embedding, Column::Metadata];

    pub fn as_str(self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::Text => "text",
            Column::SourceName => "source_name",
            Column::Embedding => "embedding",
            Column::Metadata => "metadata",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    pub embedding_dim: usize,
}

/// A row as persisted by the storage engine. Metadata travels as a JSON string.
///
/// Columns that were not selected come back empty. `distance` is only set by
/// nearest-neighbour queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredRow {
    pub id: String,
    pub text: String,
    pub source_name: String,
    pub embedding: Vec<f32>,
    pub metadata: String,
    pub distance: Option<f32>,
}

impl StoredRow {
    pub fn from_document(doc: &Document) -> Result<Self> {
        let metadata = if doc.metadata.is_empty() {
            String::new()
        } else {
            serde_json::to_string(&doc.metadata)?
        };
        Ok(Self {
            id: doc.id.clone(),
            text: doc.text.clone(),
            source_name: doc.source_name.clone(),
            embedding: doc.embedding.clone(),
            metadata,
            distance: None,
        })
    }

    /// Value of a string column, used by predicate evaluation.
    pub fn column_str(&self, column: &str) -> Option<&str> {
        match column {
            "id" => Some(&self.id),
            "text" => Some(&self.text),
            "source_name" => Some(&self.source_name),
            "metadata" => Some(&self.metadata),
            _ => None,
        }
    }

    pub fn into_document(self) -> Result<Document> {
        let metadata = if self.metadata.trim().is_empty() {
            Metadata::new()
        } else {
            serde_json::from_str(&self.metadata)?
        };
        Ok(Document {
            id: self.id,
            text: self.text,
            source_name: self.source_name,
            embedding: self.embedding,
            metadata,
        })
    }

    pub fn into_search_result(self) -> Result<SearchResult> {
        let score = self.distance.unwrap_or(0.0);
        Ok(SearchResult { document: self.into_document()?, score })
    }
}

/// A query against one tenant table.
#[derive(Debug, Clone, Default)]
pub struct TableQuery {
    pub nearest_to: Option<Vec<f32>>,
    pub metric: DistanceMetric,
    pub filter: Option<Predicate>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub columns: Vec<Column>,
}

impl TableQuery {
    /// A plain scan over every column.
    pub fn scan() -> Self {
        Self { columns: Column::ALL.to_vec(), ..Self::default() }
    }

    pub fn nearest_to(mut self, vector: Vec<f32>) -> Self {
        self.nearest_to = Some(vector);
        self
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    pub fn filter(mut self, predicate: Option<Predicate>) -> Self {
        self.filter = predicate;
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn offset(mut self, n: usize) -> Self {
        self.offset = Some(n);
        self
    }

    pub fn select(mut self, columns: &[Column]) -> Self {
        self.columns = columns.to_vec();
        self
    }

    pub fn selects(&self, column: Column) -> bool {
        self.columns.is_empty() || self.columns.contains(&column)
    }
}

/// Reject embeddings whose length differs from `expected`.
pub fn check_dimension(context: impl Into<String>, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::DimensionMismatch { context: context.into(), expected, actual })
    }
}
