use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::filter::Predicate;
use crate::types::{AddMode, Column, IndexConfig, StoredRow, TableQuery, TableSchema};

/// Opens connections to a vector storage engine.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    async fn connect(&self, uri: &str) -> Result<Arc<dyn StorageConnection>>;
}

#[async_trait]
pub trait StorageConnection: Send + Sync {
    async fn table_names(&self) -> Result<Vec<String>>;
    async fn create_table(&self, name: &str, schema: &TableSchema) -> Result<Arc<dyn StorageTable>>;
    /// Fails with [`crate::Error::NotFound`] when the table does not exist.
    async fn open_table(&self, name: &str) -> Result<Arc<dyn StorageTable>>;
    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait StorageTable: Send + Sync {
    fn name(&self) -> &str;
    async fn schema(&self) -> Result<TableSchema>;
    async fn add(&self, rows: &[StoredRow], mode: AddMode) -> Result<()>;
    async fn query(&self, query: &TableQuery) -> Result<Vec<StoredRow>>;
    async fn delete(&self, predicate: &Predicate) -> Result<()>;
    async fn create_index(&self, column: Column, config: &IndexConfig) -> Result<()>;
    async fn count_rows(&self, filter: Option<&Predicate>) -> Result<usize>;
}

/// Turns text into embedding vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dimensions(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}
