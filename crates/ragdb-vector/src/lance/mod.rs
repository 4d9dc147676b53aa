//! LanceDB-backed storage engine.
//!
//! One Lance table per tenant with the fixed `{id, text, source_name,
//! embedding, metadata}` layout. Rows cross the boundary as Arrow record
//! batches; nearest-neighbour queries report `_distance`.

mod convert;
pub mod schema;

use std::sync::Arc;

use arrow_array::{RecordBatch, RecordBatchIterator};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::index::{vector::IvfPqIndexBuilder, Index};
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::table::AddDataMode;
use lancedb::{connect, Connection, DistanceType, Table};
use tracing::{debug, info};

use ragdb_core::filter::Predicate;
use ragdb_core::traits::{StorageConnection, StorageEngine, StorageTable};
use ragdb_core::types::{AddMode, Column, DistanceMetric, IndexConfig, IndexType, StoredRow, TableQuery, TableSchema};
use ragdb_core::{Error, Result};

pub use convert::{record_batch_to_rows, rows_to_record_batch};

fn lance_err(operation: &'static str) -> impl Fn(lancedb::Error) -> Error {
    move |e| match e {
        lancedb::Error::TableNotFound { .. } => Error::NotFound(e.to_string()),
        other => Error::storage(operation, other),
    }
}

fn distance_type(metric: DistanceMetric) -> DistanceType {
    match metric {
        DistanceMetric::Cosine => DistanceType::Cosine,
        DistanceMetric::L2 => DistanceType::L2,
        DistanceMetric::Dot => DistanceType::Dot,
    }
}

/// IVF partition count for `rows` vectors when the caller left it at 0:
/// about `sqrt(n)`, kept below the row count for tiny tables.
pub fn auto_partitions(rows: usize) -> u32 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    let sqrt_n = (rows as f64).sqrt() as usize;
    let mut nlist = sqrt_n.clamp(1, 65_536);
    if rows > 1 {
        nlist = nlist.min(rows - 1);
    }
    u32::try_from(nlist.max(1)).unwrap_or(1)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LanceEngine;

#[async_trait]
impl StorageEngine for LanceEngine {
    async fn connect(&self, uri: &str) -> Result<Arc<dyn StorageConnection>> {
        let db = connect(uri).execute().await.map_err(lance_err("connect"))?;
        debug!(uri, "lance connection opened");
        let conn: Arc<dyn StorageConnection> = Arc::new(LanceConnection { db });
        Ok(conn)
    }
}

pub struct LanceConnection {
    db: Connection,
}

#[async_trait]
impl StorageConnection for LanceConnection {
    async fn table_names(&self) -> Result<Vec<String>> {
        self.db.table_names().execute().await.map_err(lance_err("table_names"))
    }

    async fn create_table(&self, name: &str, schema: &TableSchema) -> Result<Arc<dyn StorageTable>> {
        let dim = i32::try_from(schema.embedding_dim)
            .map_err(|_| Error::validation(format!("embedding dimension {} is too large", schema.embedding_dim)))?;
        let table = self
            .db
            .create_empty_table(name, schema::build_arrow_schema(dim))
            .execute()
            .await
            .map_err(lance_err("create_table"))?;
        info!(table = name, dim, "created lance table");
        let handle: Arc<dyn StorageTable> = Arc::new(LanceTable { name: name.to_string(), table });
        Ok(handle)
    }

    async fn open_table(&self, name: &str) -> Result<Arc<dyn StorageTable>> {
        let table = self.db.open_table(name).execute().await.map_err(lance_err("open_table"))?;
        let handle: Arc<dyn StorageTable> = Arc::new(LanceTable { name: name.to_string(), table });
        Ok(handle)
    }

    async fn close(&self) -> Result<()> {
        // Lance connections hold no server-side session; dropping releases them.
        Ok(())
    }
}

pub struct LanceTable {
    name: String,
    table: Table,
}

impl LanceTable {
    async fn embedding_dim(&self) -> Result<usize> {
        let schema = self.table.schema().await.map_err(lance_err("schema"))?;
        schema::embedding_dim(&schema)
            .ok_or_else(|| Error::storage("schema", format!("table {} has no embedding column", self.name)))
    }

    async fn collect(&self, query: &TableQuery) -> Result<Vec<RecordBatch>> {
        let columns: Vec<&str> = query.columns.iter().map(|c| c.as_str()).collect();
        let stream = if let Some(vector) = &query.nearest_to {
            let mut q = self
                .table
                .query()
                .nearest_to(vector.clone())
                .map_err(lance_err("query"))?
                .distance_type(distance_type(query.metric));
            if let Some(filter) = &query.filter {
                q = q.only_if(filter.to_sql());
            }
            if let Some(n) = query.limit {
                q = q.limit(n);
            }
            if let Some(n) = query.offset {
                q = q.offset(n);
            }
            if !columns.is_empty() {
                q = q.select(Select::columns(&columns));
            }
            q.execute().await.map_err(lance_err("query"))?
        } else {
            let mut q = self.table.query();
            if let Some(filter) = &query.filter {
                q = q.only_if(filter.to_sql());
            }
            // Plain scans read every matching row unless the caller bounds them.
            let limit = match query.limit {
                Some(n) => n,
                None => self.count_rows(query.filter.as_ref()).await?.max(1),
            };
            q = q.limit(limit);
            if let Some(n) = query.offset {
                q = q.offset(n);
            }
            if !columns.is_empty() {
                q = q.select(Select::columns(&columns));
            }
            q.execute().await.map_err(lance_err("query"))?
        };
        stream.try_collect::<Vec<_>>().await.map_err(lance_err("query"))
    }
}

#[async_trait]
impl StorageTable for LanceTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn schema(&self) -> Result<TableSchema> {
        Ok(TableSchema { embedding_dim: self.embedding_dim().await? })
    }

    async fn add(&self, rows: &[StoredRow], mode: AddMode) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let dim = self.embedding_dim().await?;
        let dim = i32::try_from(dim).map_err(|_| Error::validation("embedding dimension is too large"))?;
        let record_batch = rows_to_record_batch(rows, dim).map_err(|e| Error::storage("encode", e))?;
        let schema = record_batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(record_batch)].into_iter(), schema));
        let mode = match mode {
            AddMode::Append => AddDataMode::Append,
            AddMode::Overwrite => AddDataMode::Overwrite,
        };
        self.table.add(reader).mode(mode).execute().await.map_err(lance_err("add"))?;
        Ok(())
    }

    async fn query(&self, query: &TableQuery) -> Result<Vec<StoredRow>> {
        let batches = self.collect(query).await?;
        Ok(batches.iter().flat_map(record_batch_to_rows).collect())
    }

    async fn delete(&self, predicate: &Predicate) -> Result<()> {
        self.table.delete(&predicate.to_sql()).await.map_err(lance_err("delete"))?;
        Ok(())
    }

    async fn create_index(&self, column: Column, config: &IndexConfig) -> Result<()> {
        let index = match config.index_type {
            IndexType::Auto => Index::Auto,
            IndexType::IvfPq => {
                let partitions = if config.num_partitions == 0 {
                    auto_partitions(self.count_rows(None).await?)
                } else {
                    config.num_partitions
                };
                let mut builder =
                    IvfPqIndexBuilder::default().distance_type(distance_type(config.metric)).num_partitions(partitions);
                if config.num_sub_vectors > 0 {
                    builder = builder.num_sub_vectors(config.num_sub_vectors);
                }
                Index::IvfPq(builder)
            }
        };
        self.table
            .create_index(&[column.as_str()], index)
            .replace(config.replace)
            .execute()
            .await
            .map_err(lance_err("create_index"))?;
        info!(table = %self.name, index_type = ?config.index_type, metric = ?config.metric, "built vector index");
        Ok(())
    }

    async fn count_rows(&self, filter: Option<&Predicate>) -> Result<usize> {
        self.table.count_rows(filter.map(Predicate::to_sql)).await.map_err(lance_err("count_rows"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_partitions_stay_below_row_count() {
        assert_eq!(auto_partitions(0), 1);
        assert_eq!(auto_partitions(2), 1);
        assert_eq!(auto_partitions(10_000), 100);
    }
}
