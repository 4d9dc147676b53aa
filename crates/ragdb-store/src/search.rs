use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use ragdb_core::filter::{build_filter, Predicate};
use ragdb_core::metrics::OperationTimer;
use ragdb_core::traits::EmbeddingProvider;
use ragdb_core::types::{
    check_dimension, Column, DistanceMetric, Document, Metadata, MetadataValue, SearchResult, StoredRow, TableQuery,
};
use ragdb_core::{ensure_active, CancellationToken, Result};

use crate::store::{validate_tenant_id, DocumentStore};

pub const DEFAULT_SEARCH_LIMIT: usize = 10;
pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct SearchOptions {
    /// 0 means [`DEFAULT_SEARCH_LIMIT`].
    pub limit: usize,
    /// Equality filters on `id`, `text`, `source_name` or `metadata`.
    pub filters: Metadata,
    pub metric: DistanceMetric,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { limit: DEFAULT_SEARCH_LIMIT, filters: Metadata::new(), metric: DistanceMetric::default() }
    }
}

impl SearchOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_filter(mut self, key: impl Into<String>, value: impl Into<MetadataValue>) -> Self {
        self.filters.insert(key.into(), value.into());
        self
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    fn effective_limit(&self) -> usize {
        if self.limit == 0 {
            DEFAULT_SEARCH_LIMIT
        } else {
            self.limit
        }
    }
}

/// One page of distinct source names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceNamePage {
    pub source_names: Vec<String>,
    pub total_count: usize,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
}

impl DocumentStore {
    /// Nearest neighbours of `embedding` in the tenant's table.
    ///
    /// Scores are raw distances under `options.metric`: lower is closer.
    /// A tenant without a table has no results.
    pub async fn search(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        embedding: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        let timer = OperationTimer::start(Arc::clone(&self.metrics), "search");
        let result = self.search_inner(cancel, tenant, embedding, options).await;
        timer.finish(&result);
        result
    }

    async fn search_inner(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        embedding: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        validate_tenant_id(tenant)?;
        check_dimension("query embedding", self.embedding_dim(), embedding.len())?;
        let filter = build_filter(&options.filters)?;
        ensure_active(cancel)?;

        let Some(table) = self.open_tenant_table(cancel, tenant).await? else {
            return Ok(Vec::new());
        };
        let query = TableQuery::scan()
            .nearest_to(embedding.to_vec())
            .with_metric(options.metric)
            .filter(filter)
            .limit(options.effective_limit());
        let (table_ref, query_ref) = (&table, &query);
        let rows = self.retry.run(cancel, "search", move || table_ref.query(query_ref)).await?;
        let results = rows.into_iter().map(StoredRow::into_search_result).collect::<Result<Vec<_>>>()?;

        debug!(tenant, hits = results.len(), "vector search");
        self.metrics.record_search_results(tenant, results.len());
        Ok(results)
    }

    /// Embed `text` with `provider`, then [`search`](Self::search).
    pub async fn search_with_text(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        text: &str,
        provider: &dyn EmbeddingProvider,
        options: &SearchOptions,
    ) -> Result<Vec<SearchResult>> {
        ensure_active(cancel)?;
        let embedding = provider.embed(text).await?;
        self.search(cancel, tenant, &embedding, options).await
    }

    pub async fn search_by_source_name(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        embedding: &[f32],
        source_name: &str,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let options = SearchOptions::default().with_limit(limit).with_filter("source_name", source_name);
        self.search(cancel, tenant, embedding, &options).await
    }

    /// Every document of the tenant that passes `filters`, in storage order.
    pub async fn scan_documents(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        filters: &Metadata,
    ) -> Result<Vec<Document>> {
        validate_tenant_id(tenant)?;
        let filter = build_filter(filters)?;
        let rows = self.scan_rows(cancel, tenant, filter, &Column::ALL).await?;
        rows.into_iter().map(StoredRow::into_document).collect()
    }

    async fn scan_rows(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        filter: Option<Predicate>,
        columns: &[Column],
    ) -> Result<Vec<StoredRow>> {
        ensure_active(cancel)?;
        let Some(table) = self.open_tenant_table(cancel, tenant).await? else {
            return Ok(Vec::new());
        };
        let query = TableQuery::scan().filter(filter).select(columns);
        let (table_ref, query_ref) = (&table, &query);
        self.retry.run(cancel, "scan", move || table_ref.query(query_ref)).await
    }

    /// Distinct non-empty source names in sorted order, `limit` at a time.
    /// A `limit` of 0 means [`DEFAULT_PAGE_SIZE`].
    pub async fn list_source_names_paginated(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        offset: usize,
        limit: usize,
    ) -> Result<SourceNamePage> {
        let limit = if limit == 0 { DEFAULT_PAGE_SIZE } else { limit };
        let names = self.distinct_source_names(cancel, tenant).await?;
        let total_count = names.len();
        let source_names: Vec<String> = names.into_iter().skip(offset).take(limit).collect();
        let has_more = offset.saturating_add(source_names.len()) < total_count;
        Ok(SourceNamePage { source_names, total_count, offset, limit, has_more })
    }

    pub async fn list_source_names(&self, cancel: &CancellationToken, tenant: &str) -> Result<Vec<String>> {
        Ok(self.distinct_source_names(cancel, tenant).await?.into_iter().collect())
    }

    async fn distinct_source_names(&self, cancel: &CancellationToken, tenant: &str) -> Result<BTreeSet<String>> {
        validate_tenant_id(tenant)?;
        let rows = self.scan_rows(cancel, tenant, None, &[Column::SourceName]).await?;
        Ok(rows.into_iter().map(|r| r.source_name).filter(|s| !s.is_empty()).collect())
    }
}
