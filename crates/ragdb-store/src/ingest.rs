use std::sync::Arc;

use tracing::{debug, info, warn};

use ragdb_core::filter::Predicate;
use ragdb_core::metrics::OperationTimer;
use ragdb_core::progress::{ProgressCallback, ProgressTracker};
use ragdb_core::traits::StorageTable;
use ragdb_core::types::{check_dimension, AddMode, Document, StoredRow};
use ragdb_core::{ensure_active, CancellationToken, Error, Result};

use crate::store::{validate_tenant_id, DocumentStore};

impl DocumentStore {
    pub async fn add_documents(&self, cancel: &CancellationToken, tenant: &str, docs: &[Document]) -> Result<()> {
        self.add_documents_with_progress(cancel, tenant, docs, None).await
    }

    /// Insert documents in batches of at most `max_batch_size`, then make sure
    /// the tenant's vector index exists.
    ///
    /// Everything is validated before storage is touched. Batches are written
    /// in order; when one fails, the batches before it stay committed and the
    /// error names the failing range.
    pub async fn add_documents_with_progress(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        docs: &[Document],
        progress: Option<ProgressCallback>,
    ) -> Result<()> {
        let timer = OperationTimer::start(Arc::clone(&self.metrics), "add_documents");
        let result = self.add_inner(cancel, tenant, docs, progress).await;
        timer.finish(&result);
        result
    }

    async fn add_inner(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        docs: &[Document],
        progress: Option<ProgressCallback>,
    ) -> Result<()> {
        if docs.is_empty() {
            return Err(Error::validation("no documents to add"));
        }
        let rows = self.prepare_rows(tenant, docs)?;
        ensure_active(cancel)?;

        let tracker = ProgressTracker::new(rows.len() as u64, progress);
        tracker.set_stage("inserting");
        let _guard = self.lock_tenant(cancel, tenant).await?;
        let table = self.get_or_create_table(cancel, tenant).await?;
        self.write_batches(cancel, tenant, &table, &rows, &tracker).await?;

        tracker.set_stage("indexing");
        self.ensure_index(cancel, tenant).await?;
        tracker.complete();
        info!(tenant, count = rows.len(), "added documents");
        Ok(())
    }

    /// Replace one existing document.
    pub async fn update_document(&self, cancel: &CancellationToken, tenant: &str, doc: &Document) -> Result<()> {
        let timer = OperationTimer::start(Arc::clone(&self.metrics), "update_document");
        let result = self.update_inner(cancel, tenant, doc).await;
        timer.finish(&result);
        result
    }

    async fn update_inner(&self, cancel: &CancellationToken, tenant: &str, doc: &Document) -> Result<()> {
        let rows = self.prepare_rows(tenant, std::slice::from_ref(doc))?;
        let _guard = self.lock_tenant(cancel, tenant).await?;
        let table = self.require_tenant_table(cancel, tenant).await?;

        let by_id = Predicate::eq("id", doc.id.as_str());
        let (table_ref, pred) = (&table, &by_id);
        let existing = self.retry.run(cancel, "count_rows", move || table_ref.count_rows(Some(pred))).await?;
        if existing == 0 {
            return Err(Error::NotFound(format!("document {} in tenant {tenant}", doc.id)));
        }
        self.retry.run(cancel, "delete", move || table_ref.delete(pred)).await?;
        let rows_ref = rows.as_slice();
        self.retry.run(cancel, "add", move || table_ref.add(rows_ref, AddMode::Append)).await?;
        debug!(tenant, id = %doc.id, "updated document");
        Ok(())
    }

    pub async fn upsert_documents(&self, cancel: &CancellationToken, tenant: &str, docs: &[Document]) -> Result<()> {
        self.upsert_documents_with_progress(cancel, tenant, docs, None).await
    }

    /// Insert documents, replacing any rows that share their ids.
    ///
    /// The delete of existing ids is a single best-effort pass; its failure is
    /// logged and the insert goes ahead.
    pub async fn upsert_documents_with_progress(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        docs: &[Document],
        progress: Option<ProgressCallback>,
    ) -> Result<()> {
        let timer = OperationTimer::start(Arc::clone(&self.metrics), "upsert_documents");
        let result = self.upsert_inner(cancel, tenant, docs, progress).await;
        timer.finish(&result);
        result
    }

    async fn upsert_inner(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        docs: &[Document],
        progress: Option<ProgressCallback>,
    ) -> Result<()> {
        if docs.is_empty() {
            return Err(Error::validation("no documents to upsert"));
        }
        let rows = self.prepare_rows(tenant, docs)?;
        ensure_active(cancel)?;

        let tracker = ProgressTracker::new(rows.len() as u64, progress);
        tracker.set_stage("deleting");
        let _guard = self.lock_tenant(cancel, tenant).await?;
        let table = self.get_or_create_table(cancel, tenant).await?;

        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        if let Err(e) = table.delete(&Predicate::any_id(&ids)).await {
            warn!(tenant, error = %e, "could not delete existing documents before upsert");
        }

        tracker.set_stage("inserting");
        self.write_batches(cancel, tenant, &table, &rows, &tracker).await?;
        tracker.set_stage("indexing");
        self.ensure_index(cancel, tenant).await?;
        tracker.complete();
        info!(tenant, count = rows.len(), "upserted documents");
        Ok(())
    }

    pub async fn delete_documents(&self, cancel: &CancellationToken, tenant: &str, ids: &[String]) -> Result<()> {
        validate_tenant_id(tenant)?;
        if ids.is_empty() {
            return Err(Error::validation("no document ids to delete"));
        }
        if ids.iter().any(|id| id.is_empty()) {
            return Err(Error::validation("document id cannot be empty"));
        }
        let _guard = self.lock_tenant(cancel, tenant).await?;
        let table = self.require_tenant_table(cancel, tenant).await?;
        let predicate = Predicate::any_id(ids);
        let (table_ref, pred) = (&table, &predicate);
        self.retry.run(cancel, "delete", move || table_ref.delete(pred)).await?;
        info!(tenant, count = ids.len(), "deleted documents by id");
        Ok(())
    }

    pub async fn delete_by_source_name(&self, cancel: &CancellationToken, tenant: &str, source_name: &str) -> Result<()> {
        validate_tenant_id(tenant)?;
        if source_name.is_empty() {
            return Err(Error::validation("source name cannot be empty"));
        }
        let _guard = self.lock_tenant(cancel, tenant).await?;
        let table = self.require_tenant_table(cancel, tenant).await?;
        let predicate = Predicate::eq("source_name", source_name);
        let (table_ref, pred) = (&table, &predicate);
        self.retry.run(cancel, "delete", move || table_ref.delete(pred)).await?;
        info!(tenant, source_name, "deleted documents by source name");
        Ok(())
    }

    /// Remove every document of the tenant. The index is rebuilt by the next write.
    pub async fn clear_tenant(&self, cancel: &CancellationToken, tenant: &str) -> Result<()> {
        validate_tenant_id(tenant)?;
        let _guard = self.lock_tenant(cancel, tenant).await?;
        let Some(table) = self.open_tenant_table(cancel, tenant).await? else {
            return Ok(());
        };
        let predicate = Predicate::all_rows();
        let (table_ref, pred) = (&table, &predicate);
        self.retry.run(cancel, "delete", move || table_ref.delete(pred)).await?;
        self.reset_index_flag(tenant).await;
        info!(tenant, "cleared tenant");
        Ok(())
    }

    /// Validate the tenant and every document, then convert to storage rows.
    fn prepare_rows(&self, tenant: &str, docs: &[Document]) -> Result<Vec<StoredRow>> {
        validate_tenant_id(tenant)?;
        for (i, doc) in docs.iter().enumerate() {
            if doc.id.is_empty() {
                return Err(Error::validation(format!("document {i}: id cannot be empty")));
            }
            check_dimension(format!("document {i} ({})", doc.id), self.embedding_dim(), doc.embedding.len())?;
        }
        docs.iter().map(StoredRow::from_document).collect()
    }

    async fn write_batches(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        table: &Arc<dyn StorageTable>,
        rows: &[StoredRow],
        tracker: &ProgressTracker,
    ) -> Result<()> {
        let batch_size = self.max_batch_size();
        for (i, batch) in rows.chunks(batch_size).enumerate() {
            ensure_active(cancel)?;
            let start = i * batch_size;
            let end = start + batch.len();
            self.retry
                .run(cancel, "add_batch", move || table.add(batch, AddMode::Append))
                .await
                .map_err(|e| match e {
                    Error::Cancelled => e,
                    other => Error::BatchFailed { start, end, source: Box::new(other) },
                })?;
            debug!(tenant, batch_start = start, batch_end = end, "wrote batch");
            tracker.add(batch.len() as u64);
        }
        Ok(())
    }
}
