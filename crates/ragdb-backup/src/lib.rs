//! Versioned JSON backups of a tenant's documents.
//!
//! A backup is a single JSON object, optionally gzip-compressed:
//! `{"metadata": {...}, "documents": [...]}`. Restores go back through the
//! [`DocumentStore`] write path so validation and indexing apply as usual.

mod format;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use ragdb_core::progress::{Progress, ProgressCallback, ProgressTracker};
use ragdb_core::types::{Document, Metadata};
use ragdb_core::{ensure_active, CancellationToken, Error, Result};
use ragdb_store::{validate_tenant_id, DocumentStore};

pub use format::{
    read_backup, read_backup_metadata, write_backup, BackupData, BackupDocument, BackupFormat, BackupMetadata,
    BACKUP_VERSION,
};

/// Progress units reserved for the steps before documents are processed.
const PREPARATION_STEPS: u64 = 20;

#[derive(Debug, Clone, Copy, Default)]
pub struct ImportOptions {
    /// Remove the tenant's documents before importing. Otherwise documents
    /// are upserted by id.
    pub clear_existing: bool,
    /// Check the file and its embedding dimension without importing.
    pub validate_only: bool,
}

/// Reads the metadata block of a backup file.
pub fn validate_backup_file(path: &Path) -> Result<BackupMetadata> {
    read_backup_metadata(File::open(path)?)
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Backup(format!("backup task failed: {e}")))?
}

pub struct BackupManager {
    store: Arc<DocumentStore>,
}

impl BackupManager {
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Write every document of `tenant` to `path`. A partially written file
    /// is removed on failure. File I/O and encoding run on the blocking pool.
    pub async fn export_tenant(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        path: &Path,
        format: BackupFormat,
        progress: Option<ProgressCallback>,
    ) -> Result<BackupMetadata> {
        validate_tenant_id(tenant)?;
        let tracker = ProgressTracker::new(100, progress);
        let data = self.snapshot(cancel, tenant, format, &tracker).await.inspect_err(|e| {
            warn!(tenant, path = %path.display(), error = %e, "export failed");
        })?;
        let metadata = data.metadata.clone();
        let target = path.to_path_buf();
        let written = blocking(move || {
            let file = File::create(&target)?;
            write_backup(BufWriter::new(file), &data, format)
        })
        .await;
        if let Err(e) = written {
            warn!(tenant, path = %path.display(), error = %e, "export failed");
            if let Err(rm) = std::fs::remove_file(path) {
                debug!(path = %path.display(), error = %rm, "could not remove partial backup");
            }
            return Err(e);
        }
        tracker.complete();
        info!(tenant, path = %path.display(), documents = metadata.document_count, %format, "exported backup");
        Ok(metadata)
    }

    /// Encode the tenant's backup into `writer` on the calling thread.
    pub async fn export_to_writer<W: Write>(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        writer: W,
        format: BackupFormat,
        progress: Option<ProgressCallback>,
    ) -> Result<BackupMetadata> {
        validate_tenant_id(tenant)?;
        let tracker = ProgressTracker::new(100, progress);
        let data = self.snapshot(cancel, tenant, format, &tracker).await?;
        write_backup(writer, &data, format)?;
        tracker.complete();
        Ok(data.metadata)
    }

    async fn snapshot(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        format: BackupFormat,
        tracker: &ProgressTracker,
    ) -> Result<BackupData> {
        tracker.set_stage("preparing");
        if !self.store.table_exists(cancel, tenant).await? {
            return Err(Error::NotFound(format!("no data exists for tenant {tenant}")));
        }

        tracker.add(10);
        tracker.set_stage("counting");
        let count = self.store.count_documents(cancel, tenant).await?;
        tracker.add(10);
        tracker.set_stage("reading");
        tracker.set_total(count as u64 + PREPARATION_STEPS);

        let docs = self.store.scan_documents(cancel, tenant, &Metadata::new()).await?;
        let mut documents = Vec::with_capacity(docs.len());
        for doc in docs {
            ensure_active(cancel)?;
            documents.push(BackupDocument::from(doc));
            tracker.increment();
        }

        let metadata = BackupMetadata {
            version: BACKUP_VERSION.to_string(),
            tenant_id: tenant.to_string(),
            created: Utc::now(),
            document_count: documents.len(),
            embedding_dim: self.store.embedding_dim(),
            format,
        };
        tracker.set_stage("writing");
        tracker.set_message("writing backup file");
        Ok(BackupData { metadata, documents })
    }

    /// Restore a backup file into `tenant`, which need not be the tenant it
    /// was exported from. Returns the number of documents imported.
    pub async fn import_tenant(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        path: &Path,
        options: &ImportOptions,
        progress: Option<ProgressCallback>,
    ) -> Result<usize> {
        validate_tenant_id(tenant)?;
        let forward = progress.is_some();
        let tracker = Arc::new(ProgressTracker::new(100, progress));
        tracker.set_stage("validating");

        let source = path.to_path_buf();
        let metadata = blocking(move || validate_backup_file(&source)).await?;
        if metadata.embedding_dim != self.store.embedding_dim() {
            return Err(Error::DimensionMismatch {
                context: format!("backup {}", path.display()),
                expected: self.store.embedding_dim(),
                actual: metadata.embedding_dim,
            });
        }
        if options.validate_only {
            tracker.complete();
            debug!(tenant, path = %path.display(), documents = metadata.document_count, "backup is valid");
            return Ok(0);
        }

        tracker.add(10);
        tracker.set_stage("reading");
        tracker.set_total(metadata.document_count as u64 + PREPARATION_STEPS);
        let source = path.to_path_buf();
        let data = blocking(move || read_backup(File::open(&source)?)).await?;
        if data.documents.len() != metadata.document_count {
            warn!(
                expected = metadata.document_count,
                actual = data.documents.len(),
                "backup document count does not match its metadata"
            );
        }
        if data.metadata.tenant_id != tenant {
            debug!(from = %data.metadata.tenant_id, to = tenant, "importing backup into a different tenant");
        }

        tracker.add(10);
        tracker.set_stage("preparing");
        if options.clear_existing {
            tracker.set_message("clearing existing data");
            self.store.clear_tenant(cancel, tenant).await?;
        }

        let documents: Vec<Document> = data.documents.into_iter().map(Document::from).collect();
        if documents.is_empty() {
            tracker.complete();
            return Ok(0);
        }

        tracker.set_stage("importing");
        tracker.set_message(&format!("importing {} documents", documents.len()));
        let nested = forward.then(|| {
            let outer = Arc::clone(&tracker);
            let callback: ProgressCallback =
                Arc::new(move |p: &Progress| outer.advance_to(PREPARATION_STEPS + p.current));
            callback
        });
        if options.clear_existing {
            self.store.add_documents_with_progress(cancel, tenant, &documents, nested).await?;
        } else {
            self.store.upsert_documents_with_progress(cancel, tenant, &documents, nested).await?;
        }

        tracker.complete();
        tracker.set_message("import complete");
        info!(tenant, path = %path.display(), documents = documents.len(), "imported backup");
        Ok(documents.len())
    }
}
