use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use ragdb_core::config::{StoreConfig, DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_DOCUMENTS_FOR_BM25};
use ragdb_core::metrics::{MetricsCollector, NoopMetrics};
use ragdb_core::retry::{RetryConfig, RetryExecutor};
use ragdb_core::traits::{StorageConnection, StorageEngine, StorageTable};
use ragdb_core::types::{Column, IndexConfig, TableSchema};
use ragdb_core::{CancellationToken, Error, Result};
use ragdb_vector::{ConnectionPool, PooledConnection};

pub const TABLE_PREFIX: &str = "rag_tenant_";
pub const MAX_TENANT_ID_LEN: usize = 100;
/// Tenants sampled by [`DocumentStore::health_check_with_details`].
pub const HEALTH_SAMPLE_TENANTS: usize = 10;

/// Construction-time settings for a [`DocumentStore`].
#[derive(Clone)]
pub struct StoreOptions {
    pub embedding_dim: usize,
    pub max_batch_size: usize,
    /// 0 disables the ceiling.
    pub max_documents_for_bm25: usize,
    pub retry: RetryConfig,
    pub default_index: IndexConfig,
    pub metrics: Arc<dyn MetricsCollector>,
}

impl StoreOptions {
    pub fn new(embedding_dim: usize) -> Self {
        Self {
            embedding_dim,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_documents_for_bm25: DEFAULT_MAX_DOCUMENTS_FOR_BM25,
            retry: RetryConfig::default(),
            default_index: IndexConfig::default(),
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            embedding_dim: config.embedding_dim,
            max_batch_size: config.max_batch_size,
            max_documents_for_bm25: config.max_documents_for_bm25,
            retry: config.retry.clone(),
            default_index: config.index.clone(),
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_batch_size(mut self, n: usize) -> Self {
        self.max_batch_size = n;
        self
    }

    pub fn with_bm25_limit(mut self, n: usize) -> Self {
        self.max_documents_for_bm25 = n;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_index(mut self, index: IndexConfig) -> Self {
        self.default_index = index;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.embedding_dim == 0 {
            return Err(Error::InvalidConfig("embedding dimension must be positive".into()));
        }
        if self.max_batch_size == 0 {
            return Err(Error::InvalidConfig("max batch size must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct TenantIndexState {
    created: bool,
    config: Option<IndexConfig>,
}

enum Backend {
    Direct(Arc<dyn StorageConnection>),
    Pooled(PooledConnection),
}

impl Backend {
    fn conn(&self) -> &dyn StorageConnection {
        match self {
            Backend::Direct(conn) => conn.as_ref(),
            Backend::Pooled(conn) => conn.connection().as_ref(),
        }
    }
}

/// Result of [`DocumentStore::health_check_with_details`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub database_uri: String,
    pub tables_count: usize,
    pub tenant_document_counts: BTreeMap<String, usize>,
    pub error: Option<String>,
}

/// Tenant-partitioned document storage over a [`StorageConnection`].
///
/// Every tenant owns one table named `rag_tenant_<id>`. Writes to a tenant
/// are serialized by a per-tenant lock; reads take no lock. The vector index
/// is built lazily after the first successful write.
pub struct DocumentStore {
    backend: Backend,
    uri: String,
    embedding_dim: usize,
    max_batch_size: usize,
    max_documents_for_bm25: AtomicUsize,
    default_index: IndexConfig,
    pub(crate) retry: RetryExecutor,
    pub(crate) metrics: Arc<dyn MetricsCollector>,
    tenant_locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
    index_state: tokio::sync::RwLock<HashMap<String, TenantIndexState>>,
}

impl DocumentStore {
    pub async fn open(engine: &dyn StorageEngine, uri: &str, options: StoreOptions) -> Result<Self> {
        options.validate()?;
        let conn = engine.connect(uri).await?;
        info!(uri, dim = options.embedding_dim, "document store opened");
        Ok(Self::build(Backend::Direct(conn), uri, options))
    }

    pub async fn from_config(engine: &dyn StorageEngine, config: &StoreConfig) -> Result<Self> {
        config.validate()?;
        Self::open(engine, &config.resolved_db_uri(), StoreOptions::from_config(config)).await
    }

    pub fn with_connection(conn: Arc<dyn StorageConnection>, uri: &str, options: StoreOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self::build(Backend::Direct(conn), uri, options))
    }

    /// Check a connection out of `pool` for the lifetime of the store.
    pub async fn with_pool(pool: &ConnectionPool, options: StoreOptions, cancel: &CancellationToken) -> Result<Self> {
        options.validate()?;
        let conn = pool.get(cancel).await?;
        debug!(uri = pool.uri(), "document store using pooled connection");
        Ok(Self::build(Backend::Pooled(conn), pool.uri(), options))
    }

    fn build(backend: Backend, uri: &str, options: StoreOptions) -> Self {
        Self {
            backend,
            uri: uri.to_string(),
            embedding_dim: options.embedding_dim,
            max_batch_size: options.max_batch_size,
            max_documents_for_bm25: AtomicUsize::new(options.max_documents_for_bm25),
            default_index: options.default_index,
            retry: RetryExecutor::new(options.retry),
            metrics: options.metrics,
            tenant_locks: RwLock::new(HashMap::new()),
            index_state: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn max_documents_for_bm25(&self) -> usize {
        self.max_documents_for_bm25.load(Ordering::Relaxed)
    }

    /// 0 disables the ceiling.
    pub fn set_max_documents_for_bm25(&self, limit: usize) {
        self.max_documents_for_bm25.store(limit, Ordering::Relaxed);
    }

    pub fn retry_executor(&self) -> &RetryExecutor {
        &self.retry
    }

    pub fn metrics(&self) -> &Arc<dyn MetricsCollector> {
        &self.metrics
    }

    pub(crate) fn conn(&self) -> &dyn StorageConnection {
        self.backend.conn()
    }

    fn tenant_lock(&self, tenant: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.tenant_locks.read().unwrap_or_else(PoisonError::into_inner).get(tenant) {
            return lock.clone();
        }
        let mut locks = self.tenant_locks.write().unwrap_or_else(PoisonError::into_inner);
        locks.entry(tenant.to_string()).or_default().clone()
    }

    /// Serialize writers of one tenant. Waiting is abandoned on cancel.
    pub(crate) async fn lock_tenant(&self, cancel: &CancellationToken, tenant: &str) -> Result<OwnedMutexGuard<()>> {
        let lock = self.tenant_lock(tenant);
        tokio::select! {
            () = cancel.cancelled() => Err(Error::Cancelled),
            guard = lock.lock_owned() => Ok(guard),
        }
    }

    /// `None` when the tenant has no table yet.
    pub(crate) async fn open_tenant_table(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
    ) -> Result<Option<Arc<dyn StorageTable>>> {
        let name = table_name(tenant);
        let conn = self.conn();
        let name_ref = name.as_str();
        match self.retry.run(cancel, "open_table", move || conn.open_table(name_ref)).await {
            Ok(table) => Ok(Some(table)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub(crate) async fn require_tenant_table(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
    ) -> Result<Arc<dyn StorageTable>> {
        self.open_tenant_table(cancel, tenant)
            .await?
            .ok_or_else(|| Error::NotFound(format!("tenant {tenant} has no documents")))
    }

    pub(crate) async fn get_or_create_table(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
    ) -> Result<Arc<dyn StorageTable>> {
        if let Some(table) = self.open_tenant_table(cancel, tenant).await? {
            return Ok(table);
        }
        let name = table_name(tenant);
        let schema = TableSchema { embedding_dim: self.embedding_dim };
        let conn = self.conn();
        let (name_ref, schema_ref) = (name.as_str(), &schema);
        let table = self.retry.run(cancel, "create_table", move || conn.create_table(name_ref, schema_ref)).await?;
        info!(tenant, table = %name, dim = self.embedding_dim, "created tenant table");
        Ok(table)
    }

    /// Build the tenant's vector index once.
    ///
    /// The flag is read under the shared lock first and re-checked under the
    /// exclusive lock, so concurrent first writers trigger a single build.
    /// The exclusive lock is store-wide and held for the whole build: a first
    /// build for one tenant makes other tenants' `ensure_index` calls wait.
    pub async fn ensure_index(&self, cancel: &CancellationToken, tenant: &str) -> Result<()> {
        validate_tenant_id(tenant)?;
        {
            let state = self.index_state.read().await;
            if state.get(tenant).is_some_and(|s| s.created) {
                return Ok(());
            }
        }

        let mut state = self.index_state.write().await;
        if state.get(tenant).is_some_and(|s| s.created) {
            return Ok(());
        }
        let config = state
            .get(tenant)
            .and_then(|s| s.config.clone())
            .unwrap_or_else(|| self.default_index.clone());

        let table = self.require_tenant_table(cancel, tenant).await?;
        let (table_ref, config_ref) = (&table, &config);
        self.retry
            .run(cancel, "create_index", move || table_ref.create_index(Column::Embedding, config_ref))
            .await?;
        info!(tenant, index_type = ?config.index_type, metric = ?config.metric, "vector index created");

        state.entry(tenant.to_string()).or_default().created = true;
        Ok(())
    }

    /// Set the index configuration used by the tenant's first index build.
    pub async fn set_index_config(&self, tenant: &str, config: IndexConfig) -> Result<()> {
        validate_tenant_id(tenant)?;
        let mut state = self.index_state.write().await;
        let entry = state.entry(tenant.to_string()).or_default();
        if entry.created {
            return Err(Error::validation(format!(
                "index already created for tenant {tenant}; use rebuild_index to change it"
            )));
        }
        entry.config = Some(config);
        Ok(())
    }

    pub async fn get_index_config(&self, tenant: &str) -> IndexConfig {
        let state = self.index_state.read().await;
        state
            .get(tenant)
            .and_then(|s| s.config.clone())
            .unwrap_or_else(|| self.default_index.clone())
    }

    pub async fn is_index_created(&self, tenant: &str) -> bool {
        let state = self.index_state.read().await;
        state.get(tenant).is_some_and(|s| s.created)
    }

    /// Drop the created flag and build the index again, optionally with a new
    /// configuration.
    pub async fn rebuild_index(
        &self,
        cancel: &CancellationToken,
        tenant: &str,
        config: Option<IndexConfig>,
    ) -> Result<()> {
        validate_tenant_id(tenant)?;
        let _guard = self.lock_tenant(cancel, tenant).await?;
        self.require_tenant_table(cancel, tenant).await?;
        {
            let mut state = self.index_state.write().await;
            let entry = state.entry(tenant.to_string()).or_default();
            entry.created = false;
            if let Some(config) = config {
                entry.config = Some(config);
            }
        }
        self.ensure_index(cancel, tenant).await
    }

    pub(crate) async fn reset_index_flag(&self, tenant: &str) {
        let mut state = self.index_state.write().await;
        if let Some(entry) = state.get_mut(tenant) {
            entry.created = false;
        }
    }

    pub async fn table_exists(&self, cancel: &CancellationToken, tenant: &str) -> Result<bool> {
        validate_tenant_id(tenant)?;
        let name = table_name(tenant);
        Ok(self.table_names(cancel).await?.contains(&name))
    }

    /// Tenants that currently own a table.
    pub async fn list_tenants(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let mut tenants: Vec<String> = self
            .table_names(cancel)
            .await?
            .into_iter()
            .filter_map(|name| name.strip_prefix(TABLE_PREFIX).map(str::to_string))
            .collect();
        tenants.sort();
        Ok(tenants)
    }

    async fn table_names(&self, cancel: &CancellationToken) -> Result<Vec<String>> {
        let conn = self.conn();
        self.retry.run(cancel, "table_names", move || conn.table_names()).await
    }

    pub async fn count_documents(&self, cancel: &CancellationToken, tenant: &str) -> Result<usize> {
        validate_tenant_id(tenant)?;
        let Some(table) = self.open_tenant_table(cancel, tenant).await? else {
            return Ok(0);
        };
        let table_ref = &table;
        let count = self.retry.run(cancel, "count_rows", move || table_ref.count_rows(None)).await?;
        self.metrics.record_document_count(tenant, count);
        Ok(count)
    }

    pub async fn health_check(&self, cancel: &CancellationToken) -> Result<()> {
        self.table_names(cancel).await.map(|_| ())
    }

    /// Never fails; problems are reported in [`HealthStatus::error`].
    pub async fn health_check_with_details(&self, cancel: &CancellationToken) -> HealthStatus {
        let mut status = HealthStatus { database_uri: self.uri.clone(), ..HealthStatus::default() };
        let tenants = match self.list_tenants(cancel).await {
            Ok(tenants) => tenants,
            Err(e) => {
                warn!(error = %e, "health check failed");
                status.error = Some(e.to_string());
                return status;
            }
        };
        status.tables_count = tenants.len();
        for tenant in tenants.iter().take(HEALTH_SAMPLE_TENANTS) {
            match self.count_documents(cancel, tenant).await {
                Ok(count) => {
                    status.tenant_document_counts.insert(tenant.clone(), count);
                }
                Err(e) => {
                    status.error = Some(format!("tenant {tenant}: {e}"));
                    return status;
                }
            }
        }
        status.healthy = true;
        status
    }

    /// Release the connection. Pooled connections go back to their pool.
    pub async fn close(self) -> Result<()> {
        match self.backend {
            Backend::Direct(conn) => conn.close().await,
            Backend::Pooled(conn) => {
                drop(conn);
                Ok(())
            }
        }
    }
}

pub fn table_name(tenant: &str) -> String {
    format!("{TABLE_PREFIX}{tenant}")
}

/// Tenant ids become part of a table name: non-empty, at most 100 characters
/// of `[A-Za-z0-9_-]`.
pub fn validate_tenant_id(tenant: &str) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidTenant { id: tenant.to_string(), reason: reason.to_string() };
    if tenant.is_empty() {
        return Err(invalid("tenant id cannot be empty"));
    }
    if tenant.chars().count() > MAX_TENANT_ID_LEN {
        return Err(invalid("tenant id too long"));
    }
    if !tenant.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(invalid("only letters, digits, '_' and '-' are allowed"));
    }
    Ok(())
}
