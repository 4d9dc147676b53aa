//! In-process storage engine.
//!
//! Tables live in memory and are shared by every connection to the same URI,
//! nearest-neighbour queries are exact brute-force scans, and index builds
//! only record their configuration. The engine keeps call counters and can
//! inject failures, which makes it the storage double for the store's tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use ragdb_core::filter::Predicate;
use ragdb_core::traits::{StorageConnection, StorageEngine, StorageTable};
use ragdb_core::types::{AddMode, Column, DistanceMetric, IndexConfig, StoredRow, TableQuery, TableSchema};
use ragdb_core::{Error, Result};

/// Call counters shared by every connection of one engine.
#[derive(Debug, Default)]
pub struct EngineStats {
    connects: AtomicUsize,
    close_calls: AtomicUsize,
    tables_created: AtomicUsize,
    add_calls: AtomicUsize,
    rows_written: AtomicUsize,
    delete_calls: AtomicUsize,
    query_calls: AtomicUsize,
    index_builds: AtomicUsize,
}

impl EngineStats {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }
    pub fn tables_created(&self) -> usize {
        self.tables_created.load(Ordering::SeqCst)
    }
    /// Write calls, including ones that failed by injection.
    pub fn add_calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }
    pub fn rows_written(&self) -> usize {
        self.rows_written.load(Ordering::SeqCst)
    }
    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }
    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }
    pub fn index_builds(&self) -> usize {
        self.index_builds.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct Faults {
    failing_adds: AtomicUsize,
    /// Add call number (1-based) from which every add fails.
    fail_adds_from: Mutex<Option<usize>>,
    failing_deletes: AtomicUsize,
    connect_budget: Mutex<Option<usize>>,
    index_build_delay: Mutex<Duration>,
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok()
}

#[derive(Debug, Default)]
struct EngineInner {
    databases: Mutex<HashMap<String, Arc<Database>>>,
    stats: EngineStats,
    faults: Faults,
}

#[derive(Debug, Default)]
struct Database {
    tables: RwLock<HashMap<String, Arc<MemoryTable>>>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryEngine {
    inner: Arc<EngineInner>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &EngineStats {
        &self.inner.stats
    }

    /// The next `n` add calls fail with a transient storage error.
    pub fn fail_next_adds(&self, n: usize) {
        self.inner.faults.failing_adds.store(n, Ordering::SeqCst);
    }

    /// Every add call from the `nth` one onwards (counting from 1) fails.
    pub fn fail_adds_from(&self, nth: usize) {
        *self.inner.faults.fail_adds_from.lock().unwrap_or_else(PoisonError::into_inner) = Some(nth);
    }

    pub fn fail_next_deletes(&self, n: usize) {
        self.inner.faults.failing_deletes.store(n, Ordering::SeqCst);
    }

    /// Allow `n` more successful connects; later ones fail.
    pub fn limit_connects(&self, n: usize) {
        *self.inner.faults.connect_budget.lock().unwrap_or_else(PoisonError::into_inner) = Some(n);
    }

    /// Slow down index builds to widen race windows in tests.
    pub fn set_index_build_delay(&self, delay: Duration) {
        *self.inner.faults.index_build_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Index configuration recorded for a table, if one was built.
    pub fn index_of(&self, uri: &str, table: &str) -> Option<IndexConfig> {
        let dbs = self.inner.databases.lock().unwrap_or_else(PoisonError::into_inner);
        let db = dbs.get(uri)?;
        let tables = db.tables.read().unwrap_or_else(PoisonError::into_inner);
        let t = tables.get(table)?;
        let config = t.index.lock().unwrap_or_else(PoisonError::into_inner).clone();
        config
    }
}

#[async_trait]
impl StorageEngine for MemoryEngine {
    async fn connect(&self, uri: &str) -> Result<Arc<dyn StorageConnection>> {
        {
            let mut budget = self.inner.faults.connect_budget.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(left) = budget.as_mut() {
                if *left == 0 {
                    return Err(Error::storage("connect", format!("cannot reach {uri}")));
                }
                *left -= 1;
            }
        }
        let db = {
            let mut dbs = self.inner.databases.lock().unwrap_or_else(PoisonError::into_inner);
            dbs.entry(uri.to_string()).or_default().clone()
        };
        self.inner.stats.connects.fetch_add(1, Ordering::SeqCst);
        debug!(uri, "memory connection opened");
        let conn: Arc<dyn StorageConnection> =
            Arc::new(MemoryConnection { engine: self.inner.clone(), db, closed: AtomicBool::new(false) });
        Ok(conn)
    }
}

#[derive(Debug)]
pub struct MemoryConnection {
    engine: Arc<EngineInner>,
    db: Arc<Database>,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::storage(operation, "connection is closed"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StorageConnection for MemoryConnection {
    async fn table_names(&self) -> Result<Vec<String>> {
        self.ensure_open("table_names")?;
        let tables = self.db.tables.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = tables.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn create_table(&self, name: &str, schema: &TableSchema) -> Result<Arc<dyn StorageTable>> {
        self.ensure_open("create_table")?;
        let mut tables = self.db.tables.write().unwrap_or_else(PoisonError::into_inner);
        if tables.contains_key(name) {
            return Err(Error::storage("create_table", format!("table {name} already exists")));
        }
        let table = Arc::new(MemoryTable {
            name: name.to_string(),
            schema: *schema,
            rows: RwLock::new(Vec::new()),
            index: Mutex::new(None),
            engine: self.engine.clone(),
        });
        tables.insert(name.to_string(), table.clone());
        self.engine.stats.tables_created.fetch_add(1, Ordering::SeqCst);
        let handle: Arc<dyn StorageTable> = table;
        Ok(handle)
    }

    async fn open_table(&self, name: &str) -> Result<Arc<dyn StorageTable>> {
        self.ensure_open("open_table")?;
        let tables = self.db.tables.read().unwrap_or_else(PoisonError::into_inner);
        match tables.get(name) {
            Some(t) => {
                let handle: Arc<dyn StorageTable> = t.clone();
                Ok(handle)
            }
            None => Err(Error::NotFound(format!("table {name}"))),
        }
    }

    async fn close(&self) -> Result<()> {
        self.engine.stats.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(Error::storage("close", "connection already closed"));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemoryTable {
    name: String,
    schema: TableSchema,
    rows: RwLock<Vec<StoredRow>>,
    index: Mutex<Option<IndexConfig>>,
    engine: Arc<EngineInner>,
}

fn row_matches(row: &StoredRow, filter: Option<&Predicate>) -> bool {
    filter.map_or(true, |p| p.matches(&|c| row.column_str(c)))
}

fn project(mut row: StoredRow, query: &TableQuery) -> StoredRow {
    if !query.selects(Column::Id) {
        row.id.clear();
    }
    if !query.selects(Column::Text) {
        row.text.clear();
    }
    if !query.selects(Column::SourceName) {
        row.source_name.clear();
    }
    if !query.selects(Column::Embedding) {
        row.embedding.clear();
    }
    if !query.selects(Column::Metadata) {
        row.metadata.clear();
    }
    row
}

/// Distance between two vectors; lower is closer.
pub fn distance(metric: DistanceMetric, a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    match metric {
        DistanceMetric::Cosine => {
            let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
            let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
            if na == 0.0 || nb == 0.0 {
                1.0
            } else {
                1.0 - dot / (na * nb)
            }
        }
        DistanceMetric::L2 => a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum(),
        DistanceMetric::Dot => 1.0 - dot,
    }
}

#[async_trait]
impl StorageTable for MemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn schema(&self) -> Result<TableSchema> {
        Ok(self.schema)
    }

    async fn add(&self, rows: &[StoredRow], mode: AddMode) -> Result<()> {
        let faults = &self.engine.faults;
        let call = self.engine.stats.add_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if take_one(&faults.failing_adds) {
            return Err(Error::storage("add", "injected write failure"));
        }
        let from = *faults.fail_adds_from.lock().unwrap_or_else(PoisonError::into_inner);
        if from.is_some_and(|n| call >= n) {
            return Err(Error::storage("add", "injected write failure"));
        }
        if let Some(bad) = rows.iter().find(|r| r.embedding.len() != self.schema.embedding_dim) {
            return Err(Error::storage(
                "add",
                format!(
                    "dimension mismatch for row {}: expected {}, got {}",
                    bad.id,
                    self.schema.embedding_dim,
                    bad.embedding.len()
                ),
            ));
        }
        let mut stored = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        if mode == AddMode::Overwrite {
            stored.clear();
        }
        stored.extend(rows.iter().cloned().map(|mut r| {
            r.distance = None;
            r
        }));
        self.engine.stats.rows_written.fetch_add(rows.len(), Ordering::SeqCst);
        Ok(())
    }

    async fn query(&self, query: &TableQuery) -> Result<Vec<StoredRow>> {
        self.engine.stats.query_calls.fetch_add(1, Ordering::SeqCst);
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        let mut hits: Vec<StoredRow> =
            rows.iter().filter(|r| row_matches(r, query.filter.as_ref())).cloned().collect();
        drop(rows);

        if let Some(target) = &query.nearest_to {
            if target.len() != self.schema.embedding_dim {
                return Err(Error::storage(
                    "query",
                    format!(
                        "query vector dimension mismatch: expected {}, got {}",
                        self.schema.embedding_dim,
                        target.len()
                    ),
                ));
            }
            for row in &mut hits {
                row.distance = Some(distance(query.metric, target, &row.embedding));
            }
            hits.sort_by(|a, b| {
                a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal)
            });
        }

        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(hits.into_iter().skip(offset).take(limit).map(|r| project(r, query)).collect())
    }

    async fn delete(&self, predicate: &Predicate) -> Result<()> {
        self.engine.stats.delete_calls.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.engine.faults.failing_deletes) {
            return Err(Error::storage("delete", "injected delete failure"));
        }
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        rows.retain(|r| !row_matches(r, Some(predicate)));
        Ok(())
    }

    async fn create_index(&self, column: Column, config: &IndexConfig) -> Result<()> {
        if column != Column::Embedding {
            return Err(Error::storage("create_index", format!("invalid index column {}", column.as_str())));
        }
        self.engine.stats.index_builds.fetch_add(1, Ordering::SeqCst);
        let delay = *self.engine.faults.index_build_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut index = self.index.lock().unwrap_or_else(PoisonError::into_inner);
        if index.is_some() && !config.replace {
            return Err(Error::storage("create_index", format!("index already exists on {}", self.name)));
        }
        *index = Some(config.clone());
        Ok(())
    }

    async fn count_rows(&self, filter: Option<&Predicate>) -> Result<usize> {
        let rows = self.rows.read().unwrap_or_else(PoisonError::into_inner);
        Ok(rows.iter().filter(|r| row_matches(r, filter)).count())
    }
}
