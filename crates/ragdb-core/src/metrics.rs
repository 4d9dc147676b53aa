use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

pub trait MetricsCollector: Send + Sync {
    fn record_operation(&self, operation: &str, duration: Duration, success: bool);
    fn record_document_count(&self, tenant: &str, count: usize);
    fn record_search_results(&self, tenant: &str, count: usize);
    fn record_error(&self, operation: &str, error: &str);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsCollector for NoopMetrics {
    fn record_operation(&self, _: &str, _: Duration, _: bool) {}
    fn record_document_count(&self, _: &str, _: usize) {}
    fn record_search_results(&self, _: &str, _: usize) {}
    fn record_error(&self, _: &str, _: &str) {}
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OperationStats {
    pub count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub total_duration: Duration,
}

impl OperationStats {
    pub fn average_duration(&self) -> Duration {
        match u32::try_from(self.count) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.total_duration / n,
        }
    }
}

#[derive(Default)]
struct Counters {
    operations: HashMap<String, OperationStats>,
    document_counts: HashMap<String, usize>,
    search_results: HashMap<String, usize>,
    errors: HashMap<String, Vec<String>>,
}

/// Keeps every measurement in memory. Suitable for tests and small deployments.
#[derive(Default)]
pub struct InMemoryMetrics {
    inner: Mutex<Counters>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operation(&self, name: &str) -> OperationStats {
        self.lock().operations.get(name).cloned().unwrap_or_default()
    }

    pub fn document_count(&self, tenant: &str) -> Option<usize> {
        self.lock().document_counts.get(tenant).copied()
    }

    pub fn search_results(&self, tenant: &str) -> usize {
        self.lock().search_results.get(tenant).copied().unwrap_or(0)
    }

    pub fn errors(&self, operation: &str) -> Vec<String> {
        self.lock().errors.get(operation).cloned().unwrap_or_default()
    }

    pub fn reset(&self) {
        *self.lock() = Counters::default();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MetricsCollector for InMemoryMetrics {
    fn record_operation(&self, operation: &str, duration: Duration, success: bool) {
        let mut c = self.lock();
        let stats = c.operations.entry(operation.to_string()).or_default();
        stats.count += 1;
        stats.total_duration += duration;
        if success {
            stats.success_count += 1;
        } else {
            stats.error_count += 1;
        }
    }

    fn record_document_count(&self, tenant: &str, count: usize) {
        self.lock().document_counts.insert(tenant.to_string(), count);
    }

    fn record_search_results(&self, tenant: &str, count: usize) {
        *self.lock().search_results.entry(tenant.to_string()).or_default() += count;
    }

    fn record_error(&self, operation: &str, error: &str) {
        self.lock().errors.entry(operation.to_string()).or_default().push(error.to_string());
    }
}

/// Measures one operation; call [`OperationTimer::finish`] with the outcome.
pub struct OperationTimer {
    metrics: Arc<dyn MetricsCollector>,
    operation: &'static str,
    started: Instant,
}

impl OperationTimer {
    pub fn start(metrics: Arc<dyn MetricsCollector>, operation: &'static str) -> Self {
        Self { metrics, operation, started: Instant::now() }
    }

    pub fn finish<T, E: std::fmt::Display>(self, result: &Result<T, E>) {
        let elapsed = self.started.elapsed();
        match result {
            Ok(_) => self.metrics.record_operation(self.operation, elapsed, true),
            Err(e) => {
                self.metrics.record_operation(self.operation, elapsed, false);
                self.metrics.record_error(self.operation, &e.to_string());
            }
        }
    }
}
