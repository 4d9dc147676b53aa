//! Progress reporting for long batched operations.
//!
//! A [`ProgressTracker`] keeps atomic counters plus a guarded stage/message and
//! hands a [`Progress`] snapshot to an optional callback after every change.
//! [`progress_bar_callback`] adapts snapshots to an `indicatif` bar for CLIs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

pub type ProgressCallback = Arc<dyn Fn(&Progress) + Send + Sync>;

/// A point-in-time view of an operation's progress.
#[derive(Debug, Clone)]
pub struct Progress {
    pub stage: String,
    pub current: u64,
    pub total: u64,
    pub message: String,
    pub started_at: Instant,
    pub last_updated: Instant,
}

impl Progress {
    /// Completion in percent; 0 when the total is unknown.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.current as f64 / self.total as f64 * 100.0
    }

    /// Time since the operation started, measured now rather than at the
    /// last update.
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Linear extrapolation from the rate so far; zero until some progress exists.
    pub fn estimated_remaining(&self) -> Duration {
        if self.current == 0 || self.total == 0 || self.current >= self.total {
            return Duration::ZERO;
        }
        let per_unit = self.elapsed().as_secs_f64() / self.current as f64;
        Duration::from_secs_f64(per_unit * (self.total - self.current) as f64)
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.current >= self.total
    }
}

struct Labels {
    stage: String,
    message: String,
    last_updated: Instant,
}

pub struct ProgressTracker {
    current: AtomicU64,
    total: AtomicU64,
    labels: Mutex<Labels>,
    started_at: Instant,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    pub fn new(total: u64, callback: Option<ProgressCallback>) -> Self {
        let now = Instant::now();
        Self {
            current: AtomicU64::new(0),
            total: AtomicU64::new(total),
            labels: Mutex::new(Labels { stage: String::new(), message: String::new(), last_updated: now }),
            started_at: now,
            callback,
        }
    }

    pub fn add(&self, n: u64) {
        self.current.fetch_add(n, Ordering::SeqCst);
        self.touch_and_notify();
    }

    pub fn increment(&self) {
        self.add(1);
    }

    /// Raise `current` to `value`; never moves it backwards.
    pub fn advance_to(&self, value: u64) {
        self.current.fetch_max(value, Ordering::SeqCst);
        self.touch_and_notify();
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::SeqCst);
        self.touch_and_notify();
    }

    pub fn set_stage(&self, stage: &str) {
        self.update_labels(|l| l.stage = stage.to_string());
    }

    pub fn set_message(&self, message: &str) {
        self.update_labels(|l| l.message = message.to_string());
    }

    pub fn complete(&self) {
        self.current.store(self.total.load(Ordering::SeqCst), Ordering::SeqCst);
        self.update_labels(|l| l.stage = "complete".to_string());
    }

    pub fn snapshot(&self) -> Progress {
        let labels = self.labels.lock().unwrap_or_else(PoisonError::into_inner);
        Progress {
            stage: labels.stage.clone(),
            current: self.current.load(Ordering::SeqCst),
            total: self.total.load(Ordering::SeqCst),
            message: labels.message.clone(),
            started_at: self.started_at,
            last_updated: labels.last_updated,
        }
    }

    fn update_labels(&self, f: impl FnOnce(&mut Labels)) {
        {
            let mut labels = self.labels.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut labels);
            labels.last_updated = Instant::now();
        }
        self.notify();
    }

    fn touch_and_notify(&self) {
        self.update_labels(|_| {});
    }

    fn notify(&self) {
        if let Some(cb) = &self.callback {
            cb(&self.snapshot());
        }
    }
}

/// Drive an `indicatif` bar from progress snapshots.
pub fn progress_bar_callback(bar: ProgressBar) -> ProgressCallback {
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {prefix} {msg}")
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    Arc::new(move |p: &Progress| {
        bar.set_length(p.total);
        bar.set_position(p.current);
        bar.set_prefix(p.stage.clone());
        bar.set_message(p.message.clone());
        if p.stage == "complete" {
            bar.finish();
        }
    })
}
