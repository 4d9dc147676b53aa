//! Bounded exponential backoff around fallible async operations.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt + 1`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
        let nanos = (self.initial_delay.as_nanos() as f64 * factor).round();
        let cap = self.max_delay.as_nanos() as f64;
        if !nanos.is_finite() || nanos >= cap {
            self.max_delay
        } else {
            Duration::from_nanos(nanos as u64)
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// Runs operations with retries. Counts the retries it performed.
#[derive(Debug, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
    retries: AtomicU64,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, retries: AtomicU64::new(0) }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Total retries performed by this executor so far.
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, operation: &str, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.config.max_attempts.max(1);
        let mut last_err = None;
        for attempt in 0..attempts {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            match f().await {
                Ok(v) => {
                    if attempt > 0 {
                        debug!(operation, attempt, "operation succeeded after retry");
                    }
                    return Ok(v);
                }
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    if attempt + 1 < attempts {
                        let delay = self.config.delay_for(attempt);
                        warn!(operation, attempt = attempt + 1, ?delay, error = %err, "retrying after failure");
                        self.retries.fetch_add(1, Ordering::Relaxed);
                        tokio::select! {
                            () = cancel.cancelled() => return Err(Error::Cancelled),
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                    last_err = Some(err);
                }
            }
        }
        let source = last_err.unwrap_or_else(|| Error::Validation(format!("{operation}: no attempt made")));
        Err(Error::RetriesExhausted { attempts, source: Box::new(source) })
    }
}
