//! Shared building blocks for the tenant-scoped retrieval stack.
//!
//! Holds the domain types, the error type, the storage and embedding
//! collaborator traits, predicate building, retry/backoff, progress
//! reporting, metrics, chunking and the figment-based configuration loader.

pub mod chunking;
pub mod config;
pub mod error;
pub mod filter;
pub mod logging;
pub mod metrics;
pub mod progress;
pub mod retry;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use tokio_util::sync::CancellationToken;

/// Fail fast when the caller has already cancelled.
pub fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}
