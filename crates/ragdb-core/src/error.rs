use thiserror::Error;

/// Substrings that mark a storage failure as permanent even when it arrives
/// untyped from the storage engine.
pub const NON_RETRYABLE_PATTERNS: &[&str] = &[
    "dimension mismatch",
    "invalid",
    "cannot be empty",
    "too long",
    "parse",
    "encode",
    "decode",
];

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid tenant id {id:?}: {reason}")]
    InvalidTenant { id: String, reason: String },

    #[error("embedding dimension mismatch for {context}: expected {expected}, got {actual}")]
    DimensionMismatch { context: String, expected: usize, actual: usize },

    #[error("{0}")]
    Validation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("storage operation '{operation}' failed: {message}")]
    Storage { operation: String, message: String },

    #[error(
        "document count ({count}) exceeds BM25 limit ({limit}); use vector-only search or raise the BM25 document limit"
    )]
    Bm25LimitExceeded { count: usize, limit: usize },

    #[error("connection pool is closed")]
    PoolClosed,

    #[error("connection pool is full")]
    PoolFull,

    #[error("operation cancelled")]
    Cancelled,

    #[error("failed to add batch [{start}:{end}]: {source}")]
    BatchFailed {
        start: usize,
        end: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("max retry attempts ({attempts}) exceeded: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("failed to encode or decode metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("embedding provider failed: {0}")]
    Embedding(String),

    #[error("backup error: {0}")]
    Backup(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn storage(operation: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Error::Storage { operation: operation.into(), message: err.to_string() }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Whether a retry could plausibly succeed.
    ///
    /// Typed validation and resource errors are permanent. Storage errors are
    /// transient unless their message matches one of [`NON_RETRYABLE_PATTERNS`].
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Storage { message, .. } | Error::Embedding(message) => {
                let lower = message.to_lowercase();
                !NON_RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p))
            }
            Error::Io(_) => true,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_are_retryable_unless_permanent() {
        assert!(Error::storage("add", "connection reset by peer").is_retryable());
        assert!(!Error::storage("query", "failed to Parse filter").is_retryable());
        assert!(!Error::storage("add", "vector dimension mismatch").is_retryable());
    }

    #[test]
    fn typed_errors_are_never_retryable() {
        assert!(!Error::validation("document id cannot be empty").is_retryable());
        assert!(!Error::Bm25LimitExceeded { count: 3, limit: 2 }.is_retryable());
        assert!(!Error::PoolClosed.is_retryable());
        assert!(!Error::Cancelled.is_retryable());
    }
}
