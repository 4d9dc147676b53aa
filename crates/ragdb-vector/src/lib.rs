//! Storage-engine backends and connection pooling.
//!
//! - `memory`: in-process engine with exact search, used by tests and small deployments
//! - `lance` (feature `lance`): LanceDB tables over Arrow record batches
//! - `pool`: fixed-size connection pool with RAII checkout

pub mod memory;
pub mod pool;

#[cfg(feature = "lance")]
pub mod lance;

pub use memory::MemoryEngine;
pub use pool::{ConnectionPool, PooledConnection};
