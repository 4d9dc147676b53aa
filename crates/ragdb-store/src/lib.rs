//! Tenant-scoped document storage.
//!
//! [`DocumentStore`] owns one table per tenant, validates documents before
//! they reach storage, writes them in batches under a per-tenant lock and
//! builds the vector index once per tenant.

mod ingest;
mod search;
mod store;

pub use search::{SearchOptions, SourceNamePage, DEFAULT_PAGE_SIZE, DEFAULT_SEARCH_LIMIT};
pub use store::{
    table_name, validate_tenant_id, DocumentStore, HealthStatus, StoreOptions, HEALTH_SAMPLE_TENANTS,
    MAX_TENANT_ID_LEN, TABLE_PREFIX,
};
