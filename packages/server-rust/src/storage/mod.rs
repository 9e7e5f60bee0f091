//! Storage adapters for resource rows and the transactional outbox.
//!
//! - [`engines::MemoryStore`]: in-memory transactional store with failure
//!   injection for tests
//! - `engines::PgStore` (`postgres` feature): `sqlx`-backed store whose
//!   statements are generated from each resource schema
//!
//! Both implement [`ResourceStore`](crate::traits::ResourceStore) and
//! [`OutboxStore`](crate::traits::OutboxStore), so a single backend holds the
//! resource rows and the outbox table inside the same durability unit.

pub mod engines;
pub mod outbox;

pub use engines::MemoryStore;
#[cfg(feature = "postgres")]
pub use engines::PgStore;
pub use outbox::{now_millis, NewOutboxEntry, OutboxEntry, OutboxStatus};

use catalog_core::SchemaError;

/// Errors surfaced by store adapters.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("transaction aborted: {0}")]
    Aborted(String),
    #[error("outbox entry {0} not found")]
    OutboxEntryMissing(u64),
    #[error("row does not match schema: {0}")]
    Schema(#[from] SchemaError),
    #[error("malformed stored value: {0}")]
    Malformed(String),
    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
