use async_trait::async_trait;
use catalog_core::{ResourceFields, ResourceKind};

use crate::publisher::PublishError;
use crate::storage::{NewOutboxEntry, OutboxEntry, StoreError};

/// Transactional relational store holding resource rows.
/// Implementations: in-memory (tests, development), `PostgreSQL` (`postgres` feature).
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Opens a durability unit. Dropping the transaction without calling
    /// `commit` rolls it back.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;

    /// Insert a row outside any explicit transaction and return its identifier.
    async fn insert(&self, fields: &ResourceFields) -> Result<u64, StoreError>;

    /// Load a single row, or `None` if the identifier is absent.
    async fn fetch(
        &self,
        kind: ResourceKind,
        id: u64,
    ) -> Result<Option<ResourceFields>, StoreError>;

    /// Replace every field of an existing row. Returns `false` if absent.
    async fn replace(&self, id: u64, fields: &ResourceFields) -> Result<bool, StoreError>;

    /// Delete a row. Returns `false` if absent.
    async fn remove(&self, kind: ResourceKind, id: u64) -> Result<bool, StoreError>;

    /// One-time initialization (e.g., create tables).
    async fn initialize(&self) -> anyhow::Result<()>;

    /// Release resources and close connections.
    async fn close(&self) -> anyhow::Result<()>;
}

/// A single open transaction against a [`ResourceStore`].
#[async_trait]
pub trait StoreTransaction: Send {
    /// Insert a resource row and return its generated identifier.
    async fn insert_resource(&mut self, fields: &ResourceFields) -> Result<u64, StoreError>;

    /// Queue an outbox entry in `pending` state.
    async fn enqueue_outbox(&mut self, entry: NewOutboxEntry) -> Result<OutboxEntry, StoreError>;

    /// Make every write of this transaction durable, all or nothing.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discard every write of this transaction.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Access to outbox entries after they have been committed.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Load an entry by its outbox identifier.
    async fn outbox_entry(&self, outbox_id: u64) -> Result<Option<OutboxEntry>, StoreError>;

    /// Count one more publish attempt. Returns the new attempt count.
    async fn record_attempt(&self, outbox_id: u64, now_ms: i64) -> Result<u32, StoreError>;

    /// Transition `pending -> delivered`. Returns `false` when the entry was
    /// already delivered, which is not an error.
    async fn mark_delivered(&self, outbox_id: u64, now_ms: i64) -> Result<bool, StoreError>;

    /// Pending entries created at or before `cutoff_ms` with fewer than
    /// `max_attempts` attempts, oldest first.
    async fn pending_before(
        &self,
        cutoff_ms: i64,
        max_attempts: u32,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, StoreError>;

    /// Number of entries still pending.
    async fn pending_count(&self) -> Result<u64, StoreError>;
}

/// Message channel used to notify downstream consumers.
/// Delivery is at-least-once; ordering is not guaranteed.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish `payload` to `topic`. `Ok` means the channel acknowledged it.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError>;
}
