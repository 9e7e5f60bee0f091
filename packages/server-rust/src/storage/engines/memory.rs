//! In-memory transactional store.
//!
//! Resource rows and outbox entries live behind a single `RwLock`, so a
//! commit publishes every buffered write at once. Identifiers come from
//! per-kind sequences that, like database sequences, are not reused after
//! a rollback.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use catalog_core::{ResourceFields, ResourceKind};
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::storage::outbox::{NewOutboxEntry, OutboxEntry, OutboxStatus};
use crate::storage::StoreError;
use crate::traits::{OutboxStore, ResourceStore, StoreTransaction};

#[derive(Default)]
struct Tables {
    rows: HashMap<(ResourceKind, u64), ResourceFields>,
    outbox: BTreeMap<u64, OutboxEntry>,
}

/// Switches that make the store fail on purpose.
#[derive(Debug, Default)]
struct Faults {
    unavailable: AtomicBool,
    fail_commit: AtomicBool,
    fail_mark_delivered: AtomicBool,
}

struct Inner {
    tables: RwLock<Tables>,
    sequences: DashMap<ResourceKind, u64>,
    next_outbox_id: AtomicU64,
    faults: Faults,
}

impl Inner {
    fn next_id(&self, kind: ResourceKind) -> u64 {
        let mut seq = self.sequences.entry(kind).or_insert(0);
        *seq += 1;
        *seq
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store marked unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

/// In-memory [`ResourceStore`] and [`OutboxStore`].
///
/// Cloning is cheap and every clone shares the same tables.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                tables: RwLock::new(Tables::default()),
                sequences: DashMap::new(),
                next_outbox_id: AtomicU64::new(1),
                faults: Faults::default(),
            }),
        }
    }

    /// Makes every call fail with `StoreError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes `commit` fail with `StoreError::Aborted`.
    pub fn fail_commits(&self, fail: bool) {
        self.inner.faults.fail_commit.store(fail, Ordering::SeqCst);
    }

    /// Makes `mark_delivered` fail with `StoreError::Unavailable`.
    pub fn fail_mark_delivered(&self, fail: bool) {
        self.inner
            .faults
            .fail_mark_delivered
            .store(fail, Ordering::SeqCst);
    }

    /// Number of committed rows of `kind`.
    #[must_use]
    pub fn row_count(&self, kind: ResourceKind) -> usize {
        self.inner
            .tables
            .read()
            .rows
            .keys()
            .filter(|(k, _)| *k == kind)
            .count()
    }

    /// Snapshot of every committed outbox entry, ordered by outbox id.
    #[must_use]
    pub fn outbox_entries(&self) -> Vec<OutboxEntry> {
        self.inner.tables.read().outbox.values().cloned().collect()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// Buffers writes until commit. Dropping it discards the buffer.
struct MemoryTransaction {
    inner: Arc<Inner>,
    rows: Vec<(u64, ResourceFields)>,
    outbox: Vec<OutboxEntry>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn insert_resource(&mut self, fields: &ResourceFields) -> Result<u64, StoreError> {
        self.inner.check_available()?;
        let id = self.inner.next_id(fields.kind());
        self.rows.push((id, fields.clone()));
        Ok(id)
    }

    async fn enqueue_outbox(&mut self, entry: NewOutboxEntry) -> Result<OutboxEntry, StoreError> {
        self.inner.check_available()?;
        let id = self.inner.next_outbox_id.fetch_add(1, Ordering::SeqCst);
        let entry = OutboxEntry::pending(id, entry);
        self.outbox.push(entry.clone());
        Ok(entry)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.inner.check_available()?;
        if self.inner.faults.fail_commit.load(Ordering::SeqCst) {
            return Err(StoreError::Aborted("injected commit failure".to_string()));
        }
        let MemoryTransaction { inner, rows, outbox } = *self;
        let mut tables = inner.tables.write();
        for (id, fields) in rows {
            tables.rows.insert((fields.kind(), id), fields);
        }
        for entry in outbox {
            tables.outbox.insert(entry.id, entry);
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ResourceStore / OutboxStore
// ---------------------------------------------------------------------------

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        self.inner.check_available()?;
        Ok(Box::new(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            rows: Vec::new(),
            outbox: Vec::new(),
        }))
    }

    async fn insert(&self, fields: &ResourceFields) -> Result<u64, StoreError> {
        self.inner.check_available()?;
        let id = self.inner.next_id(fields.kind());
        self.inner
            .tables
            .write()
            .rows
            .insert((fields.kind(), id), fields.clone());
        Ok(id)
    }

    async fn fetch(
        &self,
        kind: ResourceKind,
        id: u64,
    ) -> Result<Option<ResourceFields>, StoreError> {
        self.inner.check_available()?;
        Ok(self.inner.tables.read().rows.get(&(kind, id)).cloned())
    }

    async fn replace(&self, id: u64, fields: &ResourceFields) -> Result<bool, StoreError> {
        self.inner.check_available()?;
        let mut tables = self.inner.tables.write();
        match tables.rows.get_mut(&(fields.kind(), id)) {
            Some(row) => {
                *row = fields.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, kind: ResourceKind, id: u64) -> Result<bool, StoreError> {
        self.inner.check_available()?;
        Ok(self.inner.tables.write().rows.remove(&(kind, id)).is_some())
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn outbox_entry(&self, outbox_id: u64) -> Result<Option<OutboxEntry>, StoreError> {
        self.inner.check_available()?;
        Ok(self.inner.tables.read().outbox.get(&outbox_id).cloned())
    }

    async fn record_attempt(&self, outbox_id: u64, now_ms: i64) -> Result<u32, StoreError> {
        self.inner.check_available()?;
        let mut tables = self.inner.tables.write();
        let entry = tables
            .outbox
            .get_mut(&outbox_id)
            .ok_or(StoreError::OutboxEntryMissing(outbox_id))?;
        entry.attempts += 1;
        entry.last_attempt_at = Some(now_ms);
        Ok(entry.attempts)
    }

    async fn mark_delivered(&self, outbox_id: u64, now_ms: i64) -> Result<bool, StoreError> {
        self.inner.check_available()?;
        if self.inner.faults.fail_mark_delivered.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "injected mark_delivered failure".to_string(),
            ));
        }
        let mut tables = self.inner.tables.write();
        let entry = tables
            .outbox
            .get_mut(&outbox_id)
            .ok_or(StoreError::OutboxEntryMissing(outbox_id))?;
        if entry.status == OutboxStatus::Delivered {
            return Ok(false);
        }
        entry.status = OutboxStatus::Delivered;
        entry.delivered_at = Some(now_ms);
        Ok(true)
    }

    async fn pending_before(
        &self,
        cutoff_ms: i64,
        max_attempts: u32,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        self.inner.check_available()?;
        Ok(self
            .inner
            .tables
            .read()
            .outbox
            .values()
            .filter(|e| {
                e.status == OutboxStatus::Pending
                    && e.created_at <= cutoff_ms
                    && e.attempts < max_attempts
            })
            .take(limit)
            .cloned()
            .collect())
    }

    async fn pending_count(&self) -> Result<u64, StoreError> {
        self.inner.check_available()?;
        let count = self
            .inner
            .tables
            .read()
            .outbox
            .values()
            .filter(|e| e.status == OutboxStatus::Pending)
            .count();
        Ok(count as u64)
    }
}
