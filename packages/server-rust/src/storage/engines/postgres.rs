//! `PostgreSQL` store built on `sqlx`.
//!
//! Statements are generated from each kind's `FieldDef` slice, so adding a
//! resource kind needs no SQL here. Table names are the kind's plural name.

use async_trait::async_trait;
use catalog_core::{ColumnValue, FieldDef, FieldType, ResourceFields, ResourceKind};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, Row, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::storage::outbox::{NewOutboxEntry, OutboxEntry, OutboxStatus};
use crate::storage::StoreError;
use crate::traits::{OutboxStore, ResourceStore, StoreTransaction};

const OUTBOX_COLUMNS: &str = "id, message_id, resource_kind, correlation_key, topic, payload, \
     status, attempts, created_at, last_attempt_at, delivered_at";

const OUTBOX_DDL: &str = "CREATE TABLE IF NOT EXISTS outbox (
    id BIGSERIAL PRIMARY KEY,
    message_id TEXT NOT NULL UNIQUE,
    resource_kind TEXT NOT NULL,
    correlation_key BIGINT NOT NULL,
    topic TEXT NOT NULL,
    payload BYTEA NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    attempts INTEGER NOT NULL DEFAULT 0,
    created_at BIGINT NOT NULL,
    last_attempt_at BIGINT,
    delivered_at BIGINT
)";

const OUTBOX_PENDING_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS outbox_pending_idx ON outbox (status, created_at)";

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// `PostgreSQL`-backed [`ResourceStore`] and [`OutboxStore`].
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects a pool to `url`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the pool cannot connect.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates the resource tables and the outbox table if they are missing.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if a DDL statement fails.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for kind in ResourceKind::ALL {
            sqlx::query(&table_ddl(kind)).execute(&self.pool).await?;
        }
        sqlx::query(OUTBOX_DDL).execute(&self.pool).await?;
        sqlx::query(OUTBOX_PENDING_INDEX).execute(&self.pool).await?;
        info!("postgres schema ready");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// SQL generation
// ---------------------------------------------------------------------------

fn column_list(fields: &[FieldDef]) -> String {
    fields.iter().map(|f| f.name).collect::<Vec<_>>().join(", ")
}

fn table_ddl(kind: ResourceKind) -> String {
    let columns = kind
        .fields()
        .iter()
        .map(FieldDef::column_ddl)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE TABLE IF NOT EXISTS {} (id BIGSERIAL PRIMARY KEY, {columns})",
        kind.as_str()
    )
}

fn insert_sql(kind: ResourceKind) -> String {
    let fields = kind.fields();
    let placeholders = (1..=fields.len())
        .map(|i| format!("${i}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({placeholders}) RETURNING id",
        kind.as_str(),
        column_list(fields)
    )
}

fn select_sql(kind: ResourceKind) -> String {
    format!(
        "SELECT {} FROM {} WHERE id = $1",
        column_list(kind.fields()),
        kind.as_str()
    )
}

fn update_sql(kind: ResourceKind) -> String {
    let fields = kind.fields();
    let assignments = fields
        .iter()
        .enumerate()
        .map(|(i, f)| format!("{} = ${}", f.name, i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "UPDATE {} SET {assignments} WHERE id = ${}",
        kind.as_str(),
        fields.len() + 1
    )
}

fn delete_sql(kind: ResourceKind) -> String {
    format!("DELETE FROM {} WHERE id = $1", kind.as_str())
}

// ---------------------------------------------------------------------------
// Binding and decoding
// ---------------------------------------------------------------------------

fn bind_column(query: PgQuery<'_>, value: ColumnValue) -> PgQuery<'_> {
    match value {
        ColumnValue::Null(FieldType::Text) => query.bind(None::<String>),
        ColumnValue::Null(FieldType::Int) => query.bind(None::<i32>),
        ColumnValue::Null(FieldType::Float) => query.bind(None::<f64>),
        ColumnValue::Null(FieldType::Bool) => query.bind(None::<bool>),
        ColumnValue::Null(FieldType::TextList) => query.bind(None::<Vec<String>>),
        ColumnValue::Text(v) => query.bind(v),
        ColumnValue::Int(v) => query.bind(v),
        ColumnValue::Float(v) => query.bind(v),
        ColumnValue::Bool(v) => query.bind(v),
        ColumnValue::TextList(v) => query.bind(v),
    }
}

fn bind_fields<'q>(mut query: PgQuery<'q>, fields: &ResourceFields) -> PgQuery<'q> {
    for value in fields.to_columns() {
        query = bind_column(query, value);
    }
    query
}

fn read_column(row: &PgRow, index: usize, def: &FieldDef) -> Result<ColumnValue, StoreError> {
    let value = match def.ty {
        FieldType::Text => row
            .try_get::<Option<String>, _>(index)?
            .map(ColumnValue::Text),
        FieldType::Int => row.try_get::<Option<i32>, _>(index)?.map(ColumnValue::Int),
        FieldType::Float => row
            .try_get::<Option<f64>, _>(index)?
            .map(ColumnValue::Float),
        FieldType::Bool => row
            .try_get::<Option<bool>, _>(index)?
            .map(ColumnValue::Bool),
        FieldType::TextList => row
            .try_get::<Option<Vec<String>>, _>(index)?
            .map(ColumnValue::TextList),
    };
    Ok(value.unwrap_or(ColumnValue::Null(def.ty)))
}

fn fields_from_row(kind: ResourceKind, row: &PgRow) -> Result<ResourceFields, StoreError> {
    let values = kind
        .fields()
        .iter()
        .enumerate()
        .map(|(i, def)| read_column(row, i, def))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(kind.fields_from_columns(values)?)
}

fn outbox_from_row(row: &PgRow) -> Result<OutboxEntry, StoreError> {
    let message_id: String = row.try_get("message_id")?;
    let kind: String = row.try_get("resource_kind")?;
    let status: String = row.try_get("status")?;
    let attempts: i32 = row.try_get("attempts")?;
    Ok(OutboxEntry {
        id: from_pg_id(row.try_get("id")?)?,
        message_id: Uuid::parse_str(&message_id)
            .map_err(|e| StoreError::Malformed(format!("outbox message_id: {e}")))?,
        kind: kind.parse()?,
        correlation_key: from_pg_id(row.try_get("correlation_key")?)?,
        topic: row.try_get("topic")?,
        payload: row.try_get("payload")?,
        status: status.parse().map_err(StoreError::Malformed)?,
        attempts: u32::try_from(attempts).unwrap_or(0),
        created_at: row.try_get("created_at")?,
        last_attempt_at: row.try_get("last_attempt_at")?,
        delivered_at: row.try_get("delivered_at")?,
    })
}

fn to_pg_id(id: u64) -> Result<i64, StoreError> {
    i64::try_from(id).map_err(|_| StoreError::Malformed(format!("identifier {id} out of range")))
}

fn from_pg_id(id: i64) -> Result<u64, StoreError> {
    u64::try_from(id).map_err(|_| StoreError::Malformed(format!("negative identifier {id}")))
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

struct PgTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgTransaction {
    async fn insert_resource(&mut self, fields: &ResourceFields) -> Result<u64, StoreError> {
        let sql = insert_sql(fields.kind());
        let row = bind_fields(sqlx::query(&sql), fields)
            .fetch_one(&mut *self.tx)
            .await?;
        from_pg_id(row.try_get(0)?)
    }

    async fn enqueue_outbox(&mut self, entry: NewOutboxEntry) -> Result<OutboxEntry, StoreError> {
        let row = sqlx::query(
            "INSERT INTO outbox (message_id, resource_kind, correlation_key, topic, payload, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(entry.message_id.to_string())
        .bind(entry.kind.as_str())
        .bind(to_pg_id(entry.correlation_key)?)
        .bind(&entry.topic)
        .bind(&entry.payload)
        .bind(entry.created_at)
        .fetch_one(&mut *self.tx)
        .await?;
        let id = from_pg_id(row.try_get(0)?)?;
        Ok(OutboxEntry::pending(id, entry))
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ResourceStore / OutboxStore
// ---------------------------------------------------------------------------

#[async_trait]
impl ResourceStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn insert(&self, fields: &ResourceFields) -> Result<u64, StoreError> {
        let sql = insert_sql(fields.kind());
        let row = bind_fields(sqlx::query(&sql), fields)
            .fetch_one(&self.pool)
            .await?;
        from_pg_id(row.try_get(0)?)
    }

    async fn fetch(
        &self,
        kind: ResourceKind,
        id: u64,
    ) -> Result<Option<ResourceFields>, StoreError> {
        let sql = select_sql(kind);
        let row = sqlx::query(&sql)
            .bind(to_pg_id(id)?)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| fields_from_row(kind, &r)).transpose()
    }

    async fn replace(&self, id: u64, fields: &ResourceFields) -> Result<bool, StoreError> {
        let sql = update_sql(fields.kind());
        let result = bind_fields(sqlx::query(&sql), fields)
            .bind(to_pg_id(id)?)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove(&self, kind: ResourceKind, id: u64) -> Result<bool, StoreError> {
        let sql = delete_sql(kind);
        let result = sqlx::query(&sql)
            .bind(to_pg_id(id)?)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        self.ensure_schema().await?;
        Ok(())
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PgStore {
    async fn outbox_entry(&self, outbox_id: u64) -> Result<Option<OutboxEntry>, StoreError> {
        let sql = format!("SELECT {OUTBOX_COLUMNS} FROM outbox WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(to_pg_id(outbox_id)?)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(outbox_from_row).transpose()
    }

    async fn record_attempt(&self, outbox_id: u64, now_ms: i64) -> Result<u32, StoreError> {
        let row = sqlx::query(
            "UPDATE outbox SET attempts = attempts + 1, last_attempt_at = $2 \
             WHERE id = $1 RETURNING attempts",
        )
        .bind(to_pg_id(outbox_id)?)
        .bind(now_ms)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::OutboxEntryMissing(outbox_id))?;
        let attempts: i32 = row.try_get(0)?;
        Ok(u32::try_from(attempts).unwrap_or(0))
    }

    async fn mark_delivered(&self, outbox_id: u64, now_ms: i64) -> Result<bool, StoreError> {
        let id = to_pg_id(outbox_id)?;
        let result = sqlx::query(
            "UPDATE outbox SET status = $3, delivered_at = $2 WHERE id = $1 AND status = $4",
        )
        .bind(id)
        .bind(now_ms)
        .bind(OutboxStatus::Delivered.as_str())
        .bind(OutboxStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }
        let exists = sqlx::query("SELECT 1 FROM outbox WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .is_some();
        if exists {
            Ok(false)
        } else {
            Err(StoreError::OutboxEntryMissing(outbox_id))
        }
    }

    async fn pending_before(
        &self,
        cutoff_ms: i64,
        max_attempts: u32,
        limit: usize,
    ) -> Result<Vec<OutboxEntry>, StoreError> {
        let sql = format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox \
             WHERE status = $1 AND created_at <= $2 AND attempts < $3 ORDER BY id LIMIT $4"
        );
        let rows = sqlx::query(&sql)
            .bind(OutboxStatus::Pending.as_str())
            .bind(cutoff_ms)
            .bind(i32::try_from(max_attempts).unwrap_or(i32::MAX))
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(outbox_from_row).collect()
    }

    async fn pending_count(&self) -> Result<u64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) FROM outbox WHERE status = $1")
            .bind(OutboxStatus::Pending.as_str())
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get(0)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_statements_follow_field_order() {
        assert_eq!(
            insert_sql(ResourceKind::Users),
            "INSERT INTO users (name, email, password, activated, roles) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id"
        );
        assert_eq!(
            update_sql(ResourceKind::Users),
            "UPDATE users SET name = $1, email = $2, password = $3, activated = $4, roles = $5 \
             WHERE id = $6"
        );
        assert_eq!(
            select_sql(ResourceKind::Comics),
            "SELECT title, author, year, language, price, quantity, publisher \
             FROM comics WHERE id = $1"
        );
        assert_eq!(delete_sql(ResourceKind::Books), "DELETE FROM books WHERE id = $1");
    }

    #[test]
    fn table_ddl_declares_nullability() {
        let ddl = table_ddl(ResourceKind::Comics);
        assert!(ddl.starts_with("CREATE TABLE IF NOT EXISTS comics (id BIGSERIAL PRIMARY KEY"));
        assert!(ddl.contains("title TEXT NOT NULL"));
        assert!(ddl.contains("publisher TEXT)"));
    }

    #[test]
    fn identifiers_outside_bigint_are_rejected() {
        assert!(to_pg_id(u64::MAX).is_err());
        assert!(from_pg_id(-1).is_err());
        assert_eq!(to_pg_id(42).unwrap(), 42);
    }
}
