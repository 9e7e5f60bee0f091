//! Outbox entry types shared by every store backend.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use catalog_core::ResourceKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Delivery state of an outbox entry. Transitions are one-way:
/// `Pending -> Delivered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Delivered,
}

impl OutboxStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "delivered" => Ok(Self::Delivered),
            other => Err(format!("unknown outbox status: {other}")),
        }
    }
}

/// An outbox entry about to be queued inside a store transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOutboxEntry {
    /// Stable identifier consumers use to drop duplicate deliveries.
    pub message_id: Uuid,
    pub kind: ResourceKind,
    /// Identifier of the created resource.
    pub correlation_key: u64,
    pub topic: String,
    pub payload: Vec<u8>,
    pub created_at: i64,
}

/// A committed outbox entry.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    /// Store-assigned outbox identifier.
    pub id: u64,
    pub message_id: Uuid,
    pub kind: ResourceKind,
    pub correlation_key: u64,
    pub topic: String,
    pub payload: Vec<u8>,
    pub status: OutboxStatus,
    pub attempts: u32,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub last_attempt_at: Option<i64>,
    pub delivered_at: Option<i64>,
}

impl OutboxEntry {
    /// Builds the committed form of a freshly queued entry.
    #[must_use]
    pub fn pending(id: u64, entry: NewOutboxEntry) -> Self {
        Self {
            id,
            message_id: entry.message_id,
            kind: entry.kind,
            correlation_key: entry.correlation_key,
            topic: entry.topic,
            payload: entry.payload,
            status: OutboxStatus::Pending,
            attempts: 0,
            created_at: entry.created_at,
            last_attempt_at: None,
            delivered_at: None,
        }
    }

    #[must_use]
    pub fn is_delivered(&self) -> bool {
        self.status == OutboxStatus::Delivered
    }
}

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}
