//! Create-and-notify with a transactional outbox.
//!
//! A create writes the resource row and a `pending` outbox entry in one
//! store transaction. After commit, one publish attempt runs on its own
//! task; the relay retries whatever is still pending later on.
//!
//! A caller deadline bounds the transaction up to commit. Once the commit
//! has started the create is reported as successful, and the publish
//! attempt is only waited on for whatever time the caller has left.

use std::future::Future;
use std::sync::Arc;

use catalog_core::{Resource, ResourceFields, ResourceKind};
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::{NotificationConfig, OutboxConfig};
use crate::storage::{now_millis, NewOutboxEntry, OutboxEntry, StoreError};
use crate::traits::{EventPublisher, OutboxStore, ResourceStore, StoreTransaction};

/// Where the notification for a freshly created resource stands when the
/// create returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationStatus {
    /// The kind does not notify.
    Disabled,
    /// Queued; the relay will deliver it.
    Pending,
    /// Acknowledged by the publisher and marked delivered.
    Delivered,
}

impl NotificationStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Pending => "pending",
            Self::Delivered => "delivered",
        }
    }
}

/// Result of [`CreateNotifyCoordinator::create_and_notify`].
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedResource {
    pub resource: Resource,
    /// Outbox entry queued with the row, if the kind notifies.
    pub outbox_id: Option<u64>,
    pub notification: NotificationStatus,
}

/// Why a create did not happen.
#[derive(Debug, thiserror::Error)]
pub enum CreateError {
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The deadline passed before commit. Nothing was stored.
    #[error("deadline passed before the create committed")]
    DeadlineExceeded,
}

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Published and marked delivered.
    Delivered,
    /// Published, but the delivered mark did not stick. The relay will
    /// publish again.
    PublishedUnmarked,
    /// Publish failed or timed out.
    Failed,
    /// Publish failed on the last allowed attempt. The entry stays pending
    /// but the relay no longer picks it up.
    Exhausted,
}

/// JSON body of a creation notification.
#[derive(Debug, Serialize)]
struct NotificationPayload<'a> {
    event: &'static str,
    kind: ResourceKind,
    id: u64,
    message_id: &'a Uuid,
}

fn encode_payload(kind: ResourceKind, id: u64, message_id: &Uuid) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(&NotificationPayload {
        event: "created",
        kind,
        id,
        message_id,
    })
    .map_err(|e| StoreError::Aborted(format!("encode notification payload: {e}")))
}

/// Persists resources and drives their creation notifications.
pub struct CreateNotifyCoordinator {
    store: Arc<dyn ResourceStore>,
    outbox: Arc<dyn OutboxStore>,
    publisher: Arc<dyn EventPublisher>,
    notifications: NotificationConfig,
    config: OutboxConfig,
}

impl CreateNotifyCoordinator {
    #[must_use]
    pub fn new(
        store: Arc<dyn ResourceStore>,
        outbox: Arc<dyn OutboxStore>,
        publisher: Arc<dyn EventPublisher>,
        notifications: NotificationConfig,
        config: OutboxConfig,
    ) -> Self {
        Self {
            store,
            outbox,
            publisher,
            notifications,
            config,
        }
    }

    /// Whether creates of `kind` queue a notification.
    #[must_use]
    pub fn notifies(&self, kind: ResourceKind) -> bool {
        self.notifications.topic_for(kind).is_some()
    }

    #[must_use]
    pub fn outbox(&self) -> Arc<dyn OutboxStore> {
        Arc::clone(&self.outbox)
    }

    #[must_use]
    pub fn publisher(&self) -> Arc<dyn EventPublisher> {
        Arc::clone(&self.publisher)
    }

    #[must_use]
    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    /// Stores `fields` and, when the kind notifies, queues and attempts its
    /// notification, waiting as long as the publish attempt takes.
    ///
    /// # Errors
    ///
    /// Returns [`CreateError::Store`] if the transaction fails. Nothing is
    /// stored and nothing is published in that case.
    pub async fn create_and_notify(
        &self,
        fields: ResourceFields,
    ) -> Result<CreatedResource, CreateError> {
        self.create(fields, None).await
    }

    /// Like [`create_and_notify`](Self::create_and_notify), but returns by
    /// `deadline`.
    ///
    /// Publish failures never fail the create. If the deadline passes after
    /// commit while the publish attempt is still running, the create returns
    /// with [`NotificationStatus::Pending`] and the attempt carries on.
    /// Dropping the returned future before commit rolls the transaction back.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the transaction fails, and
    /// [`CreateError::DeadlineExceeded`] if the deadline passes before
    /// commit. Nothing is stored in either case.
    pub async fn create_before(
        &self,
        fields: ResourceFields,
        deadline: Instant,
    ) -> Result<CreatedResource, CreateError> {
        self.create(fields, Some(deadline)).await
    }

    async fn create(
        &self,
        fields: ResourceFields,
        deadline: Option<Instant>,
    ) -> Result<CreatedResource, CreateError> {
        let kind = fields.kind();
        let Some(topic) = self.notifications.topic_for(kind) else {
            let id = within(deadline, self.store.insert(&fields)).await??;
            return Ok(CreatedResource {
                resource: Resource { id, fields },
                outbox_id: None,
                notification: NotificationStatus::Disabled,
            });
        };

        let (tx, entry) = within(deadline, self.stage(&fields, topic)).await??;
        tx.commit().await?;
        info!(%kind, id = entry.correlation_key, outbox_id = entry.id, "resource created");

        let resource = Resource {
            id: entry.correlation_key,
            fields,
        };
        let outbox_id = entry.id;

        let publisher = Arc::clone(&self.publisher);
        let outbox = Arc::clone(&self.outbox);
        let config = self.config.clone();
        let attempt = tokio::spawn(async move {
            deliver_entry(publisher.as_ref(), outbox.as_ref(), &entry, &config).await
        });

        let joined = match deadline {
            None => attempt.await,
            Some(at) => match tokio::time::timeout_at(at, attempt).await {
                Ok(joined) => joined,
                Err(_) => {
                    debug!(%kind, outbox_id, "deadline reached with publish in flight");
                    return Ok(CreatedResource {
                        resource,
                        outbox_id: Some(outbox_id),
                        notification: NotificationStatus::Pending,
                    });
                }
            },
        };
        let notification = match joined {
            Ok(DeliveryOutcome::Delivered) => NotificationStatus::Delivered,
            Ok(_) => NotificationStatus::Pending,
            Err(e) => {
                warn!(%kind, outbox_id, error = %e, "inline publish task failed");
                NotificationStatus::Pending
            }
        };

        Ok(CreatedResource {
            resource,
            outbox_id: Some(outbox_id),
            notification,
        })
    }

    /// Opens a transaction holding the row and its outbox entry, ready to
    /// commit. Dropping the result before commit rolls it back.
    async fn stage(
        &self,
        fields: &ResourceFields,
        topic: &str,
    ) -> Result<(Box<dyn StoreTransaction>, OutboxEntry), StoreError> {
        let mut tx = self.store.begin().await?;
        match write_row_and_intent(tx.as_mut(), fields, topic).await {
            Ok(entry) => Ok((tx, entry)),
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(kind = %fields.kind(), error = %rollback, "rollback after failed create also failed");
                }
                Err(e)
            }
        }
    }
}

async fn within<F: Future>(deadline: Option<Instant>, fut: F) -> Result<F::Output, CreateError> {
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut)
            .await
            .map_err(|_| CreateError::DeadlineExceeded),
        None => Ok(fut.await),
    }
}

async fn write_row_and_intent(
    tx: &mut dyn StoreTransaction,
    fields: &ResourceFields,
    topic: &str,
) -> Result<OutboxEntry, StoreError> {
    let kind = fields.kind();
    let id = tx.insert_resource(fields).await?;
    let message_id = Uuid::new_v4();
    let payload = encode_payload(kind, id, &message_id)?;
    tx.enqueue_outbox(NewOutboxEntry {
        message_id,
        kind,
        correlation_key: id,
        topic: topic.to_string(),
        payload,
        created_at: now_millis(),
    })
    .await
}

/// Runs one publish attempt for `entry` and marks it delivered on success.
///
/// The attempt is counted before publishing. A failure on the attempt that
/// brings the count to `config.max_attempts` raises the stuck alert; the
/// stored count only ever passes that value once, so the alert fires once
/// per entry. Errors are logged and reported through the outcome; nothing
/// here fails the caller.
pub async fn deliver_entry(
    publisher: &dyn EventPublisher,
    outbox: &dyn OutboxStore,
    entry: &OutboxEntry,
    config: &OutboxConfig,
) -> DeliveryOutcome {
    let attempts = match outbox.record_attempt(entry.id, now_millis()).await {
        Ok(attempts) => Some(attempts),
        Err(e) => {
            warn!(outbox_id = entry.id, error = %e, "could not record publish attempt");
            None
        }
    };

    let timeout = config.publish_timeout();
    let published = tokio::time::timeout(timeout, publisher.publish(&entry.topic, &entry.payload)).await;
    let acknowledged = match published {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(outbox_id = entry.id, topic = %entry.topic, error = %e, "publish failed");
            false
        }
        Err(_) => {
            warn!(
                outbox_id = entry.id,
                topic = %entry.topic,
                timeout_ms = config.publish_timeout_ms,
                "publish timed out"
            );
            false
        }
    };
    if !acknowledged {
        metrics::counter!("catalog_outbox_publish_failed_total", "topic" => entry.topic.clone())
            .increment(1);
        if attempts == Some(config.max_attempts) {
            report_stuck(entry, config.max_attempts);
            return DeliveryOutcome::Exhausted;
        }
        return DeliveryOutcome::Failed;
    }
    metrics::counter!("catalog_outbox_published_total", "topic" => entry.topic.clone()).increment(1);

    match outbox.mark_delivered(entry.id, now_millis()).await {
        Ok(true) => {
            debug!(outbox_id = entry.id, "outbox entry delivered");
            DeliveryOutcome::Delivered
        }
        Ok(false) => {
            debug!(outbox_id = entry.id, "outbox entry already delivered");
            DeliveryOutcome::Delivered
        }
        Err(e) => {
            warn!(outbox_id = entry.id, error = %e, "published but could not mark delivered");
            DeliveryOutcome::PublishedUnmarked
        }
    }
}

fn report_stuck(entry: &OutboxEntry, max_attempts: u32) {
    metrics::counter!("catalog_outbox_stuck_total", "topic" => entry.topic.clone()).increment(1);
    error!(
        outbox_id = entry.id,
        message_id = %entry.message_id,
        kind = %entry.kind,
        correlation_key = entry.correlation_key,
        topic = %entry.topic,
        max_attempts,
        "outbox entry stuck: giving up after max attempts, needs operator attention"
    );
}
