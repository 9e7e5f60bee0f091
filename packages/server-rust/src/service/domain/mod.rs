//! Resource domain services.
//!
//! One [`ResourceService`] per resource kind handles the four CRUD
//! operations as a `tower::Service<Operation>`. Creates go through the
//! create-notify coordinator when the kind notifies; everything else talks
//! to the store directly. [`StoreService`] ties the store's lifecycle to the
//! service registry.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use catalog_core::{DeleteResponse, Resource, ResourceKind};
use tower::Service;
use tracing::info;

use crate::outbox::{CreateError, CreateNotifyCoordinator, NotificationStatus};
use crate::service::operation::{Operation, OperationError, OperationResponse};
use crate::service::registry::{ManagedService, ServiceContext};
use crate::traits::ResourceStore;

// ---------------------------------------------------------------------------
// ResourceService
// ---------------------------------------------------------------------------

/// CRUD service for a single resource kind. Owns no state of its own.
pub struct ResourceService {
    kind: ResourceKind,
    store: Arc<dyn ResourceStore>,
    coordinator: Option<Arc<CreateNotifyCoordinator>>,
}

impl ResourceService {
    #[must_use]
    pub fn new(
        kind: ResourceKind,
        store: Arc<dyn ResourceStore>,
        coordinator: Option<Arc<CreateNotifyCoordinator>>,
    ) -> Self {
        Self {
            kind,
            store,
            coordinator,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    async fn handle(self: Arc<Self>, op: Operation) -> Result<OperationResponse, OperationError> {
        if op.kind() != self.kind {
            return Err(OperationError::WrongService);
        }
        match op {
            Operation::Create { ctx, fields } => {
                if let Some(coordinator) = self.coordinator.as_ref().filter(|c| c.notifies(self.kind)) {
                    let outcome = match ctx.deadline {
                        Some(deadline) => coordinator.create_before(fields, deadline.at).await,
                        None => coordinator.create_and_notify(fields).await,
                    };
                    let created = outcome.map_err(|e| match e {
                        CreateError::Store(e) => OperationError::Storage(e),
                        CreateError::DeadlineExceeded => OperationError::Timeout {
                            timeout_ms: ctx.deadline.map_or(ctx.call_timeout_ms, |d| d.timeout_ms),
                        },
                    })?;
                    return Ok(OperationResponse::Created {
                        resource: created.resource,
                        notification: created.notification,
                    });
                }
                let insert = self.store.insert(&fields);
                let id = match ctx.deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline.at, insert)
                        .await
                        .map_err(|_| deadline.exceeded())??,
                    None => insert.await?,
                };
                Ok(OperationResponse::Created {
                    resource: Resource { id, fields },
                    notification: NotificationStatus::Disabled,
                })
            }
            Operation::Read { kind, id, .. } => match self.store.fetch(kind, id).await? {
                Some(fields) => Ok(OperationResponse::Resource(Resource { id, fields })),
                None => Err(OperationError::NotFound { kind, id }),
            },
            Operation::Update { id, fields, .. } => {
                if self.store.replace(id, &fields).await? {
                    Ok(OperationResponse::Resource(Resource { id, fields }))
                } else {
                    Err(OperationError::NotFound {
                        kind: self.kind,
                        id,
                    })
                }
            }
            Operation::Delete { kind, id, .. } => {
                if self.store.remove(kind, id).await? {
                    Ok(OperationResponse::Deleted(DeleteResponse { success: true }))
                } else {
                    Err(OperationError::NotFound { kind, id })
                }
            }
        }
    }
}

impl Service<Operation> for Arc<ResourceService> {
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        Box::pin(Arc::clone(self).handle(op))
    }
}

// ---------------------------------------------------------------------------
// StoreService
// ---------------------------------------------------------------------------

/// Runs the store's one-time initialization on startup and closes it on
/// shutdown.
pub struct StoreService {
    store: Arc<dyn ResourceStore>,
}

impl StoreService {
    #[must_use]
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ManagedService for StoreService {
    fn name(&self) -> &'static str {
        "store"
    }

    async fn init(&self, ctx: &ServiceContext) -> anyhow::Result<()> {
        self.store.initialize().await?;
        info!(node_id = %ctx.config.node_id, "store initialized");
        Ok(())
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        self.store.close().await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use catalog_core::{BookFields, ComicFields, ResourceFields};
    use tower::ServiceExt;

    use super::*;
    use crate::outbox::{NotificationConfig, OutboxConfig};
    use crate::publisher::{ChannelPublisher, PublishError};
    use crate::service::config::ServerConfig;
    use crate::service::middleware::build_operation_pipeline;
    use crate::service::operation::{service_names, OperationContext};
    use crate::service::registry::ServiceRegistry;
    use crate::service::router::OperationRouter;
    use crate::storage::{MemoryStore, OutboxStatus};
    use crate::traits::EventPublisher;

    fn ctx(kind: ResourceKind) -> OperationContext {
        OperationContext::new(1, kind.as_str(), 5000)
    }

    fn comic(title: &str) -> ResourceFields {
        ResourceFields::Comics(ComicFields {
            title: title.to_string(),
            ..ComicFields::default()
        })
    }

    fn comics_service(store: &MemoryStore) -> Arc<ResourceService> {
        Arc::new(ResourceService::new(
            ResourceKind::Comics,
            Arc::new(store.clone()),
            None,
        ))
    }

    #[tokio::test]
    async fn crud_round_trip() {
        let store = MemoryStore::new();
        let svc = comics_service(&store);

        let created = svc
            .clone()
            .oneshot(Operation::Create {
                ctx: ctx(ResourceKind::Comics),
                fields: comic("A"),
            })
            .await
            .unwrap();
        let OperationResponse::Created {
            resource,
            notification,
        } = created
        else {
            panic!("expected Created, got {created:?}");
        };
        assert_eq!(notification, NotificationStatus::Disabled);
        let id = resource.id;

        let read = svc
            .clone()
            .oneshot(Operation::Read {
                ctx: ctx(ResourceKind::Comics),
                kind: ResourceKind::Comics,
                id,
            })
            .await
            .unwrap();
        assert_eq!(read, OperationResponse::Resource(resource));

        let updated = svc
            .clone()
            .oneshot(Operation::Update {
                ctx: ctx(ResourceKind::Comics),
                id,
                fields: comic("B"),
            })
            .await
            .unwrap();
        assert_eq!(
            updated,
            OperationResponse::Resource(Resource {
                id,
                fields: comic("B")
            })
        );

        let deleted = svc
            .clone()
            .oneshot(Operation::Delete {
                ctx: ctx(ResourceKind::Comics),
                kind: ResourceKind::Comics,
                id,
            })
            .await
            .unwrap();
        assert_eq!(
            deleted,
            OperationResponse::Deleted(DeleteResponse { success: true })
        );
    }

    #[tokio::test]
    async fn absent_identifiers_are_not_found() {
        let svc = comics_service(&MemoryStore::new());

        let read = svc
            .clone()
            .oneshot(Operation::Read {
                ctx: ctx(ResourceKind::Comics),
                kind: ResourceKind::Comics,
                id: 999_999,
            })
            .await
            .unwrap_err();
        assert!(matches!(read, OperationError::NotFound { id: 999_999, .. }));

        let update = svc
            .clone()
            .oneshot(Operation::Update {
                ctx: ctx(ResourceKind::Comics),
                id: 5,
                fields: comic("A"),
            })
            .await
            .unwrap_err();
        assert!(matches!(update, OperationError::NotFound { id: 5, .. }));

        let delete = svc
            .oneshot(Operation::Delete {
                ctx: ctx(ResourceKind::Comics),
                kind: ResourceKind::Comics,
                id: 5,
            })
            .await
            .unwrap_err();
        assert!(matches!(delete, OperationError::NotFound { id: 5, .. }));
    }

    #[tokio::test]
    async fn rejects_operations_for_other_kinds() {
        let svc = comics_service(&MemoryStore::new());
        let err = svc
            .oneshot(Operation::Read {
                ctx: ctx(ResourceKind::Books),
                kind: ResourceKind::Books,
                id: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::WrongService));
    }

    #[tokio::test]
    async fn notifying_kind_creates_through_coordinator() {
        let store = MemoryStore::new();
        let publisher = ChannelPublisher::new();
        let coordinator = Arc::new(CreateNotifyCoordinator::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(publisher.clone()),
            NotificationConfig::default(),
            OutboxConfig::default(),
        ));
        let svc = Arc::new(ResourceService::new(
            ResourceKind::Books,
            Arc::new(store.clone()),
            Some(coordinator),
        ));

        let resp = svc
            .oneshot(Operation::Create {
                ctx: ctx(ResourceKind::Books),
                fields: ResourceFields::Books(BookFields::default()),
            })
            .await
            .unwrap();
        assert!(matches!(
            resp,
            OperationResponse::Created {
                notification: NotificationStatus::Delivered,
                ..
            }
        ));
        assert_eq!(store.outbox_entries().len(), 1);
        assert_eq!(publisher.delivered().len(), 1);
    }

    #[tokio::test]
    async fn store_failure_surfaces_as_storage_error() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let err = comics_service(&store)
            .oneshot(Operation::Create {
                ctx: ctx(ResourceKind::Comics),
                fields: comic("A"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OperationError::Storage(_)));
    }

    #[tokio::test]
    async fn store_service_runs_through_registry() {
        let registry = ServiceRegistry::new();
        registry.register(StoreService::new(Arc::new(MemoryStore::new())));
        let ctx = ServiceContext {
            config: Arc::new(ServerConfig::default()),
        };
        registry.init_all(&ctx).await.unwrap();
        assert!(registry.get::<StoreService>().is_some());
        registry.shutdown_all(false).await.unwrap();
    }

    /// Acknowledges every publish after half a second.
    struct SlowBroker(ChannelPublisher);

    #[async_trait]
    impl EventPublisher for SlowBroker {
        async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            self.0.publish(topic, payload).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn committed_create_outlives_a_short_caller_deadline() {
        let store = MemoryStore::new();
        let publisher = ChannelPublisher::new();
        let coordinator = Arc::new(CreateNotifyCoordinator::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            Arc::new(SlowBroker(publisher.clone())),
            NotificationConfig::default(),
            OutboxConfig::default(),
        ));
        let mut router = OperationRouter::new();
        router.register(
            ResourceKind::Books,
            Arc::new(ResourceService::new(
                ResourceKind::Books,
                Arc::new(store.clone()),
                Some(coordinator),
            )),
        );
        let pipeline = build_operation_pipeline(router, &ServerConfig::default());

        let resp = pipeline
            .oneshot(Operation::Create {
                ctx: OperationContext::new(1, service_names::BOOKS, 50),
                fields: ResourceFields::Books(BookFields::default()),
            })
            .await
            .unwrap();
        assert!(matches!(
            resp,
            OperationResponse::Created {
                notification: NotificationStatus::Pending,
                ..
            }
        ));
        assert_eq!(store.row_count(ResourceKind::Books), 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(publisher.delivered().len(), 1);
        assert_eq!(store.outbox_entries()[0].status, OutboxStatus::Delivered);
    }
}
