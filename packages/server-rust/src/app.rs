//! Application assembly: wires adapters, services and surfaces together.

use std::sync::Arc;

use catalog_core::{BookFields, ComicFields, ResourceKind, UserFields};
use tracing::info;

use crate::gateway::{register_resource_routes, ConfigurationError, Gateway};
use crate::network::{NetworkConfig, NetworkModule, RequestHandlers};
use crate::outbox::{
    CreateNotifyCoordinator, NotificationConfig, OutboxConfig, OutboxRelayService, SweepReport,
};
use crate::service::{
    build_operation_pipeline, OperationRouter, OperationService, ResourceService, RpcDispatcher,
    ServerConfig, ServiceContext, ServiceRegistry, StoreService,
};
use crate::traits::{EventPublisher, OutboxStore, ResourceStore};

/// Everything needed to assemble a [`Catalog`].
#[derive(Debug, Clone, Default)]
pub struct CatalogConfig {
    pub server: ServerConfig,
    pub network: NetworkConfig,
    pub outbox: OutboxConfig,
    pub notifications: NotificationConfig,
}

/// A fully wired catalog server.
///
/// Lifecycle: [`Catalog::build`] -> [`Catalog::start`] (store init, relay
/// start) -> serve [`Catalog::network_module`] -> [`Catalog::shutdown`].
pub struct Catalog {
    config: CatalogConfig,
    registry: ServiceRegistry,
    handlers: RequestHandlers,
    coordinator: Arc<CreateNotifyCoordinator>,
}

fn register_kind(
    gateway: &mut Gateway,
    kind: ResourceKind,
    dispatcher: &Arc<RpcDispatcher>,
    operations: &Arc<OperationService>,
) -> Result<(), ConfigurationError> {
    let dispatcher = Arc::clone(dispatcher);
    let operations = Arc::clone(operations);
    match kind {
        ResourceKind::Books => register_resource_routes::<BookFields>(gateway, dispatcher, operations),
        ResourceKind::Comics => register_resource_routes::<ComicFields>(gateway, dispatcher, operations),
        ResourceKind::Users => register_resource_routes::<UserFields>(gateway, dispatcher, operations),
    }
}

impl Catalog {
    /// Wires `store` and `publisher` into services, the operation pipeline
    /// and the gateway route table.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if the route table is inconsistent.
    pub fn build<S>(
        config: CatalogConfig,
        store: Arc<S>,
        publisher: Arc<dyn EventPublisher>,
    ) -> Result<Self, ConfigurationError>
    where
        S: ResourceStore + OutboxStore + 'static,
    {
        let resources: Arc<dyn ResourceStore> = store.clone();
        let outbox: Arc<dyn OutboxStore> = store;
        let server_config = Arc::new(config.server.clone());

        let coordinator = Arc::new(CreateNotifyCoordinator::new(
            Arc::clone(&resources),
            Arc::clone(&outbox),
            Arc::clone(&publisher),
            config.notifications.clone(),
            config.outbox.clone(),
        ));

        let mut router = OperationRouter::new();
        for &kind in &config.server.enabled_kinds {
            router.register(
                kind,
                Arc::new(ResourceService::new(
                    kind,
                    Arc::clone(&resources),
                    Some(Arc::clone(&coordinator)),
                )),
            );
        }
        let dispatcher = Arc::new(RpcDispatcher::new(build_operation_pipeline(
            router,
            &server_config,
        )));
        let operations = Arc::new(OperationService::new(Arc::clone(&server_config)));

        let mut gateway = Gateway::new();
        for &kind in &config.server.enabled_kinds {
            register_kind(&mut gateway, kind, &dispatcher, &operations)?;
        }

        let registry = ServiceRegistry::new();
        registry.register(StoreService::new(Arc::clone(&resources)));
        registry.register(OutboxRelayService::new(
            Arc::clone(&outbox),
            publisher,
            config.outbox.clone(),
        ));

        info!(
            kinds = ?config.server.enabled_kinds,
            routes = gateway.len(),
            "catalog assembled"
        );

        Ok(Self {
            config,
            registry,
            handlers: RequestHandlers {
                gateway: Arc::new(gateway),
                dispatcher,
                operations,
                outbox: Some(outbox),
            },
            coordinator,
        })
    }

    /// Initializes managed services in registration order: the store
    /// first, then the outbox relay.
    ///
    /// # Errors
    ///
    /// Returns the first service initialization failure.
    pub async fn start(&self) -> anyhow::Result<()> {
        let ctx = ServiceContext {
            config: Arc::new(self.config.server.clone()),
        };
        self.registry.init_all(&ctx).await
    }

    /// Network module serving this catalog's handlers.
    #[must_use]
    pub fn network_module(&self) -> NetworkModule {
        NetworkModule::new(self.config.network.clone(), self.handlers.clone())
    }

    #[must_use]
    pub fn handlers(&self) -> &RequestHandlers {
        &self.handlers
    }

    #[must_use]
    pub fn coordinator(&self) -> &Arc<CreateNotifyCoordinator> {
        &self.coordinator
    }

    /// Runs one relay sweep now, ignoring the grace interval.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay has not been started.
    pub async fn flush_outbox(&self) -> anyhow::Result<SweepReport> {
        let relay = self
            .registry
            .get::<OutboxRelayService>()
            .ok_or_else(|| anyhow::anyhow!("outbox relay not registered"))?;
        relay.flush().await
    }

    /// Stops managed services in reverse registration order.
    ///
    /// # Errors
    ///
    /// Returns the first shutdown failure after trying every service.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.registry.shutdown_all(false).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::http::{HeaderMap, Method, StatusCode};
    use serde_json::{json, Value};

    use super::*;
    use crate::publisher::{ChannelPublisher, PublishError};
    use crate::storage::{MemoryStore, OutboxStatus};

    fn config() -> CatalogConfig {
        CatalogConfig {
            outbox: OutboxConfig {
                relay_interval_ms: 60_000,
                grace_ms: 60_000,
                ..OutboxConfig::default()
            },
            ..CatalogConfig::default()
        }
    }

    async fn post(catalog: &Catalog, path: &str, body: Value) -> (StatusCode, HeaderMap, Value) {
        let response = catalog
            .handlers()
            .gateway
            .handle(&Method::POST, path, &HeaderMap::new(), body.to_string().as_bytes())
            .await;
        let value = serde_json::from_slice(&response.body).unwrap();
        (response.status, response.headers, value)
    }

    #[tokio::test]
    async fn book_create_notifies_on_the_default_topic() {
        let store = Arc::new(MemoryStore::new());
        let publisher = ChannelPublisher::new();
        let catalog = Catalog::build(config(), Arc::clone(&store), Arc::new(publisher.clone())).unwrap();
        catalog.start().await.unwrap();

        let (status, headers, body) = post(&catalog, "/books", json!({"title": "Dune"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["grpc-metadata-notification"], "delivered");

        let delivered = publisher.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].topic, "book_creation_queue");
        let payload: Value = serde_json::from_slice(&delivered[0].payload).unwrap();
        assert_eq!(payload["event"], "created");
        assert_eq!(payload["kind"], "books");
        assert_eq!(payload["id"], body["id"]);

        // Comics have no topic by default.
        let (status, headers, _) = post(&catalog, "/comics", json!({"title": "A"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["grpc-metadata-notification"], "disabled");
        assert_eq!(publisher.delivered().len(), 1);

        catalog.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn create_survives_publisher_outage_and_relay_delivers_once() {
        let store = Arc::new(MemoryStore::new());
        let publisher = ChannelPublisher::new();
        publisher.set_available(false);
        let catalog = Catalog::build(config(), Arc::clone(&store), Arc::new(publisher.clone())).unwrap();
        catalog.start().await.unwrap();

        let (status, headers, body) = post(&catalog, "/books", json!({"title": "Dune"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers["grpc-metadata-notification"], "pending");
        let id = body["id"].as_u64().unwrap();
        assert!(publisher.delivered().is_empty());

        let report = catalog.flush_outbox().await.unwrap();
        assert_eq!(report.failed, 1);

        publisher.set_available(true);
        assert_eq!(catalog.flush_outbox().await.unwrap().delivered, 1);
        assert_eq!(catalog.flush_outbox().await.unwrap().scanned, 0);

        let delivered = publisher.delivered();
        assert_eq!(delivered.len(), 1);
        let payload: Value = serde_json::from_slice(&delivered[0].payload).unwrap();
        assert_eq!(payload["id"], id);
        assert_eq!(store.outbox_entries()[0].status, OutboxStatus::Delivered);

        catalog.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn failed_commit_leaves_nothing_behind() {
        let store = Arc::new(MemoryStore::new());
        let publisher = ChannelPublisher::new();
        let catalog = Catalog::build(config(), Arc::clone(&store), Arc::new(publisher.clone())).unwrap();
        store.fail_commits(true);

        let (status, _, body) = post(&catalog, "/books", json!({"title": "Dune"})).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal");
        assert_eq!(store.row_count(ResourceKind::Books), 0);
        assert!(store.outbox_entries().is_empty());
        assert_eq!(publisher.attempt_count(), 0);
    }

    /// Acknowledges after a delay.
    struct SlowPublisher {
        inner: ChannelPublisher,
        delay: Duration,
    }

    #[async_trait]
    impl EventPublisher for SlowPublisher {
        async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
            tokio::time::sleep(self.delay).await;
            self.inner.publish(topic, payload).await
        }
    }

    #[tokio::test]
    async fn caller_cancellation_does_not_cancel_the_publish() {
        let store = Arc::new(MemoryStore::new());
        let publisher = ChannelPublisher::new();
        let slow = SlowPublisher {
            inner: publisher.clone(),
            delay: Duration::from_millis(100),
        };
        let catalog = Arc::new(Catalog::build(config(), Arc::clone(&store), Arc::new(slow)).unwrap());

        let caller = {
            let catalog = Arc::clone(&catalog);
            tokio::spawn(async move {
                post(&catalog, "/books", json!({"title": "Dune"})).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        assert_eq!(store.row_count(ResourceKind::Books), 1);
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(publisher.delivered().len(), 1);
        assert_eq!(store.outbox_entries()[0].status, OutboxStatus::Delivered);
    }

    #[tokio::test]
    async fn disabled_kinds_have_no_routes() {
        let mut config = config();
        config.server.enabled_kinds = vec![ResourceKind::Comics];
        let catalog = Catalog::build(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(ChannelPublisher::new()),
        )
        .unwrap();
        assert_eq!(catalog.handlers().gateway.len(), 4);
        let (status, _, _) = post(&catalog, "/books", json!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
