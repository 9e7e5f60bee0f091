//! Lifecycle of the catalog's long-lived components.
//!
//! The store and the outbox relay are registered once at assembly, started
//! in registration order and stopped in reverse. A failed start stops
//! whatever already started, so a half-initialized catalog never serves.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, error, warn};

use super::config::ServerConfig;

/// Context handed to every service on start.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    pub config: Arc<ServerConfig>,
}

/// A component with a start/stop lifecycle.
#[async_trait]
pub trait ManagedService: Send + Sync + Any {
    /// Stable name used in logs, e.g. `"store"` or `"outbox-relay"`.
    fn name(&self) -> &'static str;

    async fn init(&self, ctx: &ServiceContext) -> anyhow::Result<()>;

    /// `terminate` skips graceful cleanup.
    async fn shutdown(&self, terminate: bool) -> anyhow::Result<()>;
}

/// Where a registered service is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Registered,
    Running,
    Stopped,
    Failed,
}

struct Slot {
    name: &'static str,
    service: Arc<dyn ManagedService>,
    concrete: Arc<dyn Any + Send + Sync>,
    state: ServiceState,
}

/// Ordered set of managed services.
#[derive(Default)]
pub struct ServiceRegistry {
    slots: RwLock<Vec<Slot>>,
}

impl ServiceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `service` at the end of the start order. A service registered
    /// under a name already present replaces the earlier one in place.
    pub fn register<T: ManagedService>(&self, service: T) {
        let service = Arc::new(service);
        let slot = Slot {
            name: service.name(),
            service: Arc::clone(&service) as Arc<dyn ManagedService>,
            concrete: service,
            state: ServiceState::Registered,
        };
        let mut slots = self.slots.write();
        match slots.iter().position(|s| s.name == slot.name) {
            Some(index) => slots[index] = slot,
            None => slots.push(slot),
        }
    }

    /// The registered service of type `T`.
    pub fn get<T: ManagedService>(&self) -> Option<Arc<T>> {
        self.slots
            .read()
            .iter()
            .find_map(|slot| Arc::clone(&slot.concrete).downcast::<T>().ok())
    }

    /// Starts every service in registration order.
    ///
    /// # Errors
    ///
    /// Returns the first start failure, after stopping the services that
    /// had already started.
    pub async fn init_all(&self, ctx: &ServiceContext) -> anyhow::Result<()> {
        for (index, name, service) in self.snapshot() {
            if let Err(e) = service.init(ctx).await {
                error!(service = name, error = %e, "service failed to start");
                self.set_state(index, ServiceState::Failed);
                self.stop_started(true).await;
                return Err(e.context(format!("starting {name}")));
            }
            self.set_state(index, ServiceState::Running);
            debug!(service = name, "service started");
        }
        Ok(())
    }

    /// Stops every running service in reverse registration order, trying
    /// them all even when one fails.
    ///
    /// # Errors
    ///
    /// Returns the first stop failure.
    pub async fn shutdown_all(&self, terminate: bool) -> anyhow::Result<()> {
        self.stop_started(terminate)
            .await
            .map_or(Ok(()), Err)
    }

    /// Name and state of every service in registration order.
    #[must_use]
    pub fn states(&self) -> Vec<(&'static str, ServiceState)> {
        self.slots
            .read()
            .iter()
            .map(|slot| (slot.name, slot.state))
            .collect()
    }

    async fn stop_started(&self, terminate: bool) -> Option<anyhow::Error> {
        let mut first_error = None;
        for (index, name, service) in self.snapshot().into_iter().rev() {
            if self.state(index) != Some(ServiceState::Running) {
                continue;
            }
            match service.shutdown(terminate).await {
                Ok(()) => self.set_state(index, ServiceState::Stopped),
                Err(e) => {
                    warn!(service = name, error = %e, "service failed to stop");
                    self.set_state(index, ServiceState::Failed);
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error
    }

    fn snapshot(&self) -> Vec<(usize, &'static str, Arc<dyn ManagedService>)> {
        self.slots
            .read()
            .iter()
            .enumerate()
            .map(|(index, slot)| (index, slot.name, Arc::clone(&slot.service)))
            .collect()
    }

    fn state(&self, index: usize) -> Option<ServiceState> {
        self.slots.read().get(index).map(|slot| slot.state)
    }

    fn set_state(&self, index: usize, state: ServiceState) {
        if let Some(slot) = self.slots.write().get_mut(index) {
            slot.state = state;
        }
    }
}
