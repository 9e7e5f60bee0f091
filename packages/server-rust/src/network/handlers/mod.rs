//! HTTP handlers and the state they share.

pub mod gateway;
pub mod health;
pub mod rpc;

pub use gateway::gateway_handler;
pub use health::{health_handler, liveness_handler, readiness_handler};
pub use rpc::rpc_handler;

use std::sync::Arc;
use std::time::Instant;

use super::{NetworkConfig, ShutdownController};
use crate::gateway::Gateway;
use crate::service::{OperationService, RpcDispatcher};
use crate::traits::OutboxStore;

/// Shared application state passed to all axum handlers via `State`.
///
/// Every field is an `Arc` or `Copy`, so cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    /// HTTP/JSON route table.
    pub gateway: Arc<Gateway>,
    /// Entry into the operation pipeline, used by `/rpc`.
    pub dispatcher: Arc<RpcDispatcher>,
    /// Call-id allocation and request classification.
    pub operations: Arc<OperationService>,
    /// Outbox to report on in `/health`, when notifications are enabled.
    pub outbox: Option<Arc<dyn OutboxStore>>,
    pub shutdown: Arc<ShutdownController>,
    pub config: Arc<NetworkConfig>,
    /// Process start time, used for uptime.
    pub start_time: Instant,
}
