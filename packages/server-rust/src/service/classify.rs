//! Request classification: turns RPC requests into typed `Operation` values.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use catalog_core::{ResourceKind, RpcRequest};

use super::config::ServerConfig;
use super::operation::{CallerOrigin, Operation, OperationContext};

// ---------------------------------------------------------------------------
// OperationService
// ---------------------------------------------------------------------------

/// Builds operation contexts and classifies RPC requests.
///
/// Every context gets a fresh call ID. Both the gateway and the MsgPack RPC
/// handler go through here, so call IDs are unique across surfaces.
pub struct OperationService {
    config: Arc<ServerConfig>,
    call_id_counter: AtomicU64,
}

impl OperationService {
    #[must_use]
    pub fn new(config: Arc<ServerConfig>) -> Self {
        Self {
            config,
            call_id_counter: AtomicU64::new(1),
        }
    }

    fn next_call_id(&self) -> u64 {
        self.call_id_counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Build an `OperationContext` routed to the service for `kind`.
    ///
    /// `timeout_ms` is capped at the configured default.
    #[must_use]
    pub fn make_ctx(
        &self,
        kind: ResourceKind,
        caller_origin: CallerOrigin,
        request_id: Option<String>,
        timeout_ms: Option<u64>,
    ) -> OperationContext {
        let default_timeout = self.config.default_operation_timeout_ms;
        let mut ctx = OperationContext::new(
            self.next_call_id(),
            kind.as_str(),
            timeout_ms.map_or(default_timeout, |t| t.min(default_timeout)),
        );
        ctx.caller_origin = caller_origin;
        ctx.request_id = request_id;
        ctx
    }

    /// Classify an RPC request into an `Operation`.
    #[must_use]
    pub fn classify(
        &self,
        request: RpcRequest,
        caller_origin: CallerOrigin,
        request_id: Option<String>,
        timeout_ms: Option<u64>,
    ) -> Operation {
        let ctx = self.make_ctx(request.kind(), caller_origin, request_id, timeout_ms);
        match request {
            RpcRequest::Create { fields } => Operation::Create { ctx, fields },
            RpcRequest::Read { kind, id } => Operation::Read { ctx, kind, id },
            RpcRequest::Update { id, fields } => Operation::Update { ctx, id, fields },
            RpcRequest::Delete { kind, id } => Operation::Delete { ctx, kind, id },
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
