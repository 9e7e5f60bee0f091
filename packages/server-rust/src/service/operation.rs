//! Operation types flowing through the service pipeline.

use std::time::Duration;

use catalog_core::{Code, DeleteResponse, Resource, ResourceFields, ResourceKind, Status};
use tokio::time::Instant;

use crate::outbox::NotificationStatus;
use crate::storage::StoreError;

/// Service names used for routing. One service per resource kind.
pub mod service_names {
    pub const BOOKS: &str = "books";
    pub const COMICS: &str = "comics";
    pub const USERS: &str = "users";
}

/// Where an operation came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerOrigin {
    /// Translated from an HTTP/JSON request by the gateway.
    Gateway,
    /// Sent as a MsgPack RPC envelope.
    Rpc,
    /// Issued by the server itself (startup, tests).
    System,
}

impl CallerOrigin {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gateway => "gateway",
            Self::Rpc => "rpc",
            Self::System => "system",
        }
    }
}

/// Context carried with every operation through the pipeline.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub call_id: u64,
    pub service_name: &'static str,
    pub caller_origin: CallerOrigin,
    /// Value of the inbound `x-request-id`, when present.
    pub request_id: Option<String>,
    pub call_timeout_ms: u64,
    /// Set by `DeadlineLayer` once the effective timeout is known.
    pub deadline: Option<CallDeadline>,
}

impl OperationContext {
    #[must_use]
    pub fn new(call_id: u64, service_name: &'static str, call_timeout_ms: u64) -> Self {
        Self {
            call_id,
            service_name,
            caller_origin: CallerOrigin::System,
            request_id: None,
            call_timeout_ms,
            deadline: None,
        }
    }
}

/// Absolute point after which the caller stops waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallDeadline {
    pub at: Instant,
    pub timeout_ms: u64,
}

impl CallDeadline {
    #[must_use]
    pub fn after_ms(timeout_ms: u64) -> Self {
        Self {
            at: Instant::now() + Duration::from_millis(timeout_ms),
            timeout_ms,
        }
    }

    /// The error reported when this deadline passes.
    #[must_use]
    pub fn exceeded(self) -> OperationError {
        OperationError::Timeout {
            timeout_ms: self.timeout_ms,
        }
    }
}

/// Typed CRUD operations dispatched through the pipeline.
#[derive(Debug)]
pub enum Operation {
    Create {
        ctx: OperationContext,
        fields: ResourceFields,
    },
    Read {
        ctx: OperationContext,
        kind: ResourceKind,
        id: u64,
    },
    /// Full replace of every field.
    Update {
        ctx: OperationContext,
        id: u64,
        fields: ResourceFields,
    },
    Delete {
        ctx: OperationContext,
        kind: ResourceKind,
        id: u64,
    },
}

impl Operation {
    #[must_use]
    pub fn ctx(&self) -> &OperationContext {
        match self {
            Self::Create { ctx, .. }
            | Self::Read { ctx, .. }
            | Self::Update { ctx, .. }
            | Self::Delete { ctx, .. } => ctx,
        }
    }

    pub fn ctx_mut(&mut self) -> &mut OperationContext {
        match self {
            Self::Create { ctx, .. }
            | Self::Read { ctx, .. }
            | Self::Update { ctx, .. }
            | Self::Delete { ctx, .. } => ctx,
        }
    }

    /// Resource kind the operation targets.
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Create { fields, .. } | Self::Update { fields, .. } => fields.kind(),
            Self::Read { kind, .. } | Self::Delete { kind, .. } => *kind,
        }
    }

    /// Lowercase verb used in logs and metric labels.
    #[must_use]
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Create { .. } => "create",
            Self::Read { .. } => "read",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }
}

/// Successful response from an operation handler.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResponse {
    /// Result of a read or update.
    Resource(Resource),
    /// Result of a create, with where its notification stands.
    Created {
        resource: Resource,
        notification: NotificationStatus,
    },
    Deleted(DeleteResponse),
}

impl OperationResponse {
    /// The resource carried by a create, read or update response.
    #[must_use]
    pub fn into_resource(self) -> Option<Resource> {
        match self {
            Self::Resource(resource) | Self::Created { resource, .. } => Some(resource),
            Self::Deleted(_) => None,
        }
    }
}

/// Errors returned by operation handlers.
#[derive(Debug, thiserror::Error)]
pub enum OperationError {
    #[error("{} {id} not found", kind.singular())]
    NotFound { kind: ResourceKind, id: u64 },
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("no service mounted for {kind}")]
    Unmounted { kind: ResourceKind },
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("server overloaded, try again later")]
    Overloaded,
    #[error("wrong service for operation")]
    WrongService,
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl OperationError {
    #[must_use]
    pub fn code(&self) -> Code {
        match self {
            Self::NotFound { .. } => Code::NotFound,
            Self::Storage(_) | Self::WrongService | Self::Internal(_) => Code::Internal,
            Self::Unmounted { .. } => Code::Unimplemented,
            Self::Timeout { .. } => Code::DeadlineExceeded,
            Self::Overloaded => Code::Unavailable,
        }
    }

    /// Canonical status shared by the HTTP and RPC surfaces.
    #[must_use]
    pub fn status(&self) -> Status {
        Status::new(self.code(), self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use catalog_core::ComicFields;

    use super::*;

    #[test]
    fn operation_accessors() {
        let op = Operation::Update {
            ctx: OperationContext::new(7, service_names::COMICS, 1000),
            id: 3,
            fields: ResourceFields::Comics(ComicFields::default()),
        };
        assert_eq!(op.ctx().call_id, 7);
        assert_eq!(op.kind(), ResourceKind::Comics);
        assert_eq!(op.verb(), "update");
    }

    #[test]
    fn errors_map_to_canonical_codes() {
        let not_found = OperationError::NotFound {
            kind: ResourceKind::Comics,
            id: 9,
        };
        let status = not_found.status();
        assert_eq!(status.code, Code::NotFound);
        assert_eq!(status.message, "comic 9 not found");

        let storage = OperationError::Storage(StoreError::Unavailable("down".to_string()));
        assert_eq!(storage.status().code, Code::Internal);
        assert_eq!(OperationError::Overloaded.status().code, Code::Unavailable);
        assert_eq!(
            OperationError::Timeout { timeout_ms: 5 }.status().code,
            Code::DeadlineExceeded
        );
        assert_eq!(
            OperationError::Unmounted {
                kind: ResourceKind::Users
            }
            .status()
            .code,
            Code::Unimplemented
        );
    }
}
