//! Typed RPC requests and replies.
//!
//! The per-kind HTTP bodies are `F` (create), [`Stored<F>`](crate::Stored)
//! (update and every resource reply), [`IdRequest`] (read, delete) and
//! [`DeleteResponse`]. The MsgPack RPC transport wraps the kind-tagged forms
//! in [`RpcEnvelope`] / [`RpcReplyEnvelope`].

use serde::{Deserialize, Serialize};

use crate::resource::{Resource, ResourceFields, ResourceKind};
use crate::status::Status;

/// Request addressing one resource by identifier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdRequest {
    #[serde(default)]
    pub id: u64,
}

/// Reply to a delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResponse {
    pub success: bool,
}

/// A single RPC call against one resource kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcRequest {
    Create { fields: ResourceFields },
    Read { kind: ResourceKind, id: u64 },
    Update { id: u64, fields: ResourceFields },
    Delete { kind: ResourceKind, id: u64 },
}

impl RpcRequest {
    /// Resource kind the request targets.
    #[must_use]
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Create { fields } | Self::Update { fields, .. } => fields.kind(),
            Self::Read { kind, .. } | Self::Delete { kind, .. } => *kind,
        }
    }
}

/// Transport envelope for an inbound RPC call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcEnvelope {
    /// Caller-chosen identifier echoed in the reply.
    pub call_id: u64,
    /// Optional per-call deadline; the server default applies when absent.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    pub request: RpcRequest,
}

/// Outcome of an RPC call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcReply {
    Resource(Resource),
    Deleted(DeleteResponse),
    Error(Status),
}

/// Transport envelope for an RPC reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcReplyEnvelope {
    pub call_id: u64,
    pub reply: RpcReply,
}
