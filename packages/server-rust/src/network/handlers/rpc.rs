//! `POST /rpc`: MsgPack RPC transport.

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use catalog_core::codec::{from_msgpack, to_msgpack};
use catalog_core::{Code, RpcEnvelope, RpcReply, RpcReplyEnvelope, Status};
use serde::Serialize;
use tracing::{debug, error};

use super::AppState;
use crate::gateway::REQUEST_ID_HEADER;
use crate::service::{CallerOrigin, OperationResponse};

const MSGPACK: &str = "application/msgpack";

fn msgpack_response<T: Serialize>(status: StatusCode, value: &T) -> Response {
    match to_msgpack(value) {
        Ok(bytes) => (status, [(CONTENT_TYPE, MSGPACK)], bytes).into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode rpc reply");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Decodes an [`RpcEnvelope`], runs it through the pipeline and answers
/// with an [`RpcReplyEnvelope`].
///
/// Operation failures travel inside the reply as a `Status` with HTTP 200.
/// An undecodable envelope is HTTP 400 with a bare MsgPack `Status`.
pub async fn rpc_handler(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if !state.shutdown.health_state().accepts_requests() {
        return msgpack_response(
            StatusCode::SERVICE_UNAVAILABLE,
            &Status::new(Code::Unavailable, "server is shutting down"),
        );
    }
    let _guard = state.shutdown.in_flight_guard();

    let envelope: RpcEnvelope = match from_msgpack(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(error = %e, "rejecting undecodable rpc envelope");
            return msgpack_response(StatusCode::BAD_REQUEST, &Status::invalid_argument(e.to_string()));
        }
    };

    let call_id = envelope.call_id;
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let op = state.operations.classify(
        envelope.request,
        CallerOrigin::Rpc,
        request_id,
        envelope.timeout_ms,
    );

    let reply = match state.dispatcher.dispatch(op).await {
        Ok(OperationResponse::Resource(resource) | OperationResponse::Created { resource, .. }) => {
            RpcReply::Resource(resource)
        }
        Ok(OperationResponse::Deleted(deleted)) => RpcReply::Deleted(deleted),
        Err(e) => RpcReply::Error(e.status()),
    };
    msgpack_response(StatusCode::OK, &RpcReplyEnvelope { call_id, reply })
}

#[cfg(test)]
mod tests {
    use catalog_core::{ComicFields, DeleteResponse, ResourceFields, ResourceKind, RpcRequest};

    use super::*;
    use crate::network::handlers::test_support::memory_state;
    use crate::storage::MemoryStore;

    async fn call(state: &AppState, call_id: u64, request: RpcRequest) -> RpcReplyEnvelope {
        let body = to_msgpack(&RpcEnvelope {
            call_id,
            timeout_ms: None,
            request,
        })
        .unwrap();
        let response = rpc_handler(State(state.clone()), HeaderMap::new(), Bytes::from(body)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], MSGPACK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        from_msgpack(&bytes).unwrap()
    }

    #[tokio::test]
    async fn crud_over_msgpack() {
        let state = memory_state(&MemoryStore::new());
        let fields = ResourceFields::Comics(ComicFields {
            title: "A".to_string(),
            ..ComicFields::default()
        });

        let created = call(&state, 1, RpcRequest::Create { fields: fields.clone() }).await;
        assert_eq!(created.call_id, 1);
        let RpcReply::Resource(resource) = created.reply else {
            panic!("expected a resource, got {:?}", created.reply);
        };
        assert_eq!(resource.fields, fields);

        let read = call(
            &state,
            2,
            RpcRequest::Read {
                kind: ResourceKind::Comics,
                id: resource.id,
            },
        )
        .await;
        assert_eq!(read.reply, RpcReply::Resource(resource.clone()));

        let deleted = call(
            &state,
            3,
            RpcRequest::Delete {
                kind: ResourceKind::Comics,
                id: resource.id,
            },
        )
        .await;
        assert_eq!(deleted.reply, RpcReply::Deleted(DeleteResponse { success: true }));
    }

    #[tokio::test]
    async fn errors_travel_as_status() {
        let state = memory_state(&MemoryStore::new());
        let reply = call(
            &state,
            9,
            RpcRequest::Read {
                kind: ResourceKind::Books,
                id: 999_999,
            },
        )
        .await;
        assert_eq!(reply.call_id, 9);
        let RpcReply::Error(status) = reply.reply else {
            panic!("expected an error");
        };
        assert_eq!(status.code, Code::NotFound);
        assert_eq!(status.message, "book 999999 not found");
    }

    #[tokio::test]
    async fn undecodable_envelope_is_400() {
        let state = memory_state(&MemoryStore::new());
        let response = rpc_handler(State(state), HeaderMap::new(), Bytes::from_static(b"\xc1")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let status: Status = from_msgpack(&bytes).unwrap();
        assert_eq!(status.code, Code::InvalidArgument);
    }
}
