//! Fallback handler that feeds every unmatched axum request to the gateway.

use axum::extract::State;
use axum::http::{HeaderMap, Method, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use catalog_core::{Code, Status};

use super::AppState;
use crate::gateway::GatewayResponse;

/// Routes the request through the HTTP/JSON gateway.
///
/// Requests arriving after shutdown started get 503.
pub async fn gateway_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !state.shutdown.health_state().accepts_requests() {
        return GatewayResponse::error(&Status::new(Code::Unavailable, "server is shutting down"))
            .into_response();
    }
    let _guard = state.shutdown.in_flight_guard();
    state
        .gateway
        .handle(&method, uri.path(), &headers, &body)
        .await
        .into_response()
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;
    use crate::network::handlers::test_support::memory_state;
    use crate::storage::MemoryStore;

    #[tokio::test]
    async fn forwards_to_gateway() {
        let state = memory_state(&MemoryStore::new());
        let response = gateway_handler(
            State(state.clone()),
            Method::POST,
            Uri::from_static("/comics"),
            HeaderMap::new(),
            Bytes::from_static(br#"{"title":"A"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(state.shutdown.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn rejects_requests_while_draining() {
        let state = memory_state(&MemoryStore::new());
        state.shutdown.trigger_shutdown();
        let response = gateway_handler(
            State(state),
            Method::GET,
            Uri::from_static("/comics/1"),
            HeaderMap::new(),
            Bytes::new(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
