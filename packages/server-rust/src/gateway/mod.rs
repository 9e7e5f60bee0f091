//! Protocol gateway: HTTP/JSON to typed RPC translation.
//!
//! Routes are `(method, pattern)` pairs bound to a [`UnaryCall`]. For each
//! request the gateway matches the path, decodes the body and the numeric
//! path parameters into one JSON object (path wins over body), invokes the
//! call, and writes the response or the canonical error back as HTTP.
//!
//! Routes are tried in registration order and the first match wins. The
//! ambiguity check in [`Gateway::register_route`] keeps that order from
//! mattering for any one method.

pub mod marshal;
pub mod pattern;
pub mod routes;
pub mod status;

use std::fmt;

use axum::http::header::{ALLOW, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use catalog_core::codec::decode_json_object;
use catalog_core::{Code, Status};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use self::status::{error_body, http_status};

pub use marshal::{
    unary_fn, CallContext, ErasedCall, Reply, ResponseMetadata, Typed, UnaryCall, UnaryFn,
};
pub use pattern::{split_path, PathParams, PatternError, RoutePattern};
pub use routes::register_resource_routes;

/// Inbound header carrying the caller's request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";
/// Inbound header carrying the caller's deadline in milliseconds.
pub const CALL_TIMEOUT_HEADER: &str = "x-call-timeout-ms";

const METADATA_HEADER_PREFIX: &str = "grpc-metadata-";
const METADATA_TRAILER_PREFIX: &str = "grpc-trailer-";

/// Route registration failures. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("invalid route pattern {pattern:?}: {reason}")]
    InvalidPattern {
        pattern: String,
        reason: PatternError,
    },
    #[error("{method} {pattern} is ambiguous with already registered {method} {existing}")]
    AmbiguousRoute {
        method: Method,
        pattern: String,
        existing: String,
    },
}

/// Whether a route reads the request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyRule {
    /// Decode the body as the request's fields. Empty means no fields set.
    Required,
    /// Never read the body.
    Ignored,
}

struct Route {
    method: Method,
    pattern: RoutePattern,
    body: BodyRule,
    call: Box<dyn ErasedCall>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern.as_str())
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

/// The HTTP answer produced by [`Gateway::handle`].
#[derive(Debug)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl GatewayResponse {
    fn json(status: StatusCode, body: Vec<u8>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            status,
            headers,
            body,
        }
    }

    /// Error response for `status` using the fixed code table.
    #[must_use]
    pub fn error(status: &Status) -> Self {
        Self::json(http_status(status.code), error_body(status))
    }

    fn method_not_allowed(allowed: &[Method]) -> Self {
        let mut names: Vec<&str> = allowed.iter().map(Method::as_str).collect();
        names.sort_unstable();
        names.dedup();
        let status = Status::new(Code::Unimplemented, "method not allowed");
        let mut response = Self::json(StatusCode::METHOD_NOT_ALLOWED, error_body(&status));
        if let Ok(value) = HeaderValue::from_str(&names.join(", ")) {
            response.headers.insert(ALLOW, value);
        }
        response
    }

    fn append_metadata(&mut self, prefix: &str, pairs: &[(String, String)]) {
        for (name, value) in pairs {
            let name = format!("{prefix}{}", name.to_ascii_lowercase());
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    self.headers.append(name, value);
                }
                _ => warn!(header = %name, "dropping response metadata that is not a valid header"),
            }
        }
    }
}

impl IntoResponse for GatewayResponse {
    fn into_response(self) -> Response {
        (self.status, self.headers, self.body).into_response()
    }
}

/// Resource-agnostic HTTP to RPC router.
#[derive(Debug, Default)]
pub struct Gateway {
    routes: Vec<Route>,
}

impl Gateway {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `call` to `method` + `pattern`.
    ///
    /// # Errors
    ///
    /// `ConfigurationError::InvalidPattern` if the pattern does not compile,
    /// `ConfigurationError::AmbiguousRoute` if some concrete path would also
    /// match a pattern already registered for `method`.
    pub fn register_route<C: UnaryCall>(
        &mut self,
        method: Method,
        pattern: &str,
        body: BodyRule,
        call: C,
    ) -> Result<(), ConfigurationError> {
        let compiled =
            RoutePattern::parse(pattern).map_err(|reason| ConfigurationError::InvalidPattern {
                pattern: pattern.to_string(),
                reason,
            })?;
        if let Some(existing) = self
            .routes
            .iter()
            .find(|r| r.method == method && r.pattern.overlaps(&compiled))
        {
            return Err(ConfigurationError::AmbiguousRoute {
                method,
                pattern: pattern.to_string(),
                existing: existing.pattern.as_str().to_string(),
            });
        }
        debug!(%method, pattern, ?body, "route registered");
        self.routes.push(Route {
            method,
            pattern: compiled,
            body,
            call: Box::new(Typed(call)),
        });
        Ok(())
    }

    /// Registered `(method, pattern)` pairs in registration order.
    pub fn routes(&self) -> impl Iterator<Item = (&Method, &str)> {
        self.routes.iter().map(|r| (&r.method, r.pattern.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// First route registered for `method` whose pattern matches `path`.
    #[must_use]
    pub fn resolve(&self, method: &Method, path: &str) -> Option<(&str, PathParams)> {
        let segments = split_path(path);
        self.find(method, &segments)
            .map(|(route, params)| (route.pattern.as_str(), params))
    }

    fn find(&self, method: &Method, segments: &[&str]) -> Option<(&Route, PathParams)> {
        self.routes
            .iter()
            .filter(|r| r.method == *method)
            .find_map(|r| r.pattern.match_segments(segments).map(|p| (r, p)))
    }

    /// Translates one HTTP request. Never fails: every error becomes an
    /// HTTP status and a JSON error body.
    pub async fn handle(
        &self,
        method: &Method,
        path: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> GatewayResponse {
        let segments = split_path(path);
        let Some((route, params)) = self.find(method, &segments) else {
            let allowed: Vec<Method> = self
                .routes
                .iter()
                .filter(|r| r.pattern.match_segments(&segments).is_some())
                .map(|r| r.method.clone())
                .collect();
            if allowed.is_empty() {
                return GatewayResponse::error(&Status::not_found(format!(
                    "no route matches {path}"
                )));
            }
            return GatewayResponse::method_not_allowed(&allowed);
        };

        let prepared = call_context(headers)
            .and_then(|ctx| request_fields(route, &params, body).map(|fields| (ctx, fields)));
        let (ctx, fields) = match prepared {
            Ok(prepared) => prepared,
            Err(status) => {
                debug!(%method, path, error = %status, "request rejected by gateway");
                return GatewayResponse::error(&status);
            }
        };

        match route.call.invoke(ctx, fields).await {
            Ok((body, metadata)) => {
                let mut response = GatewayResponse::json(StatusCode::OK, body);
                response.append_metadata(METADATA_HEADER_PREFIX, &metadata.headers);
                response.append_metadata(METADATA_TRAILER_PREFIX, &metadata.trailers);
                response
            }
            Err(status) => {
                if matches!(status.code, Code::Internal | Code::Unknown) {
                    warn!(%method, path, error = %status, "call failed");
                }
                GatewayResponse::error(&status)
            }
        }
    }
}

fn call_context(headers: &HeaderMap) -> Result<CallContext, Status> {
    let request_id = headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let timeout = match headers.get(CALL_TIMEOUT_HEADER) {
        None => None,
        Some(value) => {
            let ms = value
                .to_str()
                .ok()
                .and_then(|v| v.trim().parse::<u64>().ok())
                .ok_or_else(|| {
                    Status::invalid_argument(format!("invalid {CALL_TIMEOUT_HEADER} header"))
                })?;
            Some(std::time::Duration::from_millis(ms))
        }
    };
    Ok(CallContext {
        request_id,
        timeout,
        headers: headers.clone(),
    })
}

fn request_fields(
    route: &Route,
    params: &PathParams,
    body: &[u8],
) -> Result<Map<String, Value>, Status> {
    let mut fields = match route.body {
        BodyRule::Required => {
            decode_json_object(body).map_err(|e| Status::invalid_argument(e.to_string()))?
        }
        BodyRule::Ignored => Map::new(),
    };
    for name in route.call.path_params() {
        if params.get(name).is_none() {
            return Err(Status::invalid_argument(format!("missing parameter {name}")));
        }
    }
    for (name, raw) in params.iter() {
        let value = raw.parse::<u64>().map_err(|e| {
            Status::invalid_argument(format!("type mismatch, parameter: {name}, error: {e}"))
        })?;
        fields.insert(name.to_string(), Value::from(value));
    }
    Ok(fields)
}
