//! Typed unary calls and the JSON marshaling around them.
//!
//! A [`UnaryCall`] is the RPC operation a route is bound to. The gateway
//! only ever sees it through [`ErasedCall`], which decodes the merged JSON
//! fields into the typed request and encodes the typed response with the
//! same serde schema.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use catalog_core::Status;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Per-request context handed to a unary call.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Inbound `x-request-id`, when present.
    pub request_id: Option<String>,
    /// Caller deadline from `x-call-timeout-ms`, when present.
    pub timeout: Option<Duration>,
    /// All inbound request headers.
    pub headers: HeaderMap,
}

/// Header and trailer metadata returned alongside a response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseMetadata {
    pub headers: Vec<(String, String)>,
    pub trailers: Vec<(String, String)>,
}

impl ResponseMetadata {
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn trailer(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.trailers.push((name.into(), value.into()));
        self
    }
}

/// A typed response plus its metadata.
#[derive(Debug, Clone)]
pub struct Reply<T> {
    pub message: T,
    pub metadata: ResponseMetadata,
}

impl<T> Reply<T> {
    pub fn new(message: T) -> Self {
        Self {
            message,
            metadata: ResponseMetadata::default(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: ResponseMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A strongly typed RPC operation a route can be bound to.
#[async_trait]
pub trait UnaryCall: Send + Sync + 'static {
    type Request: DeserializeOwned + Send + 'static;
    type Response: Serialize + Send + 'static;

    /// Path parameters the request cannot be built without.
    const PATH_PARAMS: &'static [&'static str] = &[];

    async fn call(
        &self,
        ctx: CallContext,
        request: Self::Request,
    ) -> Result<Reply<Self::Response>, Status>;
}

/// Decodes merged JSON fields into a typed request.
///
/// # Errors
///
/// Returns an `InvalidArgument` status naming the serde failure.
pub fn decode_request<T: DeserializeOwned>(fields: Map<String, Value>) -> Result<T, Status> {
    serde_json::from_value(Value::Object(fields)).map_err(|e| Status::invalid_argument(e.to_string()))
}

/// Encodes a typed response as a JSON body.
///
/// # Errors
///
/// Returns an `Internal` status if the response cannot be serialized.
pub fn encode_response<T: Serialize>(message: &T) -> Result<Vec<u8>, Status> {
    serde_json::to_vec(message)
        .map_err(|e| Status::internal(format!("failed to encode response: {e}")))
}

/// Type-erased form of a [`UnaryCall`] stored in the route table.
#[async_trait]
pub trait ErasedCall: Send + Sync {
    fn path_params(&self) -> &'static [&'static str];

    async fn invoke(
        &self,
        ctx: CallContext,
        fields: Map<String, Value>,
    ) -> Result<(Vec<u8>, ResponseMetadata), Status>;
}

/// Wraps a [`UnaryCall`] as an [`ErasedCall`].
pub struct Typed<C>(pub C);

#[async_trait]
impl<C: UnaryCall> ErasedCall for Typed<C> {
    fn path_params(&self) -> &'static [&'static str] {
        C::PATH_PARAMS
    }

    async fn invoke(
        &self,
        ctx: CallContext,
        fields: Map<String, Value>,
    ) -> Result<(Vec<u8>, ResponseMetadata), Status> {
        let request = decode_request::<C::Request>(fields)?;
        let reply = self.0.call(ctx, request).await?;
        Ok((encode_response(&reply.message)?, reply.metadata))
    }
}

/// Adapts an async closure into a [`UnaryCall`].
pub struct UnaryFn<Req, Resp, F> {
    f: F,
    _types: PhantomData<fn(Req) -> Resp>,
}

/// Builds a [`UnaryCall`] from `f`.
pub fn unary_fn<Req, Resp, F, Fut>(f: F) -> UnaryFn<Req, Resp, F>
where
    F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Reply<Resp>, Status>> + Send + 'static,
{
    UnaryFn {
        f,
        _types: PhantomData,
    }
}

#[async_trait]
impl<Req, Resp, F, Fut> UnaryCall for UnaryFn<Req, Resp, F>
where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    F: Fn(CallContext, Req) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Reply<Resp>, Status>> + Send + 'static,
{
    type Request = Req;
    type Response = Resp;

    async fn call(&self, ctx: CallContext, request: Req) -> Result<Reply<Resp>, Status> {
        (self.f)(ctx, request).await
    }
}

#[cfg(test)]
mod tests {
    use catalog_core::{Code, ComicFields, IdRequest, Stored};
    use serde_json::json;

    use super::*;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("not an object: {other}"),
        }
    }

    #[test]
    fn decode_applies_schema_defaults() {
        let comic: ComicFields = decode_request(object(json!({"title": "A", "extra": 1}))).unwrap();
        assert_eq!(comic.title, "A");
        assert_eq!(comic.year, 0);
        assert_eq!(comic.publisher, None);

        let id: IdRequest = decode_request(Map::new()).unwrap();
        assert_eq!(id.id, 0);
    }

    #[test]
    fn decode_type_error_is_invalid_argument() {
        let err = decode_request::<ComicFields>(object(json!({"year": "soon"}))).unwrap_err();
        assert_eq!(err.code, Code::InvalidArgument);
        assert!(err.message.contains("invalid type"));
    }

    #[test]
    fn stored_form_reencodes_stably() {
        let fields = object(json!({
            "id": 7, "title": "A", "author": "B", "year": 1999,
            "language": "en", "price": 9.99, "quantity": 3, "publisher": "P"
        }));
        let stored: Stored<ComicFields> = decode_request(fields.clone()).unwrap();
        let bytes = encode_response(&stored).unwrap();
        let back: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, Value::Object(fields));
    }

    #[tokio::test]
    async fn typed_wrapper_runs_closure() {
        let call = Typed(unary_fn(|ctx: CallContext, req: IdRequest| async move {
            Ok(Reply::new(json!({"id": req.id, "rid": ctx.request_id}))
                .with_metadata(ResponseMetadata::default().trailer("t", "1")))
        }));
        assert!(call.path_params().is_empty());

        let ctx = CallContext {
            request_id: Some("r1".to_string()),
            ..CallContext::default()
        };
        let (body, metadata) = call.invoke(ctx, object(json!({"id": 3}))).await.unwrap();
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({"id": 3, "rid": "r1"}));
        assert_eq!(metadata.trailers, vec![("t".to_string(), "1".to_string())]);
    }
}
