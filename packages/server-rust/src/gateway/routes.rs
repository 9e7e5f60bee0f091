//! Route tables binding the four CRUD verbs of a resource schema.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::Method;
use catalog_core::{DeleteResponse, IdRequest, ResourceSchema, Status, Stored};

use super::marshal::{CallContext, Reply, ResponseMetadata, UnaryCall};
use super::{BodyRule, ConfigurationError, Gateway};
use crate::service::{
    CallerOrigin, Operation, OperationContext, OperationResponse, OperationService, RpcDispatcher,
};

/// Installs `POST /{kind}`, `GET /{kind}/{id}`, `PUT /{kind}/{id}` and
/// `DELETE /{kind}/{id}` for schema `F`.
///
/// # Errors
///
/// Returns `ConfigurationError` if any of the routes clashes with one
/// already registered.
pub fn register_resource_routes<F: ResourceSchema>(
    gateway: &mut Gateway,
    dispatcher: Arc<RpcDispatcher>,
    operations: Arc<OperationService>,
) -> Result<(), ConfigurationError> {
    let collection = format!("/{}", F::KIND.as_str());
    let item = format!("{collection}/{{id}}");
    let calls = ResourceCalls::<F> {
        dispatcher,
        operations,
        _schema: PhantomData,
    };

    gateway.register_route(Method::POST, &collection, BodyRule::Required, CreateCall(calls.clone()))?;
    gateway.register_route(Method::GET, &item, BodyRule::Ignored, ReadCall(calls.clone()))?;
    gateway.register_route(Method::PUT, &item, BodyRule::Required, UpdateCall(calls.clone()))?;
    gateway.register_route(Method::DELETE, &item, BodyRule::Ignored, DeleteCall(calls))?;
    Ok(())
}

/// What every resource call needs to reach the pipeline.
struct ResourceCalls<F> {
    dispatcher: Arc<RpcDispatcher>,
    operations: Arc<OperationService>,
    _schema: PhantomData<fn() -> F>,
}

impl<F> Clone for ResourceCalls<F> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            operations: Arc::clone(&self.operations),
            _schema: PhantomData,
        }
    }
}

impl<F: ResourceSchema> ResourceCalls<F> {
    fn context(&self, ctx: CallContext) -> OperationContext {
        let timeout_ms = ctx
            .timeout
            .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX));
        self.operations
            .make_ctx(F::KIND, CallerOrigin::Gateway, ctx.request_id, timeout_ms)
    }

    async fn dispatch(&self, op: Operation) -> Result<(OperationResponse, ResponseMetadata), Status> {
        let metadata = ResponseMetadata::default()
            .header("resource-kind", F::KIND.as_str())
            .trailer("call-id", op.ctx().call_id.to_string());
        let response = self.dispatcher.dispatch(op).await.map_err(|e| e.status())?;
        Ok((response, metadata))
    }

    fn stored(response: OperationResponse) -> Result<Stored<F>, Status> {
        response
            .into_resource()
            .ok_or_else(|| Status::internal("operation returned no resource"))?
            .into_stored::<F>()
            .map_err(|e| Status::internal(e.to_string()))
    }
}

struct CreateCall<F>(ResourceCalls<F>);

#[async_trait]
impl<F: ResourceSchema> UnaryCall for CreateCall<F> {
    type Request = F;
    type Response = Stored<F>;

    async fn call(&self, ctx: CallContext, fields: F) -> Result<Reply<Stored<F>>, Status> {
        let op = Operation::Create {
            ctx: self.0.context(ctx),
            fields: fields.into_fields(),
        };
        let (response, mut metadata) = self.0.dispatch(op).await?;
        if let OperationResponse::Created { notification, .. } = &response {
            metadata = metadata.header("notification", notification.as_str());
        }
        Ok(Reply::new(ResourceCalls::<F>::stored(response)?).with_metadata(metadata))
    }
}

struct ReadCall<F>(ResourceCalls<F>);

#[async_trait]
impl<F: ResourceSchema> UnaryCall for ReadCall<F> {
    type Request = IdRequest;
    type Response = Stored<F>;
    const PATH_PARAMS: &'static [&'static str] = &["id"];

    async fn call(&self, ctx: CallContext, req: IdRequest) -> Result<Reply<Stored<F>>, Status> {
        let op = Operation::Read {
            ctx: self.0.context(ctx),
            kind: F::KIND,
            id: req.id,
        };
        let (response, metadata) = self.0.dispatch(op).await?;
        Ok(Reply::new(ResourceCalls::<F>::stored(response)?).with_metadata(metadata))
    }
}

struct UpdateCall<F>(ResourceCalls<F>);

#[async_trait]
impl<F: ResourceSchema> UnaryCall for UpdateCall<F> {
    type Request = Stored<F>;
    type Response = Stored<F>;
    const PATH_PARAMS: &'static [&'static str] = &["id"];

    async fn call(&self, ctx: CallContext, req: Stored<F>) -> Result<Reply<Stored<F>>, Status> {
        let op = Operation::Update {
            ctx: self.0.context(ctx),
            id: req.id,
            fields: req.fields.into_fields(),
        };
        let (response, metadata) = self.0.dispatch(op).await?;
        Ok(Reply::new(ResourceCalls::<F>::stored(response)?).with_metadata(metadata))
    }
}

struct DeleteCall<F>(ResourceCalls<F>);

#[async_trait]
impl<F: ResourceSchema> UnaryCall for DeleteCall<F> {
    type Request = IdRequest;
    type Response = DeleteResponse;
    const PATH_PARAMS: &'static [&'static str] = &["id"];

    async fn call(&self, ctx: CallContext, req: IdRequest) -> Result<Reply<DeleteResponse>, Status> {
        let op = Operation::Delete {
            ctx: self.0.context(ctx),
            kind: F::KIND,
            id: req.id,
        };
        match self.0.dispatch(op).await? {
            (OperationResponse::Deleted(deleted), metadata) => {
                Ok(Reply::new(deleted).with_metadata(metadata))
            }
            _ => Err(Status::internal("delete returned a resource")),
        }
    }
}
