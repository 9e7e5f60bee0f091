//! Concurrency cap for the operation pipeline.
//!
//! Operations beyond `max_concurrent_operations` fail immediately with
//! `OperationError::Overloaded`. Nothing is queued.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tower::{Layer, Service};
use tracing::warn;

use crate::service::operation::{Operation, OperationError, OperationResponse};

/// Shared permit pool. Every service produced by one layer draws from the
/// same pool.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimitLayer {
    permits: Arc<Semaphore>,
    limit: usize,
}

impl ConcurrencyLimitLayer {
    #[must_use]
    pub fn new(max_concurrent: u32) -> Self {
        let limit = usize::try_from(max_concurrent).unwrap_or(usize::MAX).max(1);
        Self {
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Operations currently holding a permit.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.limit - self.permits.available_permits()
    }
}

impl<S> Layer<S> for ConcurrencyLimitLayer {
    type Service = ConcurrencyLimit<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ConcurrencyLimit {
            inner,
            permits: Arc::clone(&self.permits),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConcurrencyLimit<S> {
    inner: S,
    permits: Arc<Semaphore>,
}

impl<S> ConcurrencyLimit<S> {
    fn shed(op: &Operation) -> OperationError {
        let ctx = op.ctx();
        metrics::counter!(
            "catalog_operations_shed_total",
            "service" => ctx.service_name,
            "verb" => op.verb()
        )
        .increment(1);
        warn!(
            service = ctx.service_name,
            verb = op.verb(),
            call_id = ctx.call_id,
            "operation shed: concurrency limit reached"
        );
        OperationError::Overloaded
    }
}

impl<S> Service<Operation> for ConcurrencyLimit<S>
where
    S: Service<Operation, Response = OperationResponse, Error = OperationError> + Send,
    S::Future: Send + 'static,
{
    type Response = OperationResponse;
    type Error = OperationError;
    type Future = Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, op: Operation) -> Self::Future {
        let permit: OwnedSemaphorePermit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                let err = Self::shed(&op);
                return Box::pin(std::future::ready(Err(err)));
            }
        };
        let fut = self.inner.call(op);
        Box::pin(async move {
            let _permit = permit;
            fut.await
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use catalog_core::{Resource, ResourceFields, ResourceKind, UserFields};
    use tokio::sync::Notify;
    use tower::ServiceExt;

    use super::*;
    use crate::service::operation::{service_names, OperationContext};

    /// Answers every read only after the gate is opened.
    #[derive(Clone)]
    struct GatedUsers {
        gate: Arc<Notify>,
    }

    impl Service<Operation> for GatedUsers {
        type Response = OperationResponse;
        type Error = OperationError;
        type Future =
            Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _op: Operation) -> Self::Future {
            let gate = Arc::clone(&self.gate);
            Box::pin(async move {
                gate.notified().await;
                Ok(OperationResponse::Resource(Resource {
                    id: 1,
                    fields: ResourceFields::Users(UserFields::default()),
                }))
            })
        }
    }

    fn read_user() -> Operation {
        Operation::Read {
            ctx: OperationContext::new(3, service_names::USERS, 5000),
            kind: ResourceKind::Users,
            id: 1,
        }
    }

    #[tokio::test]
    async fn second_operation_is_shed_while_first_holds_the_permit() {
        let gate = Arc::new(Notify::new());
        let layer = ConcurrencyLimitLayer::new(1);
        let mut svc = layer.layer(GatedUsers {
            gate: Arc::clone(&gate),
        });

        let first = svc.call(read_user());
        assert_eq!(layer.in_flight(), 1);

        let err = svc.call(read_user()).await.unwrap_err();
        assert!(matches!(err, OperationError::Overloaded));

        gate.notify_one();
        assert!(first.await.is_ok());
        assert_eq!(layer.in_flight(), 0);
    }

    #[tokio::test]
    async fn services_from_one_layer_share_the_pool() {
        let gate = Arc::new(Notify::new());
        let layer = ConcurrencyLimitLayer::new(1);
        let mut a = layer.layer(GatedUsers {
            gate: Arc::clone(&gate),
        });
        let b = layer.layer(GatedUsers {
            gate: Arc::clone(&gate),
        });

        let held = a.call(read_user());
        assert!(matches!(
            b.oneshot(read_user()).await,
            Err(OperationError::Overloaded)
        ));
        drop(held);
        assert_eq!(layer.in_flight(), 0);
    }

    #[test]
    fn zero_limit_still_admits_one() {
        assert_eq!(ConcurrencyLimitLayer::new(0).permits.available_permits(), 1);
    }
}
