//! Assembles the operation pipeline.

use tower::util::BoxService;
use tower::ServiceBuilder;

use super::concurrency::ConcurrencyLimitLayer;
use super::deadline::DeadlineLayer;
use super::metrics::MetricsLayer;
use crate::service::config::ServerConfig;
use crate::service::operation::{Operation, OperationError, OperationResponse};
use crate::service::router::OperationRouter;

/// The assembled, type-erased operation pipeline.
pub type OperationPipeline = BoxService<Operation, OperationResponse, OperationError>;

/// Wraps `router` so that operations are shed first, then given a deadline,
/// then timed. Shed operations and reads, updates or deletes cut off by the
/// deadline never complete inside `MetricsLayer`; the outer layers count
/// them.
#[must_use]
pub fn build_operation_pipeline(router: OperationRouter, config: &ServerConfig) -> OperationPipeline {
    BoxService::new(
        ServiceBuilder::new()
            .layer(ConcurrencyLimitLayer::new(config.max_concurrent_operations))
            .layer(DeadlineLayer::new(config.default_operation_timeout_ms))
            .layer(MetricsLayer)
            .service(router),
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use catalog_core::{DeleteResponse, ResourceKind};
    use tower::{Service, ServiceExt};

    use super::*;
    use crate::service::operation::{service_names, OperationContext};

    /// Deletes succeed after `delay_ms`.
    struct StubService {
        delay_ms: u64,
    }

    impl Service<Operation> for StubService {
        type Response = OperationResponse;
        type Error = OperationError;
        type Future =
            Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _op: Operation) -> Self::Future {
            let delay = self.delay_ms;
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok(OperationResponse::Deleted(DeleteResponse { success: true }))
            })
        }
    }

    fn make_op(timeout_ms: u64) -> Operation {
        Operation::Delete {
            ctx: OperationContext::new(42, service_names::BOOKS, timeout_ms),
            kind: ResourceKind::Books,
            id: 1,
        }
    }

    #[tokio::test]
    async fn pipeline_routes_through_all_layers() {
        let mut router = OperationRouter::new();
        router.register(ResourceKind::Books, StubService { delay_ms: 0 });

        let svc = build_operation_pipeline(router, &ServerConfig::default());
        let resp = svc.oneshot(make_op(5000)).await.unwrap();
        assert_eq!(resp, OperationResponse::Deleted(DeleteResponse { success: true }));
    }

    #[tokio::test]
    async fn pipeline_enforces_call_timeout() {
        let mut router = OperationRouter::new();
        router.register(ResourceKind::Books, StubService { delay_ms: 200 });

        let svc = build_operation_pipeline(router, &ServerConfig::default());
        let err = svc.oneshot(make_op(20)).await.unwrap_err();
        assert!(matches!(err, OperationError::Timeout { timeout_ms: 20 }));
    }
}
