//! Per-operation deadlines.
//!
//! Each operation runs for at most `ctx.call_timeout_ms`, bounded by the
//! layer's ceiling. A context timeout of zero means the caller expressed no
//! preference and the ceiling applies.
//!
//! The layer stamps the resulting [`CallDeadline`] on the context. Reads,
//! updates and deletes are cut off when it passes. Creates are not: the
//! create handler bounds its transaction by the deadline itself and, once
//! the row is committed, returns success instead of a timeout.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::warn;

use crate::service::operation::{CallDeadline, Operation, OperationError, OperationResponse};

#[derive(Debug, Clone, Copy)]
pub struct DeadlineLayer {
    ceiling_ms: u64,
}

impl DeadlineLayer {
    #[must_use]
    pub fn new(ceiling_ms: u64) -> Self {
        Self {
            ceiling_ms: ceiling_ms.max(1),
        }
    }

    fn effective_ms(self, requested_ms: u64) -> u64 {
        match requested_ms {
            0 => self.ceiling_ms,
            ms => ms.min(self.ceiling_ms),
        }
    }
}

impl<S> Layer<S> for DeadlineLayer {
    type Service = Deadline<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Deadline { inner, layer: *self }
    }
}

#[derive(Debug, Clone)]
pub struct Deadline<S> {
    inner: S,
    layer: DeadlineLayer,
}

impl<S> Service<Operation> for Deadline<S>
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

    fn call(&mut self, mut op: Operation) -> Self::Future {
        let deadline = CallDeadline::after_ms(self.layer.effective_ms(op.ctx().call_timeout_ms));
        op.ctx_mut().deadline = Some(deadline);
        let service = op.ctx().service_name;
        let call_id = op.ctx().call_id;
        let verb = op.verb();
        let self_bounded = matches!(op, Operation::Create { .. });
        let fut = self.inner.call(op);

        Box::pin(async move {
            let result = if self_bounded {
                fut.await
            } else {
                match tokio::time::timeout_at(deadline.at, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(deadline.exceeded()),
                }
            };
            if let Err(OperationError::Timeout { timeout_ms }) = &result {
                metrics::counter!(
                    "catalog_operations_timed_out_total",
                    "service" => service,
                    "verb" => verb
                )
                .increment(1);
                warn!(service, verb, call_id, timeout_ms = *timeout_ms, "operation deadline exceeded");
            }
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use catalog_core::{BookFields, Resource, ResourceFields, ResourceKind};
    use tower::ServiceExt;

    use super::*;
    use crate::service::operation::{service_names, OperationContext};

    /// Answers after `delay`: creates echo the book back, other operations
    /// report the deadline they were given.
    struct Delayed {
        delay: Duration,
    }

    impl Service<Operation> for Delayed {
        type Response = OperationResponse;
        type Error = OperationError;
        type Future =
            Pin<Box<dyn Future<Output = Result<OperationResponse, OperationError>> + Send>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, op: Operation) -> Self::Future {
            let delay = self.delay;
            Box::pin(async move {
                tokio::time::sleep(delay).await;
                match op {
                    Operation::Create { fields, .. } => {
                        Ok(OperationResponse::Resource(Resource { id: 1, fields }))
                    }
                    other => Ok(OperationResponse::Resource(Resource {
                        id: other.ctx().deadline.map_or(0, |d| d.timeout_ms),
                        fields: ResourceFields::Books(BookFields::default()),
                    })),
                }
            })
        }
    }

    fn create_book(timeout_ms: u64) -> Operation {
        Operation::Create {
            ctx: OperationContext::new(9, service_names::BOOKS, timeout_ms),
            fields: ResourceFields::Books(BookFields::default()),
        }
    }

    fn read_book(timeout_ms: u64) -> Operation {
        Operation::Read {
            ctx: OperationContext::new(9, service_names::BOOKS, timeout_ms),
            kind: ResourceKind::Books,
            id: 1,
        }
    }

    #[test]
    fn effective_deadline_is_bounded_by_ceiling() {
        let layer = DeadlineLayer::new(500);
        assert_eq!(layer.effective_ms(0), 500);
        assert_eq!(layer.effective_ms(120), 120);
        assert_eq!(layer.effective_ms(9_000), 500);
    }

    #[tokio::test(start_paused = true)]
    async fn fast_operation_sees_its_deadline() {
        let svc = DeadlineLayer::new(1_000).layer(Delayed {
            delay: Duration::from_millis(10),
        });
        let resp = svc.oneshot(read_book(300)).await.unwrap();
        assert_eq!(resp.into_resource().map(|r| r.id), Some(300));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_operation_reports_the_applied_deadline() {
        let svc = DeadlineLayer::new(50).layer(Delayed {
            delay: Duration::from_secs(5),
        });
        let err = svc.oneshot(read_book(0)).await.unwrap_err();
        assert!(matches!(err, OperationError::Timeout { timeout_ms: 50 }));
    }

    #[tokio::test(start_paused = true)]
    async fn creates_are_left_to_honor_the_deadline_themselves() {
        let svc = DeadlineLayer::new(50).layer(Delayed {
            delay: Duration::from_millis(200),
        });
        let resp = svc.oneshot(create_book(50)).await.unwrap();
        assert_eq!(resp.into_resource().map(|r| r.id), Some(1));
    }
}
