//! Per-operation span, duration histogram and outcome counter.
//!
//! The outcome label is the canonical status code name (`Ok`, `NotFound`,
//! `Internal`, ...), so dashboards line up with what HTTP and RPC callers see.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use catalog_core::Code;
use tower::{Layer, Service};
use tracing::{info_span, Instrument, Span};

use crate::service::operation::{Operation, OperationError, OperationResponse};

#[derive(Debug, Clone, Copy)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

/// Labels captured before the operation is handed to the inner service.
struct Observation {
    service: &'static str,
    verb: &'static str,
    origin: &'static str,
    call_id: u64,
    started: Instant,
}

impl Observation {
    fn begin(op: &Operation) -> (Self, Span) {
        let ctx = op.ctx();
        let span = info_span!(
            "operation",
            service = ctx.service_name,
            verb = op.verb(),
            origin = ctx.caller_origin.as_str(),
            call_id = ctx.call_id,
            request_id = ctx.request_id.as_deref().unwrap_or(""),
            outcome = tracing::field::Empty,
        );
        let observation = Self {
            service: ctx.service_name,
            verb: op.verb(),
            origin: ctx.caller_origin.as_str(),
            call_id: ctx.call_id,
            started: Instant::now(),
        };
        (observation, span)
    }

    fn finish(self, result: &Result<OperationResponse, OperationError>) {
        let elapsed = self.started.elapsed();
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        let outcome = outcome(result);
        Span::current().record("outcome", outcome);

        metrics::histogram!(
            "catalog_operation_duration_seconds",
            "service" => self.service,
            "verb" => self.verb
        )
        .record(elapsed.as_secs_f64());
        metrics::counter!(
            "catalog_operations_total",
            "service" => self.service,
            "verb" => self.verb,
            "origin" => self.origin,
            "outcome" => outcome
        )
        .increment(1);

        match result {
            Err(e) if e.code() == Code::Internal => tracing::error!(
                call_id = self.call_id,
                elapsed_ms,
                error = %e,
                "operation failed"
            ),
            _ => tracing::debug!(
                call_id = self.call_id,
                elapsed_ms,
                outcome,
                "operation complete"
            ),
        }
    }
}

fn outcome(result: &Result<OperationResponse, OperationError>) -> &'static str {
    match result {
        Ok(_) => Code::Ok.name(),
        Err(e) => e.code().name(),
    }
}

impl<S> Service<Operation> for MetricsService<S>
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
        let (observation, span) = Observation::begin(&op);
        let fut = self.inner.call(op);
        Box::pin(
            async move {
                let result = fut.await;
                observation.finish(&result);
                result
            }
            .instrument(span),
        )
    }
}
