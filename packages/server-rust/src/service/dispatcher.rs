//! Shared entry point into the operation pipeline.

use tokio::sync::Mutex;
use tower::{Service, ServiceExt};

use super::middleware::OperationPipeline;
use super::operation::{Operation, OperationError, OperationResponse};

/// Shares one operation pipeline between every request task.
///
/// The lock is held only for `poll_ready` and `call`; the returned future
/// runs outside it, so slow operations do not serialize.
pub struct RpcDispatcher {
    pipeline: Mutex<OperationPipeline>,
}

impl RpcDispatcher {
    #[must_use]
    pub fn new(pipeline: OperationPipeline) -> Self {
        Self {
            pipeline: Mutex::new(pipeline),
        }
    }

    /// Runs `op` through the pipeline.
    ///
    /// # Errors
    ///
    /// Returns whatever `OperationError` the pipeline or the target service
    /// produced.
    pub async fn dispatch(&self, op: Operation) -> Result<OperationResponse, OperationError> {
        let fut = {
            let mut pipeline = self.pipeline.lock().await;
            pipeline.ready().await?.call(op)
        };
        fut.await
    }
}
