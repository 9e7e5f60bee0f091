//! Tower layers wrapped around the operation router.

pub mod concurrency;
pub mod deadline;
pub mod metrics;
pub mod pipeline;

pub use concurrency::ConcurrencyLimitLayer;
pub use deadline::DeadlineLayer;
pub use metrics::MetricsLayer;
pub use pipeline::{build_operation_pipeline, OperationPipeline};
