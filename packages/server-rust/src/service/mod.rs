//! Operation routing and execution framework.
//!
//! This module implements the service-oriented operation pipeline:
//!
//! 1. **Classification** (`classify`): `RpcRequest` -> `Operation`, with a fresh call context
//! 2. **Middleware** (`middleware`): Tower layers (concurrency cap, deadline, metrics)
//! 3. **Routing** (`router`): Dispatch to the service mounted for the operation's kind
//! 4. **Domain services** (`domain`): CRUD per resource kind
//! 5. **Dispatch** (`dispatcher`): shared, lock-light entry into the pipeline
//! 6. **Lifecycle** (`registry`, `worker`): managed services and periodic workers

pub mod classify;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod middleware;
pub mod operation;
pub mod registry;
pub mod router;
pub mod worker;

// Re-export key types for convenient access.
pub use classify::OperationService;
pub use config::ServerConfig;
pub use dispatcher::RpcDispatcher;
pub use domain::{ResourceService, StoreService};
pub use middleware::{build_operation_pipeline, OperationPipeline};
pub use operation::{
    service_names, CallDeadline, CallerOrigin, Operation, OperationContext, OperationError,
    OperationResponse,
};
pub use registry::{ManagedService, ServiceContext, ServiceRegistry, ServiceState};
pub use router::OperationRouter;
pub use worker::{PeriodicTask, PeriodicWorker, WorkerConfig};
