//! HTTP surfaces: configuration, middleware, handlers, lifecycle, shutdown.

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::{NetworkConfig, TlsConfig};
pub use handlers::AppState;
pub use module::{NetworkModule, RequestHandlers};
pub use shutdown::{HealthState, InFlightGuard, ShutdownController};
