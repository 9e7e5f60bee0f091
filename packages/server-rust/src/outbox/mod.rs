//! Reliable create-notify: transactional outbox, inline publish, and the
//! background relay.
//!
//! 1. **Coordinator** (`coordinator`): row + `pending` entry in one
//!    transaction, then one best-effort publish on a spawned task, waited
//!    on only until the caller's deadline
//! 2. **Relay** (`relay`): periodic sweep of old `pending` entries below the
//!    attempt limit; an entry is reported stuck once, on the failed attempt
//!    that reaches the limit

pub mod config;
pub mod coordinator;
pub mod relay;

pub use config::{NotificationConfig, OutboxConfig};
pub use coordinator::{
    deliver_entry, CreateError, CreateNotifyCoordinator, CreatedResource, DeliveryOutcome,
    NotificationStatus,
};
pub use relay::{OutboxRelay, OutboxRelayService, RelayTask, SweepReport};
