//! Catalog server: HTTP/JSON gateway and MsgPack RPC over per-kind CRUD
//! services, with a transactional outbox for creation notifications.

pub mod app;
pub mod gateway;
pub mod network;
pub mod outbox;
pub mod publisher;
pub mod service;
pub mod storage;
pub mod traits;

pub use app::{Catalog, CatalogConfig};
pub use traits::{EventPublisher, OutboxStore, ResourceStore, StoreTransaction};
