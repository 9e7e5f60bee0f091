//! Event publisher adapters.
//!
//! - [`ChannelPublisher`]: in-process broadcast channel with an availability
//!   switch and an attempt counter
//! - [`WebhookPublisher`]: HTTP POST of each payload to `{base_url}/{topic}`

mod channel;
mod webhook;

pub use channel::{ChannelPublisher, PublishedMessage};
pub use webhook::WebhookPublisher;

/// Errors surfaced by publisher adapters.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("publisher unavailable: {0}")]
    Unavailable(String),
    #[error("publish rejected with status {status}")]
    Rejected { status: u16 },
    #[error("publish timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}
