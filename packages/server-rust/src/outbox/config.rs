//! Outbox relay and notification configuration.

use std::collections::BTreeMap;
use std::time::Duration;

use catalog_core::ResourceKind;

/// Timing and retry limits for the create-notify path and the outbox relay.
#[derive(Debug, Clone)]
pub struct OutboxConfig {
    /// Interval between relay sweeps in milliseconds.
    pub relay_interval_ms: u64,
    /// Minimum age of a pending entry before the relay retries it, so the
    /// relay does not race an inline publish that is still in flight.
    pub grace_ms: u64,
    /// Attempts after which an entry is reported as stuck and left alone.
    pub max_attempts: u32,
    /// Maximum entries handled per sweep.
    pub batch_size: usize,
    /// Timeout for a single publish attempt.
    pub publish_timeout_ms: u64,
}

impl OutboxConfig {
    #[must_use]
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            relay_interval_ms: 5_000,
            grace_ms: 10_000,
            max_attempts: 10,
            batch_size: 100,
            publish_timeout_ms: 2_000,
        }
    }
}

/// Which resource kinds notify on create, and on which topic.
#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub topics: BTreeMap<ResourceKind, String>,
}

impl NotificationConfig {
    /// No kind notifies.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            topics: BTreeMap::new(),
        }
    }

    /// Adds or replaces the topic for `kind`.
    #[must_use]
    pub fn with_topic(mut self, kind: ResourceKind, topic: impl Into<String>) -> Self {
        self.topics.insert(kind, topic.into());
        self
    }

    #[must_use]
    pub fn topic_for(&self, kind: ResourceKind) -> Option<&str> {
        self.topics.get(&kind).map(String::as_str)
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self::disabled().with_topic(ResourceKind::Books, "book_creation_queue")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbox_config_defaults() {
        let config = OutboxConfig::default();
        assert_eq!(config.max_attempts, 10);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.publish_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn books_notify_by_default() {
        let config = NotificationConfig::default();
        assert_eq!(config.topic_for(ResourceKind::Books), Some("book_creation_queue"));
        assert_eq!(config.topic_for(ResourceKind::Comics), None);
    }

    #[test]
    fn with_topic_replaces_existing() {
        let config = NotificationConfig::default().with_topic(ResourceKind::Books, "books.created");
        assert_eq!(config.topic_for(ResourceKind::Books), Some("books.created"));
    }
}
