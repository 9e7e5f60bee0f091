//! In-process publisher backed by a `tokio::sync::broadcast` channel.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use super::PublishError;
use crate::traits::EventPublisher;

const CHANNEL_CAPACITY: usize = 1024;

/// A payload accepted by a [`ChannelPublisher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

struct Inner {
    available: AtomicBool,
    attempts: AtomicU64,
    delivered: Mutex<VecDeque<PublishedMessage>>,
    /// Oldest messages are dropped beyond this many.
    history_limit: Option<usize>,
    sender: broadcast::Sender<PublishedMessage>,
}

/// Publisher that keeps every acknowledged message in memory and fans it out
/// to subscribers.
///
/// Turning availability off makes `publish` fail, which is how tests model
/// an unreachable broker. Clones share state.
#[derive(Clone)]
pub struct ChannelPublisher {
    inner: Arc<Inner>,
}

impl ChannelPublisher {
    /// Publisher that remembers every acknowledged message.
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Publisher that remembers only the last `limit` messages.
    #[must_use]
    pub fn with_history_limit(limit: usize) -> Self {
        Self::build(Some(limit))
    }

    fn build(history_limit: Option<usize>) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                available: AtomicBool::new(true),
                attempts: AtomicU64::new(0),
                delivered: Mutex::new(VecDeque::new()),
                history_limit,
                sender,
            }),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Number of `publish` calls, successful or not.
    #[must_use]
    pub fn attempt_count(&self) -> u64 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Acknowledged messages still in the history, in publish order.
    #[must_use]
    pub fn delivered(&self) -> Vec<PublishedMessage> {
        self.inner.delivered.lock().iter().cloned().collect()
    }

    /// Receives every message acknowledged after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedMessage> {
        self.inner.sender.subscribe()
    }
}

impl Default for ChannelPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for ChannelPublisher {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.inner.available.load(Ordering::SeqCst) {
            return Err(PublishError::Unavailable(format!(
                "channel for topic {topic} is down"
            )));
        }
        let message = PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        };
        {
            let mut delivered = self.inner.delivered.lock();
            if let Some(limit) = self.inner.history_limit {
                while delivered.len() >= limit.max(1) {
                    delivered.pop_front();
                }
            }
            delivered.push_back(message.clone());
        }
        // No subscribers is fine; the message is still recorded.
        let receivers = self.inner.sender.send(message).unwrap_or(0);
        debug!(topic, receivers, "published to channel");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_broadcasts_acknowledged_messages() {
        let publisher = ChannelPublisher::new();
        let mut rx = publisher.subscribe();

        publisher.publish("books", b"one").await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.topic, "books");
        assert_eq!(received.payload, b"one");
        assert_eq!(publisher.delivered(), vec![received]);
        assert_eq!(publisher.attempt_count(), 1);
    }

    #[tokio::test]
    async fn unavailable_publisher_counts_attempt_but_delivers_nothing() {
        let publisher = ChannelPublisher::new();
        publisher.set_available(false);

        let err = publisher.publish("books", b"one").await.unwrap_err();
        assert!(matches!(err, PublishError::Unavailable(_)));
        assert_eq!(publisher.attempt_count(), 1);
        assert!(publisher.delivered().is_empty());

        publisher.set_available(true);
        publisher.publish("books", b"one").await.unwrap();
        assert_eq!(publisher.delivered().len(), 1);
    }

    #[tokio::test]
    async fn history_limit_keeps_the_newest_messages() {
        let publisher = ChannelPublisher::with_history_limit(2);
        for payload in [&b"1"[..], &b"2"[..], &b"3"[..]] {
            publisher.publish("books", payload).await.unwrap();
        }
        let payloads: Vec<Vec<u8>> = publisher.delivered().into_iter().map(|m| m.payload).collect();
        assert_eq!(payloads, vec![b"2".to_vec(), b"3".to_vec()]);
        assert_eq!(publisher.attempt_count(), 3);
    }
}
