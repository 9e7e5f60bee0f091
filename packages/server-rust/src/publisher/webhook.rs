//! Publisher that POSTs each payload to an HTTP endpoint.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::PublishError;
use crate::traits::EventPublisher;

/// POSTs payloads to `{base_url}/{topic}` with `Content-Type: application/json`.
///
/// Any 2xx response is an acknowledgment. Other statuses map to
/// [`PublishError::Rejected`].
#[derive(Debug, Clone)]
pub struct WebhookPublisher {
    client: reqwest::Client,
    base_url: String,
}

impl WebhookPublisher {
    /// Creates a publisher with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::Transport` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn topic_url(&self, topic: &str) -> String {
        format!("{}/{topic}", self.base_url)
    }
}

#[async_trait]
impl EventPublisher for WebhookPublisher {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        let url = self.topic_url(topic);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PublishError::Timeout
                } else {
                    PublishError::Transport(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::Rejected {
                status: status.as_u16(),
            });
        }
        debug!(%url, %status, "webhook acknowledged");
        Ok(())
    }
}
