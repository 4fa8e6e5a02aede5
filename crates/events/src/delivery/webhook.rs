//! Webhook delivery with exponential-backoff retry.
//!
//! [`WebhookNotifier`] POSTs the JSON context object to an external URL.
//! Failed attempts are retried with backoff (1 s, 2 s, 4 s) before a final
//! attempt. Escalated alerts go to the escalation URL when one is set.

use std::time::Duration;

use adwatch_core::channels::CHANNEL_WEBHOOK;
use adwatch_core::context::ContextObject;
use async_trait::async_trait;

use super::{Audience, DeliveryError, Notifier};

/// Retry delays in seconds (exponential backoff: 1s, 2s, 4s).
const RETRY_DELAYS_SECS: [u64; 3] = [1, 2, 4];

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

// ---------------------------------------------------------------------------
// WebhookNotifier
// ---------------------------------------------------------------------------

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    escalation_url: Option<String>,
    retry_delays: Vec<Duration>,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, escalation_url: Option<String>) -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
            escalation_url,
            retry_delays: RETRY_DELAYS_SECS.iter().map(|s| Duration::from_secs(*s)).collect(),
        })
    }

    /// Override the backoff schedule.
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    /// Target URL for an audience.
    pub fn url_for(&self, audience: Audience) -> &str {
        match (audience, &self.escalation_url) {
            (Audience::Escalation, Some(url)) => url,
            _ => &self.url,
        }
    }

    /// Deliver a context object with retry.
    pub async fn deliver(&self, url: &str, context: &ContextObject) -> Result<(), WebhookError> {
        for (attempt, delay) in self.retry_delays.iter().enumerate() {
            match self.try_send(url, context).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        url,
                        error = %e,
                        "Webhook delivery attempt failed, retrying"
                    );
                    tokio::time::sleep(*delay).await;
                }
            }
        }

        // Final attempt after the last backoff.
        self.try_send(url, context).await.inspect_err(|e| {
            tracing::error!(url, error = %e, "Webhook delivery failed after all retries");
        })
    }

    /// Execute a single POST request and check the response status.
    async fn try_send(&self, url: &str, context: &ContextObject) -> Result<(), WebhookError> {
        let response = self.client.post(url).json(context).send().await?;
        if !response.status().is_success() {
            return Err(WebhookError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    fn channel(&self) -> &'static str {
        CHANNEL_WEBHOOK
    }

    async fn send(&self, context: &ContextObject, audience: Audience) -> Result<(), DeliveryError> {
        let url = self.url_for(audience);
        self.deliver(url, context).await?;
        tracing::info!(
            alert_id = %context.alert_details.id,
            url,
            audience = audience.as_str(),
            "Webhook notification delivered"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
