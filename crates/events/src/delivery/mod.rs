//! Notification delivery channels.
//!
//! A [`Notifier`] hands an alert's [`ContextObject`] to an external channel
//! that renders and sends the final message. Choosing between a primary and
//! an alternate channel is up to the caller, so each channel can sit behind
//! its own breaker.

pub mod email;
pub mod webhook;

use adwatch_core::channels::CHANNEL_LOG;
use adwatch_core::context::ContextObject;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use self::email::EmailError;
use self::webhook::WebhookError;

/// Who a notification is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Audience {
    /// The normal on-call recipients.
    Primary,
    /// Recipients of escalated alerts.
    Escalation,
}

impl Audience {
    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::Primary => "primary",
            Audience::Escalation => "escalation",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error(transparent)]
    Email(#[from] EmailError),

    #[error("Channel {0} is not configured")]
    NotConfigured(String),
}

/// An external notification channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Channel name as used in configuration.
    fn channel(&self) -> &'static str;

    async fn send(&self, context: &ContextObject, audience: Audience) -> Result<(), DeliveryError>;
}

// ---------------------------------------------------------------------------
// LogNotifier
// ---------------------------------------------------------------------------

/// Writes the context object to the structured log. Always succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    fn channel(&self) -> &'static str {
        CHANNEL_LOG
    }

    async fn send(&self, context: &ContextObject, audience: Audience) -> Result<(), DeliveryError> {
        let details = &context.alert_details;
        tracing::warn!(
            alert_id = %details.id,
            alert_type = details.alert_type.as_str(),
            severity = details.severity.as_str(),
            campaign_id = details.campaign_id.as_deref(),
            audience = audience.as_str(),
            context = %serde_json::to_string(context).unwrap_or_default(),
            "{}",
            details.message
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use adwatch_core::alert::{Alert, AlertKind, Severity};
    use adwatch_core::context::assemble;
    use chrono::Utc;

    use super::*;

    fn context() -> ContextObject {
        let now = Utc::now();
        let alert = Alert::new(
            AlertKind::SystemError {
                component: "test".into(),
                error: "boom".into(),
            },
            None,
            Severity::Critical,
            now,
        );
        assemble(&alert, None, None, None, now)
    }

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        LogNotifier.send(&context(), Audience::Escalation).await.unwrap();
    }

    #[test]
    fn audience_serializes_as_snake_case() {
        assert_eq!(serde_json::to_value(Audience::Escalation).unwrap(), "escalation");
        assert_eq!(Audience::Primary.as_str(), "primary");
    }
}
