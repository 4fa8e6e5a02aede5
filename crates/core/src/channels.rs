//! Well-known notification channel name constants.
//!
//! Used by the `NOTIFY_PRIMARY_CHANNEL` / `NOTIFY_ALTERNATE_CHANNEL`
//! configuration and by the delivery layer when reporting which channel
//! acknowledged an alert.

/// Context object POSTed as JSON to an external HTTP endpoint.
pub const CHANNEL_WEBHOOK: &str = "webhook";

/// Context object rendered into a plain-text email via SMTP.
pub const CHANNEL_EMAIL: &str = "email";

/// Context object written to the structured log only.
pub const CHANNEL_LOG: &str = "log";

/// All channel names accepted in configuration.
pub const VALID_CHANNELS: &[&str] = &[CHANNEL_WEBHOOK, CHANNEL_EMAIL, CHANNEL_LOG];
