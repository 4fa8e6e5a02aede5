//! Email notification delivery via SMTP.
//!
//! [`EmailNotifier`] wraps the `lettre` async SMTP transport and sends a
//! plain-text digest of the context object, with the full JSON attached
//! inline for the downstream renderer. Configuration is loaded from
//! environment variables; if `SMTP_HOST` is not set,
//! [`EmailConfig::from_env`] returns `None` and no mailer is constructed.

use adwatch_core::channels::CHANNEL_EMAIL;
use adwatch_core::context::ContextObject;
use async_trait::async_trait;

use super::{Audience, DeliveryError, Notifier};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EmailError {
    /// SMTP transport-level failure (authentication, connection, etc.).
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),

    /// The recipient or sender address could not be parsed.
    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// The MIME message could not be assembled.
    #[error("Email build error: {0}")]
    Build(String),

    #[error("No recipients configured")]
    NoRecipients,
}

// ---------------------------------------------------------------------------
// EmailConfig
// ---------------------------------------------------------------------------

/// Default SMTP port (STARTTLS).
const DEFAULT_SMTP_PORT: u16 = 587;

/// Default sender address when `SMTP_FROM` is not set.
const DEFAULT_FROM_ADDRESS: &str = "adwatch@localhost";

#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    /// RFC 5322 "From" address.
    pub from_address: String,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    /// Recipients of every alert.
    pub recipients: Vec<String>,
    /// Recipients of escalated alerts. Falls back to `recipients` when empty.
    pub escalation_recipients: Vec<String>,
}

impl EmailConfig {
    /// Load configuration from environment variables.
    ///
    /// Returns `None` if `SMTP_HOST` is not set.
    ///
    /// | Variable                  | Required | Default             |
    /// |---------------------------|----------|---------------------|
    /// | `SMTP_HOST`               | yes      |                     |
    /// | `SMTP_PORT`               | no       | `587`               |
    /// | `SMTP_FROM`               | no       | `adwatch@localhost` |
    /// | `SMTP_USER`               | no       |                     |
    /// | `SMTP_PASSWORD`           | no       |                     |
    /// | `ALERT_EMAIL_TO`          | no       | empty (comma list)  |
    /// | `ALERT_EMAIL_ESCALATE_TO` | no       | empty (comma list)  |
    pub fn from_env() -> Option<Self> {
        let smtp_host = std::env::var("SMTP_HOST").ok()?;
        Some(Self {
            smtp_host,
            smtp_port: std::env::var("SMTP_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(DEFAULT_SMTP_PORT),
            from_address: std::env::var("SMTP_FROM")
                .unwrap_or_else(|_| DEFAULT_FROM_ADDRESS.to_string()),
            smtp_user: std::env::var("SMTP_USER").ok(),
            smtp_password: std::env::var("SMTP_PASSWORD").ok(),
            recipients: split_list(&std::env::var("ALERT_EMAIL_TO").unwrap_or_default()),
            escalation_recipients: split_list(
                &std::env::var("ALERT_EMAIL_ESCALATE_TO").unwrap_or_default(),
            ),
        })
    }

    pub fn recipients_for(&self, audience: Audience) -> &[String] {
        match audience {
            Audience::Escalation if !self.escalation_recipients.is_empty() => {
                &self.escalation_recipients
            }
            _ => &self.recipients,
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Subject and plain-text body for a context object.
pub fn render(context: &ContextObject, audience: Audience) -> (String, String) {
    let details = &context.alert_details;
    let prefix = match audience {
        Audience::Escalation => "[adwatch][ESCALATED]",
        Audience::Primary => "[adwatch]",
    };
    let subject = format!(
        "{prefix}[{}] {}",
        details.severity.as_str(),
        details.alert_type.as_str()
    );

    let mut body = format!(
        "Alert: {}\nSeverity: {}\nStatus: {}\nCampaign: {}\nTime: {}\n\n{}\n",
        details.id,
        details.severity.as_str(),
        details.status.as_str(),
        details.campaign_id.as_deref().unwrap_or("-"),
        details.timestamp,
        details.message,
    );
    if !context.recommended_actions.is_empty() {
        body.push_str("\nRecommended actions:\n");
        for (i, action) in context.recommended_actions.iter().enumerate() {
            body.push_str(&format!("  {}. {action}\n", i + 1));
        }
    }
    body.push_str("\nContext:\n");
    body.push_str(&serde_json::to_string_pretty(context).unwrap_or_default());
    (subject, body)
}

// ---------------------------------------------------------------------------
// EmailNotifier
// ---------------------------------------------------------------------------

pub struct EmailNotifier {
    config: EmailConfig,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig) -> Self {
        Self { config }
    }

    /// Send the rendered context to every recipient for `audience`.
    pub async fn deliver(&self, context: &ContextObject, audience: Audience) -> Result<(), EmailError> {
        use lettre::{
            message::header::ContentType, transport::smtp::authentication::Credentials,
            AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
        };

        let recipients = self.config.recipients_for(audience);
        if recipients.is_empty() {
            return Err(EmailError::NoRecipients);
        }

        let (subject, body) = render(context, audience);

        let mut builder = Message::builder()
            .from(self.config.from_address.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN);
        for to in recipients {
            builder = builder.to(to.parse()?);
        }
        let email = builder
            .body(body)
            .map_err(|e| EmailError::Build(e.to_string()))?;

        let mut transport_builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)?
                .port(self.config.smtp_port);

        if let (Some(user), Some(pass)) = (&self.config.smtp_user, &self.config.smtp_password) {
            transport_builder =
                transport_builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let mailer = transport_builder.build();
        mailer.send(email).await?;

        tracing::info!(
            recipients = recipients.len(),
            alert_id = %context.alert_details.id,
            audience = audience.as_str(),
            "Notification email sent"
        );
        Ok(())
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    fn channel(&self) -> &'static str {
        CHANNEL_EMAIL
    }

    async fn send(&self, context: &ContextObject, audience: Audience) -> Result<(), DeliveryError> {
        Ok(self.deliver(context, audience).await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
