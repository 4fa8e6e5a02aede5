//! Event bus, event journal, and notification delivery for the monitor.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`MonitorEvent`]: the closed set of things that happen to campaigns,
//!   dependencies, and the monitor itself.
//! - [`EventJournal`]: background subscriber appending every event to a
//!   JSON-lines file.
//! - [`delivery`]: notification channels (webhook, email, log) behind the
//!   [`Notifier`] trait.

pub mod bus;
pub mod delivery;
pub mod persistence;

pub use bus::{EventBus, EventEnvelope, MonitorEvent};
pub use delivery::email::{EmailConfig, EmailNotifier};
pub use delivery::webhook::WebhookNotifier;
pub use delivery::{Audience, DeliveryError, LogNotifier, Notifier};
pub use persistence::EventJournal;
