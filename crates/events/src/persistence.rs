//! Append-only event journal.
//!
//! [`EventJournal`] subscribes to the [`EventBus`](crate::bus::EventBus) and
//! appends every received [`EventEnvelope`] as one JSON line to
//! `events.jsonl` in the state directory. It runs as a long-lived background
//! task and shuts down when the bus sender is dropped.
//!
//! With [`EventJournal::reporting_to`] the first failed append of a streak is
//! published back on the bus as a `system_error`. Only a weak handle is kept,
//! so the journal never holds the bus open.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;

use crate::bus::{EventBus, EventEnvelope, MonitorEvent};

/// File name of the journal inside the state directory.
pub const JOURNAL_FILE_NAME: &str = "events.jsonl";

/// Component name on the journal's `system_error` events.
pub const COMPONENT: &str = "journal";

#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    #[error("Journal I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Journal serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Background service that writes bus events to a JSON-lines file.
pub struct EventJournal {
    path: PathBuf,
    reporter: Option<Weak<EventBus>>,
}

impl EventJournal {
    /// Journal at `state_dir/events.jsonl`.
    pub fn in_dir(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(JOURNAL_FILE_NAME),
            reporter: None,
        }
    }

    /// Publish append failures on `bus`.
    pub fn reporting_to(mut self, bus: &Arc<EventBus>) -> Self {
        self.reporter = Some(Arc::downgrade(bus));
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run the journal loop until the bus closes.
    pub async fn run(self, mut receiver: broadcast::Receiver<EventEnvelope>) {
        let mut failing = false;
        loop {
            match receiver.recv().await {
                Ok(envelope) => match self.append(&envelope).await {
                    Ok(()) => failing = false,
                    Err(e) => {
                        tracing::error!(
                            error = %e,
                            event_type = envelope.event.name(),
                            path = %self.path.display(),
                            "Failed to journal event"
                        );
                        if !std::mem::replace(&mut failing, true) {
                            self.report(&e);
                        }
                    }
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event journal lagged, some events were not written");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, journal shutting down");
                    break;
                }
            }
        }
    }

    fn report(&self, error: &JournalError) {
        if let Some(bus) = self.reporter.as_ref().and_then(Weak::upgrade) {
            bus.publish(MonitorEvent::SystemError {
                component: COMPONENT.to_string(),
                campaign_id: None,
                error: format!("journal append failed: {error}"),
            });
        }
    }

    /// Append a single envelope as one JSON line.
    pub async fn append(&self, envelope: &EventEnvelope) -> Result<(), JournalError> {
        let mut line = serde_json::to_vec(envelope)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
