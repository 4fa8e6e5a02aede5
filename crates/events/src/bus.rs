//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub between the watcher, the
//! coordinator, the circuit breakers, and the alert engine. It is shared via
//! `Arc<EventBus>`.

use adwatch_core::brief::Priority;
use adwatch_core::thresholds::Breach;
use adwatch_core::types::{CampaignId, Timestamp};
use adwatch_core::variants::VariantAnalysis;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// MonitorEvent
// ---------------------------------------------------------------------------

/// Something that happened inside the monitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum MonitorEvent {
    /// A brief file could not be parsed or validated.
    BriefParseFailed { source_path: String, error: String },

    CampaignQueued {
        campaign_id: CampaignId,
        revision: u32,
        priority: Priority,
    },

    CampaignStarted {
        campaign_id: CampaignId,
        revision: u32,
        attempt: u32,
    },

    /// Generation succeeded; carries the variant analysis.
    CampaignCompleted {
        campaign_id: CampaignId,
        revision: u32,
        analysis: VariantAnalysis,
        cost: f64,
        duration_secs: f64,
    },

    /// Generation failed for good (fatal error or retries exhausted).
    GenerationFailed {
        campaign_id: CampaignId,
        revision: u32,
        attempts: u32,
        error: String,
        deadline: Option<Timestamp>,
    },

    CampaignCancelled {
        campaign_id: CampaignId,
        revision: u32,
        reason: String,
    },

    ThresholdBreached {
        campaign_id: Option<CampaignId>,
        breach: Breach,
    },

    /// A breaker went `closed -> open`. Emitted once per open period.
    CircuitOpened {
        dependency: String,
        consecutive_failures: u32,
        retry_after: Option<Timestamp>,
    },

    /// A half-open trial succeeded.
    CircuitClosed { dependency: String },

    /// An unexpected failure (panic or unclassified error).
    SystemError {
        component: String,
        campaign_id: Option<CampaignId>,
        error: String,
    },
}

impl MonitorEvent {
    /// Snake-case event name, matching the serialized `event_type` tag.
    pub fn name(&self) -> &'static str {
        match self {
            MonitorEvent::BriefParseFailed { .. } => "brief_parse_failed",
            MonitorEvent::CampaignQueued { .. } => "campaign_queued",
            MonitorEvent::CampaignStarted { .. } => "campaign_started",
            MonitorEvent::CampaignCompleted { .. } => "campaign_completed",
            MonitorEvent::GenerationFailed { .. } => "generation_failed",
            MonitorEvent::CampaignCancelled { .. } => "campaign_cancelled",
            MonitorEvent::ThresholdBreached { .. } => "threshold_breached",
            MonitorEvent::CircuitOpened { .. } => "circuit_opened",
            MonitorEvent::CircuitClosed { .. } => "circuit_closed",
            MonitorEvent::SystemError { .. } => "system_error",
        }
    }

    pub fn campaign_id(&self) -> Option<&str> {
        match self {
            MonitorEvent::CampaignQueued { campaign_id, .. }
            | MonitorEvent::CampaignStarted { campaign_id, .. }
            | MonitorEvent::CampaignCompleted { campaign_id, .. }
            | MonitorEvent::GenerationFailed { campaign_id, .. }
            | MonitorEvent::CampaignCancelled { campaign_id, .. } => Some(campaign_id),
            MonitorEvent::ThresholdBreached { campaign_id, .. }
            | MonitorEvent::SystemError { campaign_id, .. } => campaign_id.as_deref(),
            MonitorEvent::BriefParseFailed { .. }
            | MonitorEvent::CircuitOpened { .. }
            | MonitorEvent::CircuitClosed { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// EventEnvelope
// ---------------------------------------------------------------------------

/// A [`MonitorEvent`] stamped with an id and the time it was published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: uuid::Uuid,
    pub timestamp: Timestamp,
    pub event: MonitorEvent,
}

impl EventEnvelope {
    /// Wrap an event stamped with the current time.
    pub fn new(event: MonitorEvent) -> Self {
        Self::at(event, Utc::now())
    }

    /// Wrap an event with an explicit timestamp.
    pub fn at(event: MonitorEvent, timestamp: Timestamp) -> Self {
        Self {
            id: uuid::Uuid::now_v7(),
            timestamp,
            event,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use adwatch_events::bus::{EventBus, MonitorEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(MonitorEvent::CircuitClosed { dependency: "generation".into() });
/// ```
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest un-consumed messages are dropped
    /// and slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event stamped with the current time.
    pub fn publish(&self, event: MonitorEvent) {
        self.publish_envelope(EventEnvelope::new(event));
    }

    /// Publish a pre-built envelope to all current subscribers.
    ///
    /// With no active subscribers the event is dropped.
    pub fn publish_envelope(&self, envelope: EventEnvelope) {
        tracing::debug!(
            event_type = envelope.event.name(),
            campaign_id = envelope.event.campaign_id(),
            "Publishing event"
        );
        // A SendError only means there are zero receivers.
        let _ = self.sender.send(envelope);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn closed(dep: &str) -> MonitorEvent {
        MonitorEvent::CircuitClosed {
            dependency: dep.into(),
        }
    }

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(MonitorEvent::CampaignQueued {
            campaign_id: "c1".into(),
            revision: 1,
            priority: Priority::High,
        });

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.event.name(), "campaign_queued");
        assert_eq!(received.event.campaign_id(), Some("c1"));
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(closed("generation"));

        let e1 = rx1.recv().await.expect("subscriber 1 should receive");
        let e2 = rx2.recv().await.expect("subscriber 2 should receive");
        assert_eq!(e1.id, e2.id);
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(closed("generation"));
    }

    #[test]
    fn event_serializes_with_type_tag() {
        let json = serde_json::to_value(closed("notification")).unwrap();
        assert_eq!(json["event_type"], "circuit_closed");
        assert_eq!(json["dependency"], "notification");
    }

    #[test]
    fn name_matches_serialized_tag() {
        let events = [
            MonitorEvent::BriefParseFailed {
                source_path: "a.json".into(),
                error: "x".into(),
            },
            MonitorEvent::SystemError {
                component: "coordinator".into(),
                campaign_id: None,
                error: "boom".into(),
            },
            closed("generation"),
        ];
        for event in events {
            let json = serde_json::to_value(&event).unwrap();
            assert_eq!(json["event_type"], event.name());
        }
    }
}
