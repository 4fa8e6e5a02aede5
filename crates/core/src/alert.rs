//! Alert model, severity table, and lifecycle rules.
//!
//! An [`Alert`] wraps a closed [`AlertKind`] union whose variant carries the
//! facts that triggered it. Severity, recommended actions, and escalation
//! timeouts are fixed lookups over the alert type.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::metric_names::DEP_GENERATION;
use crate::types::{span, AlertId, CampaignId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Window during which an alert with the same dedup key suppresses new ones.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(60 * 60);

/// A generation failure this close to (or past) the deadline is `high`.
pub const DEFAULT_DEADLINE_PROXIMITY: Duration = Duration::from_secs(24 * 60 * 60);

/// Escalation timeout for `high` and `critical` alerts.
pub const ESCALATION_TIMEOUT_URGENT: Duration = Duration::from_secs(60 * 60);

/// Escalation timeout for `medium` alerts.
pub const ESCALATION_TIMEOUT_MEDIUM: Duration = Duration::from_secs(4 * 60 * 60);

/// Escalation timeout for `low` alerts.
pub const ESCALATION_TIMEOUT_LOW: Duration = Duration::from_secs(24 * 60 * 60);

// ---------------------------------------------------------------------------
// Severity & status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    /// One level up, capped at `critical`.
    pub fn escalate(self) -> Severity {
        match self {
            Severity::Low => Severity::Medium,
            Severity::Medium => Severity::High,
            Severity::High | Severity::Critical => Severity::Critical,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Pending,
    Sent,
    Escalated,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Pending => "pending",
            AlertStatus::Sent => "sent",
            AlertStatus::Escalated => "escalated",
            AlertStatus::Resolved => "resolved",
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, AlertStatus::Resolved)
    }

    /// Statuses that suppress duplicates and are eligible for escalation.
    pub fn is_awaiting_ack(&self) -> bool {
        matches!(self, AlertStatus::Pending | AlertStatus::Sent)
    }
}

// ---------------------------------------------------------------------------
// Alert kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    InsufficientVariants,
    ThresholdBreach,
    GenerationFailure,
    CircuitOpen,
    BriefParseError,
    SystemError,
}

impl AlertType {
    pub const ALL: [AlertType; 6] = [
        AlertType::InsufficientVariants,
        AlertType::ThresholdBreach,
        AlertType::GenerationFailure,
        AlertType::CircuitOpen,
        AlertType::BriefParseError,
        AlertType::SystemError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::InsufficientVariants => "insufficient_variants",
            AlertType::ThresholdBreach => "threshold_breach",
            AlertType::GenerationFailure => "generation_failure",
            AlertType::CircuitOpen => "circuit_open",
            AlertType::BriefParseError => "brief_parse_error",
            AlertType::SystemError => "system_error",
        }
    }
}

/// What triggered an alert, with the facts specific to that trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "details", rename_all = "snake_case")]
pub enum AlertKind {
    InsufficientVariants {
        variant_count: u32,
        expected_count: u32,
        shortfall: u32,
        diversity_score: f64,
    },
    ThresholdBreach {
        metric: String,
        value: f64,
        lower: Option<f64>,
        upper: Option<f64>,
    },
    GenerationFailure {
        attempts: u32,
        error: String,
        deadline: Option<Timestamp>,
    },
    CircuitOpen {
        dependency: String,
        consecutive_failures: u32,
    },
    BriefParseError {
        source_path: String,
        error: String,
    },
    SystemError {
        component: String,
        error: String,
    },
}

impl AlertKind {
    pub fn alert_type(&self) -> AlertType {
        match self {
            AlertKind::InsufficientVariants { .. } => AlertType::InsufficientVariants,
            AlertKind::ThresholdBreach { .. } => AlertType::ThresholdBreach,
            AlertKind::GenerationFailure { .. } => AlertType::GenerationFailure,
            AlertKind::CircuitOpen { .. } => AlertType::CircuitOpen,
            AlertKind::BriefParseError { .. } => AlertType::BriefParseError,
            AlertKind::SystemError { .. } => AlertType::SystemError,
        }
    }

    /// Dedup subject used when the alert has no campaign.
    fn subject(&self) -> Option<&str> {
        match self {
            AlertKind::CircuitOpen { dependency, .. } => Some(dependency),
            AlertKind::BriefParseError { source_path, .. } => Some(source_path),
            AlertKind::SystemError { component, .. } => Some(component),
            AlertKind::ThresholdBreach { metric, .. } => Some(metric),
            AlertKind::InsufficientVariants { .. } | AlertKind::GenerationFailure { .. } => None,
        }
    }

    /// Short factual summary. Final prose is rendered downstream.
    pub fn summary(&self, campaign_id: Option<&str>) -> String {
        let campaign = campaign_id.unwrap_or("-");
        match self {
            AlertKind::InsufficientVariants {
                variant_count,
                expected_count,
                shortfall,
                ..
            } => format!(
                "campaign {campaign}: {variant_count} of {expected_count} variants (shortfall {shortfall})"
            ),
            AlertKind::ThresholdBreach {
                metric,
                value,
                lower,
                upper,
            } => format!(
                "{metric}={value} outside bound [{}, {}]",
                fmt_limit(*lower),
                fmt_limit(*upper)
            ),
            AlertKind::GenerationFailure {
                attempts, error, ..
            } => format!("campaign {campaign}: generation failed after {attempts} attempt(s): {error}"),
            AlertKind::CircuitOpen {
                dependency,
                consecutive_failures,
            } => format!(
                "circuit open for {dependency} after {consecutive_failures} consecutive failures"
            ),
            AlertKind::BriefParseError { source_path, error } => {
                format!("brief {source_path} rejected: {error}")
            }
            AlertKind::SystemError { component, error } => {
                format!("unexpected failure in {component}: {error}")
            }
        }
    }
}

fn fmt_limit(limit: Option<f64>) -> String {
    limit.map_or_else(|| "-".to_string(), |v| v.to_string())
}

// ---------------------------------------------------------------------------
// Lookup tables
// ---------------------------------------------------------------------------

/// Fixed severity table.
pub fn severity_for(kind: &AlertKind, now: Timestamp, deadline_proximity: Duration) -> Severity {
    match kind {
        AlertKind::CircuitOpen { dependency, .. } if dependency == DEP_GENERATION => {
            Severity::Critical
        }
        AlertKind::CircuitOpen { .. } => Severity::High,
        AlertKind::GenerationFailure {
            deadline: Some(deadline),
            ..
        } if *deadline - now <= span(deadline_proximity) => Severity::High,
        AlertKind::GenerationFailure { .. } => Severity::Medium,
        AlertKind::InsufficientVariants { .. } => Severity::Medium,
        AlertKind::ThresholdBreach { .. } => Severity::Medium,
        AlertKind::BriefParseError { .. } => Severity::Low,
        AlertKind::SystemError { .. } => Severity::Critical,
    }
}

/// Ordered operator actions per alert type.
pub fn recommended_actions(alert_type: AlertType) -> &'static [&'static str] {
    match alert_type {
        AlertType::InsufficientVariants => &[
            "review generation output for missing product/category combinations",
            "resubmit the brief to regenerate missing variants",
            "check generation service capacity and quotas",
        ],
        AlertType::ThresholdBreach => &[
            "compare the metric against recent campaign history",
            "check generation service pricing and latency",
            "confirm whether the change is expected before adjusting inputs",
        ],
        AlertType::GenerationFailure => &[
            "inspect the last error recorded on the campaign",
            "verify the brief's products and categories are supported",
            "resubmit the brief once the cause is fixed",
        ],
        AlertType::CircuitOpen => &[
            "check the health of the affected dependency",
            "wait for the recovery timeout before expecting new attempts",
            "notify stakeholders of delayed deliverables",
        ],
        AlertType::BriefParseError => &[
            "fix the brief file's syntax or required fields",
            "save the corrected file to trigger a rescan",
        ],
        AlertType::SystemError => &[
            "inspect monitor logs around the alert timestamp",
            "restart the monitor if the failure repeats",
        ],
    }
}

/// How long an unacknowledged alert of this severity waits before escalating.
pub fn escalation_timeout(severity: Severity) -> Duration {
    match severity {
        Severity::High | Severity::Critical => ESCALATION_TIMEOUT_URGENT,
        Severity::Medium => ESCALATION_TIMEOUT_MEDIUM,
        Severity::Low => ESCALATION_TIMEOUT_LOW,
    }
}

/// `type:campaign_id`, falling back to the kind's subject, then `-`.
pub fn dedup_key(kind: &AlertKind, campaign_id: Option<&str>) -> String {
    let subject = campaign_id.or_else(|| kind.subject()).unwrap_or("-");
    format!("{}:{subject}", kind.alert_type().as_str())
}

// ---------------------------------------------------------------------------
// Alert
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub kind: AlertKind,
    pub severity: Severity,
    pub campaign_id: Option<CampaignId>,
    pub status: AlertStatus,
    pub escalation_level: u32,
    pub message: String,
    pub dedup_key: String,
    /// Last context object built for this alert.
    pub context_snapshot: Option<serde_json::Value>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
}

impl Alert {
    pub fn new(
        kind: AlertKind,
        campaign_id: Option<CampaignId>,
        severity: Severity,
        now: Timestamp,
    ) -> Self {
        let message = kind.summary(campaign_id.as_deref());
        let dedup_key = dedup_key(&kind, campaign_id.as_deref());
        Self {
            id: uuid::Uuid::now_v7(),
            kind,
            severity,
            campaign_id,
            status: AlertStatus::Pending,
            escalation_level: 0,
            message,
            dedup_key,
            context_snapshot: None,
            created_at: now,
            updated_at: now,
            resolved_at: None,
        }
    }

    pub fn alert_type(&self) -> AlertType {
        self.kind.alert_type()
    }

    /// True when this alert suppresses a new one with the same dedup key.
    pub fn suppresses(&self, dedup_key: &str, now: Timestamp, window: Duration) -> bool {
        self.dedup_key == dedup_key
            && self.status.is_awaiting_ack()
            && now - self.created_at < span(window)
    }

    pub fn escalation_due(&self, now: Timestamp) -> bool {
        self.status.is_awaiting_ack()
            && now - self.created_at >= span(escalation_timeout(self.severity))
    }

    /// A successful delivery moves `pending` to `sent`; other statuses keep theirs.
    pub fn mark_sent(&mut self, now: Timestamp) {
        if self.status == AlertStatus::Pending {
            self.status = AlertStatus::Sent;
            self.updated_at = now;
        }
    }

    /// Bump severity one level and mark escalated. Returns false when the
    /// alert is not eligible.
    pub fn escalate(&mut self, now: Timestamp) -> bool {
        if !self.status.is_awaiting_ack() {
            return false;
        }
        self.status = AlertStatus::Escalated;
        self.severity = self.severity.escalate();
        self.escalation_level += 1;
        self.updated_at = now;
        true
    }

    /// Returns false when already resolved.
    pub fn resolve(&mut self, now: Timestamp) -> bool {
        if self.status.is_resolved() {
            return false;
        }
        self.status = AlertStatus::Resolved;
        self.resolved_at = Some(now);
        self.updated_at = now;
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
