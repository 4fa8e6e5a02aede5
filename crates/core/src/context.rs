//! Alert context object schema.
//!
//! The context object is the structured hand-off to the external renderer
//! that writes the final human-readable notification. Every key is always
//! present: data that cannot be gathered serializes as an explicit `null`
//! rather than being omitted.

use serde::{Deserialize, Serialize};

use crate::alert::{recommended_actions, Alert, AlertKind, AlertStatus, AlertType, Severity};
use crate::brief::Priority;
use crate::campaign::{Campaign, CampaignStatus};
use crate::circuit_breaker::CircuitSnapshot;
use crate::types::{AlertId, CampaignId, Timestamp};

/// Bumped whenever a key is added, renamed, or removed.
pub const CONTEXT_SCHEMA_VERSION: &str = "1.0";

/// Lookback for [`HistoricalPattern`].
pub const HISTORY_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextObject {
    pub schema_version: String,
    pub generated_at: Timestamp,
    pub alert_details: AlertDetails,
    pub system_status: Option<SystemStatus>,
    pub campaign_context: Option<CampaignContext>,
    pub historical_pattern: Option<HistoricalPattern>,
    pub recommended_actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDetails {
    pub id: AlertId,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: Severity,
    pub status: AlertStatus,
    pub message: String,
    pub timestamp: Timestamp,
    pub campaign_id: Option<CampaignId>,
    pub escalation_level: u32,
    pub trigger: AlertKind,
}

impl From<&Alert> for AlertDetails {
    fn from(alert: &Alert) -> Self {
        Self {
            id: alert.id,
            alert_type: alert.alert_type(),
            severity: alert.severity,
            status: alert.status,
            message: alert.message.clone(),
            timestamp: alert.created_at,
            campaign_id: alert.campaign_id.clone(),
            escalation_level: alert.escalation_level,
            trigger: alert.kind.clone(),
        }
    }
}

/// Campaign counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignCounts {
    /// Currently generating.
    pub active: u32,
    pub queued: u32,
    pub completed: u32,
    pub failed: u32,
    pub cancelled: u32,
}

impl CampaignCounts {
    pub fn tally<'a>(statuses: impl IntoIterator<Item = &'a CampaignStatus>) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            match status {
                CampaignStatus::Generating => counts.active += 1,
                CampaignStatus::Queued => counts.queued += 1,
                CampaignStatus::Completed => counts.completed += 1,
                CampaignStatus::Failed => counts.failed += 1,
                CampaignStatus::Cancelled => counts.cancelled += 1,
                CampaignStatus::New => {}
            }
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub campaigns: CampaignCounts,
    pub circuit_breakers: Vec<CircuitSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BriefSummary {
    pub products: Vec<String>,
    pub required_categories: Vec<String>,
    pub priority: Priority,
    pub message: Option<String>,
    pub target_region: Option<String>,
    pub target_audience: Option<String>,
    pub source_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignContext {
    pub campaign_id: CampaignId,
    pub brief: BriefSummary,
    pub status: CampaignStatus,
    pub revision: u32,
    pub variant_count: u32,
    pub expected_count: u32,
    pub shortfall: u32,
    pub diversity_score: Option<f64>,
    pub deadline: Option<Timestamp>,
    pub attempt_count: u32,
    pub last_error: Option<String>,
}

impl From<&Campaign> for CampaignContext {
    fn from(campaign: &Campaign) -> Self {
        let brief = &campaign.brief;
        Self {
            campaign_id: campaign.id.clone(),
            brief: BriefSummary {
                products: brief.products.clone(),
                required_categories: brief.required_categories.clone(),
                priority: brief.priority,
                message: brief.message.clone(),
                target_region: brief.target_region.clone(),
                target_audience: brief.target_audience.clone(),
                source_path: brief.source_path.clone(),
            },
            status: campaign.status,
            revision: campaign.revision,
            variant_count: campaign.variant_count,
            expected_count: campaign.expected_count,
            shortfall: campaign.shortfall(),
            diversity_score: campaign.diversity_score,
            deadline: brief.deadline,
            attempt_count: campaign.attempt_count,
            last_error: campaign.last_error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalPattern {
    pub alert_type: AlertType,
    pub window_days: i64,
    /// Same-type alerts created in the window, including this one.
    pub occurrences: u32,
    pub last_occurrence: Option<Timestamp>,
}

impl HistoricalPattern {
    /// Count alerts of `alert_type` created within the lookback window.
    pub fn from_alerts<'a>(
        alert_type: AlertType,
        alerts: impl IntoIterator<Item = &'a Alert>,
        now: Timestamp,
    ) -> Self {
        let since = now - chrono::Duration::days(HISTORY_WINDOW_DAYS);
        let mut occurrences = 0u32;
        let mut last_occurrence: Option<Timestamp> = None;
        for alert in alerts {
            if alert.alert_type() != alert_type || alert.created_at < since {
                continue;
            }
            occurrences += 1;
            if last_occurrence.map_or(true, |t| alert.created_at > t) {
                last_occurrence = Some(alert.created_at);
            }
        }
        Self {
            alert_type,
            window_days: HISTORY_WINDOW_DAYS,
            occurrences,
            last_occurrence,
        }
    }
}

/// Assemble a context object from whatever inputs could be gathered.
pub fn assemble(
    alert: &Alert,
    system_status: Option<SystemStatus>,
    campaign: Option<&Campaign>,
    historical_pattern: Option<HistoricalPattern>,
    now: Timestamp,
) -> ContextObject {
    ContextObject {
        schema_version: CONTEXT_SCHEMA_VERSION.to_string(),
        generated_at: now,
        alert_details: AlertDetails::from(alert),
        system_status,
        campaign_context: campaign.map(CampaignContext::from),
        historical_pattern,
        recommended_actions: recommended_actions(alert.alert_type())
            .iter()
            .map(|s| s.to_string())
            .collect(),
    }
}
