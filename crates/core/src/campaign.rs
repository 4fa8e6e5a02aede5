//! Campaign record and lifecycle state machine.
//!
//! A campaign is created from a brief and walks
//! `new -> queued -> generating -> completed | failed`. Operator cancellation
//! adds the terminal `cancelled` state. A changed brief re-queues the
//! campaign under a new revision.

use serde::{Deserialize, Serialize};

use crate::brief::CampaignBrief;
use crate::error::CoreError;
use crate::types::{CampaignId, Timestamp};
use crate::variants::VariantArtifact;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    New,
    Queued,
    Generating,
    Completed,
    Failed,
    Cancelled,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::New => "new",
            CampaignStatus::Queued => "queued",
            CampaignStatus::Generating => "generating",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
            CampaignStatus::Cancelled => "cancelled",
        }
    }

    /// Completed, failed, and cancelled campaigns have no work outstanding.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Failed | CampaignStatus::Cancelled
        )
    }

    /// Queued or generating.
    pub fn is_active(&self) -> bool {
        matches!(self, CampaignStatus::Queued | CampaignStatus::Generating)
    }
}

/// Lifecycle transition table.
pub mod state_machine {
    use super::CampaignStatus::{self, *};

    /// Statuses reachable from `from`.
    ///
    /// `Generating -> Queued` happens when a newer brief revision supersedes
    /// an in-flight generation. Terminal states only leave via a resubmission.
    pub fn valid_transitions(from: CampaignStatus) -> &'static [CampaignStatus] {
        match from {
            New => &[Queued],
            Queued => &[Generating, Cancelled],
            Generating => &[Completed, Failed, Cancelled, Queued],
            Completed | Failed | Cancelled => &[Queued],
        }
    }

    pub fn can_transition(from: CampaignStatus, to: CampaignStatus) -> bool {
        valid_transitions(from).contains(&to)
    }

    /// Validate a transition, returning a descriptive error for invalid ones.
    pub fn validate_transition(from: CampaignStatus, to: CampaignStatus) -> Result<(), String> {
        if can_transition(from, to) {
            Ok(())
        } else {
            Err(format!(
                "Invalid transition: {} -> {}",
                from.as_str(),
                to.as_str()
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Campaign
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub brief: CampaignBrief,
    pub status: CampaignStatus,
    /// Bumped every time a changed brief replaces this campaign's brief.
    pub revision: u32,
    pub variant_count: u32,
    pub expected_count: u32,
    pub diversity_score: Option<f64>,
    pub variant_locations: Vec<VariantArtifact>,
    pub cost: Option<f64>,
    pub duration_secs: Option<f64>,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    pub submitted_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl Campaign {
    /// A fresh campaign in `new` for the given brief.
    pub fn new(brief: CampaignBrief, now: Timestamp) -> Self {
        Self {
            id: brief.id.clone(),
            expected_count: brief.expected_count(),
            brief,
            status: CampaignStatus::New,
            revision: 1,
            variant_count: 0,
            diversity_score: None,
            variant_locations: Vec::new(),
            cost: None,
            duration_secs: None,
            attempt_count: 0,
            last_error: None,
            submitted_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Move to `to`, validating against the state machine.
    pub fn transition(&mut self, to: CampaignStatus, now: Timestamp) -> Result<(), CoreError> {
        state_machine::validate_transition(self.status, to).map_err(CoreError::Validation)?;
        self.status = to;
        self.updated_at = now;
        match to {
            CampaignStatus::Generating => {
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
            }
            CampaignStatus::Completed | CampaignStatus::Failed | CampaignStatus::Cancelled => {
                self.completed_at = Some(now);
            }
            CampaignStatus::New | CampaignStatus::Queued => {}
        }
        Ok(())
    }

    /// Attach a newer brief revision and reset per-run output fields.
    ///
    /// The caller is responsible for moving the status back to `queued`.
    pub fn replace_brief(&mut self, brief: CampaignBrief, now: Timestamp) {
        self.expected_count = brief.expected_count();
        self.brief = brief;
        self.revision += 1;
        self.variant_count = 0;
        self.diversity_score = None;
        self.variant_locations.clear();
        self.cost = None;
        self.duration_secs = None;
        self.attempt_count = 0;
        self.last_error = None;
        self.submitted_at = now;
        self.started_at = None;
        self.completed_at = None;
        self.updated_at = now;
    }

    /// Variants still missing relative to the brief.
    pub fn shortfall(&self) -> u32 {
        self.expected_count.saturating_sub(self.variant_count)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
