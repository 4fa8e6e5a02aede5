//! Generation service contract.

use adwatch_core::brief::{CampaignBrief, Priority};
use adwatch_core::types::{CampaignId, Timestamp};
use adwatch_core::variants::VariantArtifact;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Work order sent to the generation service for one campaign revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub campaign_id: CampaignId,
    pub revision: u32,
    pub products: Vec<String>,
    pub required_categories: Vec<String>,
    pub priority: Priority,
    pub deadline: Option<Timestamp>,
    pub message: Option<String>,
    pub target_region: Option<String>,
    pub target_audience: Option<String>,
}

impl GenerationRequest {
    pub fn from_brief(brief: &CampaignBrief, revision: u32) -> Self {
        Self {
            campaign_id: brief.id.clone(),
            revision,
            products: brief.products.clone(),
            required_categories: brief.required_categories.clone(),
            priority: brief.priority,
            deadline: brief.deadline,
            message: brief.message.clone(),
            target_region: brief.target_region.clone(),
            target_audience: brief.target_audience.clone(),
        }
    }
}

/// What the generation service reports back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub variants: Vec<VariantArtifact>,
    pub cost: f64,
    pub duration_secs: f64,
}

impl GenerationResult {
    /// Reject results with non-finite or negative figures.
    pub fn validate(&self) -> Result<(), GenerationError> {
        if !self.cost.is_finite() || self.cost < 0.0 {
            return Err(GenerationError::InvalidResponse(format!(
                "cost must be a non-negative number, got {}",
                self.cost
            )));
        }
        if !self.duration_secs.is_finite() || self.duration_secs < 0.0 {
            return Err(GenerationError::InvalidResponse(format!(
                "duration_secs must be a non-negative number, got {}",
                self.duration_secs
            )));
        }
        if let Some(i) = self.variants.iter().position(|v| v.location.trim().is_empty()) {
            return Err(GenerationError::InvalidResponse(format!(
                "variant at index {i} has an empty location"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Generation API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The service answered 2xx with an unusable body.
    #[error("Invalid generation response: {0}")]
    InvalidResponse(String),

    /// The call did not finish within its deadline.
    #[error("Generation call timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl GenerationError {
    /// Transient failures are retried; everything else fails the campaign.
    ///
    /// Timeouts, 5xx responses, and network errors are transient. 4xx
    /// responses and malformed bodies are not.
    pub fn is_transient(&self) -> bool {
        match self {
            GenerationError::Request(e) => !(e.is_builder() || e.is_decode() || e.is_redirect()),
            GenerationError::Api { status, .. } => *status >= 500,
            GenerationError::InvalidResponse(_) => false,
            GenerationError::Timeout(_) => true,
        }
    }
}

/// The external generation collaborator.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, GenerationError>;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn result(cost: f64, duration_secs: f64) -> GenerationResult {
        GenerationResult {
            variants: vec![VariantArtifact {
                location: "out/a.png".into(),
                product: None,
                category: Some("1:1".into()),
            }],
            cost,
            duration_secs,
        }
    }

    #[test]
    fn classification() {
        assert!(GenerationError::Api { status: 503, body: String::new() }.is_transient());
        assert!(!GenerationError::Api { status: 422, body: String::new() }.is_transient());
        assert!(GenerationError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!GenerationError::InvalidResponse("x".into()).is_transient());
    }

    #[test]
    fn builder_errors_are_fatal() {
        let err = reqwest::Client::new().get("://bad").build().unwrap_err();
        assert!(!GenerationError::Request(err).is_transient());
    }

    #[test]
    fn validate_rejects_bad_figures() {
        assert!(result(1.0, 2.0).validate().is_ok());
        assert!(result(f64::NAN, 2.0).validate().is_err());
        assert!(result(-1.0, 2.0).validate().is_err());
        assert!(result(1.0, f64::INFINITY).validate().is_err());
    }

    #[test]
    fn request_copies_brief_fields() {
        let brief = CampaignBrief {
            id: "c1".into(),
            products: vec!["tea".into()],
            required_categories: vec!["1:1".into(), "9:16".into()],
            priority: Priority::High,
            deadline: None,
            message: Some("Summer".into()),
            target_region: None,
            target_audience: None,
            content_hash: "h".into(),
            source_path: "b.json".into(),
        };
        let req = GenerationRequest::from_brief(&brief, 3);
        assert_eq!(req.campaign_id, "c1");
        assert_eq!(req.revision, 3);
        assert_eq!(req.required_categories.len(), 2);
        assert_eq!(req.message.as_deref(), Some("Summer"));
    }
}
