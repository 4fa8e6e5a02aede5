//! Variant sufficiency analysis.
//!
//! Counts the distinct artifacts a generation run produced, scores their
//! diversity, and decides whether the output is insufficient. Two independent
//! conditions flag a campaign, and either alone is enough:
//!
//! - fewer variants than the static floor (`min_variants`), or
//! - fewer variants than `expected_count × coverage_ratio`.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::brief::CampaignBrief;
use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Static minimum number of variants per campaign.
pub const DEFAULT_MIN_VARIANTS: u32 = 3;

/// Fraction of the expected variant count that must be produced.
pub const DEFAULT_COVERAGE_RATIO: f64 = 0.5;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One output artifact reported by the generation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantArtifact {
    /// Where the artifact lives (path or URL). Identity for counting.
    pub location: String,
    #[serde(default)]
    pub product: Option<String>,
    /// Output category (e.g. aspect ratio) the artifact was rendered for.
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantPolicy {
    pub min_variants: u32,
    pub coverage_ratio: f64,
}

impl Default for VariantPolicy {
    fn default() -> Self {
        Self {
            min_variants: DEFAULT_MIN_VARIANTS,
            coverage_ratio: DEFAULT_COVERAGE_RATIO,
        }
    }
}

impl VariantPolicy {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(0.0..=1.0).contains(&self.coverage_ratio) {
            return Err(CoreError::Validation(format!(
                "coverage_ratio must be between 0.0 and 1.0, got {}",
                self.coverage_ratio
            )));
        }
        Ok(())
    }
}

/// Why a campaign's output was flagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InsufficiencyReason {
    BelowMinimum { minimum: u32 },
    BelowCoverage { required: f64, coverage_ratio: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantAnalysis {
    pub variant_count: u32,
    pub expected_count: u32,
    pub shortfall: u32,
    pub diversity_score: f64,
    pub categories_present: Vec<String>,
    pub missing_categories: Vec<String>,
    pub reasons: Vec<InsufficiencyReason>,
}

impl VariantAnalysis {
    pub fn insufficient(&self) -> bool {
        !self.reasons.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Extension point for diversity scoring. Implementations return a value in
/// `0.0..=1.0`.
pub trait DiversityScorer: Send + Sync {
    fn name(&self) -> &'static str;
    fn score(&self, brief: &CampaignBrief, artifacts: &[VariantArtifact]) -> f64;
}

/// Distinct required categories present ÷ total required categories.
#[derive(Debug, Clone, Copy, Default)]
pub struct CategoryCoverageScorer;

impl DiversityScorer for CategoryCoverageScorer {
    fn name(&self) -> &'static str {
        "category_coverage"
    }

    fn score(&self, brief: &CampaignBrief, artifacts: &[VariantArtifact]) -> f64 {
        if brief.required_categories.is_empty() {
            return 1.0;
        }
        let present = categories_present(brief, artifacts).len();
        present as f64 / brief.required_categories.len() as f64
    }
}

// ---------------------------------------------------------------------------
// Analysis
// ---------------------------------------------------------------------------

/// Number of distinct artifact locations.
pub fn distinct_count(artifacts: &[VariantArtifact]) -> u32 {
    let distinct: BTreeSet<&str> = artifacts.iter().map(|a| a.location.as_str()).collect();
    u32::try_from(distinct.len()).unwrap_or(u32::MAX)
}

/// Required categories that at least one artifact covers, in brief order.
pub fn categories_present(brief: &CampaignBrief, artifacts: &[VariantArtifact]) -> Vec<String> {
    let produced: BTreeSet<&str> = artifacts
        .iter()
        .filter_map(|a| a.category.as_deref())
        .collect();
    brief
        .required_categories
        .iter()
        .filter(|c| produced.contains(c.as_str()))
        .cloned()
        .collect()
}

/// Analyze a generation run's artifacts against the brief.
pub fn analyze(
    brief: &CampaignBrief,
    artifacts: &[VariantArtifact],
    policy: &VariantPolicy,
    scorer: &dyn DiversityScorer,
) -> VariantAnalysis {
    let variant_count = distinct_count(artifacts);
    let expected_count = brief.expected_count();
    let present = categories_present(brief, artifacts);
    let missing = brief
        .required_categories
        .iter()
        .filter(|c| !present.contains(c))
        .cloned()
        .collect();

    let mut reasons = Vec::new();
    if variant_count < policy.min_variants {
        reasons.push(InsufficiencyReason::BelowMinimum {
            minimum: policy.min_variants,
        });
    }
    let required = expected_count as f64 * policy.coverage_ratio;
    if (variant_count as f64) < required {
        reasons.push(InsufficiencyReason::BelowCoverage {
            required,
            coverage_ratio: policy.coverage_ratio,
        });
    }

    VariantAnalysis {
        variant_count,
        expected_count,
        shortfall: expected_count.saturating_sub(variant_count),
        diversity_score: scorer.score(brief, artifacts).clamp(0.0, 1.0),
        categories_present: present,
        missing_categories: missing,
        reasons,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
