//! Variant tracking: analyse a completed campaign's output and record the
//! results on the campaign.

use std::sync::Arc;

use adwatch_core::campaign::{Campaign, CampaignStatus};
use adwatch_core::variants::{self, DiversityScorer, VariantAnalysis, VariantPolicy};

use crate::store::CampaignStore;

pub struct VariantTracker {
    policy: VariantPolicy,
    scorer: Arc<dyn DiversityScorer>,
    campaigns: CampaignStore,
}

impl VariantTracker {
    pub fn new(policy: VariantPolicy, scorer: Arc<dyn DiversityScorer>, campaigns: CampaignStore) -> Self {
        Self {
            policy,
            scorer,
            campaigns,
        }
    }

    pub fn policy(&self) -> &VariantPolicy {
        &self.policy
    }

    /// Analyse the campaign's current artifacts against its brief.
    pub fn analyze_campaign(&self, campaign: &Campaign) -> VariantAnalysis {
        variants::analyze(
            &campaign.brief,
            &campaign.variant_locations,
            &self.policy,
            self.scorer.as_ref(),
        )
    }

    /// Write the analysis onto the campaign.
    ///
    /// Skipped (returns false) when the campaign is gone, was superseded by
    /// a newer revision, or is no longer completed.
    pub async fn record(&self, campaign_id: &str, revision: u32, analysis: &VariantAnalysis) -> bool {
        let mut map = self.campaigns.write().await;
        let Some(campaign) = map.get_mut(campaign_id) else {
            return false;
        };
        if campaign.revision != revision || campaign.status != CampaignStatus::Completed {
            return false;
        }
        campaign.variant_count = analysis.variant_count;
        campaign.diversity_score = Some(analysis.diversity_score);

        tracing::info!(
            campaign_id,
            variant_count = analysis.variant_count,
            expected_count = analysis.expected_count,
            diversity_score = analysis.diversity_score,
            scorer = self.scorer.name(),
            insufficient = analysis.insufficient(),
            "Variant analysis recorded"
        );
        true
    }
}
