//! Gathers live state for alert context objects.

use std::sync::Arc;

use adwatch_core::alert::Alert;
use adwatch_core::context::{assemble, CampaignCounts, ContextObject, HistoricalPattern, SystemStatus};
use adwatch_core::types::Timestamp;

use crate::breaker::BreakerRegistry;
use crate::store::{AlertStore, CampaignStore};

#[derive(Clone)]
pub struct ContextBuilder {
    campaigns: CampaignStore,
    alerts: AlertStore,
    breakers: Arc<BreakerRegistry>,
}

impl ContextBuilder {
    pub fn new(campaigns: CampaignStore, alerts: AlertStore, breakers: Arc<BreakerRegistry>) -> Self {
        Self {
            campaigns,
            alerts,
            breakers,
        }
    }

    /// Campaign counts plus one snapshot per circuit breaker.
    pub async fn system_status(&self) -> SystemStatus {
        let statuses = self.campaigns.statuses().await;
        SystemStatus {
            campaigns: CampaignCounts::tally(&statuses),
            circuit_breakers: self.breakers.snapshots(),
        }
    }

    /// Build the full context for `alert`.
    ///
    /// `campaign_context` is null when the alert has no campaign or the
    /// campaign has already been evicted.
    pub async fn build(&self, alert: &Alert, now: Timestamp) -> ContextObject {
        let system_status = self.system_status().await;
        let campaign = match alert.campaign_id.as_deref() {
            Some(id) => self.campaigns.get(id).await,
            None => None,
        };
        let history = {
            let alerts = self.alerts.list().await;
            HistoricalPattern::from_alerts(alert.alert_type(), &alerts, now)
        };
        assemble(alert, Some(system_status), campaign.as_ref(), Some(history), now)
    }
}
