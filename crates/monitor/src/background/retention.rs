//! Periodic eviction of finished campaigns.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::store::CampaignStore;

/// How often the eviction job runs.
const EVICTION_INTERVAL: Duration = Duration::from_secs(3600);

/// Evict terminal campaigns older than `retention` every hour until
/// `cancel` is triggered.
pub async fn run(campaigns: CampaignStore, retention: Duration, cancel: CancellationToken) {
    tracing::info!(
        retention_hours = retention.as_secs() / 3600,
        interval_secs = EVICTION_INTERVAL.as_secs(),
        "Campaign retention job started"
    );

    let mut interval = tokio::time::interval(EVICTION_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Campaign retention job stopping");
                break;
            }
            _ = interval.tick() => {
                let evicted = campaigns.evict_terminal(retention, Utc::now()).await;
                if evicted > 0 {
                    tracing::info!(evicted, "Campaign retention: evicted finished campaigns");
                } else {
                    tracing::debug!("Campaign retention: nothing to evict");
                }
            }
        }
    }
}
