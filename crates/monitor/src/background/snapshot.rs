//! Periodic JSON snapshots of the campaign and alert stores.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use adwatch_events::{EventBus, MonitorEvent};
use tokio_util::sync::CancellationToken;

use crate::store::{AlertStore, CampaignStore, StoreError, ALERTS_FILE_NAME, CAMPAIGNS_FILE_NAME};

/// Component name on snapshot `system_error` events.
pub const COMPONENT: &str = "snapshot";

/// Write both snapshots into `state_dir`.
pub async fn save_all(
    campaigns: &CampaignStore,
    alerts: &AlertStore,
    state_dir: &Path,
) -> Result<(usize, usize), StoreError> {
    let saved_campaigns = campaigns.save(&state_dir.join(CAMPAIGNS_FILE_NAME)).await?;
    let saved_alerts = alerts.save(&state_dir.join(ALERTS_FILE_NAME)).await?;
    Ok((saved_campaigns, saved_alerts))
}

/// Save snapshots every `interval` until `cancel` is triggered.
pub async fn run(
    campaigns: CampaignStore,
    alerts: AlertStore,
    state_dir: PathBuf,
    interval: Duration,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
) {
    tracing::info!(
        state_dir = %state_dir.display(),
        interval_secs = interval.as_secs(),
        "Snapshot job started"
    );

    let mut ticker = tokio::time::interval(interval);
    // The first tick fires immediately; nothing has changed yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Snapshot job stopping");
                break;
            }
            _ = ticker.tick() => {
                match save_all(&campaigns, &alerts, &state_dir).await {
                    Ok((campaigns, alerts)) => {
                        tracing::debug!(campaigns, alerts, "Snapshots saved");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Snapshot save failed");
                        bus.publish(MonitorEvent::SystemError {
                            component: COMPONENT.to_string(),
                            campaign_id: None,
                            error: format!("snapshot save failed: {e}"),
                        });
                    }
                }
            }
        }
    }
}
