//! Periodic escalation sweep over unacknowledged alerts.
//!
//! Runs on its own timer, independent of event traffic. It only touches
//! alert lifecycle fields and queues re-deliveries; the sends go through the
//! alert engine's delivery worker. Pruning rides along on the same tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::alerts::AlertEngine;

/// Run the escalation loop until `cancel` is triggered.
pub async fn run(engine: Arc<AlertEngine>, interval: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = interval.as_secs(), "Escalation sweep started");

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Escalation sweep stopping");
                break;
            }
            _ = ticker.tick() => {
                let now = Utc::now();
                let escalated = engine.escalate_due(now).await;
                if escalated > 0 {
                    tracing::info!(escalated, "Escalation sweep: alerts escalated");
                } else {
                    tracing::debug!("Escalation sweep: nothing due");
                }
                engine.prune(now).await;
            }
        }
    }
}
