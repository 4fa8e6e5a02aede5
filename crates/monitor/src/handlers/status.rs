//! System status snapshot for operators.

use adwatch_core::context::SystemStatus;
use adwatch_core::thresholds::Bound;
use adwatch_core::types::Timestamp;
use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ThresholdView {
    pub metric: String,
    pub bound: Bound,
    /// False while the metric is still on its static fallback.
    pub adaptive: bool,
    pub sample_count: usize,
    pub last_recomputed: Option<Timestamp>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub system: SystemStatus,
    pub queue_depth: usize,
    pub in_flight: usize,
    pub thresholds: Vec<ThresholdView>,
    /// Alerts not yet resolved.
    pub open_alerts: usize,
}

/// GET /api/v1/status
pub async fn get_status(State(state): State<AppState>) -> AppResult<Json<DataResponse<StatusResponse>>> {
    let system = state.context.system_status().await;
    let thresholds = state
        .thresholds
        .lock()
        .await
        .states()
        .into_iter()
        .map(|s| ThresholdView {
            metric: s.metric.clone(),
            bound: s.bound,
            adaptive: s.adaptive,
            sample_count: s.samples.len(),
            last_recomputed: s.last_recomputed,
        })
        .collect();
    let open_alerts = state
        .alerts
        .list()
        .await
        .iter()
        .filter(|a| !a.status.is_resolved())
        .count();

    Ok(Json(DataResponse {
        data: StatusResponse {
            system,
            queue_depth: state.coordinator.queue_len(),
            in_flight: state.coordinator.in_flight_count(),
            thresholds,
            open_alerts,
        },
    }))
}
