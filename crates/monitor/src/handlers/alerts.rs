//! Handlers for the `/alerts` resource.

use adwatch_core::alert::{Alert, AlertStatus, AlertType};
use adwatch_core::error::CoreError;
use adwatch_core::types::AlertId;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AlertListQuery {
    pub status: Option<AlertStatus>,
    #[serde(rename = "type")]
    pub alert_type: Option<AlertType>,
}

/// GET /api/v1/alerts
///
/// Newest first.
pub async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertListQuery>,
) -> AppResult<Json<DataResponse<Vec<Alert>>>> {
    let mut alerts = state.alerts.list().await;
    alerts.retain(|a| {
        query.status.map_or(true, |s| a.status == s)
            && query.alert_type.map_or(true, |t| a.alert_type() == t)
    });
    Ok(Json(DataResponse { data: alerts }))
}

fn parse_alert_id(raw: &str) -> Result<AlertId, AppError> {
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("Invalid alert id '{raw}'")))
}

/// GET /api/v1/alerts/{id}
pub async fn get_alert(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> AppResult<Json<DataResponse<Alert>>> {
    let id = parse_alert_id(&raw_id)?;
    let alert = state
        .alerts
        .get(id)
        .await
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Alert",
            id: id.to_string(),
        }))?;
    Ok(Json(DataResponse { data: alert }))
}

/// POST /api/v1/alerts/{id}/resolve
pub async fn resolve_alert(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> AppResult<Json<DataResponse<Alert>>> {
    let id = parse_alert_id(&raw_id)?;
    let alert = state.alert_engine.resolve(id, Utc::now()).await?;
    Ok(Json(DataResponse { data: alert }))
}
