//! Handlers for the `/campaigns` resource.

use adwatch_core::campaign::{Campaign, CampaignStatus};
use adwatch_core::error::CoreError;
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CampaignListQuery {
    pub status: Option<CampaignStatus>,
}

/// GET /api/v1/campaigns
///
/// Oldest submission first.
pub async fn list_campaigns(
    State(state): State<AppState>,
    Query(query): Query<CampaignListQuery>,
) -> AppResult<Json<DataResponse<Vec<Campaign>>>> {
    let mut campaigns = state.campaigns.list().await;
    if let Some(status) = query.status {
        campaigns.retain(|c| c.status == status);
    }
    Ok(Json(DataResponse { data: campaigns }))
}

/// GET /api/v1/campaigns/{id}
pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DataResponse<Campaign>>> {
    let campaign = state
        .campaigns
        .get(&id)
        .await
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Campaign",
            id,
        }))?;
    Ok(Json(DataResponse { data: campaign }))
}

/// POST /api/v1/campaigns/{id}/cancel
///
/// Aborts any in-flight generation. Finished campaigns return 409.
pub async fn cancel_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Json<DataResponse<Campaign>>> {
    let campaign = state.coordinator.cancel(&id).await?;
    Ok(Json(DataResponse { data: campaign }))
}
