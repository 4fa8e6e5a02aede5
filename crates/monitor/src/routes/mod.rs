pub mod health;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /status                          system status, thresholds, open alerts
///
/// /campaigns                       list (?status=)
/// /campaigns/{id}                  get
/// /campaigns/{id}/cancel           cancel (POST)
///
/// /alerts                          list (?status=, ?type=)
/// /alerts/{id}                     get
/// /alerts/{id}/resolve             resolve (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(handlers::status::get_status))
        .route("/campaigns", get(handlers::campaigns::list_campaigns))
        .route("/campaigns/{id}", get(handlers::campaigns::get_campaign))
        .route("/campaigns/{id}/cancel", post(handlers::campaigns::cancel_campaign))
        .route("/alerts", get(handlers::alerts::list_alerts))
        .route("/alerts/{id}", get(handlers::alerts::get_alert))
        .route("/alerts/{id}/resolve", post(handlers::alerts::resolve_alert))
}
