use std::sync::Arc;

use crate::alerts::AlertEngine;
use crate::config::MonitorConfig;
use crate::context::ContextBuilder;
use crate::coordinator::{Coordinator, SharedThresholds};
use crate::store::{AlertStore, CampaignStore};

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: every field is an `Arc` or wraps one.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<MonitorConfig>,
    pub campaigns: CampaignStore,
    pub alerts: AlertStore,
    /// Campaign cancellation and queue depth.
    pub coordinator: Arc<Coordinator>,
    /// Alert resolution.
    pub alert_engine: Arc<AlertEngine>,
    /// Campaign counts and breaker snapshots.
    pub context: ContextBuilder,
    pub thresholds: SharedThresholds,
}
