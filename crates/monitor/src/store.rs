//! In-memory campaign and alert repositories with JSON snapshots.
//!
//! Both stores are cheap to clone (`Arc` inside) and are injected into the
//! components that need them. Writers take the write lock for the whole
//! read-modify-write so check-and-insert sequences (alert dedup, campaign
//! supersede) are atomic.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use adwatch_core::alert::Alert;
use adwatch_core::campaign::{Campaign, CampaignStatus};
use adwatch_core::types::{span, AlertId, CampaignId, Timestamp};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Snapshot file names inside the state directory.
pub const CAMPAIGNS_FILE_NAME: &str = "campaigns.json";
pub const ALERTS_FILE_NAME: &str = "alerts.json";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Snapshot I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// CampaignStore
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct CampaignStore {
    inner: Arc<RwLock<HashMap<CampaignId, Campaign>>>,
}

impl CampaignStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, HashMap<CampaignId, Campaign>> {
        self.inner.read().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, HashMap<CampaignId, Campaign>> {
        self.inner.write().await
    }

    pub async fn get(&self, id: &str) -> Option<Campaign> {
        self.inner.read().await.get(id).cloned()
    }

    /// All campaigns, oldest submission first.
    pub async fn list(&self) -> Vec<Campaign> {
        let mut campaigns: Vec<Campaign> = self.inner.read().await.values().cloned().collect();
        campaigns.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        campaigns
    }

    pub async fn insert(&self, campaign: Campaign) {
        self.inner.write().await.insert(campaign.id.clone(), campaign);
    }

    pub async fn statuses(&self) -> Vec<CampaignStatus> {
        self.inner.read().await.values().map(|c| c.status).collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Evict terminal campaigns that finished more than `retention` ago.
    pub async fn evict_terminal(&self, retention: Duration, now: Timestamp) -> usize {
        let cutoff = now - span(retention);
        let mut map = self.inner.write().await;
        let before = map.len();
        map.retain(|_, c| {
            !(c.status.is_terminal() && c.completed_at.unwrap_or(c.updated_at) < cutoff)
        });
        before - map.len()
    }

    pub async fn save(&self, path: &Path) -> Result<usize, StoreError> {
        let campaigns = self.list().await;
        save_json(path, &campaigns).await?;
        Ok(campaigns.len())
    }

    /// Replace the contents with a snapshot. A missing file loads nothing.
    pub async fn load(&self, path: &Path) -> Result<usize, StoreError> {
        let Some(campaigns) = load_json::<Vec<Campaign>>(path).await? else {
            return Ok(0);
        };
        let count = campaigns.len();
        let mut map = self.inner.write().await;
        map.clear();
        map.extend(campaigns.into_iter().map(|c| (c.id.clone(), c)));
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// AlertStore
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct AlertStore {
    inner: Arc<RwLock<HashMap<AlertId, Alert>>>,
}

impl AlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, HashMap<AlertId, Alert>> {
        self.inner.write().await
    }

    pub async fn get(&self, id: AlertId) -> Option<Alert> {
        self.inner.read().await.get(&id).cloned()
    }

    /// All alerts, newest first.
    pub async fn list(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.inner.read().await.values().cloned().collect();
        alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        alerts
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Insert `alert` unless a live alert with the same dedup key exists
    /// within `window`. Returns the suppressing alert's id on conflict.
    pub async fn insert_unless_duplicate(
        &self,
        alert: Alert,
        now: Timestamp,
        window: Duration,
    ) -> Result<Alert, AlertId> {
        let mut map = self.inner.write().await;
        if let Some(existing) = map
            .values()
            .find(|a| a.suppresses(&alert.dedup_key, now, window))
        {
            return Err(existing.id);
        }
        map.insert(alert.id, alert.clone());
        Ok(alert)
    }

    /// Apply `f` to the alert under the write lock.
    pub async fn update<R>(&self, id: AlertId, f: impl FnOnce(&mut Alert) -> R) -> Option<R> {
        self.inner.write().await.get_mut(&id).map(f)
    }

    /// When more than `max_count` alerts are stored, drop alerts older than
    /// `retention`, oldest first, until the count is back at `max_count`.
    pub async fn prune(&self, max_count: usize, retention: Duration, now: Timestamp) -> usize {
        let mut map = self.inner.write().await;
        if map.len() <= max_count {
            return 0;
        }
        let cutoff = now - span(retention);
        let mut expired: Vec<(Timestamp, AlertId)> = map
            .values()
            .filter(|a| a.created_at < cutoff)
            .map(|a| (a.created_at, a.id))
            .collect();
        expired.sort();

        let excess = map.len() - max_count;
        let mut removed = 0;
        for (_, id) in expired.into_iter().take(excess) {
            map.remove(&id);
            removed += 1;
        }
        removed
    }

    pub async fn save(&self, path: &Path) -> Result<usize, StoreError> {
        let alerts = self.list().await;
        save_json(path, &alerts).await?;
        Ok(alerts.len())
    }

    pub async fn load(&self, path: &Path) -> Result<usize, StoreError> {
        let Some(alerts) = load_json::<Vec<Alert>>(path).await? else {
            return Ok(0);
        };
        let count = alerts.len();
        let mut map = self.inner.write().await;
        map.clear();
        map.extend(alerts.into_iter().map(|a| (a.id, a)));
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// Snapshot helpers
// ---------------------------------------------------------------------------

/// Write `value` as pretty JSON via a temp file and rename.
async fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &bytes).await.map_err(|e| io_err(&tmp, e))?;
    tokio::fs::rename(&tmp, path).await.map_err(|e| io_err(path, e))?;
    Ok(())
}

async fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(io_err(path, e)),
    }
}

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
