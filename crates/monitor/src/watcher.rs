//! Brief directory poller.
//!
//! [`BriefWatcher::scan`] lists candidate files, hashes each one, and parses
//! only those whose content changed since the last scan. Parsed briefs are
//! handed to the [`Coordinator`] by [`run`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use adwatch_core::brief::{content_hash, parse_brief, BriefFormat, CampaignBrief};
use adwatch_events::{EventBus, MonitorEvent};
use tokio_util::sync::CancellationToken;

use crate::coordinator::{Coordinator, SubmitOutcome};

/// Component name on the watcher's `system_error` events.
pub const COMPONENT: &str = "watcher";

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("Brief directory {0} does not exist")]
    MissingDir(String),

    #[error("Failed to list brief directory {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub struct BriefWatcher {
    dir: PathBuf,
    /// Last content hash seen per path, including files that failed to parse.
    seen: HashMap<PathBuf, String>,
    bus: Arc<EventBus>,
}

impl BriefWatcher {
    pub fn new(dir: impl Into<PathBuf>, bus: Arc<EventBus>) -> Self {
        Self {
            dir: dir.into(),
            seen: HashMap::new(),
            bus,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Publish a watcher-side failure as a `system_error` event.
    pub fn report_error(&self, campaign_id: Option<String>, error: String) {
        self.bus.publish(MonitorEvent::SystemError {
            component: COMPONENT.to_string(),
            campaign_id,
            error,
        });
    }

    /// Return every brief that is new or whose content changed.
    pub async fn scan(&mut self) -> Result<Vec<CampaignBrief>, WatchError> {
        let candidates = self.candidates().await?;
        let mut briefs = Vec::new();

        for (path, format) in &candidates {
            let data = match tokio::fs::read(path).await {
                Ok(data) => data,
                Err(e) => {
                    // Not recorded as seen, so the next scan retries it.
                    tracing::warn!(path = %path.display(), error = %e, "Failed to read brief");
                    continue;
                }
            };

            let hash = content_hash(&data);
            if self.seen.get(path) == Some(&hash) {
                continue;
            }
            self.seen.insert(path.clone(), hash);

            let source_path = path.display().to_string();
            match parse_brief(&data, *format, &source_path) {
                Ok(brief) => {
                    tracing::info!(
                        campaign_id = %brief.id,
                        path = %source_path,
                        "Brief detected"
                    );
                    briefs.push(brief);
                }
                Err(e) => {
                    tracing::warn!(path = %source_path, error = %e, "Brief rejected");
                    self.bus.publish(MonitorEvent::BriefParseFailed {
                        source_path,
                        error: e.to_string(),
                    });
                }
            }
        }

        self.seen
            .retain(|path, _| candidates.iter().any(|(p, _)| p == path));
        Ok(briefs)
    }

    /// Brief files directly inside the directory, sorted by path.
    async fn candidates(&self) -> Result<Vec<(PathBuf, BriefFormat)>, WatchError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(WatchError::MissingDir(self.dir.display().to_string()));
            }
            Err(source) => {
                return Err(WatchError::Io {
                    path: self.dir.display().to_string(),
                    source,
                });
            }
        };

        let mut files = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(source) => {
                    return Err(WatchError::Io {
                        path: self.dir.display().to_string(),
                        source,
                    });
                }
            };
            let path = entry.path();
            let Some(format) = path
                .extension()
                .and_then(|ext| ext.to_str())
                .and_then(BriefFormat::from_extension)
            else {
                continue;
            };
            match entry.file_type().await {
                Ok(ft) if ft.is_file() => files.push((path, format)),
                _ => {}
            }
        }
        files.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(files)
    }
}

/// Poll the brief directory every `interval` and submit what changed.
///
/// Runs until `cancel` is triggered.
pub async fn run(
    mut watcher: BriefWatcher,
    coordinator: Arc<Coordinator>,
    interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        dir = %watcher.dir().display(),
        interval_secs = interval.as_secs(),
        "Brief watcher started"
    );

    let mut ticker = tokio::time::interval(interval);
    // Scan failures repeat every poll; only the first of a run is published.
    let mut scan_failing = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Brief watcher stopping");
                break;
            }
            _ = ticker.tick() => {
                let briefs = match watcher.scan().await {
                    Ok(briefs) => {
                        if std::mem::take(&mut scan_failing) {
                            tracing::info!("Brief scan recovered");
                        }
                        briefs
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Brief scan failed");
                        if !std::mem::replace(&mut scan_failing, true) {
                            watcher.report_error(None, e.to_string());
                        }
                        continue;
                    }
                };
                for brief in briefs {
                    let campaign_id = brief.id.clone();
                    match coordinator.submit(brief).await {
                        Ok(SubmitOutcome::Unchanged) => {
                            tracing::debug!(%campaign_id, "Brief content already submitted");
                        }
                        Ok(outcome) => {
                            tracing::debug!(%campaign_id, ?outcome, "Brief submitted");
                        }
                        Err(e) => {
                            tracing::error!(%campaign_id, error = %e, "Brief submission failed");
                            watcher.report_error(
                                Some(campaign_id),
                                format!("brief submission failed: {e}"),
                            );
                        }
                    }
                }
            }
        }
    }
}
