//! Wiring: builds every component from [`MonitorConfig`] and spawns the
//! long-running tasks.

use std::sync::Arc;
use std::time::Duration;

use adwatch_core::channels::{CHANNEL_EMAIL, CHANNEL_LOG, CHANNEL_WEBHOOK};
use adwatch_core::metric_names::{DEP_GENERATION, DEP_NOTIFICATION};
use adwatch_core::thresholds::ThresholdEngine;
use adwatch_core::variants::CategoryCoverageScorer;
use adwatch_events::{
    EmailConfig, EmailNotifier, EventBus, EventJournal, LogNotifier, MonitorEvent, Notifier,
    WebhookNotifier,
};
use adwatch_generation::GenerationService;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::alerts::{AlertEngine, Notifiers};
use crate::background;
use crate::breaker::BreakerRegistry;
use crate::config::MonitorConfig;
use crate::context::ContextBuilder;
use crate::coordinator::{Coordinator, SharedThresholds};
use crate::state::AppState;
use crate::supervisor::spawn_supervised;
use crate::store::{AlertStore, CampaignStore, StoreError, ALERTS_FILE_NAME, CAMPAIGNS_FILE_NAME};
use crate::tracker::VariantTracker;
use crate::watcher::{self, BriefWatcher};

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to prepare directory {path}: {source}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Notification channel '{channel}' unavailable: {reason}")]
    Notifier { channel: String, reason: String },
}

/// A named background task.
pub type TaskHandle = (&'static str, JoinHandle<()>);

pub struct Monitor {
    pub config: Arc<MonitorConfig>,
    pub bus: Arc<EventBus>,
    pub campaigns: CampaignStore,
    pub alerts: AlertStore,
    pub breakers: Arc<BreakerRegistry>,
    pub thresholds: SharedThresholds,
    pub coordinator: Arc<Coordinator>,
    pub alert_engine: Arc<AlertEngine>,
    pub context: ContextBuilder,
    cancel: CancellationToken,
}

impl Monitor {
    /// Build all components and load persisted state.
    ///
    /// Campaigns left queued or generating by a previous run are re-queued.
    pub async fn build(
        config: MonitorConfig,
        service: Arc<dyn GenerationService>,
        notifiers: Notifiers,
    ) -> Result<Self, MonitorError> {
        for dir in [&config.state_dir, &config.brief_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| MonitorError::Directory {
                    path: dir.display().to_string(),
                    source,
                })?;
        }

        let campaigns = CampaignStore::new();
        let alerts = AlertStore::new();
        let loaded_campaigns = campaigns
            .load(&config.state_dir.join(CAMPAIGNS_FILE_NAME))
            .await?;
        let loaded_alerts = alerts.load(&config.state_dir.join(ALERTS_FILE_NAME)).await?;
        tracing::info!(
            campaigns = loaded_campaigns,
            alerts = loaded_alerts,
            state_dir = %config.state_dir.display(),
            "Loaded state snapshots"
        );

        let cancel = CancellationToken::new();
        let bus = Arc::new(EventBus::default());
        let breakers = Arc::new(BreakerRegistry::new(
            config.breaker.clone(),
            Arc::clone(&bus),
            &[DEP_GENERATION, DEP_NOTIFICATION],
        ));
        let thresholds: SharedThresholds =
            Arc::new(tokio::sync::Mutex::new(ThresholdEngine::new(config.threshold_window)));
        let tracker = Arc::new(VariantTracker::new(
            config.variant_policy.clone(),
            Arc::new(CategoryCoverageScorer),
            campaigns.clone(),
        ));
        let coordinator = Arc::new(Coordinator::new(
            config.coordinator.clone(),
            campaigns.clone(),
            service,
            Arc::clone(&breakers),
            Arc::clone(&thresholds),
            tracker,
            Arc::clone(&bus),
        ));
        let context = ContextBuilder::new(campaigns.clone(), alerts.clone(), Arc::clone(&breakers));
        let alert_engine = Arc::new(AlertEngine::new(
            config.alerts.clone(),
            alerts.clone(),
            context.clone(),
            notifiers,
            Arc::clone(&breakers),
            cancel.clone(),
        ));

        coordinator.recover().await;

        Ok(Self {
            config: Arc::new(config),
            bus,
            campaigns,
            alerts,
            breakers,
            thresholds,
            coordinator,
            alert_engine,
            context,
            cancel,
        })
    }

    /// Master token; cancelling it stops every task spawned by [`start`](Self::start).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Shared state for the HTTP status API.
    pub fn app_state(&self) -> AppState {
        AppState {
            config: Arc::clone(&self.config),
            campaigns: self.campaigns.clone(),
            alerts: self.alerts.clone(),
            coordinator: Arc::clone(&self.coordinator),
            alert_engine: Arc::clone(&self.alert_engine),
            context: self.context.clone(),
            thresholds: Arc::clone(&self.thresholds),
        }
    }

    /// Spawn the watcher, dispatcher, alert engine, delivery worker, journal,
    /// and periodic jobs, each under restart-on-panic supervision.
    pub fn start(&self) -> Vec<TaskHandle> {
        let mut handles = Vec::new();
        let mut supervise = |name: &'static str, handle: JoinHandle<()>| handles.push((name, handle));
        let bus = &self.bus;
        let cancel = &self.cancel;

        supervise("journal", {
            let (bus, cancel) = (Arc::clone(bus), cancel.clone());
            let state_dir = self.config.state_dir.clone();
            spawn_supervised("journal", Arc::clone(&bus), cancel.clone(), move || {
                let journal = EventJournal::in_dir(&state_dir).reporting_to(&bus);
                let receiver = bus.subscribe();
                let cancel = cancel.clone();
                async move {
                    tokio::select! {
                        _ = journal.run(receiver) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
            })
        });

        supervise("alert_engine", {
            let (engine, bus_ref, cancel) = (Arc::clone(&self.alert_engine), Arc::clone(bus), cancel.clone());
            spawn_supervised("alert_engine", Arc::clone(bus), cancel.clone(), move || {
                Arc::clone(&engine).run(bus_ref.subscribe(), cancel.clone())
            })
        });

        supervise("delivery", {
            let (engine, cancel) = (Arc::clone(&self.alert_engine), cancel.clone());
            spawn_supervised("delivery", Arc::clone(bus), cancel.clone(), move || {
                Arc::clone(&engine).run_deliveries(cancel.clone())
            })
        });

        supervise("coordinator", {
            let (coordinator, cancel) = (Arc::clone(&self.coordinator), cancel.clone());
            spawn_supervised("coordinator", Arc::clone(bus), cancel.clone(), move || {
                Arc::clone(&coordinator).run(cancel.clone())
            })
        });

        supervise(watcher::COMPONENT, {
            let (coordinator, bus_ref, cancel) = (Arc::clone(&self.coordinator), Arc::clone(bus), cancel.clone());
            let (brief_dir, interval) = (self.config.brief_dir.clone(), self.config.poll_interval);
            spawn_supervised(watcher::COMPONENT, Arc::clone(bus), cancel.clone(), move || {
                watcher::run(
                    BriefWatcher::new(brief_dir.clone(), Arc::clone(&bus_ref)),
                    Arc::clone(&coordinator),
                    interval,
                    cancel.clone(),
                )
            })
        });

        supervise("escalation", {
            let (engine, cancel) = (Arc::clone(&self.alert_engine), cancel.clone());
            let interval = self.config.alerts.escalation_interval;
            spawn_supervised("escalation", Arc::clone(bus), cancel.clone(), move || {
                background::escalation::run(Arc::clone(&engine), interval, cancel.clone())
            })
        });

        supervise(background::snapshot::COMPONENT, {
            let (campaigns, alerts) = (self.campaigns.clone(), self.alerts.clone());
            let (bus_ref, cancel) = (Arc::clone(bus), cancel.clone());
            let (state_dir, interval) = (self.config.state_dir.clone(), self.config.snapshot_interval);
            spawn_supervised(background::snapshot::COMPONENT, Arc::clone(bus), cancel.clone(), move || {
                background::snapshot::run(
                    campaigns.clone(),
                    alerts.clone(),
                    state_dir.clone(),
                    interval,
                    Arc::clone(&bus_ref),
                    cancel.clone(),
                )
            })
        });

        supervise("retention", {
            let (campaigns, cancel) = (self.campaigns.clone(), cancel.clone());
            let retention = self.config.campaign_retention;
            spawn_supervised("retention", Arc::clone(bus), cancel.clone(), move || {
                background::retention::run(campaigns.clone(), retention, cancel.clone())
            })
        });

        tracing::info!(tasks = handles.len(), "Monitor tasks started");
        handles
    }

    /// Cancel every task, wait up to `timeout` for them, then save snapshots.
    ///
    /// A failed final save is published as a `system_error` and returned, so
    /// the process can exit non-zero.
    pub async fn shutdown(&self, handles: Vec<TaskHandle>, timeout: Duration) -> Result<(), MonitorError> {
        self.cancel.cancel();
        let waits = handles.into_iter().map(|(name, handle)| async move {
            if tokio::time::timeout(timeout, handle).await.is_err() {
                tracing::warn!(task = name, "Task did not stop in time");
            }
        });
        futures::future::join_all(waits).await;

        match background::snapshot::save_all(&self.campaigns, &self.alerts, &self.config.state_dir)
            .await
        {
            Ok((campaigns, alerts)) => {
                tracing::info!(campaigns, alerts, "Final snapshots saved");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Final snapshot save failed");
                self.bus.publish(MonitorEvent::SystemError {
                    component: background::snapshot::COMPONENT.to_string(),
                    campaign_id: None,
                    error: format!("final snapshot save failed: {e}"),
                });
                Err(e.into())
            }
        }
    }
}

/// Primary channel plus optional alternate, per configuration.
pub fn build_notifiers(config: &MonitorConfig) -> Result<Notifiers, MonitorError> {
    let primary = channel_notifier(&config.notify_primary_channel, config)?;
    let alternate = config
        .notify_alternate_channel
        .as_deref()
        .map(|channel| channel_notifier(channel, config))
        .transpose()?;
    Ok(Notifiers::new(primary, alternate))
}

fn channel_notifier(channel: &str, config: &MonitorConfig) -> Result<Arc<dyn Notifier>, MonitorError> {
    let unavailable = |reason: String| MonitorError::Notifier {
        channel: channel.to_string(),
        reason,
    };
    match channel {
        CHANNEL_WEBHOOK => {
            let url = config
                .webhook_url
                .clone()
                .ok_or_else(|| unavailable("WEBHOOK_URL must be set".into()))?;
            let notifier = WebhookNotifier::new(url, config.webhook_escalation_url.clone())
                .map_err(|e| unavailable(e.to_string()))?;
            Ok(Arc::new(notifier))
        }
        CHANNEL_EMAIL => {
            let email = EmailConfig::from_env()
                .ok_or_else(|| unavailable("SMTP_HOST must be set".into()))?;
            Ok(Arc::new(EmailNotifier::new(email)))
        }
        CHANNEL_LOG => Ok(Arc::new(LogNotifier)),
        other => Err(unavailable(format!("unknown channel '{other}'"))),
    }
}
