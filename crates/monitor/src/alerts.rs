//! Alert engine: turns monitor events into deduplicated, escalating alerts
//! and delivers each one with a freshly built context, falling back to the
//! alternate channel when the primary fails.

use std::sync::Arc;
use std::time::Duration;

use adwatch_core::alert::{severity_for, Alert, AlertKind, DEFAULT_DEADLINE_PROXIMITY, DEFAULT_DEDUP_WINDOW};
use adwatch_core::error::CoreError;
use adwatch_core::metric_names::{DEP_NOTIFICATION, DEP_NOTIFICATION_ALTERNATE};
use adwatch_core::types::{AlertId, CampaignId, Timestamp};
use adwatch_events::{Audience, EventEnvelope, MonitorEvent, Notifier};
use chrono::Utc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::breaker::{BreakerRegistry, CallError};
use crate::context::ContextBuilder;
use crate::store::AlertStore;

#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Identical alerts inside this window are suppressed.
    pub dedup_window: Duration,
    /// Generation failures this close to the deadline are `high`.
    pub deadline_proximity: Duration,
    /// How often the escalation sweep runs.
    pub escalation_interval: Duration,
    /// Pruning only starts above this many stored alerts.
    pub max_alert_count: usize,
    pub retention_period: Duration,
    /// Deadline for one channel's send, including its own retries. Each
    /// channel gets the full budget.
    pub delivery_timeout: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            dedup_window: DEFAULT_DEDUP_WINDOW,
            deadline_proximity: DEFAULT_DEADLINE_PROXIMITY,
            escalation_interval: Duration::from_secs(60),
            max_alert_count: 100,
            retention_period: Duration::from_secs(7 * 24 * 3600),
            delivery_timeout: Duration::from_secs(30),
        }
    }
}

/// Map an event to the alert it raises, if any.
pub fn classify(event: &MonitorEvent) -> Option<(AlertKind, Option<CampaignId>)> {
    match event {
        MonitorEvent::BriefParseFailed { source_path, error } => Some((
            AlertKind::BriefParseError {
                source_path: source_path.clone(),
                error: error.clone(),
            },
            None,
        )),
        MonitorEvent::CampaignCompleted {
            campaign_id,
            analysis,
            ..
        } if analysis.insufficient() => Some((
            AlertKind::InsufficientVariants {
                variant_count: analysis.variant_count,
                expected_count: analysis.expected_count,
                shortfall: analysis.shortfall,
                diversity_score: analysis.diversity_score,
            },
            Some(campaign_id.clone()),
        )),
        MonitorEvent::GenerationFailed {
            campaign_id,
            attempts,
            error,
            deadline,
            ..
        } => Some((
            AlertKind::GenerationFailure {
                attempts: *attempts,
                error: error.clone(),
                deadline: *deadline,
            },
            Some(campaign_id.clone()),
        )),
        MonitorEvent::ThresholdBreached {
            campaign_id,
            breach,
        } => Some((
            AlertKind::ThresholdBreach {
                metric: breach.metric.clone(),
                value: breach.value,
                lower: breach.bound.lower,
                upper: breach.bound.upper,
            },
            campaign_id.clone(),
        )),
        MonitorEvent::CircuitOpened {
            dependency,
            consecutive_failures,
            ..
        } => Some((
            AlertKind::CircuitOpen {
                dependency: dependency.clone(),
                consecutive_failures: *consecutive_failures,
            },
            None,
        )),
        MonitorEvent::SystemError {
            component,
            campaign_id,
            error,
        } => Some((
            AlertKind::SystemError {
                component: component.clone(),
                error: error.clone(),
            },
            campaign_id.clone(),
        )),
        MonitorEvent::CampaignCompleted { .. }
        | MonitorEvent::CampaignQueued { .. }
        | MonitorEvent::CampaignStarted { .. }
        | MonitorEvent::CampaignCancelled { .. }
        | MonitorEvent::CircuitClosed { .. } => None,
    }
}

/// Notification channels in the order they are tried.
#[derive(Clone)]
pub struct Notifiers {
    pub primary: Arc<dyn Notifier>,
    pub alternate: Option<Arc<dyn Notifier>>,
}

impl std::fmt::Debug for Notifiers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifiers")
            .field("alternate", &self.alternate.is_some())
            .finish_non_exhaustive()
    }
}

impl Notifiers {
    pub fn new(primary: Arc<dyn Notifier>, alternate: Option<Arc<dyn Notifier>>) -> Self {
        Self { primary, alternate }
    }

    /// Primary channel only.
    pub fn single(primary: Arc<dyn Notifier>) -> Self {
        Self::new(primary, None)
    }

    /// Each channel with the breaker dependency that guards it.
    fn channels(&self) -> impl Iterator<Item = (&'static str, &Arc<dyn Notifier>)> + '_ {
        std::iter::once((DEP_NOTIFICATION, &self.primary)).chain(
            self.alternate
                .iter()
                .map(|alternate| (DEP_NOTIFICATION_ALTERNATE, alternate)),
        )
    }
}

/// One queued send of an alert to an audience.
#[derive(Debug, Clone, Copy)]
pub struct DeliveryJob {
    pub alert_id: AlertId,
    pub audience: Audience,
}

/// Component name on the engine's own `system_error` alerts.
pub const COMPONENT: &str = "alert_engine";

/// Raises alerts from bus events and owns their delivery.
///
/// Event handling and the escalation sweep only enqueue [`DeliveryJob`]s.
/// A single delivery worker ([`run_deliveries`](Self::run_deliveries))
/// drains the queue, so notifier calls never stall the bus consumer and
/// breaker outcomes and `sent` transitions have one writer.
pub struct AlertEngine {
    config: AlertConfig,
    alerts: AlertStore,
    context: ContextBuilder,
    notifiers: Notifiers,
    breakers: Arc<BreakerRegistry>,
    jobs: mpsc::UnboundedSender<DeliveryJob>,
    queue: tokio::sync::Mutex<mpsc::UnboundedReceiver<DeliveryJob>>,
    /// Aborts in-flight deliveries at shutdown.
    cancel: CancellationToken,
}

impl AlertEngine {
    pub fn new(
        config: AlertConfig,
        alerts: AlertStore,
        context: ContextBuilder,
        notifiers: Notifiers,
        breakers: Arc<BreakerRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        let (jobs, queue) = mpsc::unbounded_channel();
        Self {
            config,
            alerts,
            context,
            notifiers,
            breakers,
            jobs,
            queue: tokio::sync::Mutex::new(queue),
            cancel,
        }
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// Consume bus events until `cancel` fires or the bus closes.
    pub async fn run(self: Arc<Self>, mut receiver: broadcast::Receiver<EventEnvelope>, cancel: CancellationToken) {
        tracing::info!(
            primary = self.notifiers.primary.channel(),
            alternate = self.notifiers.alternate.as_ref().map(|n| n.channel()),
            dedup_window_secs = self.config.dedup_window.as_secs(),
            "Alert engine started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = receiver.recv() => match received {
                    Ok(envelope) => self.handle(&envelope.event, envelope.timestamp).await,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::error!(skipped, "Alert engine lagged behind the event bus");
                        let lagged = MonitorEvent::SystemError {
                            component: COMPONENT.to_string(),
                            campaign_id: None,
                            error: format!("alert engine lagged behind the event bus, {skipped} events dropped"),
                        };
                        self.evaluate(&lagged, Utc::now()).await;
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        tracing::info!("Alert engine stopping");
    }

    /// Drain the delivery queue until `cancel` fires.
    pub async fn run_deliveries(self: Arc<Self>, cancel: CancellationToken) {
        let mut queue = self.queue.lock().await;
        tracing::info!("Alert delivery worker started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                job = queue.recv() => match job {
                    Some(job) => {
                        self.deliver(job.alert_id, job.audience).await;
                    }
                    None => break,
                },
            }
        }

        tracing::info!("Alert delivery worker stopping");
    }

    /// Deliver every job already queued, in order. Returns how many ran.
    pub async fn deliver_queued(&self) -> usize {
        let mut queue = self.queue.lock().await;
        let mut ran = 0;
        while let Ok(job) = queue.try_recv() {
            self.deliver(job.alert_id, job.audience).await;
            ran += 1;
        }
        ran
    }

    pub async fn handle(&self, event: &MonitorEvent, now: Timestamp) {
        match event {
            MonitorEvent::CircuitClosed { dependency } => {
                self.resolve_open_circuit(dependency, now).await;
            }
            other => {
                self.evaluate(other, now).await;
            }
        }
    }

    /// Raise and store the alert for `event` and queue its delivery.
    ///
    /// Returns `None` when the event raises no alert or an identical alert
    /// is still live inside the dedup window.
    pub async fn evaluate(&self, event: &MonitorEvent, now: Timestamp) -> Option<Alert> {
        let (kind, campaign_id) = classify(event)?;
        let severity = severity_for(&kind, now, self.config.deadline_proximity);
        let candidate = Alert::new(kind, campaign_id, severity, now);

        let alert = match self
            .alerts
            .insert_unless_duplicate(candidate, now, self.config.dedup_window)
            .await
        {
            Ok(alert) => alert,
            Err(existing) => {
                tracing::debug!(event = event.name(), %existing, "Duplicate alert suppressed");
                return None;
            }
        };

        tracing::warn!(
            alert_id = %alert.id,
            alert_type = alert.alert_type().as_str(),
            severity = alert.severity.as_str(),
            campaign_id = alert.campaign_id.as_deref(),
            message = %alert.message,
            "Alert raised"
        );

        self.enqueue(alert.id, Audience::Primary);
        self.prune(now).await;
        Some(alert)
    }

    fn enqueue(&self, alert_id: AlertId, audience: Audience) {
        if self.jobs.send(DeliveryJob { alert_id, audience }).is_err() {
            tracing::error!(%alert_id, audience = audience.as_str(), "Delivery queue closed, alert not queued");
        }
    }

    /// Build the context, snapshot it on the alert, and send it.
    ///
    /// Channels are tried in order, each behind its own breaker and timeout.
    /// The first success marks a pending alert sent. When every channel
    /// fails the alert keeps its status and the next escalation sweep picks
    /// it up.
    pub async fn deliver(&self, id: AlertId, audience: Audience) -> bool {
        let Some(alert) = self.alerts.get(id).await else {
            return false;
        };
        if alert.status.is_resolved() {
            tracing::debug!(alert_id = %id, "Alert resolved before delivery, skipping");
            return false;
        }
        let context = self.context.build(&alert, Utc::now()).await;
        match serde_json::to_value(&context) {
            Ok(snapshot) => {
                self.alerts
                    .update(id, |a| a.context_snapshot = Some(snapshot))
                    .await;
            }
            Err(e) => tracing::warn!(alert_id = %id, error = %e, "Failed to snapshot alert context"),
        }

        for (dependency, notifier) in self.notifiers.channels() {
            let result = self
                .breakers
                .call(dependency, self.config.delivery_timeout, &self.cancel, || {
                    notifier.send(&context, audience)
                })
                .await;

            match result {
                Ok(()) => {
                    self.alerts.update(id, |a| a.mark_sent(Utc::now())).await;
                    tracing::info!(
                        alert_id = %id,
                        channel = notifier.channel(),
                        audience = audience.as_str(),
                        "Alert delivered"
                    );
                    return true;
                }
                Err(CallError::Cancelled) => return false,
                Err(e) => {
                    tracing::warn!(
                        alert_id = %id,
                        channel = notifier.channel(),
                        audience = audience.as_str(),
                        error = %e,
                        "Alert delivery failed"
                    );
                }
            }
        }
        false
    }

    /// Escalate every pending or sent alert past its severity's timeout and
    /// queue a re-delivery to the escalation audience.
    pub async fn escalate_due(&self, now: Timestamp) -> usize {
        let due: Vec<(AlertId, &'static str)> = {
            let mut map = self.alerts.write().await;
            map.values_mut()
                .filter_map(|a| {
                    (a.escalation_due(now) && a.escalate(now)).then(|| (a.id, a.severity.as_str()))
                })
                .collect()
        };

        for (id, severity) in &due {
            tracing::warn!(alert_id = %id, severity, "Alert escalated");
            self.enqueue(*id, Audience::Escalation);
        }
        due.len()
    }

    pub async fn prune(&self, now: Timestamp) -> usize {
        let removed = self
            .alerts
            .prune(self.config.max_alert_count, self.config.retention_period, now)
            .await;
        if removed > 0 {
            tracing::info!(removed, "Pruned expired alerts");
        }
        removed
    }

    /// Operator acknowledgement.
    pub async fn resolve(&self, id: AlertId, now: Timestamp) -> Result<Alert, CoreError> {
        let outcome = self
            .alerts
            .update(id, |a| a.resolve(now).then(|| a.clone()))
            .await;
        match outcome {
            None => Err(CoreError::NotFound {
                entity: "Alert",
                id: id.to_string(),
            }),
            Some(None) => Err(CoreError::Conflict(format!("Alert {id} is already resolved"))),
            Some(Some(alert)) => {
                tracing::info!(alert_id = %id, "Alert resolved");
                Ok(alert)
            }
        }
    }

    /// Resolve open `circuit_open` alerts once the breaker closes again.
    async fn resolve_open_circuit(&self, dependency: &str, now: Timestamp) -> usize {
        let mut map = self.alerts.write().await;
        let mut resolved = 0;
        for alert in map.values_mut() {
            let matches = matches!(
                &alert.kind,
                AlertKind::CircuitOpen { dependency: d, .. } if d == dependency
            );
            if matches && alert.resolve(now) {
                resolved += 1;
            }
        }
        if resolved > 0 {
            tracing::info!(dependency, resolved, "Circuit closed, alerts resolved");
        }
        resolved
    }
}
