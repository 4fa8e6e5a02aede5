//! Generation coordinator: priority queue, bounded worker pool, retries.
//!
//! Briefs enter through [`Coordinator::submit`]. The dispatch loop in
//! [`Coordinator::run`] pops the highest-priority entry whenever a worker
//! slot is free and spawns a generation task. Every task runs under its own
//! [`CancellationToken`] so a superseding brief or an operator cancel can
//! abort the outstanding call.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use adwatch_core::brief::{CampaignBrief, Priority};
use adwatch_core::campaign::{Campaign, CampaignStatus};
use adwatch_core::error::CoreError;
use adwatch_core::metric_names::{
    DEP_GENERATION, METRIC_COST_PER_ASSET, METRIC_DURATION_SECS, METRIC_SUCCESS_RATE,
};
use adwatch_core::thresholds::{mean, Breach, Observation, ThresholdEngine, MIN_SAMPLES};
use adwatch_core::types::{CampaignId, Timestamp};
use adwatch_events::{EventBus, MonitorEvent};
use adwatch_generation::{
    GenerationError, GenerationRequest, GenerationResult, GenerationService, RetryPolicy,
};
use chrono::Utc;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::breaker::{BreakerRegistry, CallError};
use crate::store::CampaignStore;
use crate::supervisor::panic_message;
use crate::tracker::VariantTracker;

/// Threshold engine shared between the coordinator and the status API.
pub type SharedThresholds = Arc<tokio::sync::Mutex<ThresholdEngine>>;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Worker pool size.
    pub max_concurrent: usize,
    /// Deadline for a single generation call.
    pub call_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            call_timeout: Duration::from_secs(120),
            retry: RetryPolicy::default(),
        }
    }
}

/// What [`Coordinator::submit`] did with a brief.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// First brief for this campaign.
    Queued,
    /// Same content as the current revision; nothing to do.
    Unchanged,
    /// Replaced a queued or generating revision.
    Superseded,
    /// Restarted a campaign that had already finished.
    Requeued,
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// A pending dispatch. The heap pops the greatest entry first.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub campaign_id: CampaignId,
    pub revision: u32,
    pub priority: Priority,
    pub deadline: Option<Timestamp>,
    pub submitted_at: Timestamp,
    pub seq: u64,
}

impl Ord for QueueEntry {
    /// Higher priority first, then earliest deadline (none last), then
    /// earliest submission, then submission order.
    fn cmp(&self, other: &Self) -> Ordering {
        let by_deadline = match (self.deadline, other.deadline) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => Ordering::Equal,
        };
        self.priority
            .cmp(&other.priority)
            .then(by_deadline)
            .then_with(|| other.submitted_at.cmp(&self.submitted_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct Coordinator {
    config: CoordinatorConfig,
    campaigns: CampaignStore,
    service: Arc<dyn GenerationService>,
    breakers: Arc<BreakerRegistry>,
    thresholds: SharedThresholds,
    tracker: Arc<VariantTracker>,
    bus: Arc<EventBus>,
    queue: Mutex<BinaryHeap<QueueEntry>>,
    queued: Notify,
    seq: AtomicU64,
    slots: Arc<Semaphore>,
    /// Running tasks keyed by campaign, with the revision they work on.
    in_flight: Mutex<HashMap<CampaignId, (u32, CancellationToken)>>,
}

// Lock order: campaign store, then `in_flight`. The std mutexes are never
// held across an await.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        campaigns: CampaignStore,
        service: Arc<dyn GenerationService>,
        breakers: Arc<BreakerRegistry>,
        thresholds: SharedThresholds,
        tracker: Arc<VariantTracker>,
        bus: Arc<EventBus>,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            config,
            campaigns,
            service,
            breakers,
            thresholds,
            tracker,
            bus,
            queue: Mutex::new(BinaryHeap::new()),
            queued: Notify::new(),
            seq: AtomicU64::new(0),
            slots,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn queue_len(&self) -> usize {
        lock(&self.queue).len()
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }

    fn entry_for(&self, campaign: &Campaign) -> QueueEntry {
        QueueEntry {
            campaign_id: campaign.id.clone(),
            revision: campaign.revision,
            priority: campaign.brief.priority,
            deadline: campaign.brief.deadline,
            submitted_at: campaign.submitted_at,
            seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
        }
    }

    fn enqueue(&self, entry: QueueEntry) {
        lock(&self.queue).push(entry);
        self.queued.notify_one();
    }

    /// Cancel the running task for `campaign_id`, if any.
    fn cancel_in_flight(&self, campaign_id: &str) -> bool {
        match lock(&self.in_flight).remove(campaign_id) {
            Some((_, token)) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn clear_in_flight(&self, campaign_id: &str, revision: u32) {
        let mut in_flight = lock(&self.in_flight);
        if in_flight.get(campaign_id).is_some_and(|(r, _)| *r == revision) {
            in_flight.remove(campaign_id);
        }
    }

    /// Queue a brief for generation.
    ///
    /// A brief whose content hash matches the campaign's current revision is
    /// ignored. A changed brief for a generating campaign cancels the running
    /// task before the new revision is queued; entries left in the heap for
    /// older revisions are skipped at dispatch.
    pub async fn submit(&self, brief: CampaignBrief) -> Result<SubmitOutcome, CoreError> {
        let now = Utc::now();
        let (outcome, entry) = {
            let mut map = self.campaigns.write().await;
            match map.get_mut(&brief.id) {
                None => {
                    let mut campaign = Campaign::new(brief, now);
                    campaign.transition(CampaignStatus::Queued, now)?;
                    let entry = self.entry_for(&campaign);
                    map.insert(campaign.id.clone(), campaign);
                    (SubmitOutcome::Queued, entry)
                }
                Some(campaign) if campaign.brief.content_hash == brief.content_hash => {
                    return Ok(SubmitOutcome::Unchanged);
                }
                Some(campaign) => {
                    let outcome = match campaign.status {
                        CampaignStatus::Queued => SubmitOutcome::Superseded,
                        CampaignStatus::Generating => {
                            campaign.transition(CampaignStatus::Queued, now)?;
                            if self.cancel_in_flight(&campaign.id) {
                                tracing::info!(
                                    campaign_id = %campaign.id,
                                    revision = campaign.revision,
                                    "Cancelled in-flight generation for superseded brief"
                                );
                            }
                            SubmitOutcome::Superseded
                        }
                        _ => {
                            campaign.transition(CampaignStatus::Queued, now)?;
                            SubmitOutcome::Requeued
                        }
                    };
                    campaign.replace_brief(brief, now);
                    (outcome, self.entry_for(campaign))
                }
            }
        };

        tracing::info!(
            campaign_id = %entry.campaign_id,
            revision = entry.revision,
            priority = entry.priority.as_str(),
            ?outcome,
            "Campaign queued"
        );
        self.bus.publish(MonitorEvent::CampaignQueued {
            campaign_id: entry.campaign_id.clone(),
            revision: entry.revision,
            priority: entry.priority,
        });
        self.enqueue(entry);
        Ok(outcome)
    }

    /// Operator cancel. Terminal campaigns cannot be cancelled.
    pub async fn cancel(&self, campaign_id: &str) -> Result<Campaign, CoreError> {
        let now = Utc::now();
        let campaign = {
            let mut map = self.campaigns.write().await;
            let campaign = map.get_mut(campaign_id).ok_or_else(|| CoreError::NotFound {
                entity: "Campaign",
                id: campaign_id.to_string(),
            })?;
            if campaign.status.is_terminal() {
                return Err(CoreError::Conflict(format!(
                    "Campaign {campaign_id} is already {}",
                    campaign.status.as_str()
                )));
            }
            campaign.transition(CampaignStatus::Cancelled, now)?;
            self.cancel_in_flight(campaign_id);
            campaign.clone()
        };

        tracing::info!(campaign_id, revision = campaign.revision, "Campaign cancelled");
        self.bus.publish(MonitorEvent::CampaignCancelled {
            campaign_id: campaign.id.clone(),
            revision: campaign.revision,
            reason: "cancelled by operator".into(),
        });
        Ok(campaign)
    }

    /// Re-queue work left over from a previous run.
    ///
    /// Campaigns still marked generating were interrupted and go back to
    /// queued. Returns how many campaigns were queued.
    pub async fn recover(&self) -> usize {
        let now = Utc::now();
        let mut entries = Vec::new();
        {
            let mut map = self.campaigns.write().await;
            for campaign in map.values_mut() {
                if campaign.status == CampaignStatus::Generating {
                    if let Err(e) = campaign.transition(CampaignStatus::Queued, now) {
                        tracing::error!(campaign_id = %campaign.id, error = %e, "Failed to requeue campaign");
                        continue;
                    }
                }
                if campaign.status == CampaignStatus::Queued {
                    entries.push(self.entry_for(campaign));
                }
            }
        }
        let count = entries.len();
        for entry in entries {
            self.enqueue(entry);
        }
        if count > 0 {
            tracing::info!(count, "Recovered queued campaigns");
        }
        count
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Run the dispatch loop until `cancel` is triggered.
    ///
    /// Cancelling also cancels every running generation task.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        tracing::info!(
            max_concurrent = self.config.max_concurrent,
            call_timeout_secs = self.config.call_timeout.as_secs(),
            "Generation coordinator started"
        );

        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let entry = tokio::select! {
                _ = cancel.cancelled() => break,
                entry = self.next_entry() => entry,
            };

            let Some((campaign, token)) = self.start(&entry, &cancel).await else {
                continue;
            };

            let campaign_id = campaign.id.clone();
            let revision = campaign.revision;
            let worker = Arc::clone(&self);
            let task = tokio::spawn(async move { worker.execute(campaign, token).await });

            let supervisor = Arc::clone(&self);
            tokio::spawn(async move {
                let result = task.await;
                supervisor.clear_in_flight(&campaign_id, revision);
                if let Err(e) = result {
                    if e.is_panic() {
                        let message = panic_message(e.into_panic());
                        supervisor.handle_panic(&campaign_id, revision, message).await;
                    }
                }
                drop(permit);
            });
        }

        tracing::info!("Generation coordinator stopping");
    }

    async fn next_entry(&self) -> QueueEntry {
        loop {
            if let Some(entry) = lock(&self.queue).pop() {
                return entry;
            }
            self.queued.notified().await;
        }
    }

    /// Move a queued campaign to generating. Stale entries return `None`.
    async fn start(
        &self,
        entry: &QueueEntry,
        cancel: &CancellationToken,
    ) -> Option<(Campaign, CancellationToken)> {
        let mut map = self.campaigns.write().await;
        let campaign = map.get_mut(&entry.campaign_id)?;
        if campaign.revision != entry.revision || campaign.status != CampaignStatus::Queued {
            tracing::debug!(
                campaign_id = %entry.campaign_id,
                revision = entry.revision,
                "Skipping stale queue entry"
            );
            return None;
        }
        if let Err(e) = campaign.transition(CampaignStatus::Generating, Utc::now()) {
            tracing::error!(campaign_id = %entry.campaign_id, error = %e, "Cannot start campaign");
            return None;
        }

        let token = cancel.child_token();
        lock(&self.in_flight).insert(campaign.id.clone(), (campaign.revision, token.clone()));
        Some((campaign.clone(), token))
    }

    async fn execute(&self, campaign: Campaign, token: CancellationToken) {
        let campaign_id = campaign.id.as_str();
        let revision = campaign.revision;
        let request = GenerationRequest::from_brief(&campaign.brief, revision);
        let retry = &self.config.retry;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            if !self.record_attempt(campaign_id, revision, attempt).await {
                return;
            }
            tracing::info!(campaign_id, revision, attempt, "Generation attempt started");
            self.bus.publish(MonitorEvent::CampaignStarted {
                campaign_id: campaign_id.to_string(),
                revision,
                attempt,
            });

            let result = self
                .breakers
                .call(DEP_GENERATION, self.config.call_timeout, &token, || {
                    self.service.generate(&request)
                })
                .await;

            let error = match result {
                Ok(output) => {
                    self.complete(campaign_id, revision, output).await;
                    return;
                }
                Err(CallError::Cancelled) => {
                    tracing::info!(campaign_id, revision, "Generation cancelled");
                    return;
                }
                Err(CallError::Open(open)) => {
                    // The breaker's own alert covers this failure.
                    self.fail(campaign_id, revision, attempt, open.to_string(), false)
                        .await;
                    return;
                }
                Err(CallError::Timeout(after)) => GenerationError::Timeout(after),
                Err(CallError::Inner(e)) => e,
            };

            if error.is_transient() && retry.allows_retry(attempt) {
                let delay = retry.delay_after(attempt);
                tracing::warn!(
                    campaign_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient generation failure, retrying"
                );
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!(campaign_id, revision, "Generation cancelled during backoff");
                        return;
                    }
                    _ = tokio::time::sleep(delay) => continue,
                }
            }

            self.fail(campaign_id, revision, attempt, error.to_string(), true)
                .await;
            return;
        }
    }

    /// Bump the attempt counter. False when the task no longer owns the
    /// campaign (superseded or cancelled).
    async fn record_attempt(&self, campaign_id: &str, revision: u32, attempt: u32) -> bool {
        let mut map = self.campaigns.write().await;
        match map.get_mut(campaign_id) {
            Some(c) if c.revision == revision && c.status == CampaignStatus::Generating => {
                c.attempt_count = attempt;
                c.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    async fn complete(&self, campaign_id: &str, revision: u32, output: GenerationResult) {
        let now = Utc::now();
        let GenerationResult {
            variants,
            cost,
            duration_secs,
        } = output;

        let analysis = {
            let mut map = self.campaigns.write().await;
            let Some(campaign) = map.get_mut(campaign_id) else {
                return;
            };
            if campaign.revision != revision || campaign.status != CampaignStatus::Generating {
                tracing::debug!(campaign_id, revision, "Discarding result for superseded revision");
                return;
            }
            if let Err(e) = campaign.transition(CampaignStatus::Completed, now) {
                tracing::error!(campaign_id, error = %e, "Cannot complete campaign");
                return;
            }
            campaign.variant_locations = variants;
            campaign.cost = Some(cost);
            campaign.duration_secs = Some(duration_secs);
            self.tracker.analyze_campaign(campaign)
        };
        self.tracker.record(campaign_id, revision, &analysis).await;

        tracing::info!(
            campaign_id,
            revision,
            variant_count = analysis.variant_count,
            expected_count = analysis.expected_count,
            cost,
            duration_secs,
            "Campaign completed"
        );

        let cost_per_asset = cost / f64::from(analysis.variant_count.max(1));
        self.observe_metric(Some(campaign_id), METRIC_COST_PER_ASSET, cost_per_asset)
            .await;
        self.observe_metric(Some(campaign_id), METRIC_DURATION_SECS, duration_secs)
            .await;
        self.observe_success(1.0).await;

        self.bus.publish(MonitorEvent::CampaignCompleted {
            campaign_id: campaign_id.to_string(),
            revision,
            analysis,
            cost,
            duration_secs,
        });
    }

    async fn fail(&self, campaign_id: &str, revision: u32, attempts: u32, error: String, publish: bool) {
        let deadline = {
            let mut map = self.campaigns.write().await;
            let Some(campaign) = map.get_mut(campaign_id) else {
                return;
            };
            if campaign.revision != revision || campaign.status != CampaignStatus::Generating {
                return;
            }
            if let Err(e) = campaign.transition(CampaignStatus::Failed, Utc::now()) {
                tracing::error!(campaign_id, error = %e, "Cannot fail campaign");
                return;
            }
            campaign.last_error = Some(error.clone());
            campaign.brief.deadline
        };

        tracing::error!(campaign_id, revision, attempts, error = %error, "Campaign generation failed");
        self.observe_success(0.0).await;

        if publish {
            self.bus.publish(MonitorEvent::GenerationFailed {
                campaign_id: campaign_id.to_string(),
                revision,
                attempts,
                error,
                deadline,
            });
        }
    }

    async fn handle_panic(&self, campaign_id: &str, revision: u32, message: String) {
        let error = format!("generation task panicked: {message}");
        {
            let mut map = self.campaigns.write().await;
            if let Some(campaign) = map.get_mut(campaign_id) {
                if campaign.revision == revision
                    && campaign.status == CampaignStatus::Generating
                    && campaign.transition(CampaignStatus::Failed, Utc::now()).is_ok()
                {
                    campaign.last_error = Some(error.clone());
                }
            }
        }

        tracing::error!(campaign_id, revision, error = %error, "Generation task panicked");
        self.observe_success(0.0).await;
        self.bus.publish(MonitorEvent::SystemError {
            component: "coordinator".into(),
            campaign_id: Some(campaign_id.to_string()),
            error,
        });
    }

    // -----------------------------------------------------------------------
    // Thresholds
    // -----------------------------------------------------------------------

    /// Check `value` against the bound in force, then add it to the window.
    async fn observe_metric(&self, campaign_id: Option<&str>, metric: &str, value: f64) {
        let breach = {
            let mut engine = self.thresholds.lock().await;
            let breach = engine.check(metric, value);
            log_dropped(engine.observe(metric, value, Utc::now()));
            breach
        };
        if let Some(breach) = breach {
            self.publish_breach(campaign_id, breach);
        }
    }

    /// Record a campaign outcome and compare the rolling success rate with
    /// the bound that was in force before this outcome.
    async fn observe_success(&self, value: f64) {
        let breach = {
            let mut engine = self.thresholds.lock().await;
            let bound = engine.current_bound(METRIC_SUCCESS_RATE);
            log_dropped(engine.observe(METRIC_SUCCESS_RATE, value, Utc::now()));
            engine
                .state(METRIC_SUCCESS_RATE)
                .filter(|state| state.samples.len() >= MIN_SAMPLES)
                .and_then(|state| {
                    let rate = mean(&state.samples);
                    bound.violation(rate).map(|direction| Breach {
                        metric: METRIC_SUCCESS_RATE.to_string(),
                        value: rate,
                        bound,
                        direction,
                    })
                })
        };
        if let Some(breach) = breach {
            self.publish_breach(None, breach);
        }
    }

    fn publish_breach(&self, campaign_id: Option<&str>, breach: Breach) {
        tracing::warn!(
            campaign_id,
            metric = %breach.metric,
            value = breach.value,
            lower = ?breach.bound.lower,
            upper = ?breach.bound.upper,
            "Threshold breached"
        );
        self.bus.publish(MonitorEvent::ThresholdBreached {
            campaign_id: campaign_id.map(str::to_string),
            breach,
        });
    }
}

fn log_dropped(observation: Observation) {
    if let Observation::Dropped { reason } = observation {
        tracing::warn!(%reason, "Threshold sample dropped");
    }
}

#[cfg(test)]
mod tests {
    use adwatch_core::circuit_breaker::CircuitBreakerConfig;
    use adwatch_core::variants::{CategoryCoverageScorer, VariantPolicy};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;

    use super::*;

    fn entry(priority: Priority, deadline: Option<Timestamp>, submitted_at: Timestamp, seq: u64) -> QueueEntry {
        QueueEntry {
            campaign_id: format!("c{seq}"),
            revision: 1,
            priority,
            deadline,
            submitted_at,
            seq,
        }
    }

    #[test]
    fn queue_orders_priority_deadline_submission() {
        let now = Utc::now();
        let soon = Some(now + ChronoDuration::hours(1));
        let later = Some(now + ChronoDuration::hours(5));

        let mut heap = BinaryHeap::new();
        heap.push(entry(Priority::Normal, None, now, 0));
        heap.push(entry(Priority::Normal, later, now, 1));
        heap.push(entry(Priority::Critical, None, now, 2));
        heap.push(entry(Priority::Normal, soon, now, 3));
        heap.push(entry(Priority::Normal, None, now - ChronoDuration::minutes(1), 4));
        heap.push(entry(Priority::Normal, None, now, 5));
        heap.push(entry(Priority::Low, soon, now, 6));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop()).map(|e| e.seq).collect();
        assert_eq!(order, vec![2, 3, 1, 4, 0, 5, 6]);
    }

    struct Idle;

    #[async_trait]
    impl GenerationService for Idle {
        async fn generate(&self, _: &GenerationRequest) -> Result<GenerationResult, GenerationError> {
            Err(GenerationError::InvalidResponse("unused".into()))
        }
    }

    fn coordinator() -> (Coordinator, CampaignStore, Arc<EventBus>) {
        let bus = Arc::new(EventBus::default());
        let campaigns = CampaignStore::new();
        let breakers = Arc::new(BreakerRegistry::new(
            CircuitBreakerConfig::default(),
            bus.clone(),
            &[DEP_GENERATION],
        ));
        let tracker = Arc::new(VariantTracker::new(
            VariantPolicy::default(),
            Arc::new(CategoryCoverageScorer),
            campaigns.clone(),
        ));
        let coordinator = Coordinator::new(
            CoordinatorConfig::default(),
            campaigns.clone(),
            Arc::new(Idle),
            breakers,
            Arc::new(tokio::sync::Mutex::new(ThresholdEngine::default())),
            tracker,
            bus.clone(),
        );
        (coordinator, campaigns, bus)
    }

    fn brief(id: &str, hash: &str) -> CampaignBrief {
        CampaignBrief {
            id: id.into(),
            products: vec!["tea".into()],
            required_categories: vec!["1:1".into()],
            priority: Priority::Normal,
            deadline: None,
            message: None,
            target_region: None,
            target_audience: None,
            content_hash: hash.into(),
            source_path: format!("briefs/{id}.json"),
        }
    }

    #[tokio::test]
    async fn submit_queues_then_ignores_same_content() {
        let (coord, campaigns, bus) = coordinator();
        let mut rx = bus.subscribe();

        assert_eq!(coord.submit(brief("a", "h1")).await.unwrap(), SubmitOutcome::Queued);
        assert_eq!(coord.submit(brief("a", "h1")).await.unwrap(), SubmitOutcome::Unchanged);
        assert_eq!(coord.queue_len(), 1);
        assert_eq!(campaigns.get("a").await.unwrap().status, CampaignStatus::Queued);

        assert_matches!(rx.try_recv().unwrap().event, MonitorEvent::CampaignQueued { revision: 1, .. });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn changed_brief_supersedes_generating_campaign() {
        let (coord, campaigns, _bus) = coordinator();
        coord.submit(brief("a", "h1")).await.unwrap();
        let first = coord.next_entry().await;
        let root = CancellationToken::new();
        let (_, token) = coord.start(&first, &root).await.unwrap();
        assert_eq!(coord.in_flight_count(), 1);

        assert_eq!(coord.submit(brief("a", "h2")).await.unwrap(), SubmitOutcome::Superseded);
        assert!(token.is_cancelled());
        assert_eq!(coord.in_flight_count(), 0);

        let stored = campaigns.get("a").await.unwrap();
        assert_eq!(stored.status, CampaignStatus::Queued);
        assert_eq!(stored.revision, 2);

        // The stale entry for revision 1 can no longer start.
        assert!(coord.start(&first, &root).await.is_none());
        let second = coord.next_entry().await;
        assert_eq!(second.revision, 2);
        assert!(coord.start(&second, &root).await.is_some());
    }

    #[tokio::test]
    async fn cancel_rules() {
        let (coord, campaigns, bus) = coordinator();
        assert_matches!(coord.cancel("missing").await, Err(CoreError::NotFound { .. }));

        coord.submit(brief("a", "h1")).await.unwrap();
        let mut rx = bus.subscribe();
        let cancelled = coord.cancel("a").await.unwrap();
        assert_eq!(cancelled.status, CampaignStatus::Cancelled);
        assert_matches!(rx.try_recv().unwrap().event, MonitorEvent::CampaignCancelled { .. });
        assert_matches!(coord.cancel("a").await, Err(CoreError::Conflict(_)));

        // Resubmitting changed content restarts the campaign.
        assert_eq!(coord.submit(brief("a", "h2")).await.unwrap(), SubmitOutcome::Requeued);
        assert_eq!(campaigns.get("a").await.unwrap().status, CampaignStatus::Queued);
    }

    #[tokio::test]
    async fn recover_requeues_interrupted_work() {
        let (coord, campaigns, _bus) = coordinator();
        let now = Utc::now();
        let mut generating = Campaign::new(brief("g", "h"), now);
        generating.transition(CampaignStatus::Queued, now).unwrap();
        generating.transition(CampaignStatus::Generating, now).unwrap();
        let mut done = Campaign::new(brief("d", "h"), now);
        done.transition(CampaignStatus::Queued, now).unwrap();
        done.transition(CampaignStatus::Generating, now).unwrap();
        done.transition(CampaignStatus::Completed, now).unwrap();
        campaigns.insert(generating).await;
        campaigns.insert(done).await;

        assert_eq!(coord.recover().await, 1);
        assert_eq!(campaigns.get("g").await.unwrap().status, CampaignStatus::Queued);
        assert_eq!(campaigns.get("d").await.unwrap().status, CampaignStatus::Completed);
    }
}
