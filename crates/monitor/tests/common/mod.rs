#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use adwatch_core::alert::{Alert, AlertType};
use adwatch_core::brief::{content_hash, CampaignBrief, Priority};
use adwatch_core::campaign::{Campaign, CampaignStatus};
use adwatch_core::context::ContextObject;
use adwatch_core::variants::VariantArtifact;
use adwatch_events::{Audience, DeliveryError, Notifier};
use adwatch_generation::{
    GenerationError, GenerationRequest, GenerationResult, GenerationService, RetryPolicy,
};
use adwatch_monitor::alerts::Notifiers;
use adwatch_monitor::config::MonitorConfig;
use adwatch_monitor::monitor::Monitor;
use adwatch_monitor::router::build_app_router;
use adwatch_monitor::store::{AlertStore, CampaignStore};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Generation service stand-in
// ---------------------------------------------------------------------------

/// Scripted generation service. Pops one scripted reply per call and falls
/// back to `default` once the script runs out.
pub struct MockService {
    script: Mutex<VecDeque<Result<GenerationResult, GenerationError>>>,
    default: fn(&GenerationRequest) -> Result<GenerationResult, GenerationError>,
    delay: Duration,
    calls: AtomicUsize,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl MockService {
    /// Every call produces one variant per product and category.
    pub fn complete() -> Self {
        Self::with_default(|req| Ok(full_result(req)))
    }

    /// Every call fails with a 503.
    pub fn unavailable() -> Self {
        Self::with_default(|_| {
            Err(GenerationError::Api {
                status: 503,
                body: "overloaded".into(),
            })
        })
    }

    pub fn with_default(
        default: fn(&GenerationRequest) -> Result<GenerationResult, GenerationError>,
    ) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, reply: Result<GenerationResult, GenerationError>) -> Self {
        self.script.lock().unwrap().push_back(reply);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationService for MockService {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResult, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| (self.default)(request))
    }
}

/// One artifact for every product × category pair.
pub fn full_result(request: &GenerationRequest) -> GenerationResult {
    let variants = request
        .products
        .iter()
        .flat_map(|p| {
            request.required_categories.iter().map(move |c| VariantArtifact {
                location: format!("out/{}/{p}-{c}.png", request.campaign_id),
                product: Some(p.clone()),
                category: Some(c.clone()),
            })
        })
        .collect();
    GenerationResult {
        variants,
        cost: 1.2,
        duration_secs: 30.0,
    }
}

// ---------------------------------------------------------------------------
// Notifier stand-in
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(ContextObject, Audience)>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(ContextObject, Audience)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn channel(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, context: &ContextObject, audience: Audience) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push((context.clone(), audience));
        Ok(())
    }
}

/// Fails every send, after an optional delay.
#[derive(Default)]
pub struct FailingNotifier {
    delay: Duration,
    calls: AtomicUsize,
}

impl FailingNotifier {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for FailingNotifier {
    fn channel(&self) -> &'static str {
        "failing"
    }

    async fn send(&self, _: &ContextObject, _: Audience) -> Result<(), DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Err(DeliveryError::NotConfigured("failing".into()))
    }
}

/// Panics inside every send.
#[derive(Default)]
pub struct PanickingNotifier {
    calls: AtomicUsize,
}

impl PanickingNotifier {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Notifier for PanickingNotifier {
    fn channel(&self) -> &'static str {
        "panicking"
    }

    async fn send(&self, _: &ContextObject, _: Audience) -> Result<(), DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        panic!("notifier exploded");
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Config rooted in `dir` with fast retries and no real backoff.
pub fn test_config(dir: &Path) -> MonitorConfig {
    let mut config = MonitorConfig {
        host: "127.0.0.1".into(),
        port: 0,
        brief_dir: dir.join("briefs"),
        state_dir: dir.join("state"),
        poll_interval: Duration::from_millis(50),
        snapshot_interval: Duration::from_secs(3600),
        ..MonitorConfig::default()
    };
    config.coordinator.call_timeout = Duration::from_secs(5);
    config.coordinator.retry = RetryPolicy {
        max_attempts: 1,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        multiplier: 2.0,
    };
    config
}

pub async fn build_monitor(
    config: MonitorConfig,
    service: Arc<MockService>,
    notifier: Arc<RecordingNotifier>,
) -> Monitor {
    build_monitor_with(config, service, Notifiers::single(notifier)).await
}

pub async fn build_monitor_with(config: MonitorConfig, service: Arc<MockService>, notifiers: Notifiers) -> Monitor {
    Monitor::build(config, service, notifiers).await.unwrap()
}

/// Full application router over a monitor whose tasks are not started.
pub async fn build_test_app(dir: &Path) -> (Router, Monitor) {
    let monitor = build_monitor(
        test_config(dir),
        Arc::new(MockService::complete()),
        Arc::new(RecordingNotifier::default()),
    )
    .await;
    (build_app_router(monitor.app_state()), monitor)
}

pub fn brief(id: &str, products: &[&str], categories: &[&str]) -> CampaignBrief {
    brief_with(id, products, categories, Priority::Normal)
}

pub fn brief_with(id: &str, products: &[&str], categories: &[&str], priority: Priority) -> CampaignBrief {
    let products: Vec<String> = products.iter().map(|s| s.to_string()).collect();
    let required_categories: Vec<String> = categories.iter().map(|s| s.to_string()).collect();
    let hash_input = format!("{id}|{products:?}|{required_categories:?}|{priority:?}");
    CampaignBrief {
        id: id.into(),
        products,
        required_categories,
        priority,
        deadline: None,
        message: None,
        target_region: None,
        target_audience: None,
        content_hash: content_hash(hash_input.as_bytes()),
        source_path: format!("briefs/{id}.json"),
    }
}

/// Poll the store until `id` reaches `status`. Panics after `timeout`.
pub async fn wait_for_status(
    campaigns: &CampaignStore,
    id: &str,
    status: CampaignStatus,
    timeout: Duration,
) -> Campaign {
    wait_for_campaign(campaigns, id, timeout, |c| c.status == status).await
}

/// Poll the store until campaign `id` matches `pred`. Panics after `timeout`.
pub async fn wait_for_campaign(
    campaigns: &CampaignStore,
    id: &str,
    timeout: Duration,
    pred: impl Fn(&Campaign) -> bool,
) -> Campaign {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match campaigns.get(id).await {
            Some(c) if pred(&c) => return c,
            current if tokio::time::Instant::now() >= deadline => {
                panic!("campaign {id} never matched, last seen {current:?}")
            }
            _ => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
}

/// Poll the store until some alert matches `pred`. Panics after `timeout`.
pub async fn wait_for_alert(
    alerts: &AlertStore,
    timeout: Duration,
    pred: impl Fn(&Alert) -> bool,
) -> Alert {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(alert) = alerts.list().await.into_iter().find(|a| pred(a)) {
            return alert;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("no matching alert within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Alerts of one type currently stored.
pub async fn alerts_of(alerts: &AlertStore, alert_type: AlertType) -> Vec<Alert> {
    alerts
        .list()
        .await
        .into_iter()
        .filter(|a| a.alert_type() == alert_type)
        .collect()
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
