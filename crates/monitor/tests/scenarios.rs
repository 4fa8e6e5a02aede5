//! End-to-end runs of the monitor against a scripted generation service.

mod common;

use std::sync::Arc;
use std::time::Duration;

use adwatch_core::alert::{AlertKind, AlertStatus, AlertType, Severity};
use adwatch_core::campaign::CampaignStatus;
use adwatch_core::circuit_breaker::CircuitBreakerConfig;
use adwatch_core::variants::VariantArtifact;
use adwatch_generation::{GenerationError, GenerationResult};
use adwatch_monitor::coordinator::SubmitOutcome;
use common::*;

const WAIT: Duration = Duration::from_secs(5);

fn two_variants() -> GenerationResult {
    GenerationResult {
        variants: vec![
            VariantArtifact {
                location: "out/spring/tea-1x1.png".into(),
                product: Some("tea".into()),
                category: Some("1:1".into()),
            },
            VariantArtifact {
                location: "out/spring/coffee-1x1.png".into(),
                product: Some("coffee".into()),
                category: Some("1:1".into()),
            },
        ],
        cost: 0.8,
        duration_secs: 12.0,
    }
}

// ---------------------------------------------------------------------------
// Test: short output raises an insufficient_variants alert
// ---------------------------------------------------------------------------

#[tokio::test]
async fn short_output_raises_medium_insufficient_variants_alert() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(MockService::complete().then(Ok(two_variants())));
    let notifier = Arc::new(RecordingNotifier::default());
    let monitor = build_monitor(test_config(dir.path()), service.clone(), notifier.clone()).await;
    let handles = monitor.start();

    let outcome = monitor
        .coordinator
        .submit(brief("spring", &["tea", "coffee"], &["1:1", "4:5", "9:16"]))
        .await
        .unwrap();
    assert_eq!(outcome, SubmitOutcome::Queued);

    let campaign = wait_for_status(&monitor.campaigns, "spring", CampaignStatus::Completed, WAIT).await;
    assert_eq!(campaign.expected_count, 6);

    let alert = wait_for_alert(&monitor.alerts, WAIT, |a| {
        a.alert_type() == AlertType::InsufficientVariants
    })
    .await;
    assert_eq!(alert.severity, Severity::Medium);
    assert_eq!(alert.campaign_id.as_deref(), Some("spring"));
    match &alert.kind {
        AlertKind::InsufficientVariants {
            variant_count,
            expected_count,
            shortfall,
            ..
        } => {
            assert_eq!(*variant_count, 2);
            assert_eq!(*expected_count, 6);
            assert_eq!(*shortfall, 4);
        }
        other => panic!("unexpected alert kind {other:?}"),
    }

    let stored = wait_for_status(&monitor.campaigns, "spring", CampaignStatus::Completed, WAIT).await;
    assert_eq!(stored.variant_count, 2);
    assert_eq!(service.calls(), 1);

    monitor.shutdown(handles, Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn full_output_raises_no_alert() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(MockService::complete());
    let notifier = Arc::new(RecordingNotifier::default());
    let monitor = build_monitor(test_config(dir.path()), service.clone(), notifier.clone()).await;
    let handles = monitor.start();

    monitor
        .coordinator
        .submit(brief("full", &["tea", "coffee"], &["1:1", "9:16"]))
        .await
        .unwrap();
    let campaign = wait_for_campaign(&monitor.campaigns, "full", WAIT, |c| {
        c.status == CampaignStatus::Completed && c.variant_count > 0
    })
    .await;
    assert_eq!(campaign.variant_count, 4);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(alerts_of(&monitor.alerts, AlertType::InsufficientVariants).await.is_empty());
    assert!(notifier.sent().is_empty());

    monitor.shutdown(handles, Duration::from_secs(2)).await.unwrap();
}

// ---------------------------------------------------------------------------
// Test: repeated failures open the circuit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failing_service_opens_circuit_after_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.coordinator.max_concurrent = 1;
    config.breaker = CircuitBreakerConfig {
        failure_threshold: 5,
        recovery_timeout: Duration::from_secs(300),
    };
    let service = Arc::new(MockService::unavailable());
    let notifier = Arc::new(RecordingNotifier::default());
    let monitor = build_monitor(config, service.clone(), notifier.clone()).await;
    let handles = monitor.start();

    let ids = ["c1", "c2", "c3", "c4", "c5", "c6"];
    for id in ids {
        monitor
            .coordinator
            .submit(brief(id, &["tea"], &["1:1"]))
            .await
            .unwrap();
    }
    for id in ids {
        let campaign = wait_for_status(&monitor.campaigns, id, CampaignStatus::Failed, WAIT).await;
        assert!(campaign.last_error.is_some());
    }

    // The sixth campaign is rejected by the open circuit without a call.
    assert_eq!(service.calls(), 5);

    let open = wait_for_alert(&monitor.alerts, WAIT, |a| a.alert_type() == AlertType::CircuitOpen).await;
    assert_eq!(open.severity, Severity::Critical);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(alerts_of(&monitor.alerts, AlertType::CircuitOpen).await.len(), 1);
    assert_eq!(
        alerts_of(&monitor.alerts, AlertType::GenerationFailure).await.len(),
        5,
        "circuit rejections do not raise generation failures"
    );

    monitor.shutdown(handles, Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn successful_trial_closes_circuit_and_resolves_alert() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.coordinator.max_concurrent = 1;
    config.breaker = CircuitBreakerConfig {
        failure_threshold: 1,
        recovery_timeout: Duration::from_millis(200),
    };
    let service = Arc::new(MockService::complete().then(Err(GenerationError::Api {
        status: 502,
        body: "bad gateway".into(),
    })));
    let notifier = Arc::new(RecordingNotifier::default());
    let monitor = build_monitor(config, service.clone(), notifier.clone()).await;
    let handles = monitor.start();

    monitor
        .coordinator
        .submit(brief("first", &["tea"], &["1:1"]))
        .await
        .unwrap();
    wait_for_status(&monitor.campaigns, "first", CampaignStatus::Failed, WAIT).await;
    let open = wait_for_alert(&monitor.alerts, WAIT, |a| a.alert_type() == AlertType::CircuitOpen).await;
    assert!(!open.status.is_resolved());

    tokio::time::sleep(Duration::from_millis(300)).await;
    monitor
        .coordinator
        .submit(brief("second", &["tea"], &["1:1"]))
        .await
        .unwrap();
    wait_for_status(&monitor.campaigns, "second", CampaignStatus::Completed, WAIT).await;

    let resolved = wait_for_alert(&monitor.alerts, WAIT, |a| {
        a.id == open.id && a.status == AlertStatus::Resolved
    })
    .await;
    assert!(resolved.resolved_at.is_some());
    assert_eq!(service.calls(), 2);

    monitor.shutdown(handles, Duration::from_secs(2)).await.unwrap();
}

// ---------------------------------------------------------------------------
// Test: retries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_failure_is_retried_until_success() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.coordinator.retry.max_attempts = 3;
    let service = Arc::new(
        MockService::complete()
            .then(Err(GenerationError::Timeout(Duration::from_secs(1))))
            .then(Err(GenerationError::Api {
                status: 503,
                body: "busy".into(),
            })),
    );
    let notifier = Arc::new(RecordingNotifier::default());
    let monitor = build_monitor(config, service.clone(), notifier.clone()).await;
    let handles = monitor.start();

    monitor
        .coordinator
        .submit(brief("retry", &["tea"], &["1:1"]))
        .await
        .unwrap();
    let campaign = wait_for_status(&monitor.campaigns, "retry", CampaignStatus::Completed, WAIT).await;
    assert_eq!(campaign.attempt_count, 3);
    assert_eq!(service.calls(), 3);
    assert!(alerts_of(&monitor.alerts, AlertType::GenerationFailure).await.is_empty());

    monitor.shutdown(handles, Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn permanent_failure_is_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.coordinator.retry.max_attempts = 3;
    let service = Arc::new(MockService::complete().then(Err(GenerationError::Api {
        status: 400,
        body: "bad brief".into(),
    })));
    let notifier = Arc::new(RecordingNotifier::default());
    let monitor = build_monitor(config, service.clone(), notifier.clone()).await;
    let handles = monitor.start();

    monitor
        .coordinator
        .submit(brief("rejected", &["tea"], &["1:1"]))
        .await
        .unwrap();
    let campaign = wait_for_status(&monitor.campaigns, "rejected", CampaignStatus::Failed, WAIT).await;
    assert_eq!(campaign.attempt_count, 1);
    assert_eq!(service.calls(), 1);

    let alert = wait_for_alert(&monitor.alerts, WAIT, |a| {
        a.alert_type() == AlertType::GenerationFailure
    })
    .await;
    assert_eq!(alert.severity, Severity::Medium);
    assert_eq!(alert.campaign_id.as_deref(), Some("rejected"));

    monitor.shutdown(handles, Duration::from_secs(2)).await.unwrap();
}

// ---------------------------------------------------------------------------
// Test: superseding brief
// ---------------------------------------------------------------------------

#[tokio::test]
async fn changed_brief_supersedes_running_generation() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(MockService::complete().with_delay(Duration::from_millis(300)));
    let notifier = Arc::new(RecordingNotifier::default());
    let monitor = build_monitor(test_config(dir.path()), service.clone(), notifier.clone()).await;
    let handles = monitor.start();

    monitor
        .coordinator
        .submit(brief("launch", &["tea"], &["1:1"]))
        .await
        .unwrap();
    let running = wait_for_status(&monitor.campaigns, "launch", CampaignStatus::Generating, WAIT).await;
    assert_eq!(running.revision, 1);

    let outcome = monitor
        .coordinator
        .submit(brief("launch", &["tea", "coffee"], &["1:1"]))
        .await
        .unwrap();
    assert_eq!(outcome, SubmitOutcome::Superseded);

    let done = wait_for_campaign(&monitor.campaigns, "launch", WAIT, |c| {
        c.status == CampaignStatus::Completed && c.variant_count > 0
    })
    .await;
    assert_eq!(done.revision, 2);
    assert_eq!(done.brief.products.len(), 2);
    assert_eq!(done.variant_count, 2);

    let revisions: Vec<u32> = service.requests().iter().map(|r| r.revision).collect();
    assert_eq!(revisions, vec![1, 2]);

    monitor.shutdown(handles, Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn resubmitting_identical_brief_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(MockService::complete());
    let notifier = Arc::new(RecordingNotifier::default());
    let monitor = build_monitor(test_config(dir.path()), service.clone(), notifier.clone()).await;
    let handles = monitor.start();

    let b = brief("same", &["tea"], &["1:1"]);
    monitor.coordinator.submit(b.clone()).await.unwrap();
    wait_for_status(&monitor.campaigns, "same", CampaignStatus::Completed, WAIT).await;

    let outcome = monitor.coordinator.submit(b).await.unwrap();
    assert_eq!(outcome, SubmitOutcome::Unchanged);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(service.calls(), 1);

    monitor.shutdown(handles, Duration::from_secs(2)).await.unwrap();
}

// ---------------------------------------------------------------------------
// Test: duplicate suppression and persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repeated_failure_for_same_campaign_alerts_once() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(MockService::unavailable());
    let notifier = Arc::new(RecordingNotifier::default());
    let monitor = build_monitor(test_config(dir.path()), service.clone(), notifier.clone()).await;
    let handles = monitor.start();

    monitor
        .coordinator
        .submit(brief("flaky", &["tea"], &["1:1"]))
        .await
        .unwrap();
    wait_for_status(&monitor.campaigns, "flaky", CampaignStatus::Failed, WAIT).await;
    wait_for_alert(&monitor.alerts, WAIT, |a| a.alert_type() == AlertType::GenerationFailure).await;

    // A changed brief requeues the failed campaign, which fails again.
    monitor
        .coordinator
        .submit(brief("flaky", &["tea", "coffee"], &["1:1"]))
        .await
        .unwrap();
    let failed = wait_for_status(&monitor.campaigns, "flaky", CampaignStatus::Failed, WAIT).await;
    assert_eq!(failed.revision, 2);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(service.calls(), 2);
    assert_eq!(alerts_of(&monitor.alerts, AlertType::GenerationFailure).await.len(), 1);

    monitor.shutdown(handles, Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn delivered_alert_carries_context_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(MockService::complete().then(Ok(two_variants())));
    let notifier = Arc::new(RecordingNotifier::default());
    let monitor = build_monitor(test_config(dir.path()), service.clone(), notifier.clone()).await;
    let handles = monitor.start();

    monitor
        .coordinator
        .submit(brief("spring", &["tea", "coffee"], &["1:1", "9:16"]))
        .await
        .unwrap();
    let alert = wait_for_alert(&monitor.alerts, WAIT, |a| a.status == AlertStatus::Sent).await;
    assert!(alert.context_snapshot.is_some());

    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    let (context, _) = &sent[0];
    assert_eq!(context.alert_details.id, alert.id);
    let campaign = context.campaign_context.as_ref().unwrap();
    assert_eq!(campaign.expected_count, 4);
    assert_eq!(campaign.shortfall, 2);

    monitor.shutdown(handles, Duration::from_secs(2)).await.unwrap();
}

#[tokio::test]
async fn state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let monitor = build_monitor(
            test_config(dir.path()),
            Arc::new(MockService::complete().then(Ok(two_variants()))),
            Arc::new(RecordingNotifier::default()),
        )
        .await;
        let handles = monitor.start();
        monitor
            .coordinator
            .submit(brief("spring", &["tea", "coffee"], &["1:1", "9:16"]))
            .await
            .unwrap();
        wait_for_alert(&monitor.alerts, WAIT, |a| a.status == AlertStatus::Sent).await;
        monitor.shutdown(handles, Duration::from_secs(2)).await.unwrap();
    }

    let monitor = build_monitor(
        test_config(dir.path()),
        Arc::new(MockService::complete()),
        Arc::new(RecordingNotifier::default()),
    )
    .await;
    let campaign = monitor.campaigns.get("spring").await.unwrap();
    assert_eq!(campaign.status, CampaignStatus::Completed);
    assert_eq!(campaign.variant_count, 2);
    assert_eq!(alerts_of(&monitor.alerts, AlertType::InsufficientVariants).await.len(), 1);
}
