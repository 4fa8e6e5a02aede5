//! Brief directory handling, from file on disk to alert or generation call.

mod common;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use adwatch_core::alert::{AlertKind, AlertType, Severity};
use adwatch_core::brief::Priority;
use adwatch_core::campaign::CampaignStatus;
use adwatch_monitor::watcher::BriefWatcher;
use chrono::Utc;
use common::*;

const WAIT: Duration = Duration::from_secs(5);

const INVALID_BRIEF: &str = r#"{ "id": "summer", "products": [] "#;

const VALID_BRIEF: &str = r#"{
    "id": "summer",
    "products": ["tea", "coffee"],
    "required_categories": ["1:1", "9:16"],
    "priority": "high"
}"#;

/// Write through a temp file so a poll never sees a half-written brief.
async fn write_brief(dir: &Path, name: &str, content: &str) {
    let tmp = dir.join(format!("{name}.tmp"));
    tokio::fs::write(&tmp, content).await.unwrap();
    tokio::fs::rename(&tmp, dir.join(name)).await.unwrap();
}

// ---------------------------------------------------------------------------
// Test: polling task end to end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_brief_alerts_once_then_fixed_brief_generates_once() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(MockService::complete());
    let notifier = Arc::new(RecordingNotifier::default());
    let monitor = build_monitor(test_config(dir.path()), service.clone(), notifier.clone()).await;
    let brief_dir = monitor.config.brief_dir.clone();
    let handles = monitor.start();

    write_brief(&brief_dir, "summer.json", INVALID_BRIEF).await;
    let alert = wait_for_alert(&monitor.alerts, WAIT, |a| a.alert_type() == AlertType::BriefParseError).await;
    assert_eq!(alert.severity, Severity::Low);
    assert!(alert.campaign_id.is_none());
    match &alert.kind {
        AlertKind::BriefParseError { source_path, .. } => {
            assert!(source_path.ends_with("summer.json"));
        }
        other => panic!("unexpected alert kind {other:?}"),
    }

    // Several polls over unchanged content raise nothing new.
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(alerts_of(&monitor.alerts, AlertType::BriefParseError).await.len(), 1);
    assert_eq!(service.calls(), 0);

    write_brief(&brief_dir, "summer.json", VALID_BRIEF).await;
    let campaign = wait_for_campaign(&monitor.campaigns, "summer", WAIT, |c| {
        c.status == CampaignStatus::Completed && c.variant_count > 0
    })
    .await;
    assert_eq!(campaign.brief.priority, Priority::High);
    assert_eq!(campaign.variant_count, 4);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(service.calls(), 1);
    assert_eq!(alerts_of(&monitor.alerts, AlertType::BriefParseError).await.len(), 1);

    monitor.shutdown(handles, Duration::from_secs(2)).await.unwrap();
}

// ---------------------------------------------------------------------------
// Test: manual scans feeding the coordinator and alert engine
// ---------------------------------------------------------------------------

#[tokio::test]
async fn manual_scan_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let service = Arc::new(MockService::complete());
    let notifier = Arc::new(RecordingNotifier::default());
    let monitor = build_monitor(test_config(dir.path()), service.clone(), notifier.clone()).await;
    let brief_dir = monitor.config.brief_dir.clone();
    let mut events = monitor.bus.subscribe();
    let mut watcher = BriefWatcher::new(brief_dir.clone(), Arc::clone(&monitor.bus));

    let cancel = monitor.cancel_token();
    let dispatch = tokio::spawn(Arc::clone(&monitor.coordinator).run(cancel.clone()));

    write_brief(&brief_dir, "autumn.yaml", "id: autumn\nproducts: [tea\n").await;
    assert!(watcher.scan().await.unwrap().is_empty());
    let envelope = events.try_recv().unwrap();
    assert_eq!(envelope.event.name(), "brief_parse_failed");
    let alert = monitor.alert_engine.evaluate(&envelope.event, Utc::now()).await.unwrap();
    assert_eq!(alert.alert_type(), AlertType::BriefParseError);

    // Unchanged content is skipped and publishes nothing.
    assert!(watcher.scan().await.unwrap().is_empty());
    assert!(events.try_recv().is_err());

    write_brief(
        &brief_dir,
        "autumn.yaml",
        "id: autumn\nproducts: [tea]\nrequired_categories: ['1:1', '4:5', '9:16']\n",
    )
    .await;
    let briefs = watcher.scan().await.unwrap();
    assert_eq!(briefs.len(), 1);
    for brief in briefs {
        monitor.coordinator.submit(brief).await.unwrap();
    }
    let campaign = wait_for_status(&monitor.campaigns, "autumn", CampaignStatus::Completed, WAIT).await;
    assert_eq!(campaign.expected_count, 3);
    assert_eq!(service.calls(), 1);

    assert!(watcher.scan().await.unwrap().is_empty());

    cancel.cancel();
    dispatch.await.unwrap();
}
