// windtunnel-live/tests/channel.rs
// ============================================================================
// Module: Live Channel Tests
// Description: Frame delivery, stats roll-up, resume, and completion.
// ============================================================================
//! ## Overview
//! Drives a live session against a store being written concurrently:
//! instance completions arrive in order, stats updates coalesce per batch,
//! sessions resume from client cursors, and finalization closes the
//! session with a run-complete frame.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only panic-based assertions are permitted."
)]

use std::collections::BTreeMap;

use chrono::Utc;
use tempfile::TempDir;
use windtunnel_core::core::identifiers::CorrelationId;
use windtunnel_core::core::identifiers::InstanceId;
use windtunnel_core::core::identifiers::RunId;
use windtunnel_core::core::identifiers::ScenarioId;
use windtunnel_core::core::observation::InstanceStatus;
use windtunnel_core::core::records::InstanceRecord;
use windtunnel_core::core::records::RunManifest;
use windtunnel_core::core::sut::ServiceConfig;
use windtunnel_core::core::sut::SutConfig;
use windtunnel_core::interfaces::RunEventSink;
use windtunnel_core::runtime::RunSummary;
use windtunnel_core::runtime::RunTotals;
use windtunnel_live::LiveChannel;
use windtunnel_live::LiveFrame;
use windtunnel_store::ArtifactStore;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

fn manifest(run_id: &RunId) -> RunManifest {
    let mut services = BTreeMap::new();
    services.insert("api".into(), ServiceConfig {
        base_url: "http://sut".to_string(),
        timeout_seconds: None,
        headers: BTreeMap::new(),
    });
    RunManifest {
        run_id: run_id.clone(),
        sut_name: "fixture".to_string(),
        scenario_ids: vec![ScenarioId::new("s")],
        seed: 1,
        parallelism: 1,
        instance_target: 3,
        started_at: Utc::now(),
        sut: SutConfig {
            name: "fixture".to_string(),
            default_headers: BTreeMap::new(),
            services,
        },
        scenarios: Vec::new(),
    }
}

fn instance(run_id: &RunId, index: u64, status: InstanceStatus) -> InstanceRecord {
    let now = Utc::now();
    InstanceRecord {
        run_id: run_id.clone(),
        instance_id: InstanceId::from_index(index),
        correlation_id: CorrelationId::new(format!("corr_{index}")),
        scenario_id: ScenarioId::new("s"),
        iteration: index,
        seed_prefix: index,
        status,
        started_at: now,
        completed_at: now,
        duration_ms: 3.0,
        entry: BTreeMap::new(),
        error_kind: None,
        error: None,
    }
}

fn summary(run_id: &RunId, totals: RunTotals) -> RunSummary {
    RunSummary {
        run_id: run_id.clone(),
        started_at: Utc::now(),
        completed_at: Utc::now(),
        duration_ms: 9.0,
        pass_rate: 0.0,
        totals,
        total_steps: 0,
        total_assertions: 0,
        assertions_passed: 0,
        assertions_failed: 0,
        action_latency: BTreeMap::new(),
        service_latency: BTreeMap::new(),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[tokio::test]
async fn delivers_completions_then_stats_then_run_complete() {
    let root = TempDir::new().unwrap();
    let store = ArtifactStore::new(root.path());
    let run_id = RunId::new("run-live");
    let writer = store.open(&manifest(&run_id)).unwrap();

    writer.append_instance(instance(&run_id, 0, InstanceStatus::Passed)).await.unwrap();
    writer.append_instance(instance(&run_id, 1, InstanceStatus::Failed)).await.unwrap();

    let channel = LiveChannel::attach(root.path(), run_id.as_str()).unwrap();
    let mut session = channel.session();

    let first = session.next_frame().await.unwrap().unwrap();
    let LiveFrame::InstanceComplete(data) = &first else {
        panic!("expected instance_complete, got {first:?}");
    };
    assert_eq!(data.get("instance_id").and_then(|v| v.as_str()), Some("inst_000000"));

    let second = session.next_frame().await.unwrap().unwrap();
    assert!(matches!(second, LiveFrame::InstanceComplete(_)));

    let third = session.next_frame().await.unwrap().unwrap();
    let LiveFrame::StatsUpdate(stats) = &third else {
        panic!("expected stats_update, got {third:?}");
    };
    assert_eq!(stats.get("total").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(stats.get("passed").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(stats.get("failed").and_then(|v| v.as_u64()), Some(1));

    // Finalize while the session is tailing; it must close cleanly.
    let totals = RunTotals {
        instances_total: 2,
        passed: 1,
        failed: 1,
        errored: 0,
        cancelled: 0,
    };
    writer.finalize(&summary(&run_id, totals)).await.unwrap();

    let fourth = session.next_frame().await.unwrap().unwrap();
    assert!(matches!(fourth, LiveFrame::RunComplete(_)));
    assert!(session.next_frame().await.unwrap().is_none());
}

#[tokio::test]
async fn resumed_sessions_skip_already_seen_lines() {
    let root = TempDir::new().unwrap();
    let store = ArtifactStore::new(root.path());
    let run_id = RunId::new("run-resume");
    let writer = store.open(&manifest(&run_id)).unwrap();

    writer.append_instance(instance(&run_id, 0, InstanceStatus::Passed)).await.unwrap();
    writer.append_instance(instance(&run_id, 1, InstanceStatus::Passed)).await.unwrap();

    let channel = LiveChannel::attach(root.path(), run_id.as_str()).unwrap();
    let mut session = channel.session();
    // Consume both completions and the stats frame.
    for _ in 0 .. 3 {
        session.next_frame().await.unwrap().unwrap();
    }
    let cursors = session.cursors();
    assert_eq!(cursors.instances, 2);

    writer.append_instance(instance(&run_id, 2, InstanceStatus::Passed)).await.unwrap();

    let mut resumed = channel.session_from(cursors);
    let frame = resumed.next_frame().await.unwrap().unwrap();
    let LiveFrame::InstanceComplete(data) = &frame else {
        panic!("expected instance_complete, got {frame:?}");
    };
    assert_eq!(data.get("instance_id").and_then(|v| v.as_str()), Some("inst_000002"));
}

#[tokio::test]
async fn unknown_runs_are_rejected() {
    let root = TempDir::new().unwrap();
    assert!(LiveChannel::attach(root.path(), "run-ghost").is_err());
}

#[test]
fn frames_serialize_with_type_tags() {
    let frame = LiveFrame::Heartbeat;
    let encoded = serde_json::to_value(&frame).unwrap();
    assert_eq!(encoded, serde_json::json!({"type": "heartbeat"}));

    let frame = LiveFrame::StatsUpdate(serde_json::json!({"total": 1}));
    let encoded = serde_json::to_value(&frame).unwrap();
    assert_eq!(encoded.get("type").and_then(|v| v.as_str()), Some("stats_update"));
    assert!(encoded.get("data").is_some());
}
