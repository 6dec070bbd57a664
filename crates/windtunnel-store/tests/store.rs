// windtunnel-store/tests/store.rs
// ============================================================================
// Module: Artifact Store Tests
// Description: Append discipline, sequence density, and finalize invariants.
// ============================================================================
//! ## Overview
//! Validates the single-writer store on a real filesystem: dense 0-based
//! sequences per stream, durable line-per-record layout, exclusive opens,
//! cursor-based tailing, and the summary-only-on-finalize invariant.

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
use windtunnel_core::core::identifiers::StepName;
use windtunnel_core::core::observation::InstanceStatus;
use windtunnel_core::core::observation::Observation;
use windtunnel_core::core::records::InstanceRecord;
use windtunnel_core::core::records::RunManifest;
use windtunnel_core::core::records::StepRecord;
use windtunnel_core::core::records::Stream;
use windtunnel_core::core::sut::SutConfig;
use windtunnel_core::interfaces::RunEventSink;
use windtunnel_core::runtime::RunSummary;
use windtunnel_core::runtime::RunTotals;
use windtunnel_store::ArtifactStore;
use windtunnel_store::RunReader;
use windtunnel_store::StoreError;
use windtunnel_store::StreamCursors;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

fn manifest(run_id: &RunId) -> RunManifest {
    RunManifest {
        run_id: run_id.clone(),
        sut_name: "fixture".to_string(),
        scenario_ids: vec![ScenarioId::new("s")],
        seed: 1,
        parallelism: 1,
        instance_target: 1,
        started_at: Utc::now(),
        sut: SutConfig {
            name: "fixture".to_string(),
            default_headers: BTreeMap::new(),
            services: [(
                "api".into(),
                windtunnel_core::core::sut::ServiceConfig {
                    base_url: "http://sut".to_string(),
                    timeout_seconds: None,
                    headers: BTreeMap::new(),
                },
            )]
            .into_iter()
            .collect(),
        },
        scenarios: Vec::new(),
    }
}

fn step_record(run_id: &RunId, index: u32) -> StepRecord {
    StepRecord {
        run_id: run_id.clone(),
        instance_id: InstanceId::from_index(0),
        correlation_id: CorrelationId::new("corr_0"),
        step_index: index,
        step_name: StepName::new(format!("step_{index}")),
        step_type: "http".to_string(),
        observation: Observation::ok(1.0),
    }
}

fn instance_record(run_id: &RunId) -> InstanceRecord {
    let now = Utc::now();
    InstanceRecord {
        run_id: run_id.clone(),
        instance_id: InstanceId::from_index(0),
        correlation_id: CorrelationId::new("corr_0"),
        scenario_id: ScenarioId::new("s"),
        iteration: 0,
        seed_prefix: 7,
        status: InstanceStatus::Passed,
        started_at: now,
        completed_at: now,
        duration_ms: 5.0,
        entry: BTreeMap::new(),
        error_kind: None,
        error: None,
    }
}

fn summary(run_id: &RunId) -> RunSummary {
    RunSummary {
        run_id: run_id.clone(),
        started_at: Utc::now(),
        completed_at: Utc::now(),
        duration_ms: 10.0,
        totals: RunTotals {
            instances_total: 1,
            passed: 1,
            failed: 0,
            errored: 0,
            cancelled: 0,
        },
        pass_rate: 100.0,
        total_steps: 3,
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
async fn sequences_are_dense_and_zero_based_per_stream() {
    let root = TempDir::new().unwrap();
    let store = ArtifactStore::new(root.path());
    let run_id = RunId::new("run-seq");
    let writer = store.open(&manifest(&run_id)).unwrap();

    for index in 0 .. 5 {
        let seq = writer.append_step(step_record(&run_id, index)).await.unwrap();
        assert_eq!(seq, u64::from(index));
    }
    let seq = writer.append_instance(instance_record(&run_id)).await.unwrap();
    assert_eq!(seq, 0, "streams sequence independently");

    let reader = RunReader::new(root.path(), run_id.as_str());
    let lines = reader.read_lines(Stream::Steps, 0).unwrap();
    let seqs: Vec<u64> = lines.iter().map(|line| line.seq).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    for line in &lines {
        assert!(line.payload.get("ts").is_some(), "lines carry a timestamp");
        assert_eq!(
            line.payload.get("run_id").and_then(serde_json::Value::as_str),
            Some("run-seq")
        );
    }
}

#[tokio::test]
async fn opens_are_exclusive_per_run() {
    let root = TempDir::new().unwrap();
    let store = ArtifactStore::new(root.path());
    let run_id = RunId::new("run-excl");
    let _writer = store.open(&manifest(&run_id)).unwrap();
    assert!(matches!(store.open(&manifest(&run_id)), Err(StoreError::AlreadyOpen(_))));
}

#[tokio::test]
async fn summary_exists_only_after_finalize() {
    let root = TempDir::new().unwrap();
    let store = ArtifactStore::new(root.path());
    let run_id = RunId::new("run-fin");
    let writer = store.open(&manifest(&run_id)).unwrap();
    writer.append_instance(instance_record(&run_id)).await.unwrap();

    let reader = RunReader::new(root.path(), run_id.as_str());
    assert!(!reader.is_finalized());
    assert!(reader.read_summary().unwrap().is_none());

    writer.finalize(&summary(&run_id)).await.unwrap();
    assert!(reader.is_finalized());
    let read_back = reader.read_summary().unwrap().unwrap();
    assert_eq!(read_back.totals.passed, 1);

    // The writer queue is closed after finalize; further appends fail.
    assert!(writer.append_step(step_record(&run_id, 9)).await.is_err());
}

#[tokio::test]
async fn tail_cursor_sees_only_new_lines() {
    let root = TempDir::new().unwrap();
    let store = ArtifactStore::new(root.path());
    let run_id = RunId::new("run-tail");
    let writer = store.open(&manifest(&run_id)).unwrap();
    let reader = RunReader::new(root.path(), run_id.as_str());
    let mut cursors = StreamCursors::new();

    writer.append_step(step_record(&run_id, 0)).await.unwrap();
    writer.append_step(step_record(&run_id, 1)).await.unwrap();
    let first = reader.read_new(Stream::Steps, &mut cursors).unwrap();
    assert_eq!(first.len(), 2);

    let idle = reader.read_new(Stream::Steps, &mut cursors).unwrap();
    assert!(idle.is_empty());

    writer.append_step(step_record(&run_id, 2)).await.unwrap();
    let tail = reader.read_new(Stream::Steps, &mut cursors).unwrap();
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].seq, 2);
}

#[tokio::test]
async fn read_lines_honors_from_seq() {
    let root = TempDir::new().unwrap();
    let store = ArtifactStore::new(root.path());
    let run_id = RunId::new("run-from");
    let writer = store.open(&manifest(&run_id)).unwrap();
    for index in 0 .. 4 {
        writer.append_step(step_record(&run_id, index)).await.unwrap();
    }

    let reader = RunReader::new(root.path(), run_id.as_str());
    let lines = reader.read_lines(Stream::Steps, 2).unwrap();
    let seqs: Vec<u64> = lines.iter().map(|line| line.seq).collect();
    assert_eq!(seqs, vec![2, 3]);
}

#[tokio::test]
async fn payloads_land_under_the_instance_directory() {
    let root = TempDir::new().unwrap();
    let store = ArtifactStore::new(root.path());
    let run_id = RunId::new("run-payload");
    let writer = store.open(&manifest(&run_id)).unwrap();

    let instance = InstanceId::from_index(3);
    writer
        .write_payload(&instance, "0001_response.json", &serde_json::json!({"big": true}))
        .await
        .unwrap();

    let path = root
        .path()
        .join("run-payload")
        .join("artifacts")
        .join(instance.as_str())
        .join("0001_response.json");
    assert!(path.is_file());
}

#[tokio::test]
async fn manifest_round_trips() {
    let root = TempDir::new().unwrap();
    let store = ArtifactStore::new(root.path());
    let run_id = RunId::new("run-manifest");
    let _writer = store.open(&manifest(&run_id)).unwrap();

    let reader = RunReader::new(root.path(), run_id.as_str());
    let read_back = reader.read_manifest().unwrap();
    assert_eq!(read_back.run_id, run_id);
    assert_eq!(read_back.sut_name, "fixture");
}
