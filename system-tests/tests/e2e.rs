// system-tests/tests/e2e.rs
// ============================================================================
// Module: End-to-End Suites
// Description: Full engine runs against an in-process stub SUT.
// ============================================================================
//! ## Overview
//! Each suite drives the real scheduler, runner, transport, and artifact
//! store against an axum stub, then inspects the persisted streams the way
//! a report generator would.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    reason = "Test-only output and panic-based assertions are permitted."
)]

mod helpers;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use helpers::harness::spawn_stub_sut;
use helpers::scenarios::branch_scenario;
use helpers::scenarios::extract_reuse_scenario;
use helpers::scenarios::failing_assertion_scenario;
use helpers::scenarios::slow_scenario;
use helpers::scenarios::stub_sut;
use helpers::scenarios::turbulence_scenario;
use helpers::scenarios::variation_scenario;
use helpers::scenarios::wait_scenario;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use windtunnel_core::core::identifiers::RunId;
use windtunnel_core::core::records::RunManifest;
use windtunnel_core::core::records::StepRecord;
use windtunnel_core::core::records::Stream;
use windtunnel_core::core::scenario::Scenario;
use windtunnel_core::core::sut::SutConfig;
use windtunnel_core::runtime::InstanceScheduler;
use windtunnel_core::runtime::RunOptions;
use windtunnel_core::runtime::RunSummary;
use windtunnel_http::ReqwestTransport;
use windtunnel_store::ArtifactStore;
use windtunnel_store::RunReader;

// ============================================================================
// SECTION: Harness
// ============================================================================

/// Executes one run end to end and finalizes the store.
async fn execute_run(
    storage_root: &Path,
    run_id: &str,
    sut: SutConfig,
    scenarios: Vec<Scenario>,
    options: &RunOptions,
    cancel: CancellationToken,
) -> RunSummary {
    let run_id = RunId::new(run_id);
    let manifest = RunManifest {
        run_id: run_id.clone(),
        sut_name: sut.name.clone(),
        scenario_ids: scenarios.iter().map(|scenario| scenario.id.clone()).collect(),
        seed: options.seed,
        parallelism: options.parallelism,
        instance_target: options.instances,
        started_at: Utc::now(),
        sut: sut.clone(),
        scenarios: scenarios.clone(),
    };

    let store = ArtifactStore::new(storage_root);
    let writer = store.open(&manifest).expect("store open");
    let transport = ReqwestTransport::with_defaults().expect("transport");

    let scheduler = InstanceScheduler::new(
        Arc::new(sut),
        scenarios.into_iter().map(Arc::new).collect(),
        Arc::new(transport),
        Arc::new(writer.clone()),
    );
    let summary = scheduler.execute(run_id, options, cancel).await.expect("run");
    writer.finalize(&summary).await.expect("finalize");
    summary
}

/// Reads every step record of a run.
fn read_steps(storage_root: &Path, run_id: &str) -> Vec<StepRecord> {
    let reader = RunReader::new(storage_root, run_id);
    reader
        .read_lines(Stream::Steps, 0)
        .expect("read steps")
        .into_iter()
        .map(|line| serde_json::from_value(line.payload).expect("step record"))
        .collect()
}

// ============================================================================
// SECTION: Suites
// ============================================================================

#[tokio::test]
async fn two_step_extract_and_reuse() {
    let sut_server = spawn_stub_sut().await;
    let root = TempDir::new().unwrap();

    let summary = execute_run(
        root.path(),
        "run-extract",
        stub_sut(sut_server.base_url()),
        vec![extract_reuse_scenario()],
        &RunOptions::new(1, 1, 11),
        CancellationToken::new(),
    )
    .await;

    assert_eq!(summary.totals.instances_total, 1);
    assert_eq!(summary.totals.passed, 1);

    let steps = read_steps(root.path(), "run-extract");
    assert_eq!(steps.len(), 2);
    assert!(steps.iter().all(|step| step.observation.ok));

    let reader = RunReader::new(root.path(), "run-extract");
    let instances = reader.read_lines(Stream::Instances, 0).unwrap();
    assert_eq!(instances.len(), 1);

    // A live observer sees exactly what the persisted streams hold.
    let channel = windtunnel_live::LiveChannel::attach(root.path(), "run-extract").unwrap();
    let mut session = channel.session();
    let mut kinds = Vec::new();
    while let Some(frame) = session.next_frame().await.unwrap() {
        kinds.push(match frame {
            windtunnel_live::LiveFrame::InstanceComplete(_) => "instance_complete",
            windtunnel_live::LiveFrame::StatsUpdate(_) => "stats_update",
            windtunnel_live::LiveFrame::RunComplete(_) => "run_complete",
            windtunnel_live::LiveFrame::Heartbeat => "heartbeat",
        });
    }
    assert_eq!(kinds, vec!["instance_complete", "stats_update", "run_complete"]);
    sut_server.shutdown().await;
}

#[tokio::test]
async fn wait_succeeds_after_two_pending_polls() {
    let sut_server = spawn_stub_sut().await;
    let root = TempDir::new().unwrap();

    let summary = execute_run(
        root.path(),
        "run-wait",
        stub_sut(sut_server.base_url()),
        vec![wait_scenario()],
        &RunOptions::new(1, 1, 11),
        CancellationToken::new(),
    )
    .await;
    assert_eq!(summary.totals.passed, 1);

    let steps = read_steps(root.path(), "run-wait");
    assert_eq!(steps.len(), 1);
    let observation = &steps[0].observation;
    assert!(observation.ok);
    assert!(observation.attempts.len() >= 3, "attempts: {}", observation.attempts.len());
    assert!(observation.latency_ms >= 20.0, "latency: {}", observation.latency_ms);
    assert!(observation.attempts.last().unwrap().condition_met.unwrap());
    sut_server.shutdown().await;
}

#[tokio::test]
async fn assertion_failure_is_captured_not_errored() {
    let sut_server = spawn_stub_sut().await;
    let root = TempDir::new().unwrap();

    let summary = execute_run(
        root.path(),
        "run-assert",
        stub_sut(sut_server.base_url()),
        vec![failing_assertion_scenario()],
        &RunOptions::new(1, 1, 11),
        CancellationToken::new(),
    )
    .await;
    assert_eq!(summary.totals.failed, 1);
    assert_eq!(summary.totals.errored, 0);

    let reader = RunReader::new(root.path(), "run-assert");
    let assertions = reader.read_lines(Stream::Assertions, 0).unwrap();
    assert_eq!(assertions.len(), 1);
    let payload = &assertions[0].payload;
    assert_eq!(payload.get("passed").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(payload.get("expected").and_then(|v| v.as_str()), Some("200"));
    assert_eq!(payload.get("actual").and_then(|v| v.as_str()), Some("500"));

    let instances = reader.read_lines(Stream::Instances, 0).unwrap();
    assert_eq!(
        instances[0].payload.get("status").and_then(|v| v.as_str()),
        Some("failed")
    );
    sut_server.shutdown().await;
}

#[tokio::test]
async fn turbulence_latency_is_identical_across_reexecutions() {
    let sut_server = spawn_stub_sut().await;
    let root = TempDir::new().unwrap();

    let latency_of = |steps: Vec<StepRecord>| {
        let turbulence =
            steps[0].observation.turbulence.clone().expect("turbulence metadata");
        turbulence.latency_ms.expect("injected latency")
    };

    for run_id in ["run-turb-a", "run-turb-b"] {
        execute_run(
            root.path(),
            run_id,
            stub_sut(sut_server.base_url()),
            vec![turbulence_scenario()],
            &RunOptions::new(1, 1, 4242),
            CancellationToken::new(),
        )
        .await;
    }

    let first = latency_of(read_steps(root.path(), "run-turb-a"));
    let second = latency_of(read_steps(root.path(), "run-turb-b"));
    assert_eq!(first, second, "same seed and identity must draw the same latency");
    assert!((50 ..= 200).contains(&first));
    sut_server.shutdown().await;
}

#[tokio::test]
async fn variation_draws_are_recorded_and_deterministic() {
    let sut_server = spawn_stub_sut().await;
    let root = TempDir::new().unwrap();

    for run_id in ["run-vary-a", "run-vary-b"] {
        let summary = execute_run(
            root.path(),
            run_id,
            stub_sut(sut_server.base_url()),
            vec![variation_scenario()],
            &RunOptions::new(4, 2, 777),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(summary.totals.passed, 4);
    }

    let entries = |run_id: &str| {
        let reader = RunReader::new(root.path(), run_id);
        let mut lines = reader.read_lines(Stream::Instances, 0).unwrap();
        lines.sort_by_key(|line| {
            line.payload
                .get("iteration")
                .and_then(serde_json::Value::as_u64)
                .unwrap_or_default()
        });
        lines
            .into_iter()
            .map(|line| line.payload.get("entry").cloned().unwrap())
            .collect::<Vec<_>>()
    };

    let first = entries("run-vary-a");
    for entry in &first {
        let drawn = entry
            .get("variation")
            .and_then(|variation| variation.get("user_id"))
            .and_then(|value| value.as_str())
            .unwrap();
        assert!(drawn == "user1" || drawn == "user2");
        assert_eq!(
            entry.get("injected_user").and_then(|value| value.as_str()),
            Some(drawn),
            "seed data template resolved against the drawn variation"
        );
        assert!(entry
            .get("variation")
            .and_then(|variation| variation.get("apply_coupon"))
            .is_some_and(serde_json::Value::is_boolean));
    }
    assert_eq!(first, entries("run-vary-b"), "same seed draws the same variations");
    sut_server.shutdown().await;
}

#[tokio::test]
async fn cancellation_preserves_artifacts_for_every_instance() {
    let sut_server = spawn_stub_sut().await;
    let root = TempDir::new().unwrap();

    let mut options = RunOptions::new(100, 10, 5);
    options.grace = Duration::from_secs(2);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let summary = execute_run(
        root.path(),
        "run-cancel",
        stub_sut(sut_server.base_url()),
        vec![slow_scenario()],
        &options,
        cancel,
    )
    .await;

    assert_eq!(summary.totals.instances_total, 100);
    assert!(summary.totals.cancelled > 0, "expected cancelled instances");

    let reader = RunReader::new(root.path(), "run-cancel");
    let instances = reader.read_lines(Stream::Instances, 0).unwrap();
    assert_eq!(instances.len(), 100, "every declared instance has a completion record");
    assert!(reader.is_finalized(), "summary.json exists after shutdown");

    let recomputed_cancelled = instances
        .iter()
        .filter(|line| {
            line.payload.get("error_kind").and_then(|v| v.as_str()) == Some("cancelled")
        })
        .count() as u64;
    assert_eq!(recomputed_cancelled, summary.totals.cancelled);
    sut_server.shutdown().await;
}

#[tokio::test]
async fn branch_chooses_the_matching_side_only() {
    let sut_server = spawn_stub_sut().await;
    let root = TempDir::new().unwrap();

    execute_run(
        root.path(),
        "run-branch-declined",
        stub_sut(sut_server.base_url()),
        vec![branch_scenario("declined")],
        &RunOptions::new(1, 1, 11),
        CancellationToken::new(),
    )
    .await;
    let names: Vec<String> = read_steps(root.path(), "run-branch-declined")
        .iter()
        .map(|step| step.step_name.as_str().to_string())
        .collect();
    assert!(names.contains(&"refund_payment".to_string()));
    assert!(!names.contains(&"capture_payment".to_string()));

    execute_run(
        root.path(),
        "run-branch-captured",
        stub_sut(sut_server.base_url()),
        vec![branch_scenario("captured")],
        &RunOptions::new(1, 1, 11),
        CancellationToken::new(),
    )
    .await;
    let names: Vec<String> = read_steps(root.path(), "run-branch-captured")
        .iter()
        .map(|step| step.step_name.as_str().to_string())
        .collect();
    assert!(names.contains(&"capture_payment".to_string()));
    assert!(!names.contains(&"refund_payment".to_string()));
    sut_server.shutdown().await;
}

#[tokio::test]
async fn summary_aggregates_match_recomputation_over_streams() {
    let sut_server = spawn_stub_sut().await;
    let root = TempDir::new().unwrap();

    let summary = execute_run(
        root.path(),
        "run-recompute",
        stub_sut(sut_server.base_url()),
        vec![extract_reuse_scenario()],
        &RunOptions::new(5, 2, 11),
        CancellationToken::new(),
    )
    .await;

    let reader = RunReader::new(root.path(), "run-recompute");
    let instances = reader.read_lines(Stream::Instances, 0).unwrap();
    let steps = reader.read_lines(Stream::Steps, 0).unwrap();

    assert_eq!(instances.len() as u64, summary.totals.instances_total);
    assert_eq!(steps.len() as u64, summary.total_steps);
    let passed = instances
        .iter()
        .filter(|line| line.payload.get("status").and_then(|v| v.as_str()) == Some("passed"))
        .count() as u64;
    assert_eq!(passed, summary.totals.passed);

    // Stream sequences are dense and zero-based.
    for (index, line) in steps.iter().enumerate() {
        assert_eq!(line.seq, index as u64);
    }
    sut_server.shutdown().await;
}
