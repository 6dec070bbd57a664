// windtunnel-core/src/runtime/replay.rs
// ============================================================================
// Module: Instance Replay
// Description: Re-execution of one recorded instance.
// Purpose: Rebuild an instance from its records and run it again.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Replay rebuilds one instance from the run manifest and its completion
//! record: same scenario snapshot, same seed, same correlation id, and the
//! recorded (already materialized) entry data. Because turbulence decisions
//! key off `(seed, instance, step, attempt)`, a replay against a
//! deterministic SUT reproduces the original injected faults exactly.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::core::identifiers::InstanceId;
use crate::core::records::InstanceRecord;
use crate::core::records::RunManifest;
use crate::core::scenario::Scenario;
use crate::interfaces::HttpTransport;
use crate::interfaces::RunEventSink;
use crate::runtime::runner::InstanceOutcome;
use crate::runtime::runner::InstanceSpec;
use crate::runtime::runner::ScenarioRunner;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while rebuilding a replay spec.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    /// The manifest carries no snapshot for the recorded scenario.
    #[error("manifest has no snapshot for scenario {scenario}")]
    MissingScenario {
        /// Scenario the instance record references.
        scenario: String,
    },
    /// The instance record does not belong to the manifest's run.
    #[error("instance {instance} does not belong to run {run}")]
    RunMismatch {
        /// Instance identifier.
        instance: InstanceId,
        /// Manifest run identifier.
        run: String,
    },
}

// ============================================================================
// SECTION: Replay
// ============================================================================

/// Re-executes one recorded instance through the scenario runner.
///
/// Events stream into the provided sink exactly as they would during a live
/// run; the caller chooses where they go (stdout emitter, memory, a fresh
/// store).
///
/// # Errors
///
/// Returns [`ReplayError`] when the record cannot be matched to the
/// manifest.
pub async fn replay_instance(
    manifest: &RunManifest,
    record: &InstanceRecord,
    transport: Arc<dyn HttpTransport>,
    sink: Arc<dyn RunEventSink>,
) -> Result<InstanceOutcome, ReplayError> {
    if record.run_id != manifest.run_id {
        return Err(ReplayError::RunMismatch {
            instance: record.instance_id.clone(),
            run: manifest.run_id.to_string(),
        });
    }
    let scenario: &Scenario = manifest
        .scenarios
        .iter()
        .find(|scenario| scenario.id == record.scenario_id)
        .ok_or_else(|| ReplayError::MissingScenario {
            scenario: record.scenario_id.to_string(),
        })?;

    let runner = ScenarioRunner::new(Arc::new(manifest.sut.clone()), transport, sink);
    let spec = InstanceSpec {
        run_id: manifest.run_id.clone(),
        instance_id: record.instance_id.clone(),
        correlation_id: record.correlation_id.clone(),
        iteration: record.iteration,
        scenario: Arc::new(scenario.clone()),
        seed: manifest.seed,
        entry_override: Some(record.entry.clone()),
        deadline: None,
        cancel: CancellationToken::new(),
    };
    Ok(runner.run_instance(&spec).await)
}
