// windtunnel-core/src/core/records.rs
// ============================================================================
// Module: Artifact Record Payloads
// Description: Payload shapes persisted to the per-run event streams.
// Purpose: Define manifest, instance, step, and assertion record types.
// Dependencies: crate::core::{identifiers, observation, scenario, sut}, serde
// ============================================================================

//! ## Overview
//! These are the payloads the engine hands to the artifact store. The store
//! wraps each payload in an envelope carrying the monotonic per-stream `seq`
//! and a UTC timestamp; the payloads themselves stay transport-agnostic so an
//! in-memory sink can hold them untouched. The manifest snapshots enough
//! configuration to replay any instance of the run.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::InstanceId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::ScenarioId;
use crate::core::identifiers::StepName;
use crate::core::observation::ErrorKind;
use crate::core::observation::InstanceStatus;
use crate::core::observation::Observation;
use crate::core::scenario::Scenario;
use crate::core::sut::SutConfig;

// ============================================================================
// SECTION: Streams
// ============================================================================

/// Append-only event streams of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stream {
    /// One line per completed instance.
    Instances,
    /// One line per completed step.
    Steps,
    /// One line per assertion result.
    Assertions,
}

impl Stream {
    /// Returns the stream's file stem.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Instances => "instances",
            Self::Steps => "steps",
            Self::Assertions => "assertions",
        }
    }

    /// All streams in a stable order.
    pub const ALL: [Self; 3] = [Self::Instances, Self::Steps, Self::Assertions];
}

// ============================================================================
// SECTION: Manifest
// ============================================================================

/// Run identity and configuration snapshot written at run start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    /// Run identifier.
    pub run_id: RunId,
    /// SUT name.
    pub sut_name: String,
    /// Scenario identifiers in dispatch order.
    pub scenario_ids: Vec<ScenarioId>,
    /// Run seed driving every derived PRNG.
    pub seed: u64,
    /// Concurrency cap.
    pub parallelism: usize,
    /// Requested instance count.
    pub instance_target: u64,
    /// Run start time.
    pub started_at: DateTime<Utc>,
    /// Full SUT configuration snapshot.
    pub sut: SutConfig,
    /// Full scenario snapshots, replay input.
    pub scenarios: Vec<Scenario>,
}

// ============================================================================
// SECTION: Stream Payloads
// ============================================================================

/// Completion record for one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Owning run.
    pub run_id: RunId,
    /// Instance identifier.
    pub instance_id: InstanceId,
    /// Correlation identifier attached to every outbound request.
    pub correlation_id: CorrelationId,
    /// Scenario the instance executed.
    pub scenario_id: ScenarioId,
    /// Zero-based dispatch index; also the context `iteration` value.
    pub iteration: u64,
    /// Seed prefix derived from the run seed and the dispatch index.
    pub seed_prefix: u64,
    /// Terminal status.
    pub status: InstanceStatus,
    /// Instance start time.
    pub started_at: DateTime<Utc>,
    /// Instance completion time.
    pub completed_at: DateTime<Utc>,
    /// Total duration in milliseconds.
    pub duration_ms: f64,
    /// Materialized entry seed data, replay input.
    #[serde(default)]
    pub entry: BTreeMap<String, Value>,
    /// Error kind for errored instances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Error detail for errored instances.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Completion record for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Owning run.
    pub run_id: RunId,
    /// Owning instance.
    pub instance_id: InstanceId,
    /// Correlation identifier of the owning instance.
    pub correlation_id: CorrelationId,
    /// Zero-based execution index within the instance.
    pub step_index: u32,
    /// Step name.
    pub step_name: StepName,
    /// Step type tag (`http`, `wait`, `assert`, `branch`).
    pub step_type: String,
    /// Full observation.
    pub observation: Observation,
}

/// Record for one assertion result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionRecord {
    /// Owning run.
    pub run_id: RunId,
    /// Owning instance.
    pub instance_id: InstanceId,
    /// Correlation identifier of the owning instance.
    pub correlation_id: CorrelationId,
    /// Assertion name.
    pub name: StepName,
    /// Whether the assertion held.
    pub passed: bool,
    /// Rendered expected value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    /// Captured actual value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    /// Evaluation error, when the assertion could not be decided.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
