// windtunnel-core/src/core/observation.rs
// ============================================================================
// Module: Observations and Error Taxonomy
// Description: Structured results of step execution and assertions.
// Purpose: Define the observation shape, attempt records, and error kinds.
// Dependencies: crate::core::identifiers, serde
// ============================================================================

//! ## Overview
//! Every executed step produces exactly one [`Observation`]: outcome flag,
//! measured latency, protocol fields when the step spoke HTTP, structured
//! errors, injected-turbulence metadata, and per-attempt records for retries
//! and polls. Error kinds are a closed taxonomy that travels as data through
//! the artifact streams; nothing renders kinds to prose inside the engine.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::core::identifiers::ServiceName;
use crate::core::identifiers::StepName;

// ============================================================================
// SECTION: Error Taxonomy
// ============================================================================

/// Closed error taxonomy carried by observations and instance records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Scenario referenced a service the SUT does not declare.
    MissingService,
    /// Scenario failed validation.
    InvalidScenario,
    /// SUT configuration failed validation.
    InvalidSut,
    /// Template referenced a key missing from the context.
    TemplateMissingKey,
    /// Template marker was malformed.
    TemplateParse,
    /// Expression used a construct outside the sandbox allow-list.
    SandboxForbiddenNode,
    /// Expression evaluation exceeded its budget.
    SandboxTimeout,
    /// DNS resolution failed.
    Dns,
    /// TCP connection failed.
    Connect,
    /// TLS handshake failed.
    Tls,
    /// Request deadline expired.
    Timeout,
    /// Other transport-level failure.
    Transport,
    /// Response status indicated failure.
    Status,
    /// Response body could not be decoded.
    BodyDecode,
    /// Extraction path matched nothing.
    ExtractionMissingPath,
    /// Wait polling exhausted its budget.
    WaitTimeout,
    /// Assertion evaluated to false.
    AssertionFailed,
    /// Instance exceeded its executed-step budget.
    MaxStepsExceeded,
    /// Instance was cancelled before completing.
    Cancelled,
    /// Unexpected internal failure.
    Internal,
    /// Artifact store write failed after bounded retries.
    StoreWrite,
    /// Artifact stream failed integrity checks.
    StoreCorrupt,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::MissingService => "missing_service",
            Self::InvalidScenario => "invalid_scenario",
            Self::InvalidSut => "invalid_sut",
            Self::TemplateMissingKey => "template_missing_key",
            Self::TemplateParse => "template_parse",
            Self::SandboxForbiddenNode => "sandbox_forbidden_node",
            Self::SandboxTimeout => "sandbox_timeout",
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::Status => "status",
            Self::BodyDecode => "body_decode",
            Self::ExtractionMissingPath => "extraction_missing_path",
            Self::WaitTimeout => "wait_timeout",
            Self::AssertionFailed => "assertion_failed",
            Self::MaxStepsExceeded => "max_steps_exceeded",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
            Self::StoreWrite => "store_write",
            Self::StoreCorrupt => "store_corrupt",
        };
        f.write_str(label)
    }
}

/// One structured error attached to an observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationError {
    /// Taxonomy kind.
    pub kind: ErrorKind,
    /// Offending path for template and extraction errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Attempt count for wait timeouts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    /// Free-form detail preserved for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ObservationError {
    /// Creates an error with only a kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            path: None,
            attempts: None,
            detail: None,
        }
    }

    /// Creates an error carrying an offending path.
    #[must_use]
    pub fn with_path(kind: ErrorKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: Some(path.into()),
            attempts: None,
            detail: None,
        }
    }

    /// Creates an error carrying free-form detail.
    #[must_use]
    pub fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            path: None,
            attempts: None,
            detail: Some(detail.into()),
        }
    }
}

// ============================================================================
// SECTION: Attempts and Turbulence Metadata
// ============================================================================

/// Record of one attempt: an HTTP retry or a wait poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub attempt: u32,
    /// Whether the attempt satisfied the step.
    pub ok: bool,
    /// Attempt latency in milliseconds.
    pub latency_ms: f64,
    /// HTTP status of the attempt, when a response arrived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Offset from step start in milliseconds (poll attempts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset_ms: Option<f64>,
    /// Whether the wait condition held on this poll.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_met: Option<bool>,
    /// Attempt failure description, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One re-issued call recorded by the turbulence retry storm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StormAttempt {
    /// Whether the wrapped call succeeded.
    pub ok: bool,
    /// Status of the wrapped call, when a response arrived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Wrapped-call latency in milliseconds.
    pub latency_ms: f64,
    /// Latency injected before this call, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub injected_latency_ms: Option<u64>,
}

/// Metadata describing what turbulence injected around one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurbulenceReport {
    /// Service the step targeted.
    pub service: ServiceName,
    /// Step the policy matched.
    pub action: StepName,
    /// Extra call issues beyond the first.
    pub retry_count: u32,
    /// Forced deadline in milliseconds, when injected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_after_ms: Option<u64>,
    /// Last injected latency in milliseconds, when any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    /// Every storm-issued call in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<StormAttempt>,
}

// ============================================================================
// SECTION: Observation
// ============================================================================

/// Structured result of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Whether the step satisfied its contract.
    pub ok: bool,
    /// Wall-clock latency of the whole step in milliseconds.
    pub latency_ms: f64,
    /// HTTP status of the final response, when the step spoke HTTP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Response headers of the final response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,
    /// Decoded response body of the final response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Structured errors, empty when ok.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ObservationError>,
    /// Injected-turbulence metadata, when the step was decorated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turbulence: Option<TurbulenceReport>,
    /// Per-attempt records for retries and polls.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<AttemptRecord>,
}

impl Observation {
    /// Creates a successful observation with the given latency.
    #[must_use]
    pub fn ok(latency_ms: f64) -> Self {
        Self {
            ok: true,
            latency_ms,
            status_code: None,
            headers: None,
            body: None,
            errors: Vec::new(),
            turbulence: None,
            attempts: Vec::new(),
        }
    }

    /// Creates a failed observation carrying one error.
    #[must_use]
    pub fn failed(latency_ms: f64, error: ObservationError) -> Self {
        Self {
            ok: false,
            latency_ms,
            status_code: None,
            headers: None,
            body: None,
            errors: vec![error],
            turbulence: None,
            attempts: Vec::new(),
        }
    }

    /// Returns true when any error is infrastructure-level rather than a
    /// behavioral failure of the SUT.
    #[must_use]
    pub fn has_infrastructure_error(&self) -> bool {
        self.errors.iter().any(|error| {
            matches!(
                error.kind,
                ErrorKind::Internal
                    | ErrorKind::StoreWrite
                    | ErrorKind::StoreCorrupt
                    | ErrorKind::Cancelled
                    | ErrorKind::MaxStepsExceeded
            )
        })
    }
}

// ============================================================================
// SECTION: Assertions
// ============================================================================

/// Outcome of one assertion evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssertionResult {
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

// ============================================================================
// SECTION: Instance Status
// ============================================================================

/// Lifecycle status of one instance. Transitions are one-way:
/// `running` moves to exactly one terminal state and never reverts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Instance is executing.
    Running,
    /// Every observation was ok and every assertion passed.
    Passed,
    /// An assertion or step failed without an infrastructure error.
    Failed,
    /// An infrastructure error prevented evaluation.
    Errored,
}

impl InstanceStatus {
    /// Returns true for terminal states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}
