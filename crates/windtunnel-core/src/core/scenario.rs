// windtunnel-core/src/core/scenario.rs
// ============================================================================
// Module: Scenario Definition
// Description: Ordered user-journey flows composed of typed steps.
// Purpose: Define the canonical scenario shape with validation helpers.
// Dependencies: crate::core::{identifiers, sut, turbulence, variation}, serde
// ============================================================================

//! ## Overview
//! A scenario is an ordered flow of tagged steps (`http`, `wait`, `assert`,
//! `branch`) plus optional post-flow assertions, entry seed data, variation
//! and turbulence policies, a stop policy, and a step budget. Steps are a
//! closed sum type; unknown keys are rejected at deserialization time and
//! structural invariants are checked by [`Scenario::validate`] before any
//! instance runs.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::identifiers::ScenarioId;
use crate::core::identifiers::ServiceName;
use crate::core::identifiers::StepName;
use crate::core::sut::SutConfig;
use crate::core::turbulence::TurbulenceConfig;
use crate::core::variation::VariationSpec;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default executed-step budget per instance, branch expansion included.
pub const DEFAULT_MAX_STEPS: u32 = 100;

/// Returns the default step budget (serde default helper).
const fn default_max_steps() -> u32 {
    DEFAULT_MAX_STEPS
}

/// Returns the default wait poll method (serde default helper).
fn default_wait_method() -> String {
    "GET".to_string()
}

// ============================================================================
// SECTION: Scenario
// ============================================================================

/// Canonical scenario definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Scenario identifier.
    pub id: ScenarioId,
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Literal seed data materialized into each instance context.
    #[serde(default)]
    pub entry: EntryContext,
    /// Ordered flow of steps.
    pub flow: Vec<Step>,
    /// Post-flow assertions evaluated in declaration order.
    #[serde(default)]
    pub assertions: Vec<AssertionSpec>,
    /// Early-termination policy.
    #[serde(default)]
    pub stop_when: StopWhen,
    /// Executed-step budget per instance.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Optional per-instance input fuzzing for this scenario.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<VariationSpec>,
    /// Optional fault-injection configuration for this scenario.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turbulence: Option<TurbulenceConfig>,
}

impl Scenario {
    /// Validates scenario invariants that do not require a SUT.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError`] when validation fails.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.id.as_str().trim().is_empty() {
            return Err(ScenarioError::EmptyId);
        }
        if self.flow.is_empty() {
            return Err(ScenarioError::EmptyFlow {
                scenario: self.id.clone(),
            });
        }
        if self.max_steps == 0 {
            return Err(ScenarioError::ZeroMaxSteps {
                scenario: self.id.clone(),
            });
        }
        if let Some(variation) = &self.variation {
            variation.validate().map_err(|reason| ScenarioError::InvalidVariation {
                scenario: self.id.clone(),
                reason,
            })?;
        }

        let mut seen = BTreeSet::new();
        ensure_unique_step_names(&self.flow, &mut seen, &self.id)?;

        let mut assertion_names = BTreeSet::new();
        for assertion in &self.assertions {
            if !assertion_names.insert(assertion.name.clone()) {
                return Err(ScenarioError::DuplicateAssertion {
                    scenario: self.id.clone(),
                    name: assertion.name.clone(),
                });
            }
            assertion.expect.validate().map_err(|reason| ScenarioError::InvalidExpectation {
                scenario: self.id.clone(),
                step: assertion.name.clone(),
                reason,
            })?;
        }

        validate_steps(&self.flow, &self.id)?;
        Ok(())
    }

    /// Validates that every referenced service exists in the SUT.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::UnknownService`] for the first dangling
    /// reference.
    pub fn validate_against(&self, sut: &SutConfig) -> Result<(), ScenarioError> {
        self.validate()?;
        check_services(&self.flow, sut, &self.id)
    }
}

/// Entry seed data for instance contexts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntryContext {
    /// Arbitrary structured seed data exposed as `entry.seed_data`.
    #[serde(default)]
    pub seed_data: BTreeMap<String, Value>,
}

/// Early-termination policy for a scenario.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StopWhen {
    /// Stop the flow walk when any step observation is not ok.
    #[serde(default)]
    pub any_action_fails: bool,
    /// Stop the post-flow assertion sequence on the first failure.
    #[serde(default)]
    pub any_assertion_fails: bool,
}

// ============================================================================
// SECTION: Steps
// ============================================================================

/// Issue one HTTP request and apply declared extractions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpStep {
    /// Step name, unique within the scenario.
    pub name: StepName,
    /// Target service from the SUT configuration.
    pub service: ServiceName,
    /// HTTP method.
    pub method: String,
    /// Request path appended to the service base URL (templated).
    pub path: String,
    /// Step-level header overrides (templated values).
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Query parameters (templated values).
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    /// Optional structured JSON body (templated recursively).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Optional form-encoded body; mutually exclusive with `body`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form: Option<BTreeMap<String, String>>,
    /// Extractions applied to the decoded response body.
    #[serde(default)]
    pub extract: BTreeMap<String, String>,
    /// Optional retry policy for failed attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySpec>,
}

/// Poll an endpoint until an expectation holds or a timeout elapses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WaitStep {
    /// Step name, unique within the scenario.
    pub name: StepName,
    /// Target service from the SUT configuration.
    pub service: ServiceName,
    /// HTTP method used for polling.
    #[serde(default = "default_wait_method")]
    pub method: String,
    /// Request path to poll (templated).
    pub path: String,
    /// Delay between polls in seconds.
    pub interval_seconds: f64,
    /// Total polling budget in seconds.
    pub timeout_seconds: f64,
    /// Condition that ends the wait.
    pub expect: Expectation,
}

/// Evaluate an expectation against the latest response or context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssertStep {
    /// Step name, unique within the scenario.
    pub name: StepName,
    /// Expectation to evaluate.
    pub expect: Expectation,
}

/// Evaluate a condition and execute one of two inline sub-flows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BranchStep {
    /// Step name, unique within the scenario.
    pub name: StepName,
    /// Boolean condition (templated, then sandbox-evaluated).
    pub condition: String,
    /// Steps executed when the condition holds.
    pub if_true: Vec<Step>,
    /// Steps executed when the condition does not hold.
    #[serde(default)]
    pub if_false: Vec<Step>,
}

/// One step of a scenario flow.
///
/// Deserialization is hand-written: the `type` tag selects one of the strict
/// per-variant structs so unknown keys are rejected, which the derived
/// internally-tagged form cannot do.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    /// HTTP call step.
    Http(HttpStep),
    /// Poll-until step.
    Wait(WaitStep),
    /// Assertion step.
    Assert(AssertStep),
    /// Conditional branch step.
    Branch(BranchStep),
}

impl Step {
    /// Returns the step name.
    #[must_use]
    pub fn name(&self) -> &StepName {
        match self {
            Self::Http(step) => &step.name,
            Self::Wait(step) => &step.name,
            Self::Assert(step) => &step.name,
            Self::Branch(step) => &step.name,
        }
    }

    /// Returns the step type tag used in records.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Wait(_) => "wait",
            Self::Assert(_) => "assert",
            Self::Branch(_) => "branch",
        }
    }

    /// Returns the referenced service name for HTTP-bearing steps.
    #[must_use]
    pub fn service(&self) -> Option<&ServiceName> {
        match self {
            Self::Http(step) => Some(&step.service),
            Self::Wait(step) => Some(&step.service),
            Self::Assert(_) | Self::Branch(_) => None,
        }
    }
}

impl<'de> Deserialize<'de> for Step {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error as _;

        let mut value = Value::deserialize(deserializer)?;
        let Some(object) = value.as_object_mut() else {
            return Err(D::Error::custom("step must be an object"));
        };
        let tag = match object.remove("type") {
            Some(Value::String(tag)) => tag,
            Some(_) => return Err(D::Error::custom("step type must be a string")),
            None => return Err(D::Error::missing_field("type")),
        };
        let rest = Value::Object(std::mem::take(object));

        match tag.as_str() {
            "http" => serde_json::from_value(rest).map(Self::Http).map_err(D::Error::custom),
            "wait" => serde_json::from_value(rest).map(Self::Wait).map_err(D::Error::custom),
            "assert" => serde_json::from_value(rest).map(Self::Assert).map_err(D::Error::custom),
            "branch" => serde_json::from_value(rest).map(Self::Branch).map_err(D::Error::custom),
            other => {
                Err(D::Error::unknown_variant(other, &["http", "wait", "assert", "branch"]))
            }
        }
    }
}

// ============================================================================
// SECTION: Retry Policy
// ============================================================================

/// Backoff strategy for step-level retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Constant delay between attempts.
    Fixed,
    /// Exponential delay growth with an optional cap.
    Exponential,
}

/// Retry policy attached to an HTTP step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySpec {
    /// Backoff strategy.
    pub strategy: RetryStrategy,
    /// Maximum number of attempts, including the first.
    pub attempts: u32,
    /// Base delay between attempts in milliseconds.
    pub delay_ms: u64,
    /// Exponential growth factor (defaults to 2.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factor: Option<f64>,
    /// Upper bound on a single backoff delay in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cap_ms: Option<u64>,
    /// Status codes that trigger a retry of an otherwise-complete response.
    #[serde(default)]
    pub on_status: Vec<u16>,
    /// Retry timed-out attempts.
    #[serde(default)]
    pub on_timeout: bool,
    /// Retry connection-level failures.
    #[serde(default)]
    pub on_connection_error: bool,
}

impl RetrySpec {
    /// Computes the backoff delay before the next attempt.
    ///
    /// `attempt` is the 1-based index of the attempt that just failed.
    #[must_use]
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        match self.strategy {
            RetryStrategy::Fixed => self.delay_ms,
            RetryStrategy::Exponential => {
                let factor = self.factor.unwrap_or(2.0);
                let exponent = attempt.saturating_sub(1);
                let scaled = (self.delay_ms as f64) * factor.powi(exponent as i32);
                let bounded = scaled.min(u64::MAX as f64) as u64;
                match self.cap_ms {
                    Some(cap) => bounded.min(cap),
                    None => bounded,
                }
            }
        }
    }
}

// ============================================================================
// SECTION: Expectations
// ============================================================================

/// Declarative expectation evaluated by wait and assert steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Expectation {
    /// Expected HTTP status code of the most recent response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// JSONPath applied to the most recent response body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonpath: Option<String>,
    /// Dotted context path evaluated against the instance context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_path: Option<String>,
    /// Exact value the selected target must equal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equals: Option<Value>,
    /// Value the selected target must contain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<Value>,
    /// Sandboxed boolean expression over body, headers, and context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    /// JSON Schema the most recent body must satisfy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

impl Expectation {
    /// Checks that the expectation declares at least one condition.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the expectation is vacuous or
    /// self-contradictory.
    pub fn validate(&self) -> Result<(), String> {
        let has_target = self.status_code.is_some()
            || self.jsonpath.is_some()
            || self.context_path.is_some()
            || self.expression.is_some()
            || self.schema.is_some();
        if !has_target {
            return Err(
                "expectation needs status_code, jsonpath, context_path, expression, or schema"
                    .to_string(),
            );
        }
        if self.jsonpath.is_some() && self.context_path.is_some() {
            return Err("jsonpath and context_path are mutually exclusive".to_string());
        }
        if (self.equals.is_some() || self.contains.is_some())
            && self.jsonpath.is_none()
            && self.context_path.is_none()
        {
            return Err("equals/contains require jsonpath or context_path".to_string());
        }
        Ok(())
    }
}

/// Named post-flow assertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssertionSpec {
    /// Assertion name, unique within the scenario.
    pub name: StepName,
    /// Expectation to evaluate.
    pub expect: Expectation,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while validating a scenario definition.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// Scenario identifier is empty.
    #[error("scenario id must not be empty")]
    EmptyId,
    /// Scenario flow has no steps.
    #[error("scenario {scenario} has an empty flow")]
    EmptyFlow {
        /// Offending scenario.
        scenario: ScenarioId,
    },
    /// Step budget is zero.
    #[error("scenario {scenario} declares max_steps = 0")]
    ZeroMaxSteps {
        /// Offending scenario.
        scenario: ScenarioId,
    },
    /// Two steps share a name.
    #[error("scenario {scenario} declares duplicate step name: {name}")]
    DuplicateStep {
        /// Offending scenario.
        scenario: ScenarioId,
        /// Duplicated step name.
        name: StepName,
    },
    /// Two assertions share a name.
    #[error("scenario {scenario} declares duplicate assertion name: {name}")]
    DuplicateAssertion {
        /// Offending scenario.
        scenario: ScenarioId,
        /// Duplicated assertion name.
        name: StepName,
    },
    /// Expectation failed structural validation.
    #[error("scenario {scenario}, step {step}: {reason}")]
    InvalidExpectation {
        /// Offending scenario.
        scenario: ScenarioId,
        /// Step or assertion carrying the expectation.
        step: StepName,
        /// Validation failure description.
        reason: String,
    },
    /// Step fields failed structural validation.
    #[error("scenario {scenario}, step {step}: {reason}")]
    InvalidStep {
        /// Offending scenario.
        scenario: ScenarioId,
        /// Offending step name.
        step: StepName,
        /// Validation failure description.
        reason: String,
    },
    /// Variation configuration failed validation.
    #[error("scenario {scenario}: {reason}")]
    InvalidVariation {
        /// Offending scenario.
        scenario: ScenarioId,
        /// Validation failure description.
        reason: String,
    },
    /// Step references a service the SUT does not declare.
    #[error("scenario {scenario}, step {step}: unknown service {service}")]
    UnknownService {
        /// Offending scenario.
        scenario: ScenarioId,
        /// Offending step name.
        step: StepName,
        /// Dangling service reference.
        service: ServiceName,
    },
}

// ============================================================================
// SECTION: Validation Helpers
// ============================================================================

/// Collects step names depth-first, rejecting duplicates.
fn ensure_unique_step_names(
    steps: &[Step],
    seen: &mut BTreeSet<StepName>,
    scenario: &ScenarioId,
) -> Result<(), ScenarioError> {
    for step in steps {
        if !seen.insert(step.name().clone()) {
            return Err(ScenarioError::DuplicateStep {
                scenario: scenario.clone(),
                name: step.name().clone(),
            });
        }
        if let Step::Branch(branch) = step {
            ensure_unique_step_names(&branch.if_true, seen, scenario)?;
            ensure_unique_step_names(&branch.if_false, seen, scenario)?;
        }
    }
    Ok(())
}

/// Validates per-step structural invariants depth-first.
fn validate_steps(steps: &[Step], scenario: &ScenarioId) -> Result<(), ScenarioError> {
    let invalid = |name: &StepName, reason: &str| ScenarioError::InvalidStep {
        scenario: scenario.clone(),
        step: name.clone(),
        reason: reason.to_string(),
    };
    let invalid_expect = |name: &StepName, reason: String| ScenarioError::InvalidExpectation {
        scenario: scenario.clone(),
        step: name.clone(),
        reason,
    };

    for step in steps {
        match step {
            Step::Http(http) => {
                if http.method.trim().is_empty() {
                    return Err(invalid(&http.name, "method must not be empty"));
                }
                if http.body.is_some() && http.form.is_some() {
                    return Err(invalid(&http.name, "body and form are mutually exclusive"));
                }
            }
            Step::Wait(wait) => {
                if !wait.interval_seconds.is_finite() || wait.interval_seconds < 0.0 {
                    return Err(invalid(&wait.name, "interval_seconds must be non-negative"));
                }
                if !wait.timeout_seconds.is_finite() || wait.timeout_seconds <= 0.0 {
                    return Err(invalid(&wait.name, "timeout_seconds must be positive"));
                }
                wait.expect.validate().map_err(|reason| invalid_expect(&wait.name, reason))?;
            }
            Step::Assert(assert_step) => {
                assert_step
                    .expect
                    .validate()
                    .map_err(|reason| invalid_expect(&assert_step.name, reason))?;
            }
            Step::Branch(branch) => {
                if branch.condition.trim().is_empty() {
                    return Err(invalid(&branch.name, "condition must not be empty"));
                }
                validate_steps(&branch.if_true, scenario)?;
                validate_steps(&branch.if_false, scenario)?;
            }
        }
    }
    Ok(())
}

/// Checks service references depth-first against the SUT.
fn check_services(
    steps: &[Step],
    sut: &SutConfig,
    scenario: &ScenarioId,
) -> Result<(), ScenarioError> {
    for step in steps {
        if let Some(service) = step.service() {
            if !sut.services.contains_key(service) {
                return Err(ScenarioError::UnknownService {
                    scenario: scenario.clone(),
                    step: step.name().clone(),
                    service: service.clone(),
                });
            }
        }
        if let Step::Branch(branch) = step {
            check_services(&branch.if_true, sut, scenario)?;
            check_services(&branch.if_false, sut, scenario)?;
        }
    }
    Ok(())
}
