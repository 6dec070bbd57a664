// windtunnel-core/src/runtime/assertion.rs
// ============================================================================
// Module: Assert Action Runner
// Description: Expectation evaluation producing assertion results.
// Purpose: Decide assert steps and scenario-level assertions.
// Dependencies: crate::{core, runtime::conditions}
// ============================================================================

//! ## Overview
//! Assert steps and post-flow assertions share one evaluation path. The
//! runner produces both an [`AssertionResult`] (persisted to the assertion
//! stream) and an [`Observation`] whose `ok` mirrors the outcome, so stop
//! policies treat assert steps like any other action.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Instant;

use crate::core::context::Context;
use crate::core::identifiers::StepName;
use crate::core::observation::AssertionResult;
use crate::core::observation::ErrorKind;
use crate::core::observation::Observation;
use crate::core::observation::ObservationError;
use crate::core::scenario::Expectation;
use crate::runtime::conditions::evaluate_expectation;

// ============================================================================
// SECTION: Assert Execution
// ============================================================================

/// Evaluates one assertion and mirrors the outcome into an observation.
#[must_use]
pub fn run_assert_step(
    name: &StepName,
    expect: &Expectation,
    ctx: &Context,
) -> (Observation, AssertionResult) {
    let start = Instant::now();
    let result = evaluate_expectation(name, expect, ctx);
    let latency_ms = start.elapsed().as_secs_f64() * 1_000.0;

    let observation = if result.passed {
        Observation::ok(latency_ms)
    } else {
        let detail = result
            .error
            .clone()
            .or_else(|| {
                match (&result.expected, &result.actual) {
                    (Some(expected), Some(actual)) => {
                        Some(format!("expected {expected}, got {actual}"))
                    }
                    (Some(expected), None) => Some(format!("expected {expected}")),
                    _ => None,
                }
            })
            .unwrap_or_else(|| "assertion failed".to_string());
        Observation::failed(
            latency_ms,
            ObservationError::with_detail(ErrorKind::AssertionFailed, detail),
        )
    };
    (observation, result)
}
