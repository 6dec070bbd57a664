// windtunnel-core/src/runtime/wait.rs
// ============================================================================
// Module: Wait Action Runner
// Description: Poll-until execution with full attempt capture.
// Purpose: Poll an endpoint until an expectation holds or a budget elapses.
// Dependencies: crate::{core, interfaces, runtime::conditions}, tokio
// ============================================================================

//! ## Overview
//! The wait runner renders its request once, then polls: the first probe
//! fires immediately, later probes wait `interval_seconds`, and the sleep is
//! clamped so the loop never overruns `timeout_seconds`. Every poll is
//! recorded as an attempt with its offset from step start. Transport errors
//! do not abort the wait; they are recorded and polling continues.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::Duration;
use std::time::Instant;

use serde_json::Value;
use serde_json::json;
use tokio::time::sleep;

use crate::core::context::Context;
use crate::core::context::ContextDelta;
use crate::core::observation::AttemptRecord;
use crate::core::observation::ErrorKind;
use crate::core::observation::Observation;
use crate::core::observation::ObservationError;
use crate::core::scenario::HttpStep;
use crate::core::scenario::WaitStep;
use crate::core::sut::SutConfig;
use crate::interfaces::HttpTransport;
use crate::interfaces::TransportRequest;
use crate::runtime::conditions::expectation_holds;
use crate::runtime::http::PreparedHttpCall;

// ============================================================================
// SECTION: Wait Execution
// ============================================================================

/// Renders the poll request and runs the poll loop.
pub async fn run_wait_step(
    step: &WaitStep,
    ctx: &Context,
    sut: &SutConfig,
    instance_headers: &BTreeMap<String, String>,
    transport: &dyn HttpTransport,
) -> (Observation, ContextDelta) {
    // The poll request is a body-less HTTP call prepared once up front.
    let probe = HttpStep {
        name: step.name.clone(),
        service: step.service.clone(),
        method: step.method.clone(),
        path: step.path.clone(),
        headers: BTreeMap::new(),
        query: BTreeMap::new(),
        body: None,
        form: None,
        extract: BTreeMap::new(),
        retry: None,
    };
    let prepared = match PreparedHttpCall::prepare(&probe, ctx, sut, instance_headers, None) {
        Ok(prepared) => prepared,
        Err(error) => return (Observation::failed(0.0, error), ContextDelta::new()),
    };

    // Each poll honors the tighter of the service timeout and the wait budget.
    let mut request: TransportRequest = prepared.request.clone();
    request.deadline = request.deadline.min(Duration::from_secs_f64(step.timeout_seconds));

    let budget = Duration::from_secs_f64(step.timeout_seconds);
    let interval = Duration::from_secs_f64(step.interval_seconds.max(0.0));
    let start = Instant::now();

    let mut attempts: Vec<AttemptRecord> = Vec::new();
    let mut condition_met = false;
    let mut timed_out = false;
    let mut last_status: Option<u16> = None;
    let mut last_body = Value::Null;
    let mut last_headers: Option<BTreeMap<String, String>> = None;

    loop {
        let elapsed = start.elapsed();
        if elapsed >= budget {
            timed_out = true;
            break;
        }

        let attempt_number = attempts.len() as u32 + 1;
        let offset_ms = elapsed.as_secs_f64() * 1_000.0;
        let poll_start = Instant::now();
        match transport.send(&request).await {
            Ok(response) => {
                last_status = Some(response.status);
                last_headers = Some(response.headers.clone());
                last_body = match serde_json::from_slice::<Value>(&response.body) {
                    Ok(value) => value,
                    Err(_) => Value::String(String::from_utf8_lossy(&response.body).to_string()),
                };
                condition_met = expectation_holds(&step.expect, last_status, &last_body, ctx);
                attempts.push(AttemptRecord {
                    attempt: attempt_number,
                    ok: condition_met,
                    latency_ms: poll_start.elapsed().as_secs_f64() * 1_000.0,
                    status_code: last_status,
                    offset_ms: Some(offset_ms),
                    condition_met: Some(condition_met),
                    error: None,
                });
            }
            Err(err) => {
                attempts.push(AttemptRecord {
                    attempt: attempt_number,
                    ok: false,
                    latency_ms: poll_start.elapsed().as_secs_f64() * 1_000.0,
                    status_code: None,
                    offset_ms: Some(offset_ms),
                    condition_met: Some(false),
                    error: Some(err.to_string()),
                });
            }
        }

        if condition_met {
            break;
        }

        let remaining = budget.saturating_sub(start.elapsed());
        if remaining.is_zero() {
            timed_out = true;
            break;
        }
        sleep(interval.min(remaining)).await;
    }

    let latency_ms = start.elapsed().as_secs_f64() * 1_000.0;
    let mut errors = Vec::new();
    if timed_out {
        errors.push(ObservationError {
            kind: ErrorKind::WaitTimeout,
            path: None,
            attempts: Some(attempts.len() as u32),
            detail: Some(format!(
                "timeout after {:.1}s ({} attempts)",
                latency_ms / 1_000.0,
                attempts.len()
            )),
        });
    }

    let mut delta = ContextDelta::new();
    if last_status.is_some() {
        delta.set(
            "last_response",
            json!({
                "status_code": last_status,
                "headers": last_headers.clone(),
                "body": last_body.clone(),
            }),
        );
    }

    let observation = Observation {
        ok: condition_met,
        latency_ms,
        status_code: last_status,
        headers: last_headers,
        body: (last_status.is_some()).then(|| last_body.clone()),
        errors,
        turbulence: None,
        attempts,
    };
    (observation, delta)
}
