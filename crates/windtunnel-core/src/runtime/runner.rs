// windtunnel-core/src/runtime/runner.rs
// ============================================================================
// Module: Scenario Runner
// Description: Per-instance execution of one scenario flow.
// Purpose: Walk steps in order, persist events, and decide the outcome.
// Dependencies: crate::{core, interfaces, runtime}, tokio
// ============================================================================

//! ## Overview
//! The runner owns exactly one instance at a time: it materializes entry
//! data, builds the initial context, walks the flow strictly in order
//! through the turbulence decorator, persists every step event before the
//! next step renders, applies context deltas, honors stop policies and the
//! step budget, evaluates post-flow assertions, and emits exactly one
//! completion record. Cancellation and the optional instance deadline are
//! observed between steps.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use serde_json::Map;

use chrono::Utc;
use serde_json::Value;
use serde_json::json;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::core::context::Context;
use crate::core::context::ContextDelta;
use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::InstanceId;
use crate::core::identifiers::RunId;
use crate::core::identifiers::ServiceName;
use crate::core::identifiers::StepName;
use crate::core::observation::AssertionResult;
use crate::core::observation::ErrorKind;
use crate::core::observation::InstanceStatus;
use crate::core::observation::Observation;
use crate::core::observation::ObservationError;
use crate::core::records::AssertionRecord;
use crate::core::records::InstanceRecord;
use crate::core::records::StepRecord;
use crate::core::scenario::Scenario;
use crate::core::scenario::Step;
use crate::core::sut::SutConfig;
use crate::core::template::render_value;
use crate::interfaces::HttpTransport;
use crate::interfaces::RunEventSink;
use crate::interfaces::SinkError;
use crate::runtime::assertion::run_assert_step;
use crate::runtime::conditions::evaluate_condition;
use crate::runtime::http::INLINE_BODY_LIMIT;
use crate::runtime::http::PreparedHttpCall;
use crate::runtime::scheduler::derive_seed_prefix;
use crate::runtime::turbulence::TurbulenceEngine;
use crate::runtime::variation::VariationEngine;
use crate::runtime::wait::run_wait_step;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Bounded retry attempts for artifact appends.
const SINK_RETRY_ATTEMPTS: u32 = 3;

/// Delay between artifact append retries.
const SINK_RETRY_DELAY: Duration = Duration::from_millis(50);

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Internal walk terminators.
enum WalkError {
    /// Cancellation was observed between steps.
    Cancelled,
    /// The executed-step budget was exhausted.
    MaxSteps,
    /// The instance deadline expired between steps.
    Deadline,
    /// The store rejected appends after bounded retries.
    Store(SinkError),
}

/// Flow-control outcome of a sub-walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WalkControl {
    /// Keep executing subsequent steps.
    Continue,
    /// A stop policy fired; end the walk.
    Stop,
}

// ============================================================================
// SECTION: Specs and Outcomes
// ============================================================================

/// Everything the runner needs to execute one instance.
#[derive(Clone)]
pub struct InstanceSpec {
    /// Owning run.
    pub run_id: RunId,
    /// Instance identifier.
    pub instance_id: InstanceId,
    /// Correlation identifier for outbound requests.
    pub correlation_id: CorrelationId,
    /// Zero-based dispatch index.
    pub iteration: u64,
    /// Scenario to execute.
    pub scenario: Arc<Scenario>,
    /// Run seed; turbulence decisions derive from it.
    pub seed: u64,
    /// Pre-materialized entry data (replay); rendered fresh when absent.
    pub entry_override: Option<BTreeMap<String, Value>>,
    /// Optional wall-clock deadline for the whole instance.
    pub deadline: Option<Duration>,
    /// Run-level cancellation signal.
    pub cancel: CancellationToken,
}

/// Latency sample for summary aggregation.
#[derive(Debug, Clone)]
pub struct StepSample {
    /// Step name.
    pub action: StepName,
    /// Service the step targeted, when any.
    pub service: Option<ServiceName>,
    /// Step latency in milliseconds.
    pub latency_ms: f64,
    /// Whether the step was ok.
    pub ok: bool,
}

/// Result of one instance execution.
#[derive(Debug, Clone)]
pub struct InstanceOutcome {
    /// The completion record (also appended to the instance stream).
    pub record: InstanceRecord,
    /// Per-step latency samples for summary aggregation.
    pub samples: Vec<StepSample>,
    /// Steps executed, branch expansion included.
    pub steps_executed: u32,
    /// Assertions that passed.
    pub assertions_passed: u32,
    /// Assertions that failed.
    pub assertions_failed: u32,
}

// ============================================================================
// SECTION: Runner
// ============================================================================

/// Executes scenario instances against one SUT.
#[derive(Clone)]
pub struct ScenarioRunner {
    sut: Arc<SutConfig>,
    transport: Arc<dyn HttpTransport>,
    sink: Arc<dyn RunEventSink>,
}

/// Mutable walk state threaded through the flow.
struct WalkState {
    ctx: Context,
    steps_executed: u32,
    step_index: u32,
    samples: Vec<StepSample>,
    any_step_failed: bool,
    assertions_passed: u32,
    assertions_failed: u32,
    deadline_at: Option<Instant>,
    /// Variation-drawn delay between consecutive steps, in milliseconds.
    step_delay_ms: u64,
    /// Variation-drawn jitter before every step, in milliseconds.
    jitter_ms: u64,
}

/// Reads a variation timing value out of materialized entry data.
fn variation_timing(entry: &BTreeMap<String, Value>, key: &str) -> u64 {
    entry
        .get("variation")
        .and_then(Value::as_object)
        .and_then(|variation| variation.get(key))
        .and_then(Value::as_u64)
        .unwrap_or(0)
}

impl ScenarioRunner {
    /// Creates a runner over the given collaborators.
    #[must_use]
    pub fn new(
        sut: Arc<SutConfig>,
        transport: Arc<dyn HttpTransport>,
        sink: Arc<dyn RunEventSink>,
    ) -> Self {
        Self {
            sut,
            transport,
            sink,
        }
    }

    /// Executes one instance end to end and appends its completion record.
    pub async fn run_instance(&self, spec: &InstanceSpec) -> InstanceOutcome {
        let started_at = Utc::now();
        let started = Instant::now();
        let turbulence =
            TurbulenceEngine::new(spec.scenario.turbulence.clone(), spec.seed);

        // Materialize entry data before the flow starts. Variation draws are
        // injected under `entry.seed_data.variation` first, so seed-data
        // templates may reference them alongside the predefined identifiers.
        // Replay supplies entry data that is already materialized (variation
        // included) and must not render or draw again.
        let mut entry = BTreeMap::new();
        let mut entry_error: Option<(ErrorKind, String)> = None;
        match &spec.entry_override {
            Some(materialized) => entry = materialized.clone(),
            None => {
                if let Some(variation) = &spec.scenario.variation {
                    let drawn = VariationEngine::new(variation.clone(), spec.seed)
                        .apply(spec.iteration);
                    entry.insert(
                        "variation".to_string(),
                        Value::Object(drawn.into_iter().collect::<Map<String, Value>>()),
                    );
                }
                let base_ctx = Context::for_instance(
                    &spec.run_id,
                    &spec.instance_id,
                    &spec.correlation_id,
                    spec.iteration,
                    entry.clone(),
                );
                for (key, value) in &spec.scenario.entry.seed_data {
                    match render_value(value, &base_ctx) {
                        Ok(rendered) => {
                            entry.insert(key.clone(), rendered);
                        }
                        Err(err) => {
                            let kind = match &err {
                                crate::core::template::TemplateError::MissingKey {
                                    ..
                                } => ErrorKind::TemplateMissingKey,
                                crate::core::template::TemplateError::Parse {
                                    ..
                                } => ErrorKind::TemplateParse,
                            };
                            entry_error = Some((kind, err.to_string()));
                            break;
                        }
                    }
                }
            }
        }

        let mut state = WalkState {
            ctx: Context::for_instance(
                &spec.run_id,
                &spec.instance_id,
                &spec.correlation_id,
                spec.iteration,
                entry.clone(),
            ),
            steps_executed: 0,
            step_index: 0,
            samples: Vec::new(),
            any_step_failed: false,
            assertions_passed: 0,
            assertions_failed: 0,
            deadline_at: spec.deadline.map(|deadline| started + deadline),
            step_delay_ms: variation_timing(&entry, "_step_delay_ms"),
            jitter_ms: variation_timing(&entry, "_timing_jitter_ms"),
        };

        let instance_headers = self.instance_headers();

        let walk_result = if entry_error.is_some() {
            Ok(WalkControl::Stop)
        } else {
            self.walk_steps(spec, &turbulence, &instance_headers, &spec.scenario.flow, &mut state)
                .await
        };

        // Post-flow assertions run only when the walk ended normally.
        let mut assertion_halt = false;
        if walk_result.is_ok() && entry_error.is_none() {
            for assertion in &spec.scenario.assertions {
                if assertion_halt {
                    break;
                }
                let result = crate::runtime::conditions::evaluate_expectation(
                    &assertion.name,
                    &assertion.expect,
                    &state.ctx,
                );
                if result.passed {
                    state.assertions_passed += 1;
                } else {
                    state.assertions_failed += 1;
                    if spec.scenario.stop_when.any_assertion_fails {
                        assertion_halt = true;
                    }
                }
                if let Err(err) = self.persist_assertion(spec, &result).await {
                    warn!(error = %err, "assertion append failed");
                    entry_error = Some((ErrorKind::StoreWrite, err.to_string()));
                    break;
                }
            }
        }

        let completed_at = Utc::now();
        let duration_ms = started.elapsed().as_secs_f64() * 1_000.0;

        let (status, error_kind, error) = match (&walk_result, &entry_error) {
            (_, Some((kind, detail))) => {
                (InstanceStatus::Errored, Some(*kind), Some(detail.clone()))
            }
            (Err(WalkError::Cancelled), _) => (
                InstanceStatus::Errored,
                Some(ErrorKind::Cancelled),
                Some("cancelled before completion".to_string()),
            ),
            (Err(WalkError::MaxSteps), _) => (
                InstanceStatus::Errored,
                Some(ErrorKind::MaxStepsExceeded),
                Some(format!("exceeded max_steps = {}", spec.scenario.max_steps)),
            ),
            (Err(WalkError::Deadline), _) => (
                InstanceStatus::Errored,
                Some(ErrorKind::Timeout),
                Some("instance deadline expired".to_string()),
            ),
            (Err(WalkError::Store(err)), _) => {
                (InstanceStatus::Errored, Some(ErrorKind::StoreWrite), Some(err.to_string()))
            }
            (Ok(_), None) => {
                if state.any_step_failed || state.assertions_failed > 0 {
                    (InstanceStatus::Failed, None, None)
                } else {
                    (InstanceStatus::Passed, None, None)
                }
            }
        };

        let record = InstanceRecord {
            run_id: spec.run_id.clone(),
            instance_id: spec.instance_id.clone(),
            correlation_id: spec.correlation_id.clone(),
            scenario_id: spec.scenario.id.clone(),
            iteration: spec.iteration,
            seed_prefix: derive_seed_prefix(spec.seed, spec.iteration),
            status,
            started_at,
            completed_at,
            duration_ms,
            entry,
            error_kind,
            error,
        };

        let mut outcome = InstanceOutcome {
            record,
            samples: state.samples,
            steps_executed: state.steps_executed,
            assertions_passed: state.assertions_passed,
            assertions_failed: state.assertions_failed,
        };

        if let Err(err) = self.append_instance_with_retry(outcome.record.clone()).await {
            warn!(error = %err, instance = %spec.instance_id, "instance append failed");
            outcome.record.status = InstanceStatus::Errored;
            outcome.record.error_kind = Some(ErrorKind::StoreWrite);
            outcome.record.error = Some(err.to_string());
        }

        debug!(
            instance = %spec.instance_id,
            status = ?outcome.record.status,
            steps = outcome.steps_executed,
            "instance complete"
        );
        outcome
    }

    /// Effective SUT default headers with the correlation header attached.
    fn instance_headers(&self) -> BTreeMap<String, String> {
        let mut headers = self.sut.default_headers.clone();
        headers.insert("X-Correlation-ID".to_string(), "{{correlation_id}}".to_string());
        headers
    }

    /// Walks a step list, recursing into taken branches.
    fn walk_steps<'a>(
        &'a self,
        spec: &'a InstanceSpec,
        turbulence: &'a TurbulenceEngine,
        instance_headers: &'a BTreeMap<String, String>,
        steps: &'a [Step],
        state: &'a mut WalkState,
    ) -> Pin<Box<dyn Future<Output = Result<WalkControl, WalkError>> + Send + 'a>> {
        Box::pin(async move {
            for step in steps {
                if spec.cancel.is_cancelled() {
                    return Err(WalkError::Cancelled);
                }
                if state.deadline_at.is_some_and(|deadline| Instant::now() >= deadline) {
                    return Err(WalkError::Deadline);
                }
                if state.steps_executed >= spec.scenario.max_steps {
                    return Err(WalkError::MaxSteps);
                }
                state.steps_executed += 1;
                let step_index = state.step_index;
                state.step_index += 1;

                // Variation pacing: jitter before every step, plus the
                // inter-step delay after the first.
                let pause_ms = state.jitter_ms
                    + if step_index > 0 { state.step_delay_ms } else { 0 };
                if pause_ms > 0 {
                    sleep(Duration::from_millis(pause_ms)).await;
                }

                let control = match step {
                    Step::Http(http) => {
                        let policy = turbulence.resolve(&http.service, &http.name);
                        let prepared = PreparedHttpCall::prepare(
                            http,
                            &state.ctx,
                            &self.sut,
                            instance_headers,
                            policy.as_ref().and_then(|policy| policy.timeout_after_ms),
                        );
                        let (observation, delta) = match prepared {
                            Ok(prepared) => {
                                self.spill_request_body(spec, step_index, &prepared)
                                    .await
                                    .map_err(WalkError::Store)?;
                                match &policy {
                                    Some(policy) => {
                                        turbulence
                                            .apply(
                                                policy,
                                                &spec.instance_id,
                                                &http.service,
                                                &http.name,
                                                || prepared.execute(self.transport.as_ref()),
                                            )
                                            .await
                                    }
                                    None => prepared.execute(self.transport.as_ref()).await,
                                }
                            }
                            Err(error) => (
                                Observation::failed(0.0, error),
                                ContextDelta::new(),
                            ),
                        };
                        self.finish_step(spec, state, step, step_index, observation, delta)
                            .await?
                    }
                    Step::Wait(wait) => {
                        let (observation, delta) = run_wait_step(
                            wait,
                            &state.ctx,
                            &self.sut,
                            instance_headers,
                            self.transport.as_ref(),
                        )
                        .await;
                        self.finish_step(spec, state, step, step_index, observation, delta)
                            .await?
                    }
                    Step::Assert(assert_step) => {
                        let (observation, result) =
                            run_assert_step(&assert_step.name, &assert_step.expect, &state.ctx);
                        if result.passed {
                            state.assertions_passed += 1;
                        } else {
                            state.assertions_failed += 1;
                        }
                        self.persist_assertion(spec, &result)
                            .await
                            .map_err(WalkError::Store)?;
                        self.finish_step(
                            spec,
                            state,
                            step,
                            step_index,
                            observation,
                            ContextDelta::new(),
                        )
                        .await?
                    }
                    Step::Branch(branch) => {
                        match evaluate_condition(&branch.condition, &state.ctx) {
                            Ok((decision, rendered)) => {
                                let taken = if decision { "if_true" } else { "if_false" };
                                let mut observation = Observation::ok(0.0);
                                observation.body = Some(json!({
                                    "condition": rendered,
                                    "taken": taken,
                                }));
                                let control = self
                                    .finish_step(
                                        spec,
                                        state,
                                        step,
                                        step_index,
                                        observation,
                                        ContextDelta::new(),
                                    )
                                    .await?;
                                if control == WalkControl::Stop {
                                    WalkControl::Stop
                                } else {
                                    let chosen: &[Step] =
                                        if decision { &branch.if_true } else { &branch.if_false };
                                    self.walk_steps(
                                        spec,
                                        turbulence,
                                        instance_headers,
                                        chosen,
                                        state,
                                    )
                                    .await?
                                }
                            }
                            Err(err) => {
                                debug!(
                                    step = %branch.name,
                                    error = %err.detail,
                                    "branch condition failed"
                                );
                                let observation = Observation::failed(
                                    0.0,
                                    ObservationError::with_detail(err.kind, err.detail),
                                );
                                self.finish_step(
                                    spec,
                                    state,
                                    step,
                                    step_index,
                                    observation,
                                    ContextDelta::new(),
                                )
                                .await?
                            }
                        }
                    }
                };

                if control == WalkControl::Stop {
                    return Ok(WalkControl::Stop);
                }
            }
            Ok(WalkControl::Continue)
        })
    }

    /// Persists a step event, applies its delta, and evaluates stop policy.
    async fn finish_step(
        &self,
        spec: &InstanceSpec,
        state: &mut WalkState,
        step: &Step,
        step_index: u32,
        observation: Observation,
        delta: ContextDelta,
    ) -> Result<WalkControl, WalkError> {
        let observation = self
            .spill_large_payloads(spec, step_index, observation)
            .await
            .map_err(WalkError::Store)?;

        let ok = observation.ok;
        state.samples.push(StepSample {
            action: step.name().clone(),
            service: step.service().cloned(),
            latency_ms: observation.latency_ms,
            ok,
        });

        let record = StepRecord {
            run_id: spec.run_id.clone(),
            instance_id: spec.instance_id.clone(),
            correlation_id: spec.correlation_id.clone(),
            step_index,
            step_name: step.name().clone(),
            step_type: step.kind().to_string(),
            observation,
        };
        self.append_step_with_retry(record).await.map_err(WalkError::Store)?;

        state.ctx.apply(delta);

        if !ok {
            state.any_step_failed = true;
            if spec.scenario.stop_when.any_action_fails {
                return Ok(WalkControl::Stop);
            }
        }
        Ok(WalkControl::Continue)
    }

    /// Spills an oversized rendered request body before the call is issued.
    async fn spill_request_body(
        &self,
        spec: &InstanceSpec,
        step_index: u32,
        prepared: &PreparedHttpCall,
    ) -> Result<(), SinkError> {
        if let Some(body) = &prepared.request.json_body {
            if body.to_string().len() > INLINE_BODY_LIMIT {
                let name = format!("{step_index:04}_request.json");
                self.sink.write_payload(&spec.instance_id, &name, body).await?;
            }
        }
        Ok(())
    }

    /// Spills an oversized response body to the artifacts directory.
    async fn spill_large_payloads(
        &self,
        spec: &InstanceSpec,
        step_index: u32,
        mut observation: Observation,
    ) -> Result<Observation, SinkError> {
        if let Some(body) = &observation.body {
            let serialized = body.to_string();
            if serialized.len() > INLINE_BODY_LIMIT {
                let name = format!("{step_index:04}_response.json");
                self.sink.write_payload(&spec.instance_id, &name, body).await?;
                observation.body = Some(json!({
                    "spilled": true,
                    "artifact": name,
                    "bytes": serialized.len(),
                }));
            }
        }
        Ok(observation)
    }

    /// Retries a sink append under the bounded policy.
    async fn with_sink_retry<T, F, Fut>(&self, record: T, append: F) -> Result<u64, SinkError>
    where
        T: Clone,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<u64, SinkError>>,
    {
        let mut last = None;
        for attempt in 0 .. SINK_RETRY_ATTEMPTS {
            match append(record.clone()).await {
                Ok(seq) => return Ok(seq),
                Err(err) => {
                    last = Some(err);
                    if attempt + 1 < SINK_RETRY_ATTEMPTS {
                        sleep(SINK_RETRY_DELAY).await;
                    }
                }
            }
        }
        Err(last.unwrap_or(SinkError::Append("append failed".to_string())))
    }

    /// Appends a step record with bounded retries.
    async fn append_step_with_retry(&self, record: StepRecord) -> Result<u64, SinkError> {
        self.with_sink_retry(record, |record| self.sink.append_step(record)).await
    }

    /// Appends an instance record with bounded retries.
    async fn append_instance_with_retry(&self, record: InstanceRecord) -> Result<u64, SinkError> {
        self.with_sink_retry(record, |record| self.sink.append_instance(record)).await
    }

    /// Persists one assertion result with bounded retries.
    async fn persist_assertion(
        &self,
        spec: &InstanceSpec,
        result: &AssertionResult,
    ) -> Result<u64, SinkError> {
        let record = AssertionRecord {
            run_id: spec.run_id.clone(),
            instance_id: spec.instance_id.clone(),
            correlation_id: spec.correlation_id.clone(),
            name: result.name.clone(),
            passed: result.passed,
            expected: result.expected.clone(),
            actual: result.actual.clone(),
            error: result.error.clone(),
        };
        self.with_sink_retry(record, |record| self.sink.append_assertion(record)).await
    }
}
