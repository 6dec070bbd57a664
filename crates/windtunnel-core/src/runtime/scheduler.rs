// windtunnel-core/src/runtime/scheduler.rs
// ============================================================================
// Module: Instance Scheduler
// Description: Bounded-parallel dispatch of scenario instances.
// Purpose: Drive N instances under cap P with deterministic identities.
// Dependencies: crate::{core, interfaces, runtime}, sha2, tokio
// ============================================================================

//! ## Overview
//! The scheduler dispatches instance indexes `0..N` in order, each behind a
//! semaphore permit so at most P execute simultaneously. Identities are
//! derived, not allocated: the correlation id is a digest of
//! `(run_id, index)`, so re-executions produce identical sequences. On
//! cancellation, dispatch stops immediately, in-flight instances get a
//! bounded grace period, stragglers are aborted, and every instance that
//! never completed still receives a cancelled completion record.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sha2::Digest;
use sha2::Sha256;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::InstanceId;
use crate::core::identifiers::RunId;
use crate::core::observation::ErrorKind;
use crate::core::observation::InstanceStatus;
use crate::core::records::InstanceRecord;
use crate::core::scenario::Scenario;
use crate::core::scenario::ScenarioError;
use crate::core::sut::SutConfig;
use crate::core::sut::SutError;
use crate::interfaces::HttpTransport;
use crate::interfaces::RunEventSink;
use crate::interfaces::SinkError;
use crate::runtime::runner::InstanceOutcome;
use crate::runtime::runner::InstanceSpec;
use crate::runtime::runner::ScenarioRunner;
use crate::runtime::summary::RunSummary;
use crate::runtime::summary::StatsAccumulator;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default grace period granted to in-flight instances on cancellation.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(5);

// ============================================================================
// SECTION: Options and Errors
// ============================================================================

/// Run-level scheduling options.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Requested instance count (N).
    pub instances: u64,
    /// Concurrency cap (P).
    pub parallelism: usize,
    /// Run seed.
    pub seed: u64,
    /// Grace period for in-flight instances on cancellation.
    pub grace: Duration,
    /// Optional per-instance deadline.
    pub instance_deadline: Option<Duration>,
}

impl RunOptions {
    /// Creates options with the default grace period and no deadline.
    #[must_use]
    pub const fn new(instances: u64, parallelism: usize, seed: u64) -> Self {
        Self {
            instances,
            parallelism,
            seed,
            grace: DEFAULT_CANCEL_GRACE,
            instance_deadline: None,
        }
    }
}

/// Errors surfaced by the scheduler to the driver.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    /// The SUT configuration failed validation.
    #[error("invalid sut: {0}")]
    InvalidSut(#[from] SutError),
    /// A scenario failed validation against the SUT.
    #[error("invalid scenario: {0}")]
    InvalidScenario(#[from] ScenarioError),
    /// No scenarios were provided.
    #[error("at least one scenario is required")]
    NoScenarios,
    /// The artifact sink rejected a scheduler-side append.
    #[error("artifact append failed: {0}")]
    Store(#[from] SinkError),
}

// ============================================================================
// SECTION: Identity Derivation
// ============================================================================

/// Derives the correlation id for `(run_id, instance_index)`.
#[must_use]
pub fn derive_correlation_id(run_id: &RunId, index: u64) -> CorrelationId {
    let digest = Sha256::digest(format!("{run_id}:{index}").as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        hex.push_str(&format!("{byte:02x}"));
    }
    CorrelationId::new(format!("corr_{hex}"))
}

/// Derives the per-instance seed prefix from the run seed and index.
#[must_use]
pub fn derive_seed_prefix(seed: u64, index: u64) -> u64 {
    let digest = Sha256::digest(format!("{seed}:{index}").as_bytes());
    u64::from_be_bytes([
        digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
    ])
}

// ============================================================================
// SECTION: Scheduler
// ============================================================================

/// Bounded-parallel driver for one run.
pub struct InstanceScheduler {
    sut: Arc<SutConfig>,
    scenarios: Vec<Arc<Scenario>>,
    transport: Arc<dyn HttpTransport>,
    sink: Arc<dyn RunEventSink>,
}

impl InstanceScheduler {
    /// Creates a scheduler over the given collaborators.
    #[must_use]
    pub fn new(
        sut: Arc<SutConfig>,
        scenarios: Vec<Arc<Scenario>>,
        transport: Arc<dyn HttpTransport>,
        sink: Arc<dyn RunEventSink>,
    ) -> Self {
        Self {
            sut,
            scenarios,
            transport,
            sink,
        }
    }

    /// Validates configuration before any instance is dispatched.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] on the first invalid input; configuration
    /// errors are fatal for the run.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        self.sut.validate()?;
        if self.scenarios.is_empty() {
            return Err(SchedulerError::NoScenarios);
        }
        for scenario in &self.scenarios {
            scenario.validate_against(&self.sut)?;
        }
        Ok(())
    }

    /// Executes the run and returns the final summary.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError`] on invalid configuration or when the sink
    /// rejects scheduler-side appends.
    pub async fn execute(
        &self,
        run_id: RunId,
        options: &RunOptions,
        cancel: CancellationToken,
    ) -> Result<RunSummary, SchedulerError> {
        self.validate()?;
        let started_at = Utc::now();
        let parallelism = options.parallelism.max(1);
        info!(
            run = %run_id,
            instances = options.instances,
            parallelism,
            seed = options.seed,
            "run started"
        );

        let runner = ScenarioRunner::new(
            Arc::clone(&self.sut),
            Arc::clone(&self.transport),
            Arc::clone(&self.sink),
        );
        let semaphore = Arc::new(Semaphore::new(parallelism));
        let mut join_set: JoinSet<(u64, InstanceOutcome)> = JoinSet::new();
        let mut stats = StatsAccumulator::new();
        let mut inflight: BTreeSet<u64> = BTreeSet::new();
        let mut dispatched: u64 = 0;

        // Dispatch phase: indexes in order, bounded by the semaphore.
        while dispatched < options.instances {
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => {
                    match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    }
                }
            };
            if cancel.is_cancelled() {
                break;
            }

            let index = dispatched;
            dispatched += 1;
            inflight.insert(index);
            let spec = self.instance_spec(&run_id, index, options, cancel.clone());
            let runner = runner.clone();
            join_set.spawn(async move {
                let outcome = runner.run_instance(&spec).await;
                drop(permit);
                (index, outcome)
            });

            // Reap without blocking so stats stream while dispatching.
            while let Some(joined) = join_set.try_join_next() {
                reap(joined, &mut stats, &mut inflight);
            }
        }

        // Drain phase: wait for in-flight work, honoring the grace period
        // once cancellation is observed.
        loop {
            if join_set.is_empty() {
                break;
            }
            if cancel.is_cancelled() {
                let drained =
                    timeout(options.grace, drain_all(&mut join_set, &mut stats, &mut inflight))
                        .await;
                if drained.is_err() {
                    warn!(run = %run_id, "grace period expired; aborting instances");
                    join_set.abort_all();
                    drain_all(&mut join_set, &mut stats, &mut inflight).await;
                }
                break;
            }
            tokio::select! {
                () = cancel.cancelled() => {}
                joined = join_set.join_next() => {
                    match joined {
                        Some(joined) => reap(joined, &mut stats, &mut inflight),
                        None => break,
                    }
                }
            }
        }

        // Every declared instance gets a completion record, even the ones
        // that never ran.
        if cancel.is_cancelled() {
            let leftover: Vec<u64> =
                inflight.iter().copied().chain(dispatched .. options.instances).collect();
            for index in leftover {
                let record = self.cancelled_record(&run_id, index, options.seed);
                if let Err(err) = self.sink.append_instance(record).await {
                    warn!(error = %err, index, "cancelled-instance append failed");
                }
                stats.record_cancelled();
            }
        }

        let summary = stats.finish(run_id.clone(), started_at);
        info!(
            run = %run_id,
            passed = summary.totals.passed,
            failed = summary.totals.failed,
            errored = summary.totals.errored,
            cancelled = summary.totals.cancelled,
            "run complete"
        );
        Ok(summary)
    }

    /// Builds the spec for one instance index.
    fn instance_spec(
        &self,
        run_id: &RunId,
        index: u64,
        options: &RunOptions,
        cancel: CancellationToken,
    ) -> InstanceSpec {
        let scenario = &self.scenarios[(index % self.scenarios.len() as u64) as usize];
        InstanceSpec {
            run_id: run_id.clone(),
            instance_id: InstanceId::from_index(index),
            correlation_id: derive_correlation_id(run_id, index),
            iteration: index,
            scenario: Arc::clone(scenario),
            seed: options.seed,
            entry_override: None,
            deadline: options.instance_deadline,
            cancel,
        }
    }

    /// Builds the completion record for an instance that never completed.
    fn cancelled_record(&self, run_id: &RunId, index: u64, seed: u64) -> InstanceRecord {
        let now = Utc::now();
        let scenario = &self.scenarios[(index % self.scenarios.len() as u64) as usize];
        InstanceRecord {
            run_id: run_id.clone(),
            instance_id: InstanceId::from_index(index),
            correlation_id: derive_correlation_id(run_id, index),
            scenario_id: scenario.id.clone(),
            iteration: index,
            seed_prefix: derive_seed_prefix(seed, index),
            status: InstanceStatus::Errored,
            started_at: now,
            completed_at: now,
            duration_ms: 0.0,
            entry: Default::default(),
            error_kind: Some(ErrorKind::Cancelled),
            error: Some("cancelled before completion".to_string()),
        }
    }
}

// ============================================================================
// SECTION: Reaping Helpers
// ============================================================================

/// Folds one joined task into the aggregates.
fn reap(
    joined: Result<(u64, InstanceOutcome), tokio::task::JoinError>,
    stats: &mut StatsAccumulator,
    inflight: &mut BTreeSet<u64>,
) {
    match joined {
        Ok((index, outcome)) => {
            inflight.remove(&index);
            stats.record(&outcome);
        }
        Err(err) => {
            // Aborted or panicked tasks stay in the inflight set and are
            // recorded as cancelled by the caller.
            if err.is_panic() {
                warn!(error = %err, "instance task panicked");
            }
        }
    }
}

/// Drains every remaining task from the join set.
async fn drain_all(
    join_set: &mut JoinSet<(u64, InstanceOutcome)>,
    stats: &mut StatsAccumulator,
    inflight: &mut BTreeSet<u64>,
) {
    while let Some(joined) = join_set.join_next().await {
        reap(joined, stats, inflight);
    }
}
