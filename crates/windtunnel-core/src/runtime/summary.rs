// windtunnel-core/src/runtime/summary.rs
// ============================================================================
// Module: Run Summary
// Description: Streaming aggregation of instance outcomes and latencies.
// Purpose: Compute final totals, pass rate, and latency percentiles.
// Dependencies: crate::{core, runtime::runner}, chrono, serde
// ============================================================================

//! ## Overview
//! The scheduler feeds instance outcomes into a [`StatsAccumulator`] as they
//! stream in; nothing buffers the full run. At finalization the accumulator
//! produces the [`RunSummary`] persisted as `summary.json`: instance totals,
//! pass rate, duration, and p50/p95/p99 latency per action name and per
//! service (nearest-rank percentiles).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::RunId;
use crate::core::observation::ErrorKind;
use crate::core::observation::InstanceStatus;
use crate::runtime::runner::InstanceOutcome;

// ============================================================================
// SECTION: Summary Types
// ============================================================================

/// Instance count totals for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    /// Completion records observed.
    pub instances_total: u64,
    /// Instances that passed.
    pub passed: u64,
    /// Instances that failed.
    pub failed: u64,
    /// Instances that errored (cancellation excluded).
    pub errored: u64,
    /// Instances cancelled before completion.
    pub cancelled: u64,
}

/// Latency percentiles for one action or service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    /// Samples observed.
    pub count: u64,
    /// Median latency in milliseconds.
    pub p50_ms: f64,
    /// 95th percentile latency in milliseconds.
    pub p95_ms: f64,
    /// 99th percentile latency in milliseconds.
    pub p99_ms: f64,
}

/// Final aggregates persisted as `summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Owning run.
    pub run_id: RunId,
    /// Run start time.
    pub started_at: DateTime<Utc>,
    /// Run completion time.
    pub completed_at: DateTime<Utc>,
    /// Total run duration in milliseconds.
    pub duration_ms: f64,
    /// Instance totals.
    pub totals: RunTotals,
    /// Passed instances over completed instances, as a percentage.
    pub pass_rate: f64,
    /// Step events observed.
    pub total_steps: u64,
    /// Assertion events observed.
    pub total_assertions: u64,
    /// Assertions that passed.
    pub assertions_passed: u64,
    /// Assertions that failed.
    pub assertions_failed: u64,
    /// Latency percentiles keyed by action name.
    pub action_latency: BTreeMap<String, LatencyStats>,
    /// Latency percentiles keyed by service name.
    pub service_latency: BTreeMap<String, LatencyStats>,
}

// ============================================================================
// SECTION: Accumulator
// ============================================================================

/// Streaming aggregator over instance outcomes.
#[derive(Debug, Default)]
pub struct StatsAccumulator {
    totals: RunTotals,
    total_steps: u64,
    total_assertions: u64,
    assertions_passed: u64,
    assertions_failed: u64,
    action_samples: BTreeMap<String, Vec<f64>>,
    service_samples: BTreeMap<String, Vec<f64>>,
}

impl StatsAccumulator {
    /// Creates an empty accumulator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one instance outcome into the aggregates.
    pub fn record(&mut self, outcome: &InstanceOutcome) {
        self.totals.instances_total += 1;
        match outcome.record.status {
            InstanceStatus::Passed => self.totals.passed += 1,
            InstanceStatus::Failed => self.totals.failed += 1,
            InstanceStatus::Errored => {
                if outcome.record.error_kind == Some(ErrorKind::Cancelled) {
                    self.totals.cancelled += 1;
                } else {
                    self.totals.errored += 1;
                }
            }
            InstanceStatus::Running => {}
        }
        self.total_steps += u64::from(outcome.steps_executed);
        self.total_assertions +=
            u64::from(outcome.assertions_passed + outcome.assertions_failed);
        self.assertions_passed += u64::from(outcome.assertions_passed);
        self.assertions_failed += u64::from(outcome.assertions_failed);

        for sample in &outcome.samples {
            self.action_samples
                .entry(sample.action.as_str().to_string())
                .or_default()
                .push(sample.latency_ms);
            if let Some(service) = &sample.service {
                self.service_samples
                    .entry(service.as_str().to_string())
                    .or_default()
                    .push(sample.latency_ms);
            }
        }
    }

    /// Records one cancelled instance that produced no outcome.
    pub fn record_cancelled(&mut self) {
        self.totals.instances_total += 1;
        self.totals.cancelled += 1;
    }

    /// Produces the final summary.
    #[must_use]
    pub fn finish(self, run_id: RunId, started_at: DateTime<Utc>) -> RunSummary {
        let completed_at = Utc::now();
        let duration_ms = (completed_at - started_at).num_milliseconds().max(0) as f64;
        let completed = self.totals.instances_total;
        let pass_rate = if completed == 0 {
            0.0
        } else {
            (self.totals.passed as f64) / (completed as f64) * 100.0
        };
        RunSummary {
            run_id,
            started_at,
            completed_at,
            duration_ms,
            totals: self.totals,
            pass_rate,
            total_steps: self.total_steps,
            total_assertions: self.total_assertions,
            assertions_passed: self.assertions_passed,
            assertions_failed: self.assertions_failed,
            action_latency: percentile_map(self.action_samples),
            service_latency: percentile_map(self.service_samples),
        }
    }
}

// ============================================================================
// SECTION: Percentiles
// ============================================================================

/// Computes percentile stats for every sample group.
fn percentile_map(samples: BTreeMap<String, Vec<f64>>) -> BTreeMap<String, LatencyStats> {
    samples
        .into_iter()
        .map(|(key, mut values)| {
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            let stats = LatencyStats {
                count: values.len() as u64,
                p50_ms: nearest_rank(&values, 0.50),
                p95_ms: nearest_rank(&values, 0.95),
                p99_ms: nearest_rank(&values, 0.99),
            };
            (key, stats)
        })
        .collect()
}

/// Nearest-rank percentile over a sorted sample set.
fn nearest_rank(sorted: &[f64], quantile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((quantile * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only panic-based assertions are permitted.")]

    use super::*;

    #[test]
    fn nearest_rank_percentiles() {
        let values: Vec<f64> = (1 ..= 100).map(f64::from).collect();
        assert_eq!(nearest_rank(&values, 0.50), 50.0);
        assert_eq!(nearest_rank(&values, 0.95), 95.0);
        assert_eq!(nearest_rank(&values, 0.99), 99.0);
        assert_eq!(nearest_rank(&[7.0], 0.99), 7.0);
        assert_eq!(nearest_rank(&[], 0.5), 0.0);
    }
}
