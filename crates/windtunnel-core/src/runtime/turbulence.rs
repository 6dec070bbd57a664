// windtunnel-core/src/runtime/turbulence.rs
// ============================================================================
// Module: Turbulence Engine
// Description: Deterministic fault injection around HTTP action execution.
// Purpose: Inject latency, forced timeouts, and retry storms per policy.
// Dependencies: crate::core, rand, sha2, tokio
// ============================================================================

//! ## Overview
//! The turbulence engine decorates the HTTP call site. Every injected
//! decision is drawn from a PRNG seeded by a digest of
//! `(run_seed, instance_id, service, action, attempt)`, so independent
//! concurrent instances sample deterministically without sharing any stream.
//! Turbulence never modifies response bytes; it only delays, deadlines, or
//! re-issues the wrapped call and records what it did.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use sha2::Digest;
use sha2::Sha256;
use tokio::time::sleep;
use tokio::time::timeout;

use crate::core::context::ContextDelta;
use crate::core::identifiers::InstanceId;
use crate::core::identifiers::ServiceName;
use crate::core::identifiers::StepName;
use crate::core::observation::ErrorKind;
use crate::core::observation::Observation;
use crate::core::observation::ObservationError;
use crate::core::observation::StormAttempt;
use crate::core::observation::TurbulenceReport;
use crate::core::turbulence::TurbulenceConfig;
use crate::core::turbulence::TurbulencePolicy;

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Applies deterministic turbulence policies around action execution.
#[derive(Debug, Clone)]
pub struct TurbulenceEngine {
    /// Active configuration, when the scenario declares one.
    config: Option<TurbulenceConfig>,
    /// Run seed all decision PRNGs derive from.
    seed: u64,
}

impl TurbulenceEngine {
    /// Creates an engine for one run.
    #[must_use]
    pub const fn new(config: Option<TurbulenceConfig>, seed: u64) -> Self {
        Self {
            config,
            seed,
        }
    }

    /// Returns true when any policy is configured.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.config.is_some()
    }

    /// Resolves the effective policy for a service/action pair.
    #[must_use]
    pub fn resolve(&self, service: &ServiceName, action: &StepName) -> Option<TurbulencePolicy> {
        self.config.as_ref().and_then(|config| config.resolve(service, action))
    }

    /// Draws the injected latency for one attempt, when configured.
    #[must_use]
    pub fn pick_latency(
        &self,
        policy: &TurbulencePolicy,
        instance_id: &InstanceId,
        service: &ServiceName,
        action: &StepName,
        attempt: u32,
    ) -> Option<u64> {
        let range = policy.latency_ms?;
        let mut rng = StdRng::seed_from_u64(self.derive_seed(instance_id, service, action, attempt));
        let (low, high) = if range.min <= range.max {
            (range.min, range.max)
        } else {
            (range.max, range.min)
        };
        Some(rng.gen_range(low ..= high))
    }

    /// Derives the decision seed for `(instance, service, action, attempt)`.
    fn derive_seed(
        &self,
        instance_id: &InstanceId,
        service: &ServiceName,
        action: &StepName,
        attempt: u32,
    ) -> u64 {
        let payload =
            format!("{}:{}:{}:{}:{}", self.seed, instance_id, service, action, attempt);
        let digest = Sha256::digest(payload.as_bytes());
        u64::from_be_bytes([
            digest[0], digest[1], digest[2], digest[3], digest[4], digest[5], digest[6], digest[7],
        ])
    }

    /// Applies a policy around an action execution.
    ///
    /// Issues the wrapped call `1 + retry_count` times, delaying each issue
    /// by the drawn latency and bounding it by the forced deadline. The last
    /// call's result wins; every call is recorded on the returned
    /// observation's turbulence report.
    pub async fn apply<F, Fut>(
        &self,
        policy: &TurbulencePolicy,
        instance_id: &InstanceId,
        service: &ServiceName,
        action: &StepName,
        execute: F,
    ) -> (Observation, ContextDelta)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = (Observation, ContextDelta)>,
    {
        let retry_count = policy.retry_count.unwrap_or(0);
        let issues = 1 + retry_count;
        let mut report = TurbulenceReport {
            service: service.clone(),
            action: action.clone(),
            retry_count,
            timeout_after_ms: policy.timeout_after_ms,
            latency_ms: None,
            attempts: Vec::new(),
        };

        let mut last: Option<(Observation, ContextDelta)> = None;
        for attempt in 0 .. issues {
            let injected_latency =
                self.pick_latency(policy, instance_id, service, action, attempt);
            if let Some(latency_ms) = injected_latency {
                report.latency_ms = Some(latency_ms);
                sleep(Duration::from_millis(latency_ms)).await;
            }

            let (observation, delta) = match policy.timeout_after_ms {
                Some(deadline_ms) => {
                    match timeout(Duration::from_millis(deadline_ms), execute()).await {
                        Ok(result) => result,
                        Err(_) => {
                            let error = ObservationError::with_detail(
                                ErrorKind::Timeout,
                                format!("injected timeout after {deadline_ms}ms"),
                            );
                            (Observation::failed(deadline_ms as f64, error), ContextDelta::new())
                        }
                    }
                }
                None => execute().await,
            };

            report.attempts.push(StormAttempt {
                ok: observation.ok,
                status_code: observation.status_code,
                latency_ms: observation.latency_ms,
                injected_latency_ms: injected_latency,
            });
            last = Some((observation, delta));
        }

        // issues >= 1, so a result is always present.
        let (mut observation, delta) = last.unwrap_or_else(|| {
            (
                Observation::failed(0.0, ObservationError::new(ErrorKind::Internal)),
                ContextDelta::new(),
            )
        });
        observation.turbulence = Some(report);
        (observation, delta)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only panic-based assertions are permitted.")]

    use crate::core::turbulence::LatencyRange;

    use super::*;

    fn policy(min: u64, max: u64) -> TurbulencePolicy {
        TurbulencePolicy {
            latency_ms: Some(LatencyRange {
                min,
                max,
            }),
            timeout_after_ms: None,
            retry_count: None,
        }
    }

    #[test]
    fn latency_draws_are_deterministic_per_key() {
        let engine = TurbulenceEngine::new(None, 42);
        let policy = policy(50, 200);
        let instance = InstanceId::from_index(3);
        let service = ServiceName::new("payments");
        let action = StepName::new("charge");

        let first = engine.pick_latency(&policy, &instance, &service, &action, 0).unwrap();
        let second = engine.pick_latency(&policy, &instance, &service, &action, 0).unwrap();
        assert_eq!(first, second);
        assert!((50 ..= 200).contains(&first));
    }

    #[test]
    fn latency_draws_differ_across_attempts_and_instances() {
        let engine = TurbulenceEngine::new(None, 42);
        let policy = policy(0, 1_000_000);
        let service = ServiceName::new("payments");
        let action = StepName::new("charge");

        let a = engine.pick_latency(&policy, &InstanceId::from_index(0), &service, &action, 0);
        let b = engine.pick_latency(&policy, &InstanceId::from_index(0), &service, &action, 1);
        let c = engine.pick_latency(&policy, &InstanceId::from_index(1), &service, &action, 0);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn seed_changes_the_draw() {
        let policy = policy(0, 1_000_000);
        let instance = InstanceId::from_index(0);
        let service = ServiceName::new("payments");
        let action = StepName::new("charge");

        let a = TurbulenceEngine::new(None, 1).pick_latency(
            &policy, &instance, &service, &action, 0,
        );
        let b = TurbulenceEngine::new(None, 2).pick_latency(
            &policy, &instance, &service, &action, 0,
        );
        assert_ne!(a, b);
    }
}
