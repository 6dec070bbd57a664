// windtunnel-core/src/core/turbulence.rs
// ============================================================================
// Module: Turbulence Configuration
// Description: Scope-keyed fault-injection policies.
// Purpose: Define latency, forced-timeout, and retry-storm policy shapes.
// Dependencies: crate::core::identifiers, serde
// ============================================================================

//! ## Overview
//! Turbulence policies select deterministic faults per scope: a global
//! policy, per-service overrides, and per-action-name overrides. Scopes merge
//! field-wise in that order, so the most specific scope wins per field. The
//! engine applying these policies lives in the runtime module; this module is
//! pure configuration.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::ServiceName;
use crate::core::identifiers::StepName;

// ============================================================================
// SECTION: Policy Types
// ============================================================================

/// Inclusive latency injection range in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LatencyRange {
    /// Minimum injected latency.
    pub min: u64,
    /// Maximum injected latency.
    pub max: u64,
}

/// Turbulence settings for one scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TurbulencePolicy {
    /// Deterministic latency drawn from this range before each attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<LatencyRange>,
    /// Hard deadline forced onto the wrapped call, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_after_ms: Option<u64>,
    /// Extra request issues even when the first attempt succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
}

impl TurbulencePolicy {
    /// Returns true when the policy injects nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.latency_ms.is_none() && self.timeout_after_ms.is_none() && self.retry_count.is_none()
    }

    /// Overlays another policy field-wise, later fields winning.
    fn overlay(&mut self, other: &Self) {
        if other.latency_ms.is_some() {
            self.latency_ms = other.latency_ms;
        }
        if other.timeout_after_ms.is_some() {
            self.timeout_after_ms = other.timeout_after_ms;
        }
        if other.retry_count.is_some() {
            self.retry_count = other.retry_count;
        }
    }
}

/// Top-level turbulence configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TurbulenceConfig {
    /// Policy applied to every action.
    #[serde(default, rename = "global", skip_serializing_if = "Option::is_none")]
    pub global_policy: Option<TurbulencePolicy>,
    /// Per-service overrides.
    #[serde(default)]
    pub services: BTreeMap<ServiceName, TurbulencePolicy>,
    /// Per-action-name overrides.
    #[serde(default)]
    pub actions: BTreeMap<StepName, TurbulencePolicy>,
}

impl TurbulenceConfig {
    /// Resolves the effective policy for a service/action pair.
    ///
    /// Returns `None` when no scope matches; an all-empty merge is treated as
    /// no policy.
    #[must_use]
    pub fn resolve(&self, service: &ServiceName, action: &StepName) -> Option<TurbulencePolicy> {
        let mut merged = TurbulencePolicy::default();
        let mut matched = false;
        for policy in [
            self.global_policy.as_ref(),
            self.services.get(service),
            self.actions.get(action),
        ]
        .into_iter()
        .flatten()
        {
            matched = true;
            merged.overlay(policy);
        }
        (matched && !merged.is_empty()).then_some(merged)
    }
}
