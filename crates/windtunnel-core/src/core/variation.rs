// windtunnel-core/src/core/variation.rs
// ============================================================================
// Module: Variation Configuration
// Description: Deterministic per-instance input fuzzing policies.
// Purpose: Define parameter, toggle, and timing variation shapes.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Variation gives every instance of a scenario a different but reproducible
//! input set: named parameters drawn from a choice list or a numeric range,
//! boolean toggles enabled with a probability, and per-step timing jitter
//! and delays. Drawn values are injected under `entry.seed_data.variation`
//! before entry templates render, so seed data can reference them. The
//! engine drawing these values lives in the runtime module; this module is
//! pure configuration.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Parameter Variations
// ============================================================================

/// How a parameter varies across instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariationKind {
    /// Pick one value from a list.
    Choice,
    /// Draw a number uniformly from `[min, max)`.
    Range,
}

/// One named parameter variation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ParameterVariation {
    /// Variation kind.
    #[serde(rename = "type")]
    pub kind: VariationKind,
    /// Values to choose from (choice kind).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
    /// Lower bound (range kind).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Upper bound (range kind).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

/// Boolean journey toggle enabled with a probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToggleVariation {
    /// Toggle name injected into the variation map.
    pub name: String,
    /// Probability in `[0, 1]` that the toggle is enabled.
    pub probability: f64,
}

// ============================================================================
// SECTION: Timing Variations
// ============================================================================

/// Inclusive millisecond bounds for a timing draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BoundsMs {
    /// Minimum value.
    pub min: u64,
    /// Maximum value.
    pub max: u64,
}

/// Timing variation configuration.
///
/// Drawn values land in the variation map under the underscore-prefixed
/// names the runner consumes (`_timing_jitter_ms`, `_step_delay_ms`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimingSpec {
    /// Jitter added before every step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jitter_ms: Option<BoundsMs>,
    /// Delay between consecutive steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_delay_ms: Option<BoundsMs>,
}

// ============================================================================
// SECTION: Variation Specification
// ============================================================================

/// Complete variation configuration for a scenario.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariationSpec {
    /// Named parameters to vary.
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterVariation>,
    /// Boolean toggles with activation probability.
    #[serde(default)]
    pub toggles: Vec<ToggleVariation>,
    /// Optional timing variation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<TimingSpec>,
}

impl VariationSpec {
    /// Validates the specification invariants.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason for the first invalid entry.
    pub fn validate(&self) -> Result<(), String> {
        for (name, parameter) in &self.parameters {
            match parameter.kind {
                VariationKind::Choice => {
                    if parameter.values.as_ref().is_none_or(Vec::is_empty) {
                        return Err(format!("choice parameter {name} requires values"));
                    }
                }
                VariationKind::Range => {
                    let (Some(min), Some(max)) = (parameter.min, parameter.max) else {
                        return Err(format!("range parameter {name} requires min and max"));
                    };
                    if !min.is_finite() || !max.is_finite() || min >= max {
                        return Err(format!("range parameter {name} requires min < max"));
                    }
                }
            }
        }
        for toggle in &self.toggles {
            if !(0.0 ..= 1.0).contains(&toggle.probability) {
                return Err(format!("toggle {} probability must be within [0, 1]", toggle.name));
            }
        }
        if let Some(timing) = &self.timing {
            for (label, bounds) in [
                ("jitter_ms", timing.jitter_ms),
                ("step_delay_ms", timing.step_delay_ms),
            ] {
                if let Some(bounds) = bounds {
                    if bounds.min >= bounds.max {
                        return Err(format!("{label} requires min < max"));
                    }
                }
            }
        }
        Ok(())
    }
}
