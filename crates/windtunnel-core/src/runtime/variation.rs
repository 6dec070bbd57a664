// windtunnel-core/src/runtime/variation.rs
// ============================================================================
// Module: Variation Engine
// Description: Deterministic per-instance input fuzzing.
// Purpose: Draw parameter, toggle, and timing values from a derived seed.
// Dependencies: crate::core::variation, rand, serde_json
// ============================================================================

//! ## Overview
//! Each instance draws its variation values from a PRNG seeded by
//! `base_seed + instance_index`, so inputs are diverse across instances yet
//! fully reproducible for replay and regression runs. Draw order is fixed:
//! parameters in name order, then toggles in declaration order, then timing,
//! so a given seed always yields the same map.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use rand::Rng;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde_json::Number;
use serde_json::Value;

use crate::core::variation::VariationKind;
use crate::core::variation::VariationSpec;

// ============================================================================
// SECTION: Engine
// ============================================================================

/// Draws deterministic variation values for scenario instances.
#[derive(Debug, Clone)]
pub struct VariationEngine {
    /// Variation specification.
    spec: VariationSpec,
    /// Run seed the per-instance seeds derive from.
    base_seed: u64,
}

impl VariationEngine {
    /// Creates an engine for one run.
    #[must_use]
    pub const fn new(spec: VariationSpec, base_seed: u64) -> Self {
        Self {
            spec,
            base_seed,
        }
    }

    /// Draws the variation map for one instance index.
    #[must_use]
    pub fn apply(&self, instance_index: u64) -> BTreeMap<String, Value> {
        let mut rng = StdRng::seed_from_u64(self.base_seed.wrapping_add(instance_index));
        let mut values = BTreeMap::new();

        for (name, parameter) in &self.spec.parameters {
            match parameter.kind {
                VariationKind::Choice => {
                    if let Some(choices) = &parameter.values {
                        if !choices.is_empty() {
                            let pick = rng.gen_range(0 .. choices.len());
                            values.insert(name.clone(), choices[pick].clone());
                        }
                    }
                }
                VariationKind::Range => {
                    if let (Some(min), Some(max)) = (parameter.min, parameter.max) {
                        let (low, high) = if min <= max { (min, max) } else { (max, min) };
                        let drawn = if low < high { rng.gen_range(low .. high) } else { low };
                        let number =
                            Number::from_f64(drawn).map(Value::Number).unwrap_or(Value::Null);
                        values.insert(name.clone(), number);
                    }
                }
            }
        }

        for toggle in &self.spec.toggles {
            let enabled = rng.gen::<f64>() < toggle.probability;
            values.insert(toggle.name.clone(), Value::Bool(enabled));
        }

        if let Some(timing) = &self.spec.timing {
            for (key, bounds) in [
                ("_timing_jitter_ms", timing.jitter_ms),
                ("_step_delay_ms", timing.step_delay_ms),
            ] {
                if let Some(bounds) = bounds {
                    let (low, high) = if bounds.min <= bounds.max {
                        (bounds.min, bounds.max)
                    } else {
                        (bounds.max, bounds.min)
                    };
                    values.insert(key.to_string(), Value::from(rng.gen_range(low ..= high)));
                }
            }
        }

        values
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
