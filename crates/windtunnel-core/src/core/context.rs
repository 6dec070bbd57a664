// windtunnel-core/src/core/context.rs
// ============================================================================
// Module: Instance Context
// Description: Per-instance key/value snapshot consulted by templates.
// Purpose: Provide read-only snapshots plus deltas applied between steps.
// Dependencies: crate::core::identifiers, serde_json
// ============================================================================

//! ## Overview
//! Each instance owns exactly one context. Steps receive a read-only snapshot
//! and return a [`ContextDelta`]; the runner applies the delta before the
//! next step renders. The reserved names `run_id`, `instance_id`,
//! `correlation_id`, `iteration`, and the `entry` namespace are populated at
//! instance start and may be shadowed only by explicit extraction names.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Value;

use crate::core::identifiers::CorrelationId;
use crate::core::identifiers::InstanceId;
use crate::core::identifiers::RunId;

// ============================================================================
// SECTION: Context
// ============================================================================

/// Per-instance key/value context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context {
    /// Flat value map; nested access uses dotted paths.
    values: BTreeMap<String, Value>,
}

impl Context {
    /// Builds the initial context for one instance.
    #[must_use]
    pub fn for_instance(
        run_id: &RunId,
        instance_id: &InstanceId,
        correlation_id: &CorrelationId,
        iteration: u64,
        entry: BTreeMap<String, Value>,
    ) -> Self {
        let mut values = BTreeMap::new();
        values.insert("run_id".to_string(), Value::String(run_id.as_str().to_string()));
        values.insert("instance_id".to_string(), Value::String(instance_id.as_str().to_string()));
        values.insert(
            "correlation_id".to_string(),
            Value::String(correlation_id.as_str().to_string()),
        );
        values.insert("iteration".to_string(), Value::from(iteration));
        let mut entry_obj = Map::new();
        entry_obj.insert(
            "seed_data".to_string(),
            Value::Object(entry.into_iter().collect::<Map<String, Value>>()),
        );
        values.insert("entry".to_string(), Value::Object(entry_obj));
        Self {
            values,
        }
    }

    /// Returns a value by exact key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Resolves a dotted path through nested objects and array indexes.
    #[must_use]
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.values.get(first)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Inserts or overwrites a top-level value.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Applies a delta, overwriting colliding names.
    pub fn apply(&mut self, delta: ContextDelta) {
        for (key, value) in delta.values {
            self.values.insert(key, value);
        }
    }

    /// Returns the context as a JSON object for expression environments.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone().into_iter().collect::<Map<String, Value>>())
    }

    /// Iterates over all top-level entries.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }
}

// ============================================================================
// SECTION: Context Delta
// ============================================================================

/// Ordered set of context updates returned by one step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextDelta {
    /// Updates applied in insertion order.
    values: Vec<(String, Value)>,
}

impl ContextDelta {
    /// Creates an empty delta.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            values: Vec::new(),
        }
    }

    /// Records an update.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.push((key.into(), value));
    }

    /// Returns true when the delta carries no updates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Merges another delta after this one.
    pub fn extend(&mut self, other: Self) {
        self.values.extend(other.values);
    }

    /// Iterates over recorded updates in order.
    pub fn iter(&self) -> impl Iterator<Item = &(String, Value)> {
        self.values.iter()
    }
}
