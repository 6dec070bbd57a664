// windtunnel-cli/src/i18n.rs
// ============================================================================
// Module: CLI Internationalization Helpers
// Description: Message catalog and translation utilities for the CLI.
// Purpose: Centralize user-facing strings for future localization support.
// Dependencies: Standard library collections and formatting utilities.
// ============================================================================

//! ## Overview
//! The windtunnel CLI stores user-facing strings in a small translation
//! catalog to enforce consistent messaging. All runtime output should be
//! routed through the [`t!`](crate::t) macro.
//!
//! ## Invariants
//! - The catalog is initialized once and read-only thereafter.
//! - Missing keys fall back to the key itself to avoid panics.
//! - Placeholder substitutions preserve deterministic order.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::OnceLock;

// ============================================================================
// SECTION: Types
// ============================================================================

/// A formatted message argument captured by the [`macro@crate::t`] macro.
#[derive(Clone)]
pub struct MessageArg {
    /// The placeholder name used in message templates (e.g., `"path"`).
    pub key: &'static str,
    /// The formatted string value to substitute for this placeholder.
    pub value: String,
}

impl MessageArg {
    /// Constructs a new [`MessageArg`] from a key and displayable value.
    pub fn new(key: &'static str, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }
}

// ============================================================================
// SECTION: Catalog
// ============================================================================

/// Static catalog entries loaded into the localized message bundle.
const CATALOG_ITEMS: &[(&str, &str)] = &[
    ("main.version", "windtunnel {version}"),
    ("run.config.sut_failed", "Failed to load SUT config: {error}"),
    ("run.config.scenarios_failed", "Failed to load scenarios: {error}"),
    ("run.store.open_failed", "Failed to open artifact store: {error}"),
    ("run.transport.build_failed", "Failed to build HTTP transport: {error}"),
    ("run.execute_failed", "Run failed: {error}"),
    ("run.finalize_failed", "Failed to finalize run: {error}"),
    ("run.started", "Run {run_id} started ({instances} instances, parallelism {parallelism})"),
    (
        "run.summary",
        "Run {run_id}: {passed} passed, {failed} failed, {errored} errored, {cancelled} \
         cancelled ({pass_rate}% pass rate in {duration_ms}ms)",
    ),
    ("run.threshold.violated", "Pass rate {pass_rate}% below threshold {threshold}%"),
    ("run.cancelled", "Cancellation requested; waiting for in-flight instances..."),
    ("replay.reader_failed", "Failed to open run {run_id}: {error}"),
    ("replay.manifest_failed", "Failed to read manifest for {run_id}: {error}"),
    ("replay.instance_missing", "Instance {instance_id} not found in run {run_id}"),
    ("replay.failed", "Replay failed: {error}"),
    ("replay.outcome", "Replay of {instance_id}: {status}"),
    ("output.write_failed", "Failed to write output: {error}"),
];

/// Returns the initialized message catalog.
fn catalog() -> &'static HashMap<&'static str, &'static str> {
    static CATALOG: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    CATALOG.get_or_init(|| CATALOG_ITEMS.iter().copied().collect())
}

// ============================================================================
// SECTION: Translation
// ============================================================================

/// Translates a catalog key, substituting `{placeholder}` arguments.
///
/// Missing keys fall back to the key itself so output never panics.
#[must_use]
pub fn translate(key: &str, args: &[MessageArg]) -> String {
    let template = catalog().get(key).copied().unwrap_or(key);
    let mut output = template.to_string();
    for arg in args {
        output = output.replace(&format!("{{{}}}", arg.key), &arg.value);
    }
    output
}

/// Translates a message catalog key with optional named arguments.
#[macro_export]
macro_rules! t {
    ($key:expr) => {
        $crate::i18n::translate($key, &[])
    };
    ($key:expr, $($name:ident = $value:expr),+ $(,)?) => {
        $crate::i18n::translate(
            $key,
            &[$($crate::i18n::MessageArg::new(stringify!($name), format!("{}", $value))),+],
        )
    };
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only panic-based assertions are permitted.")]

    use super::*;

    #[test]
    fn substitutes_named_placeholders() {
        let message = translate(
            "run.threshold.violated",
            &[
                MessageArg::new("pass_rate", "90"),
                MessageArg::new("threshold", "95"),
            ],
        );
        assert_eq!(message, "Pass rate 90% below threshold 95%");
    }

    #[test]
    fn missing_keys_fall_back_to_key() {
        assert_eq!(translate("nope.nothing", &[]), "nope.nothing");
    }
}
