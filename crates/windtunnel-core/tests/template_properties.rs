// windtunnel-core/tests/template_properties.rs
// ============================================================================
// Module: Template Property Tests
// Description: Stability and type-preservation properties of rendering.
// ============================================================================
//! ## Overview
//! Property coverage for the template engine: rendering a fully-resolvable
//! template is stable under repeated application, and single-marker
//! templates preserve the referenced value's type identity.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only panic-based assertions are permitted."
)]

use proptest::prelude::*;
use serde_json::Value;
use serde_json::json;
use windtunnel_core::core::context::Context;
use windtunnel_core::core::template::render_str;

// ============================================================================
// SECTION: Strategies
// ============================================================================

/// Keys safe for dotted-path lookups.
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,8}".prop_map(|key| key)
}

/// Scalar context values across the JSON types templates must preserve.
fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "[a-zA-Z0-9 _-]{0,16}".prop_map(Value::from),
        Just(Value::Null),
        prop::collection::vec(any::<i32>().prop_map(Value::from), 0 .. 4)
            .prop_map(Value::Array),
    ]
}

// ============================================================================
// SECTION: Properties
// ============================================================================

proptest! {
    #[test]
    fn single_marker_preserves_type_identity(key in key_strategy(), value in scalar_strategy()) {
        let mut ctx = Context::default();
        ctx.insert(key.clone(), value.clone());
        let rendered = render_str(&format!("{{{{{key}}}}}"), &ctx).unwrap();
        prop_assert_eq!(rendered, value);
    }

    #[test]
    fn rendering_is_stable_under_repetition(
        key in key_strategy(),
        text in "[a-zA-Z0-9 .,-]{0,24}",
    ) {
        // The substituted value carries no markers, so a second render of
        // the output must be the identity.
        let mut ctx = Context::default();
        ctx.insert(key.clone(), json!(text));
        let template = format!("prefix {{{{{key}}}}} suffix");

        let first = render_str(&template, &ctx).unwrap();
        let first_text = first.as_str().unwrap().to_string();
        let second = render_str(&first_text, &ctx).unwrap();
        prop_assert_eq!(first_text.as_str(), second.as_str().unwrap());
    }

    #[test]
    fn embedded_numbers_render_without_loss(key in key_strategy(), number in any::<i64>()) {
        let mut ctx = Context::default();
        ctx.insert(key.clone(), json!(number));
        let rendered = render_str(&format!("n={{{{{key}}}}}"), &ctx).unwrap();
        prop_assert_eq!(rendered, json!(format!("n={number}")));
    }
}
