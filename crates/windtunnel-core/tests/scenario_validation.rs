// windtunnel-core/tests/scenario_validation.rs
// ============================================================================
// Module: Scenario Validation Tests
// Description: Structural invariants of scenario and SUT definitions.
// ============================================================================
//! ## Overview
//! Covers deserialization strictness (unknown keys, tagged variants) and the
//! validation helpers that gate a run before dispatch.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only panic-based assertions are permitted."
)]

use windtunnel_core::core::scenario::RetrySpec;
use windtunnel_core::core::scenario::RetryStrategy;
use windtunnel_core::core::scenario::Scenario;
use windtunnel_core::core::scenario::ScenarioError;
use windtunnel_core::core::scenario::Step;
use windtunnel_core::core::sut::SutConfig;
use windtunnel_core::core::sut::SutError;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

fn sut_json(base_url: &str) -> SutConfig {
    serde_json::from_value(serde_json::json!({
        "name": "shop",
        "default_headers": {"X-Env": "test"},
        "services": {
            "api": {"base_url": base_url, "timeout_seconds": 5.0}
        }
    }))
    .unwrap()
}

fn scenario_json(value: serde_json::Value) -> Result<Scenario, serde_json::Error> {
    serde_json::from_value(value)
}

// ============================================================================
// SECTION: Deserialization
// ============================================================================

#[test]
fn steps_deserialize_by_tag() {
    let scenario = scenario_json(serde_json::json!({
        "id": "checkout",
        "flow": [
            {"type": "http", "name": "create", "service": "api", "method": "POST",
             "path": "/orders", "body": {"sku": "{{entry.seed_data.sku}}"}},
            {"type": "wait", "name": "settle", "service": "api", "path": "/orders/1",
             "interval_seconds": 0.1, "timeout_seconds": 2.0,
             "expect": {"jsonpath": "$.status", "equals": "done"}},
            {"type": "assert", "name": "final", "expect": {"status_code": 200}},
            {"type": "branch", "name": "fork", "condition": "{{flag}}",
             "if_true": [], "if_false": []}
        ]
    }))
    .unwrap();
    assert_eq!(scenario.flow.len(), 4);
    assert_eq!(scenario.flow[0].kind(), "http");
    assert_eq!(scenario.flow[1].kind(), "wait");
    assert_eq!(scenario.flow[2].kind(), "assert");
    assert_eq!(scenario.flow[3].kind(), "branch");
    assert_eq!(scenario.max_steps, 100);
}

#[test]
fn unknown_step_keys_are_rejected() {
    let result = scenario_json(serde_json::json!({
        "id": "checkout",
        "flow": [
            {"type": "http", "name": "create", "service": "api", "method": "GET",
             "path": "/", "surprise": true}
        ]
    }));
    assert!(result.is_err());
}

#[test]
fn unknown_step_type_is_rejected() {
    let result = scenario_json(serde_json::json!({
        "id": "checkout",
        "flow": [{"type": "teleport", "name": "x"}]
    }));
    assert!(result.is_err());
}

// ============================================================================
// SECTION: Validation
// ============================================================================

#[test]
fn duplicate_step_names_are_rejected_across_branches() {
    let scenario = scenario_json(serde_json::json!({
        "id": "dup",
        "flow": [
            {"type": "http", "name": "call", "service": "api", "method": "GET", "path": "/"},
            {"type": "branch", "name": "fork", "condition": "true",
             "if_true": [
                {"type": "http", "name": "call", "service": "api", "method": "GET", "path": "/"}
             ],
             "if_false": []}
        ]
    }))
    .unwrap();
    assert!(matches!(scenario.validate(), Err(ScenarioError::DuplicateStep { .. })));
}

#[test]
fn body_and_form_are_mutually_exclusive() {
    let scenario = scenario_json(serde_json::json!({
        "id": "both",
        "flow": [
            {"type": "http", "name": "call", "service": "api", "method": "POST", "path": "/",
             "body": {"a": 1}, "form": {"b": "2"}}
        ]
    }))
    .unwrap();
    assert!(matches!(scenario.validate(), Err(ScenarioError::InvalidStep { .. })));
}

#[test]
fn vacuous_expectations_are_rejected() {
    let scenario = scenario_json(serde_json::json!({
        "id": "vacuous",
        "flow": [{"type": "assert", "name": "nothing", "expect": {}}]
    }))
    .unwrap();
    assert!(matches!(scenario.validate(), Err(ScenarioError::InvalidExpectation { .. })));
}

#[test]
fn unknown_service_references_fail_binding() {
    let scenario = scenario_json(serde_json::json!({
        "id": "dangling",
        "flow": [
            {"type": "http", "name": "call", "service": "ghost", "method": "GET", "path": "/"}
        ]
    }))
    .unwrap();
    let sut = sut_json("http://localhost:1");
    assert!(matches!(
        scenario.validate_against(&sut),
        Err(ScenarioError::UnknownService { .. })
    ));
}

#[test]
fn sut_base_urls_must_be_http() {
    let sut = sut_json("ftp://files.example");
    assert!(matches!(sut.validate(), Err(SutError::InvalidBaseUrl { .. })));
}

// ============================================================================
// SECTION: Variation
// ============================================================================

#[test]
fn variation_deserializes_and_validates() {
    let scenario = scenario_json(serde_json::json!({
        "id": "varied",
        "variation": {
            "parameters": {
                "user_id": {"type": "choice", "values": ["user1", "user2"]},
                "amount": {"type": "range", "min": 1.0, "max": 5.0}
            },
            "toggles": [{"name": "apply_coupon", "probability": 0.5}],
            "timing": {"jitter_ms": {"min": 1, "max": 5}}
        },
        "flow": [{"type": "assert", "name": "noop", "expect": {"status_code": 200}}]
    }))
    .unwrap();
    scenario.validate().unwrap();
    let variation = scenario.variation.unwrap();
    assert_eq!(variation.parameters.len(), 2);
    assert_eq!(variation.toggles.len(), 1);
}

#[test]
fn invalid_variations_are_rejected() {
    let cases = [
        // Choice without values.
        serde_json::json!({"parameters": {"x": {"type": "choice"}}}),
        // Range with min >= max.
        serde_json::json!({"parameters": {"x": {"type": "range", "min": 5.0, "max": 1.0}}}),
        // Probability outside [0, 1].
        serde_json::json!({"toggles": [{"name": "t", "probability": 1.5}]}),
        // Timing bounds inverted.
        serde_json::json!({"timing": {"step_delay_ms": {"min": 9, "max": 3}}}),
    ];
    for variation in cases {
        let scenario = scenario_json(serde_json::json!({
            "id": "varied",
            "variation": variation,
            "flow": [{"type": "assert", "name": "noop", "expect": {"status_code": 200}}]
        }))
        .unwrap();
        assert!(
            matches!(scenario.validate(), Err(ScenarioError::InvalidVariation { .. })),
            "expected rejection for {:?}",
            scenario.variation
        );
    }
}

#[test]
fn unknown_variation_keys_are_rejected() {
    let result = scenario_json(serde_json::json!({
        "id": "varied",
        "variation": {"surprise": true},
        "flow": [{"type": "assert", "name": "noop", "expect": {"status_code": 200}}]
    }));
    assert!(result.is_err());
}

// ============================================================================
// SECTION: Retry Backoff
// ============================================================================

#[test]
fn fixed_backoff_is_constant() {
    let retry = RetrySpec {
        strategy: RetryStrategy::Fixed,
        attempts: 4,
        delay_ms: 250,
        factor: None,
        cap_ms: None,
        on_status: vec![503],
        on_timeout: true,
        on_connection_error: true,
    };
    assert_eq!(retry.backoff_ms(1), 250);
    assert_eq!(retry.backoff_ms(3), 250);
}

#[test]
fn exponential_backoff_grows_and_caps() {
    let retry = RetrySpec {
        strategy: RetryStrategy::Exponential,
        attempts: 6,
        delay_ms: 100,
        factor: Some(2.0),
        cap_ms: Some(500),
        on_status: Vec::new(),
        on_timeout: true,
        on_connection_error: true,
    };
    assert_eq!(retry.backoff_ms(1), 100);
    assert_eq!(retry.backoff_ms(2), 200);
    assert_eq!(retry.backoff_ms(3), 400);
    assert_eq!(retry.backoff_ms(4), 500);
    assert_eq!(retry.backoff_ms(5), 500);
}
