// system-tests/tests/helpers/scenarios.rs
// ============================================================================
// Module: Configuration Fixtures
// Description: SUT and scenario builders for the end-to-end suites.
// Purpose: Provide deterministic, reusable definitions against the stub.
// Dependencies: windtunnel-core, serde_json
// ============================================================================

use serde_json::Value;
use serde_json::json;
use windtunnel_core::core::scenario::Scenario;
use windtunnel_core::core::sut::SutConfig;

/// Builds a SUT whose `api` and `payments` services both point at the stub.
pub fn stub_sut(base_url: &str) -> SutConfig {
    serde_json::from_value(json!({
        "name": "stub-shop",
        "default_headers": {"X-Env": "system-test"},
        "services": {
            "api": {"base_url": base_url, "timeout_seconds": 5.0},
            "payments": {"base_url": base_url, "timeout_seconds": 5.0}
        }
    }))
    .expect("stub sut")
}

/// Parses a scenario from its JSON definition and validates it.
pub fn scenario(value: Value) -> Scenario {
    let scenario: Scenario = serde_json::from_value(value).expect("scenario parse");
    scenario.validate().expect("scenario validate");
    scenario
}

/// Two-step extract-and-reuse journey against `/a` and `/b`.
pub fn extract_reuse_scenario() -> Scenario {
    scenario(json!({
        "id": "extract-reuse",
        "flow": [
            {"type": "http", "name": "get_a", "service": "api", "method": "GET",
             "path": "/a", "extract": {"id": "$.id"}},
            {"type": "http", "name": "get_b", "service": "api", "method": "GET",
             "path": "/b", "query": {"id": "{{id}}"}}
        ]
    }))
}

/// Wait journey polling `/pending` until it settles.
pub fn wait_scenario() -> Scenario {
    scenario(json!({
        "id": "wait-settles",
        "flow": [
            {"type": "wait", "name": "wait_done", "service": "api", "path": "/pending",
             "interval_seconds": 0.01, "timeout_seconds": 1.0,
             "expect": {"jsonpath": "$.status", "equals": "done"}}
        ]
    }))
}

/// Journey whose post-flow assertion fails against a 500 response.
pub fn failing_assertion_scenario() -> Scenario {
    scenario(json!({
        "id": "assert-fails",
        "flow": [
            {"type": "http", "name": "call_fail", "service": "api", "method": "GET",
             "path": "/fail"}
        ],
        "assertions": [
            {"name": "expect_ok", "expect": {"status_code": 200}}
        ]
    }))
}

/// Single-call journey against `payments` with latency turbulence.
pub fn turbulence_scenario() -> Scenario {
    scenario(json!({
        "id": "turbulent-payment",
        "flow": [
            {"type": "http", "name": "charge", "service": "payments", "method": "GET",
             "path": "/a"}
        ],
        "turbulence": {
            "services": {
                "payments": {"latency_ms": {"min": 50, "max": 200}}
            }
        }
    }))
}

/// Journey whose seed data references per-instance variation draws.
pub fn variation_scenario() -> Scenario {
    scenario(json!({
        "id": "varied-journey",
        "variation": {
            "parameters": {
                "user_id": {"type": "choice", "values": ["user1", "user2"]}
            },
            "toggles": [{"name": "apply_coupon", "probability": 0.5}]
        },
        "entry": {
            "seed_data": {
                "injected_user": "{{entry.seed_data.variation.user_id}}"
            }
        },
        "flow": [
            {"type": "http", "name": "fetch", "service": "api", "method": "GET", "path": "/a"}
        ]
    }))
}

/// Slow journey used by the cancellation suite.
pub fn slow_scenario() -> Scenario {
    scenario(json!({
        "id": "slow-call",
        "flow": [
            {"type": "http", "name": "slow", "service": "api", "method": "GET",
             "path": "/slow"}
        ]
    }))
}

/// Branching journey keyed on the extracted payment status.
pub fn branch_scenario(state: &str) -> Scenario {
    scenario(json!({
        "id": "branch-on-payment",
        "flow": [
            {"type": "http", "name": "fetch_payment", "service": "payments", "method": "GET",
             "path": "/payment", "query": {"state": state},
             "extract": {"payment_status": "$.payment_status"}},
            {"type": "branch", "name": "route_payment",
             "condition": "{{payment_status}} == 'declined'",
             "if_true": [
                {"type": "http", "name": "refund_payment", "service": "payments",
                 "method": "GET", "path": "/refund"}
             ],
             "if_false": [
                {"type": "http", "name": "capture_payment", "service": "payments",
                 "method": "GET", "path": "/capture"}
             ]}
        ]
    }))
}
