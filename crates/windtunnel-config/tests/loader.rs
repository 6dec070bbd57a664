// windtunnel-config/tests/loader.rs
// ============================================================================
// Module: Configuration Loader Tests
// Description: YAML/JSON loading with fail-closed validation.
// ============================================================================
//! ## Overview
//! Covers format detection by extension, strict deserialization, directory
//! loading in stable order, and validation failures surfacing at load time.

#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only panic-based assertions are permitted."
)]

use std::fs;

use tempfile::TempDir;
use windtunnel_config::ConfigError;
use windtunnel_config::load_scenarios;
use windtunnel_config::load_sut;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

const SUT_YAML: &str = r#"
name: shop
default_headers:
  X-Env: test
  X-Correlation-ID: "{{correlation_id}}"
services:
  api:
    base_url: http://127.0.0.1:8080
    timeout_seconds: 5.0
  payments:
    base_url: http://127.0.0.1:8081
"#;

const SCENARIO_YAML: &str = r#"
id: checkout
description: two-step checkout journey
variation:
  parameters:
    locale:
      type: choice
      values: [en-US, de-DE]
  timing:
    jitter_ms: {min: 1, max: 5}
entry:
  seed_data:
    sku: abc-123
flow:
  - type: http
    name: create_order
    service: api
    method: POST
    path: /orders
    body:
      sku: "{{entry.seed_data.sku}}"
    extract:
      order_id: "$.id"
  - type: wait
    name: wait_settled
    service: api
    path: "/orders/{{order_id}}"
    interval_seconds: 0.1
    timeout_seconds: 2.0
    expect:
      jsonpath: "$.status"
      equals: settled
assertions:
  - name: settled_ok
    expect:
      jsonpath: "$.status"
      equals: settled
stop_when:
  any_action_fails: true
max_steps: 20
"#;

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn loads_sut_from_yaml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sut.yaml");
    fs::write(&path, SUT_YAML).unwrap();

    let sut = load_sut(&path).unwrap();
    assert_eq!(sut.name, "shop");
    assert_eq!(sut.services.len(), 2);
    assert_eq!(
        sut.default_headers.get("X-Correlation-ID").map(String::as_str),
        Some("{{correlation_id}}")
    );
}

#[test]
fn loads_scenarios_from_a_directory_in_stable_order() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("b_second.yaml"), SCENARIO_YAML.replace("checkout", "second"))
        .unwrap();
    fs::write(dir.path().join("a_first.yaml"), SCENARIO_YAML).unwrap();
    fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

    let scenarios = load_scenarios(dir.path()).unwrap();
    assert_eq!(scenarios.len(), 2);
    assert_eq!(scenarios[0].id.as_str(), "checkout");
    assert_eq!(scenarios[1].id.as_str(), "second");
    assert!(scenarios[0].stop_when.any_action_fails);
    assert_eq!(scenarios[0].max_steps, 20);
    let variation = scenarios[0].variation.as_ref().unwrap();
    assert!(variation.parameters.contains_key("locale"));
    assert!(variation.timing.as_ref().unwrap().jitter_ms.is_some());
}

#[test]
fn loads_scenario_from_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("scenario.json");
    fs::write(
        &path,
        serde_json::json!({
            "id": "json-flow",
            "flow": [
                {"type": "assert", "name": "noop", "expect": {"status_code": 200}}
            ]
        })
        .to_string(),
    )
    .unwrap();

    let scenarios = load_scenarios(&path).unwrap();
    assert_eq!(scenarios[0].id.as_str(), "json-flow");
}

#[test]
fn unknown_keys_fail_closed() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sut.yaml");
    fs::write(&path, format!("{SUT_YAML}\nsurprise: true\n")).unwrap();
    assert!(matches!(load_sut(&path), Err(ConfigError::Parse { .. })));
}

#[test]
fn invalid_sut_fails_validation() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sut.yaml");
    fs::write(&path, "name: shop\nservices: {}\n").unwrap();
    assert!(matches!(load_sut(&path), Err(ConfigError::InvalidSut(_))));
}

#[test]
fn unrecognized_extension_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sut.toml");
    fs::write(&path, "name = 'shop'").unwrap();
    assert!(matches!(load_sut(&path), Err(ConfigError::UnknownFormat { .. })));
}

#[test]
fn empty_scenario_directories_are_rejected() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(load_scenarios(dir.path()), Err(ConfigError::Empty { .. })));
}
