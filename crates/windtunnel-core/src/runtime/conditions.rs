// windtunnel-core/src/runtime/conditions.rs
// ============================================================================
// Module: Condition Evaluation
// Description: Expectation checks and branch condition evaluation.
// Purpose: Decide expectations against responses, context, and expressions.
// Dependencies: crate::core::{context, extract, sandbox, scenario, template}
// ============================================================================

//! ## Overview
//! Wait, assert, and branch steps all decide conditions here. Expectations
//! evaluate every declared clause in a fixed order (status code, jsonpath,
//! context path, expression, schema) and hold only when all clauses hold.
//! Branch conditions evaluate in two phases: template markers render first
//! (string values render as quoted literals so the result stays a valid
//! expression), then the sandbox evaluates the rendered text.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;

use crate::core::context::Context;
use crate::core::extract::extract_path;
use crate::core::observation::AssertionResult;
use crate::core::observation::ErrorKind;
use crate::core::sandbox::DEFAULT_EVAL_TIMEOUT;
use crate::core::sandbox::SandboxEnv;
use crate::core::sandbox::SandboxError;
use crate::core::sandbox::eval_value;
use crate::core::scenario::Expectation;
use crate::core::identifiers::StepName;
use crate::core::template::TemplateError;

// ============================================================================
// SECTION: Expectation Evaluation
// ============================================================================

/// Evaluates an expectation and captures expected/actual renderings.
#[must_use]
pub fn evaluate_expectation(
    name: &StepName,
    expect: &Expectation,
    ctx: &Context,
) -> AssertionResult {
    let last_status = ctx.get_path("last_response.status_code").cloned();
    let last_body = ctx.get_path("last_response.body").cloned().unwrap_or(Value::Null);
    let last_headers = ctx.get_path("last_response.headers").cloned().unwrap_or(Value::Null);

    if let Some(expected_status) = expect.status_code {
        let actual = last_status.as_ref().and_then(Value::as_u64);
        if actual != Some(u64::from(expected_status)) {
            return AssertionResult {
                name: name.clone(),
                passed: false,
                expected: Some(expected_status.to_string()),
                actual: Some(
                    actual.map_or_else(|| "no response".to_string(), |code| code.to_string()),
                ),
                error: None,
            };
        }
    }

    if let Some(path) = &expect.jsonpath {
        match extract_path(&last_body, path) {
            Ok(found) => {
                if let Some(failure) = check_value_clauses(name, expect, &found) {
                    return failure;
                }
            }
            Err(err) => {
                return AssertionResult {
                    name: name.clone(),
                    passed: false,
                    expected: Some(expected_label(expect)),
                    actual: Some(format!("path {path} matched nothing")),
                    error: Some(err.to_string()),
                };
            }
        }
    }

    if let Some(path) = &expect.context_path {
        match ctx.get_path(path) {
            Some(found) => {
                let found = found.clone();
                if let Some(failure) = check_value_clauses(name, expect, &found) {
                    return failure;
                }
            }
            None => {
                return AssertionResult {
                    name: name.clone(),
                    passed: false,
                    expected: Some(expected_label(expect)),
                    actual: Some(format!("context path {path} is unset")),
                    error: None,
                };
            }
        }
    }

    if let Some(expression) = &expect.expression {
        let env = SandboxEnv {
            body: last_body.clone(),
            headers: last_headers,
            context: ctx.to_value(),
        };
        match eval_value(expression, &env, DEFAULT_EVAL_TIMEOUT) {
            Ok(value) => {
                if !value_truthy(&value) {
                    return AssertionResult {
                        name: name.clone(),
                        passed: false,
                        expected: Some(format!("{expression} to hold")),
                        actual: Some(render_value_short(&value)),
                        error: None,
                    };
                }
            }
            Err(err) => {
                return AssertionResult {
                    name: name.clone(),
                    passed: false,
                    expected: Some(format!("{expression} to hold")),
                    actual: None,
                    error: Some(err.to_string()),
                };
            }
        }
    }

    if let Some(schema) = &expect.schema {
        if let Some(failure) = check_schema(name, schema, &last_body) {
            return failure;
        }
    }

    AssertionResult {
        name: name.clone(),
        passed: true,
        expected: Some(expected_label(expect)),
        actual: None,
        error: None,
    }
}

/// Checks equals/contains clauses against a selected value.
fn check_value_clauses(
    name: &StepName,
    expect: &Expectation,
    found: &Value,
) -> Option<AssertionResult> {
    if let Some(expected) = &expect.equals {
        if !loose_equal(found, expected) {
            return Some(AssertionResult {
                name: name.clone(),
                passed: false,
                expected: Some(render_value_short(expected)),
                actual: Some(render_value_short(found)),
                error: None,
            });
        }
    }
    if let Some(needle) = &expect.contains {
        if !loose_contains(found, needle) {
            return Some(AssertionResult {
                name: name.clone(),
                passed: false,
                expected: Some(format!("contains {}", render_value_short(needle))),
                actual: Some(render_value_short(found)),
                error: None,
            });
        }
    }
    None
}

/// Validates a body against an inline JSON Schema.
fn check_schema(name: &StepName, schema: &Value, body: &Value) -> Option<AssertionResult> {
    match compile_schema(schema) {
        Ok(validator) => {
            let mut failures =
                validator.iter_errors(body).map(|err| err.to_string()).collect::<Vec<_>>();
            if failures.is_empty() {
                None
            } else {
                Some(AssertionResult {
                    name: name.clone(),
                    passed: false,
                    expected: Some("body matching schema".to_string()),
                    actual: Some(failures.remove(0)),
                    error: None,
                })
            }
        }
        Err(err) => Some(AssertionResult {
            name: name.clone(),
            passed: false,
            expected: Some("body matching schema".to_string()),
            actual: None,
            error: Some(format!("schema compile failed: {err}")),
        }),
    }
}

/// Compiles an inline schema under the 2020-12 draft.
fn compile_schema(schema: &Value) -> Result<jsonschema::Validator, String> {
    jsonschema::options()
        .with_draft(jsonschema::Draft::Draft202012)
        .build(schema)
        .map_err(|err| err.to_string())
}

/// Returns a short description of what the expectation requires.
fn expected_label(expect: &Expectation) -> String {
    if let Some(status) = expect.status_code {
        return status.to_string();
    }
    if let Some(value) = &expect.equals {
        return render_value_short(value);
    }
    if let Some(value) = &expect.contains {
        return format!("contains {}", render_value_short(value));
    }
    if let Some(expression) = &expect.expression {
        return format!("{expression} to hold");
    }
    if expect.schema.is_some() {
        return "body matching schema".to_string();
    }
    if let Some(path) = &expect.jsonpath {
        return format!("{path} to match");
    }
    if let Some(path) = &expect.context_path {
        return format!("{path} to be set");
    }
    "expectation".to_string()
}

/// Non-capturing variant used by the wait poll loop.
///
/// Polls hand over the latest response explicitly; a probe context carrying
/// it as `last_response` reuses the capturing evaluation above.
#[must_use]
pub fn expectation_holds(
    expect: &Expectation,
    status: Option<u16>,
    body: &Value,
    ctx: &Context,
) -> bool {
    let mut probe = ctx.clone();
    probe.insert(
        "last_response",
        serde_json::json!({
            "status_code": status,
            "headers": Value::Null,
            "body": body,
        }),
    );
    evaluate_expectation(&StepName::new("poll"), expect, &probe).passed
}

// ============================================================================
// SECTION: Branch Conditions
// ============================================================================

/// Failure modes of branch condition evaluation.
#[derive(Debug, Clone)]
pub struct ConditionError {
    /// Taxonomy kind of the failure.
    pub kind: ErrorKind,
    /// Failure description.
    pub detail: String,
}

/// Evaluates a branch condition in two phases.
///
/// Phase one renders `{{ }}` markers; string substitutions render as quoted
/// literals so the rendered text stays a parseable expression. Phase two
/// short-circuits bare boolean renderings and otherwise hands the text to
/// the sandbox.
///
/// # Errors
///
/// Returns [`ConditionError`] carrying a template or sandbox error kind.
pub fn evaluate_condition(condition: &str, ctx: &Context) -> Result<(bool, String), ConditionError> {
    let rendered = render_condition(condition, ctx).map_err(|err| ConditionError {
        kind: match err {
            TemplateError::MissingKey {
                ..
            } => ErrorKind::TemplateMissingKey,
            TemplateError::Parse {
                ..
            } => ErrorKind::TemplateParse,
        },
        detail: err.to_string(),
    })?;

    let trimmed = rendered.trim().to_ascii_lowercase();
    if trimmed == "true" || trimmed == "1" {
        return Ok((true, rendered));
    }
    if trimmed == "false" || trimmed == "0" || trimmed.is_empty() {
        return Ok((false, rendered));
    }

    let env = SandboxEnv {
        body: ctx.get_path("last_response.body").cloned().unwrap_or(Value::Null),
        headers: ctx.get_path("last_response.headers").cloned().unwrap_or(Value::Null),
        context: ctx.to_value(),
    };
    match eval_value(&rendered, &env, DEFAULT_EVAL_TIMEOUT) {
        Ok(value) => Ok((value_truthy(&value), rendered)),
        Err(err) => Err(ConditionError {
            kind: match err {
                SandboxError::Timeout => ErrorKind::SandboxTimeout,
                _ => ErrorKind::SandboxForbiddenNode,
            },
            detail: err.to_string(),
        }),
    }
}

/// Renders markers inside a condition, quoting string substitutions.
fn render_condition(condition: &str, ctx: &Context) -> Result<String, TemplateError> {
    let mut output = String::with_capacity(condition.len());
    let mut rest = condition;
    while let Some(open) = rest.find("{{") {
        output.push_str(&rest[.. open]);
        let after_open = &rest[open + 2 ..];
        let Some(close) = after_open.find("}}") else {
            return Err(TemplateError::Parse {
                template: condition.to_string(),
            });
        };
        let path = after_open[.. close].trim();
        if path.is_empty() {
            return Err(TemplateError::Parse {
                template: condition.to_string(),
            });
        }
        let value = ctx.get_path(path).ok_or_else(|| TemplateError::MissingKey {
            key: path.to_string(),
        })?;
        output.push_str(&expression_literal(value));
        rest = &after_open[close + 2 ..];
    }
    output.push_str(rest);
    Ok(output)
}

/// Renders a context value as an expression literal.
fn expression_literal(value: &Value) -> String {
    match value {
        Value::String(text) => format!("'{}'", text.replace('\\', "\\\\").replace('\'', "\\'")),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

// ============================================================================
// SECTION: Value Helpers
// ============================================================================

/// Loose equality with numeric coercion.
#[must_use]
pub fn loose_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            a.as_f64().zip(b.as_f64()).is_some_and(|(x, y)| x == y)
        }
        _ => left == right,
    }
}

/// Containment: list element, substring, or object value.
#[must_use]
pub fn loose_contains(value: &Value, needle: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().any(|item| loose_equal(item, needle)),
        Value::String(text) => match needle {
            Value::String(fragment) => text.contains(fragment.as_str()),
            other => text.contains(&render_value_short(other)),
        },
        Value::Object(map) => map.values().any(|item| loose_equal(item, needle)),
        _ => false,
    }
}

/// Loose truthiness shared with the sandbox.
fn value_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Renders a value for expected/actual capture.
#[must_use]
pub fn render_value_short(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
