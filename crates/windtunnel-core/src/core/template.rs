// windtunnel-core/src/core/template.rs
// ============================================================================
// Module: Template Engine
// Description: Marker substitution for paths, headers, queries, and bodies.
// Purpose: Render `{{ path }}` markers against an instance context.
// Dependencies: crate::core::context, serde_json
// ============================================================================

//! ## Overview
//! Templates recognize `{{ path }}` markers where `path` is a dotted lookup
//! into the instance context. A string that is exactly one marker renders to
//! the referenced value with its type preserved (numbers stay numbers, lists
//! stay lists); markers embedded in longer strings substitute the stringified
//! value. Rendering recurses depth-first and left-to-right through maps and
//! lists and never has side effects.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Map;
use serde_json::Value;
use thiserror::Error;

use crate::core::context::Context;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while rendering a template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// A marker referenced a key missing from the context.
    #[error("template references missing key: {key}")]
    MissingKey {
        /// Dotted path that failed to resolve.
        key: String,
    },
    /// A marker was malformed (unclosed or empty).
    #[error("malformed template marker in: {template}")]
    Parse {
        /// Offending template string.
        template: String,
    },
}

// ============================================================================
// SECTION: Rendering
// ============================================================================

/// Renders one template string, preserving the type of single-marker forms.
///
/// # Errors
///
/// Returns [`TemplateError::MissingKey`] for unresolvable paths and
/// [`TemplateError::Parse`] for malformed markers.
pub fn render_str(template: &str, ctx: &Context) -> Result<Value, TemplateError> {
    let trimmed = template.trim();
    if let Some(path) = single_marker_path(trimmed) {
        return resolve(path, ctx).cloned();
    }

    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        output.push_str(&rest[.. open]);
        let after_open = &rest[open + 2 ..];
        let Some(close) = after_open.find("}}") else {
            return Err(TemplateError::Parse {
                template: template.to_string(),
            });
        };
        let path = after_open[.. close].trim();
        if path.is_empty() {
            return Err(TemplateError::Parse {
                template: template.to_string(),
            });
        }
        output.push_str(&stringify(resolve(path, ctx)?));
        rest = &after_open[close + 2 ..];
    }
    output.push_str(rest);
    Ok(Value::String(output))
}

/// Renders a value recursively, handling strings, maps, and lists.
///
/// # Errors
///
/// Propagates the first [`TemplateError`] hit during the depth-first walk.
pub fn render_value(value: &Value, ctx: &Context) -> Result<Value, TemplateError> {
    match value {
        Value::String(template) => render_str(template, ctx),
        Value::Object(map) => {
            let mut rendered = Map::with_capacity(map.len());
            for (key, item) in map {
                rendered.insert(key.clone(), render_value(item, ctx)?);
            }
            Ok(Value::Object(rendered))
        }
        Value::Array(items) => {
            let mut rendered = Vec::with_capacity(items.len());
            for item in items {
                rendered.push(render_value(item, ctx)?);
            }
            Ok(Value::Array(rendered))
        }
        other => Ok(other.clone()),
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the inner path when the string is exactly one marker.
fn single_marker_path(trimmed: &str) -> Option<&str> {
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    let path = inner.trim();
    let well_formed = !path.is_empty()
        && path.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    well_formed.then_some(path)
}

/// Resolves a dotted path against the context.
fn resolve<'a>(path: &str, ctx: &'a Context) -> Result<&'a Value, TemplateError> {
    ctx.get_path(path).ok_or_else(|| TemplateError::MissingKey {
        key: path.to_string(),
    })
}

/// Stringifies a substituted value for embedding in a larger string.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
