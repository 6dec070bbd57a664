// windtunnel-core/src/core/extract.rs
// ============================================================================
// Module: Response Extractor
// Description: Path-style queries over structured response bodies.
// Purpose: Pull typed values out of decoded JSON with typed miss errors.
// Dependencies: serde_json
// ============================================================================

//! ## Overview
//! Extraction paths are a small jsonpath subset: an optional `$` root,
//! dotted member access, and `[n]` index access (`$.items[0].id`). The first
//! match wins; a path that matches nothing is a typed [`ExtractError`],
//! never a null value. Slices and filters are not supported.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while extracting from a response body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    /// The path matched nothing in the body.
    #[error("extraction path matched nothing: {path}")]
    MissingPath {
        /// Query path that failed to match.
        path: String,
    },
    /// The path itself is malformed.
    #[error("malformed extraction path: {path} ({reason})")]
    InvalidPath {
        /// Offending query path.
        path: String,
        /// Parse failure description.
        reason: String,
    },
}

// ============================================================================
// SECTION: Path Segments
// ============================================================================

/// One parsed traversal segment.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Object member by key.
    Member(String),
    /// Array element by index.
    Index(usize),
}

/// Parses a path into traversal segments.
fn parse_path(path: &str) -> Result<Vec<Segment>, ExtractError> {
    let invalid = |reason: &str| ExtractError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let body = path.strip_prefix('$').unwrap_or(path);
    let body = body.strip_prefix('.').unwrap_or(body);
    if body.is_empty() {
        return Err(invalid("empty path"));
    }

    let mut segments = Vec::new();
    for part in body.split('.') {
        if part.is_empty() {
            return Err(invalid("empty segment"));
        }
        let mut rest = part;
        let member_end = rest.find('[').unwrap_or(rest.len());
        let member = &rest[.. member_end];
        if !member.is_empty() {
            segments.push(Segment::Member(member.to_string()));
        }
        rest = &rest[member_end ..];
        while let Some(after_open) = rest.strip_prefix('[') {
            let Some(close) = after_open.find(']') else {
                return Err(invalid("unclosed index"));
            };
            let index: usize =
                after_open[.. close].parse().map_err(|_| invalid("non-numeric index"))?;
            segments.push(Segment::Index(index));
            rest = &after_open[close + 1 ..];
        }
        if !rest.is_empty() {
            return Err(invalid("trailing characters after index"));
        }
    }
    Ok(segments)
}

// ============================================================================
// SECTION: Extraction
// ============================================================================

/// Extracts the first value matching `path` from a decoded body.
///
/// # Errors
///
/// Returns [`ExtractError::MissingPath`] when the path matches nothing and
/// [`ExtractError::InvalidPath`] when the path cannot be parsed.
pub fn extract_path(body: &Value, path: &str) -> Result<Value, ExtractError> {
    let segments = parse_path(path)?;
    let mut current = body;
    for segment in &segments {
        current = match (segment, current) {
            (Segment::Member(key), Value::Object(map)) => map.get(key),
            (Segment::Index(index), Value::Array(items)) => items.get(*index),
            _ => None,
        }
        .ok_or_else(|| ExtractError::MissingPath {
            path: path.to_string(),
        })?;
    }
    Ok(current.clone())
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only panic-based assertions are permitted.")]

    use serde_json::json;

    use super::*;

    #[test]
    fn extracts_nested_members_and_indexes() {
        let body = json!({"items": [{"id": 7}, {"id": 9}], "meta": {"total": 2}});
        assert_eq!(extract_path(&body, "$.items[0].id").unwrap(), json!(7));
        assert_eq!(extract_path(&body, "items[1].id").unwrap(), json!(9));
        assert_eq!(extract_path(&body, "$.meta.total").unwrap(), json!(2));
    }

    #[test]
    fn missing_path_is_typed() {
        let body = json!({"a": 1});
        let err = extract_path(&body, "$.b").unwrap_err();
        assert!(matches!(err, ExtractError::MissingPath { .. }));
    }

    #[test]
    fn null_leaf_is_a_match() {
        let body = json!({"a": null});
        assert_eq!(extract_path(&body, "$.a").unwrap(), Value::Null);
    }

    #[test]
    fn malformed_paths_are_rejected() {
        let body = json!({});
        assert!(matches!(
            extract_path(&body, "$.items[x]").unwrap_err(),
            ExtractError::InvalidPath { .. }
        ));
        assert!(matches!(
            extract_path(&body, "$.items[0").unwrap_err(),
            ExtractError::InvalidPath { .. }
        ));
    }
}
