// windtunnel-core/src/runtime/http.rs
// ============================================================================
// Module: HTTP Action Runner
// Description: Rendered request execution with retries and extraction.
// Purpose: Issue one HTTP step through the transport and observe the result.
// Dependencies: crate::{core, interfaces}, tokio
// ============================================================================

//! ## Overview
//! The HTTP runner prepares a fully-rendered request once (method, URL,
//! merged headers, query, body), then executes it under the step's retry
//! policy. Every attempt is recorded; the observation's outer fields reflect
//! the last attempt. Declared extractions run against the decoded body of a
//! successful response; any extraction miss fails the step and withholds the
//! whole context delta.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::Duration;
use std::time::Instant;

use serde_json::Value;
use serde_json::json;
use tokio::time::sleep;

use crate::core::context::Context;
use crate::core::context::ContextDelta;
use crate::core::extract::extract_path;
use crate::core::identifiers::ServiceName;
use crate::core::identifiers::StepName;
use crate::core::observation::AttemptRecord;
use crate::core::observation::ErrorKind;
use crate::core::observation::Observation;
use crate::core::observation::ObservationError;
use crate::core::scenario::HttpStep;
use crate::core::scenario::RetrySpec;
use crate::core::sut::SutConfig;
use crate::core::template::TemplateError;
use crate::core::template::render_str;
use crate::core::template::render_value;
use crate::interfaces::HttpTransport;
use crate::interfaces::TransportErrorKind;
use crate::interfaces::TransportRequest;
use crate::interfaces::TransportResponse;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Bodies above this serialized size are spilled to the artifacts directory.
pub const INLINE_BODY_LIMIT: usize = 16 * 1024;

// ============================================================================
// SECTION: Prepared Call
// ============================================================================

/// One HTTP step with every template already rendered.
#[derive(Debug, Clone)]
pub struct PreparedHttpCall {
    /// Step name, for attempt diagnostics.
    pub step_name: StepName,
    /// Target service name.
    pub service: ServiceName,
    /// Request handed to the transport on every attempt.
    pub request: TransportRequest,
    /// Extractions applied to the decoded response body.
    pub extract: BTreeMap<String, String>,
    /// Optional retry policy.
    pub retry: Option<RetrySpec>,
}

impl PreparedHttpCall {
    /// Renders the step against the context and resolves the service.
    ///
    /// # Errors
    ///
    /// Returns a structured [`ObservationError`] when rendering fails or the
    /// service is unknown; the caller turns it into a failed observation.
    pub fn prepare(
        step: &HttpStep,
        ctx: &Context,
        sut: &SutConfig,
        instance_headers: &BTreeMap<String, String>,
        forced_timeout_ms: Option<u64>,
    ) -> Result<Self, ObservationError> {
        let service = sut
            .service(&step.service)
            .map_err(|_| ObservationError::with_detail(
                ErrorKind::MissingService,
                format!("service {} is not declared", step.service),
            ))?;

        let path = render_text(&step.path, ctx)?;
        let url = join_url(&service.base_url, &path);

        // Merge order: SUT default (with correlation) -> service -> step.
        let mut headers = BTreeMap::new();
        for source in [instance_headers, &service.headers, &step.headers] {
            for (key, value) in source {
                headers.insert(key.clone(), render_text(value, ctx)?);
            }
        }

        let mut query = BTreeMap::new();
        for (key, value) in &step.query {
            query.insert(key.clone(), render_text(value, ctx)?);
        }

        let json_body = match &step.body {
            Some(body) => Some(render_value(body, ctx).map_err(template_error)?),
            None => None,
        };
        let form_body = match &step.form {
            Some(form) => {
                let mut rendered = BTreeMap::new();
                for (key, value) in form {
                    rendered.insert(key.clone(), render_text(value, ctx)?);
                }
                Some(rendered)
            }
            None => None,
        };

        let natural = service.timeout();
        let deadline = match forced_timeout_ms {
            Some(forced) => natural.min(Duration::from_millis(forced)),
            None => natural,
        };

        Ok(Self {
            step_name: step.name.clone(),
            service: step.service.clone(),
            request: TransportRequest {
                method: step.method.to_ascii_uppercase(),
                url,
                headers,
                query,
                json_body,
                form_body,
                deadline,
            },
            extract: step.extract.clone(),
            retry: step.retry.clone(),
        })
    }

    /// Executes the call under the retry policy and applies extractions.
    pub async fn execute(&self, transport: &dyn HttpTransport) -> (Observation, ContextDelta) {
        let total_start = Instant::now();
        let max_attempts = self.retry.as_ref().map_or(1, |retry| retry.attempts.max(1));

        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut last_response: Option<TransportResponse> = None;
        let mut last_error: Option<ObservationError> = None;

        for attempt in 1 ..= max_attempts {
            let attempt_start = Instant::now();
            match transport.send(&self.request).await {
                Ok(response) => {
                    let latency_ms = elapsed_ms(attempt_start);
                    let ok = response.status < 400;
                    attempts.push(AttemptRecord {
                        attempt,
                        ok,
                        latency_ms,
                        status_code: Some(response.status),
                        offset_ms: None,
                        condition_met: None,
                        error: (!ok).then(|| format!("HTTP {}", response.status)),
                    });
                    let status = response.status;
                    last_response = Some(response);
                    last_error = None;

                    let retry_on_status = self
                        .retry
                        .as_ref()
                        .is_some_and(|retry| retry.on_status.contains(&status));
                    if retry_on_status && attempt < max_attempts {
                        self.sleep_backoff(attempt).await;
                        continue;
                    }
                    break;
                }
                Err(err) => {
                    let latency_ms = elapsed_ms(attempt_start);
                    attempts.push(AttemptRecord {
                        attempt,
                        ok: false,
                        latency_ms,
                        status_code: None,
                        offset_ms: None,
                        condition_met: None,
                        error: Some(err.to_string()),
                    });
                    let retryable = self.retry.as_ref().is_some_and(|retry| match err.kind {
                        TransportErrorKind::Timeout => retry.on_timeout,
                        TransportErrorKind::Dns | TransportErrorKind::Connect => {
                            retry.on_connection_error
                        }
                        TransportErrorKind::Tls | TransportErrorKind::Transport => false,
                    });
                    last_response = None;
                    last_error = Some(ObservationError::with_detail(
                        err.kind.error_kind(),
                        err.detail.clone(),
                    ));
                    if retryable && attempt < max_attempts {
                        self.sleep_backoff(attempt).await;
                        continue;
                    }
                    break;
                }
            }
        }

        let latency_ms = elapsed_ms(total_start);
        match last_response {
            Some(response) => self.observe_response(response, latency_ms, attempts),
            None => {
                let error =
                    last_error.unwrap_or_else(|| ObservationError::new(ErrorKind::Internal));
                let mut observation = Observation::failed(latency_ms, error);
                observation.attempts = attempts;
                (observation, ContextDelta::new())
            }
        }
    }

    /// Builds the observation and context delta from the final response.
    fn observe_response(
        &self,
        response: TransportResponse,
        latency_ms: f64,
        attempts: Vec<AttemptRecord>,
    ) -> (Observation, ContextDelta) {
        let mut errors = Vec::new();
        let (body, decode_error) = decode_body(&response);
        if let Some(error) = decode_error {
            errors.push(error);
        }

        let status_ok = response.status < 400;
        if !status_ok {
            errors.push(ObservationError::with_detail(
                ErrorKind::Status,
                format!("HTTP {}", response.status),
            ));
        }

        let mut delta = ContextDelta::new();
        delta.set(
            "last_response",
            json!({
                "status_code": response.status,
                "headers": response.headers.clone(),
                "body": body.clone(),
            }),
        );

        if status_ok && errors.is_empty() {
            for (name, path) in &self.extract {
                match extract_path(&body, path) {
                    Ok(value) => delta.set(name.clone(), value),
                    Err(_) => {
                        errors.push(ObservationError::with_path(
                            ErrorKind::ExtractionMissingPath,
                            path.clone(),
                        ));
                    }
                }
            }
        }

        let extraction_failed =
            errors.iter().any(|error| error.kind == ErrorKind::ExtractionMissingPath);
        if extraction_failed {
            delta = ContextDelta::new();
        }

        let observation = Observation {
            ok: status_ok && errors.is_empty(),
            latency_ms,
            status_code: Some(response.status),
            headers: Some(response.headers),
            body: Some(body),
            errors,
            turbulence: None,
            attempts,
        };
        (observation, delta)
    }

    /// Sleeps the configured backoff after a failed attempt.
    async fn sleep_backoff(&self, attempt: u32) {
        if let Some(retry) = &self.retry {
            let delay = retry.backoff_ms(attempt);
            if delay > 0 {
                sleep(Duration::from_millis(delay)).await;
            }
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Renders a template to text, stringifying typed results.
fn render_text(template: &str, ctx: &Context) -> Result<String, ObservationError> {
    let value = render_str(template, ctx).map_err(template_error)?;
    Ok(match value {
        Value::String(text) => text,
        Value::Number(number) => number.to_string(),
        Value::Bool(flag) => flag.to_string(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    })
}

/// Maps a template error into a structured observation error.
fn template_error(err: TemplateError) -> ObservationError {
    match err {
        TemplateError::MissingKey {
            key,
        } => ObservationError::with_path(ErrorKind::TemplateMissingKey, key),
        TemplateError::Parse {
            template,
        } => ObservationError::with_detail(ErrorKind::TemplateParse, template),
    }
}

/// Joins a base URL and a path without doubling the separator.
fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.is_empty() {
        return base.to_string();
    }
    if path.starts_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

/// Decodes the response body, falling back to raw text.
///
/// A decode error is raised only when the response declared a JSON content
/// type but the bytes do not parse.
fn decode_body(response: &TransportResponse) -> (Value, Option<ObservationError>) {
    match serde_json::from_slice::<Value>(&response.body) {
        Ok(value) => (value, None),
        Err(err) => {
            let text = String::from_utf8_lossy(&response.body).to_string();
            let declared_json = response
                .headers
                .iter()
                .any(|(key, value)| {
                    key.eq_ignore_ascii_case("content-type") && value.contains("json")
                });
            let error = declared_json.then(|| {
                ObservationError::with_detail(ErrorKind::BodyDecode, err.to_string())
            });
            (Value::String(text), error)
        }
    }
}

/// Milliseconds elapsed since an instant.
fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1_000.0
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only panic-based assertions are permitted.")]

    use super::*;

    #[test]
    fn join_url_handles_separators() {
        assert_eq!(join_url("http://h:1/", "/a"), "http://h:1/a");
        assert_eq!(join_url("http://h:1", "a"), "http://h:1/a");
        assert_eq!(join_url("http://h:1", ""), "http://h:1");
    }

    #[test]
    fn decode_body_flags_declared_json_only() {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        let response = TransportResponse {
            status: 200,
            headers,
            body: b"not json".to_vec(),
        };
        let (body, error) = decode_body(&response);
        assert_eq!(body, Value::String("not json".to_string()));
        assert!(error.is_some());

        let response = TransportResponse {
            status: 200,
            headers: BTreeMap::new(),
            body: b"plain text".to_vec(),
        };
        let (_, error) = decode_body(&response);
        assert!(error.is_none());
    }
}
