// windtunnel-http/src/client.rs
// ============================================================================
// Module: Reqwest Transport
// Description: Shared-client transport with per-request deadlines.
// Purpose: Map reqwest successes and failures into core transport types.
// Dependencies: windtunnel-core, reqwest, url
// ============================================================================

//! ## Overview
//! One [`ReqwestTransport`] serves every instance of a run; reqwest pools
//! connections internally. Each send applies the request's own deadline,
//! captures status, headers, and raw body bytes up to a size cap, and maps
//! failures into the classified transport error the runners expect.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::error::Error as _;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::Method;
use reqwest::redirect::Policy;
use url::Url;
use windtunnel_core::interfaces::HttpTransport;
use windtunnel_core::interfaces::TransportError;
use windtunnel_core::interfaces::TransportErrorKind;
use windtunnel_core::interfaces::TransportRequest;
use windtunnel_core::interfaces::TransportResponse;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Configuration for the reqwest transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Maximum response size accepted, in bytes.
    pub max_response_bytes: usize,
    /// User agent for outbound requests.
    pub user_agent: String,
    /// Follow redirects (disabled by default; the SUT's responses are the
    /// artifact, not where they point).
    pub follow_redirects: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_response_bytes: 8 * 1024 * 1024,
            user_agent: "windtunnel/0.1".to_string(),
            follow_redirects: false,
        }
    }
}

// ============================================================================
// SECTION: Transport
// ============================================================================

/// Shared reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    /// Pooled client shared across instances.
    client: Client,
    /// Transport limits.
    config: TransportConfig,
}

impl ReqwestTransport {
    /// Creates a transport with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the client cannot be constructed.
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let redirect = if config.follow_redirects {
            Policy::limited(4)
        } else {
            Policy::none()
        };
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(redirect)
            .build()
            .map_err(|err| TransportError {
                kind: TransportErrorKind::Transport,
                detail: format!("client build failed: {err}"),
            })?;
        Ok(Self {
            client,
            config,
        })
    }

    /// Creates a transport with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the client cannot be constructed.
    pub fn with_defaults() -> Result<Self, TransportError> {
        Self::new(TransportConfig::default())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError> {
        let method = Method::from_str(&request.method).map_err(|_| TransportError {
            kind: TransportErrorKind::Transport,
            detail: format!("invalid method: {}", request.method),
        })?;
        let url = Url::parse(&request.url).map_err(|err| TransportError {
            kind: TransportErrorKind::Transport,
            detail: format!("invalid url {}: {err}", request.url),
        })?;

        let mut builder = self
            .client
            .request(method, url)
            .timeout(nonzero_deadline(request.deadline));
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if !request.query.is_empty() {
            let pairs: Vec<(&String, &String)> = request.query.iter().collect();
            builder = builder.query(&pairs);
        }
        if let Some(body) = &request.json_body {
            builder = builder.json(body);
        }
        if let Some(form) = &request.form_body {
            builder = builder.form(form);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let mut headers = BTreeMap::new();
        for (key, value) in response.headers() {
            if let Ok(text) = value.to_str() {
                headers.insert(key.as_str().to_string(), text.to_string());
            }
        }

        let body = response.bytes().await.map_err(classify)?;
        if body.len() > self.config.max_response_bytes {
            return Err(TransportError {
                kind: TransportErrorKind::Transport,
                detail: format!(
                    "response exceeds size limit ({} > {} bytes)",
                    body.len(),
                    self.config.max_response_bytes
                ),
            });
        }

        Ok(TransportResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }
}

// ============================================================================
// SECTION: Classification
// ============================================================================

/// Maps a reqwest error into the transport taxonomy.
fn classify(err: reqwest::Error) -> TransportError {
    let detail = err.to_string();
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if chain_mentions(&err, &["dns error", "failed to lookup address"]) {
        TransportErrorKind::Dns
    } else if chain_mentions(&err, &["certificate", "handshake", "tls"]) {
        TransportErrorKind::Tls
    } else if err.is_connect() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Transport
    };
    TransportError {
        kind,
        detail,
    }
}

/// Scans the error source chain for any of the given fragments.
fn chain_mentions(err: &reqwest::Error, fragments: &[&str]) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = err.source();
    while let Some(current) = source {
        let text = current.to_string().to_ascii_lowercase();
        if fragments.iter().any(|fragment| text.contains(fragment)) {
            return true;
        }
        source = current.source();
    }
    false
}

/// Clamps a deadline away from zero; reqwest treats zero as immediate.
fn nonzero_deadline(deadline: Duration) -> Duration {
    deadline.max(Duration::from_millis(1))
}
