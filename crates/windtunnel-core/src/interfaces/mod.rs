// windtunnel-core/src/interfaces/mod.rs
// ============================================================================
// Module: Windtunnel Core Interfaces
// Description: Seams between the engine and its collaborators.
// Purpose: Define transport and event-sink traits with typed errors.
// Dependencies: crate::core, async-trait, serde_json
// ============================================================================

//! ## Overview
//! The engine never constructs an HTTP client or touches the filesystem
//! directly. It speaks to collaborators through two async seams: an
//! [`HttpTransport`] that issues one request under a deadline and classifies
//! failures, and a [`RunEventSink`] that durably appends event records. An
//! in-memory sink ships here so runner and scheduler tests need no disk.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::core::identifiers::InstanceId;
use crate::core::observation::ErrorKind;
use crate::core::records::AssertionRecord;
use crate::core::records::InstanceRecord;
use crate::core::records::StepRecord;

// ============================================================================
// SECTION: HTTP Transport
// ============================================================================

/// One outbound request handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
    /// HTTP method, upper-cased by the runner.
    pub method: String,
    /// Absolute request URL.
    pub url: String,
    /// Request headers after merge and rendering.
    pub headers: BTreeMap<String, String>,
    /// Query parameters appended to the URL.
    pub query: BTreeMap<String, String>,
    /// Optional JSON body.
    pub json_body: Option<Value>,
    /// Optional form-encoded body; mutually exclusive with `json_body`.
    pub form_body: Option<BTreeMap<String, String>>,
    /// Per-request deadline.
    pub deadline: Duration,
}

/// One response surfaced by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: BTreeMap<String, String>,
    /// Raw response body bytes.
    pub body: Vec<u8>,
}

/// Classified transport failure.
#[derive(Debug, Clone, Error)]
#[error("transport failure ({kind}): {detail}")]
pub struct TransportError {
    /// Failure classification.
    pub kind: TransportErrorKind,
    /// Failure description for diagnostics.
    pub detail: String,
}

/// Transport failure classes mapped into the error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportErrorKind {
    /// DNS resolution failed.
    #[error("dns")]
    Dns,
    /// TCP connection failed.
    #[error("connect")]
    Connect,
    /// TLS handshake failed.
    #[error("tls")]
    Tls,
    /// The request deadline expired.
    #[error("timeout")]
    Timeout,
    /// Any other transport-level failure.
    #[error("transport")]
    Transport,
}

impl TransportErrorKind {
    /// Maps the transport failure into the shared error taxonomy.
    #[must_use]
    pub const fn error_kind(self) -> ErrorKind {
        match self {
            Self::Dns => ErrorKind::Dns,
            Self::Connect => ErrorKind::Connect,
            Self::Tls => ErrorKind::Tls,
            Self::Timeout => ErrorKind::Timeout,
            Self::Transport => ErrorKind::Transport,
        }
    }
}

/// Issues HTTP requests on behalf of action runners.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Sends one request and waits for the response under the deadline.
    async fn send(&self, request: &TransportRequest) -> Result<TransportResponse, TransportError>;
}

// ============================================================================
// SECTION: Event Sink
// ============================================================================

/// Errors raised by event sinks.
#[derive(Debug, Clone, Error)]
pub enum SinkError {
    /// Append failed after bounded retries.
    #[error("event append failed: {0}")]
    Append(String),
    /// Raw payload write failed.
    #[error("payload write failed: {0}")]
    Payload(String),
    /// The sink was already finalized.
    #[error("sink is finalized")]
    Finalized,
}

/// Durable destination for run event records.
///
/// Implementations assign the per-stream monotonic `seq` at append time and
/// return it so callers can name spilled payloads after the step they belong
/// to. Appends must be durable before they return.
#[async_trait]
pub trait RunEventSink: Send + Sync {
    /// Appends one step record; returns its stream sequence number.
    async fn append_step(&self, record: StepRecord) -> Result<u64, SinkError>;

    /// Appends one instance completion record; returns its sequence number.
    async fn append_instance(&self, record: InstanceRecord) -> Result<u64, SinkError>;

    /// Appends one assertion record; returns its sequence number.
    async fn append_assertion(&self, record: AssertionRecord) -> Result<u64, SinkError>;

    /// Writes one raw payload document for an instance.
    async fn write_payload(
        &self,
        instance_id: &InstanceId,
        name: &str,
        payload: &Value,
    ) -> Result<(), SinkError>;
}

// ============================================================================
// SECTION: In-Memory Sink
// ============================================================================

/// Event sink retaining everything in memory, for tests and replay output.
#[derive(Debug, Default, Clone)]
pub struct MemoryEventSink {
    inner: Arc<Mutex<MemorySinkState>>,
}

/// Backing state of the in-memory sink.
#[derive(Debug, Default)]
struct MemorySinkState {
    steps: Vec<StepRecord>,
    instances: Vec<InstanceRecord>,
    assertions: Vec<AssertionRecord>,
    payloads: Vec<(InstanceId, String, Value)>,
}

impl MemoryEventSink {
    /// Creates an empty in-memory sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the appended step records.
    #[must_use]
    pub fn steps(&self) -> Vec<StepRecord> {
        self.inner.lock().map(|state| state.steps.clone()).unwrap_or_default()
    }

    /// Returns a copy of the appended instance records.
    #[must_use]
    pub fn instances(&self) -> Vec<InstanceRecord> {
        self.inner.lock().map(|state| state.instances.clone()).unwrap_or_default()
    }

    /// Returns a copy of the appended assertion records.
    #[must_use]
    pub fn assertions(&self) -> Vec<AssertionRecord> {
        self.inner.lock().map(|state| state.assertions.clone()).unwrap_or_default()
    }

    /// Returns a copy of the written raw payloads.
    #[must_use]
    pub fn payloads(&self) -> Vec<(InstanceId, String, Value)> {
        self.inner.lock().map(|state| state.payloads.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RunEventSink for MemoryEventSink {
    async fn append_step(&self, record: StepRecord) -> Result<u64, SinkError> {
        let mut state =
            self.inner.lock().map_err(|_| SinkError::Append("sink mutex poisoned".to_string()))?;
        state.steps.push(record);
        Ok((state.steps.len() - 1) as u64)
    }

    async fn append_instance(&self, record: InstanceRecord) -> Result<u64, SinkError> {
        let mut state =
            self.inner.lock().map_err(|_| SinkError::Append("sink mutex poisoned".to_string()))?;
        state.instances.push(record);
        Ok((state.instances.len() - 1) as u64)
    }

    async fn append_assertion(&self, record: AssertionRecord) -> Result<u64, SinkError> {
        let mut state =
            self.inner.lock().map_err(|_| SinkError::Append("sink mutex poisoned".to_string()))?;
        state.assertions.push(record);
        Ok((state.assertions.len() - 1) as u64)
    }

    async fn write_payload(
        &self,
        instance_id: &InstanceId,
        name: &str,
        payload: &Value,
    ) -> Result<(), SinkError> {
        let mut state =
            self.inner.lock().map_err(|_| SinkError::Payload("sink mutex poisoned".to_string()))?;
        state.payloads.push((instance_id.clone(), name.to_string(), payload.clone()));
        Ok(())
    }
}
