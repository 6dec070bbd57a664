// windtunnel-core/src/core/sut.rs
// ============================================================================
// Module: System Under Test Configuration
// Description: Named HTTP services with base URLs, headers, and timeouts.
// Purpose: Define the SUT shape with load-time validation helpers.
// Dependencies: crate::core::identifiers, serde
// ============================================================================

//! ## Overview
//! A SUT configuration names the HTTP services a scenario may call. Header
//! values are templates and are rendered per instance; service lookups are
//! validated when scenarios are bound to a SUT so missing references fail
//! before any instance is dispatched.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::core::identifiers::ServiceName;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default per-request timeout when a service declares none.
pub const DEFAULT_SERVICE_TIMEOUT_SECONDS: f64 = 30.0;

// ============================================================================
// SECTION: Configuration Types
// ============================================================================

/// Configuration for one HTTP service of the system under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Base URL prefixed to every request path.
    pub base_url: String,
    /// Optional request timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<f64>,
    /// Service-specific header overrides (values are templates).
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl ServiceConfig {
    /// Returns the effective request timeout for this service.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_seconds.unwrap_or(DEFAULT_SERVICE_TIMEOUT_SECONDS))
    }
}

/// System under test configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SutConfig {
    /// Human-readable SUT name recorded in the run manifest.
    pub name: String,
    /// Default headers merged into every request (values are templates).
    #[serde(default)]
    pub default_headers: BTreeMap<String, String>,
    /// Named services keyed by the name scenarios reference.
    pub services: BTreeMap<ServiceName, ServiceConfig>,
}

impl SutConfig {
    /// Looks up a service by name.
    ///
    /// # Errors
    ///
    /// Returns [`SutError::MissingService`] when the service is not declared.
    pub fn service(&self, name: &ServiceName) -> Result<&ServiceConfig, SutError> {
        self.services.get(name).ok_or_else(|| SutError::MissingService {
            service: name.clone(),
        })
    }

    /// Validates the SUT configuration invariants.
    ///
    /// # Errors
    ///
    /// Returns [`SutError`] when the configuration is structurally invalid.
    pub fn validate(&self) -> Result<(), SutError> {
        if self.name.trim().is_empty() {
            return Err(SutError::EmptyName);
        }
        if self.services.is_empty() {
            return Err(SutError::NoServices);
        }
        for (name, service) in &self.services {
            if service.base_url.trim().is_empty() {
                return Err(SutError::InvalidBaseUrl {
                    service: name.clone(),
                    reason: "base_url is empty".to_string(),
                });
            }
            if !service.base_url.starts_with("http://") && !service.base_url.starts_with("https://")
            {
                return Err(SutError::InvalidBaseUrl {
                    service: name.clone(),
                    reason: "base_url must start with http:// or https://".to_string(),
                });
            }
            if let Some(timeout) = service.timeout_seconds {
                if !timeout.is_finite() || timeout <= 0.0 {
                    return Err(SutError::InvalidTimeout {
                        service: name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while validating or querying a SUT configuration.
#[derive(Debug, Error)]
pub enum SutError {
    /// SUT name is empty.
    #[error("sut name must not be empty")]
    EmptyName,
    /// SUT declares no services.
    #[error("sut must declare at least one service")]
    NoServices,
    /// Scenario referenced a service the SUT does not declare.
    #[error("service not declared by sut: {service}")]
    MissingService {
        /// Referenced service name.
        service: ServiceName,
    },
    /// Service base URL failed validation.
    #[error("invalid base_url for service {service}: {reason}")]
    InvalidBaseUrl {
        /// Offending service name.
        service: ServiceName,
        /// Validation failure description.
        reason: String,
    },
    /// Service timeout is not a positive finite number.
    #[error("invalid timeout_seconds for service {service}")]
    InvalidTimeout {
        /// Offending service name.
        service: ServiceName,
    },
}
