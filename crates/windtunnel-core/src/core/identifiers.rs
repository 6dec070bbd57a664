// windtunnel-core/src/core/identifiers.rs
// ============================================================================
// Module: Windtunnel Identifiers
// Description: Canonical opaque identifiers for runs, instances, and steps.
// Purpose: Provide strongly typed, serializable IDs with stable string forms.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! This module defines the canonical string-based identifiers used throughout
//! windtunnel. Identifiers are opaque and serialize as strings. Validation is
//! handled at scenario or runtime boundaries rather than within these simple
//! wrappers.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Identifier Types
// ============================================================================

/// Declares one string-newtype identifier with its standard conversions.
macro_rules! identifier {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }
    };
}

identifier! {
    /// Run identifier covering one scheduler execution.
    RunId
}

identifier! {
    /// Instance identifier unique within a run.
    InstanceId
}

identifier! {
    /// Correlation identifier attached to every outbound request of an
    /// instance.
    CorrelationId
}

identifier! {
    /// Scenario identifier for a scenario definition.
    ScenarioId
}

identifier! {
    /// Service name referencing an entry in the SUT configuration.
    ServiceName
}

identifier! {
    /// Step name unique within one scenario flow.
    StepName
}

impl InstanceId {
    /// Creates the canonical identifier for an instance index.
    #[must_use]
    pub fn from_index(index: u64) -> Self {
        Self(format!("inst_{index:06}"))
    }
}
