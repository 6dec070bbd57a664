// windtunnel-core/src/core/mod.rs
// ============================================================================
// Module: Windtunnel Core Data Model
// Description: Canonical types shared by the runtime, stores, and drivers.
// Purpose: Group identifier, configuration, context, and record modules.
// Dependencies: crate::core submodules
// ============================================================================

//! ## Overview
//! The core data model covers everything the engine persists or renders:
//! identifiers, SUT and scenario configuration, per-instance context, step
//! observations, and the JSONL record envelopes. Pure evaluation helpers
//! (templating, extraction, sandboxed expressions) live here as well because
//! they have no runtime dependencies.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod context;
pub mod extract;
pub mod identifiers;
pub mod observation;
pub mod records;
pub mod sandbox;
pub mod scenario;
pub mod sut;
pub mod template;
pub mod turbulence;
pub mod variation;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use context::Context;
pub use context::ContextDelta;
pub use extract::ExtractError;
pub use extract::extract_path;
pub use identifiers::CorrelationId;
pub use identifiers::InstanceId;
pub use identifiers::RunId;
pub use identifiers::ScenarioId;
pub use identifiers::ServiceName;
pub use identifiers::StepName;
pub use observation::AssertionResult;
pub use observation::AttemptRecord;
pub use observation::ErrorKind;
pub use observation::InstanceStatus;
pub use observation::Observation;
pub use observation::ObservationError;
pub use observation::TurbulenceReport;
pub use records::AssertionRecord;
pub use records::InstanceRecord;
pub use records::RunManifest;
pub use records::StepRecord;
pub use records::Stream;
pub use observation::StormAttempt;
pub use sandbox::SandboxEnv;
pub use sandbox::SandboxError;
pub use sandbox::eval_bool;
pub use sandbox::eval_value;
pub use scenario::AssertStep;
pub use scenario::AssertionSpec;
pub use scenario::BranchStep;
pub use scenario::EntryContext;
pub use scenario::Expectation;
pub use scenario::HttpStep;
pub use scenario::RetrySpec;
pub use scenario::RetryStrategy;
pub use scenario::Scenario;
pub use scenario::ScenarioError;
pub use scenario::Step;
pub use scenario::StopWhen;
pub use scenario::WaitStep;
pub use sut::ServiceConfig;
pub use sut::SutConfig;
pub use sut::SutError;
pub use template::TemplateError;
pub use template::render_str;
pub use template::render_value;
pub use turbulence::LatencyRange;
pub use turbulence::TurbulenceConfig;
pub use turbulence::TurbulencePolicy;
pub use variation::ParameterVariation;
pub use variation::TimingSpec;
pub use variation::ToggleVariation;
pub use variation::VariationKind;
pub use variation::VariationSpec;
