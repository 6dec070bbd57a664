// windtunnel-core/src/runtime/mod.rs
// ============================================================================
// Module: Windtunnel Runtime
// Description: Scenario execution, scheduling, turbulence, and summaries.
// Purpose: Group the engine modules that drive instances end to end.
// Dependencies: crate::runtime submodules
// ============================================================================

//! ## Overview
//! The runtime owns everything between a validated configuration and a
//! finalized run: the per-instance scenario runner, the action runners it
//! dispatches to, the turbulence decorator around HTTP calls, the bounded
//! parallel scheduler, replay, and summary aggregation.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod assertion;
pub mod conditions;
pub mod http;
pub mod replay;
pub mod runner;
pub mod scheduler;
pub mod summary;
pub mod turbulence;
pub mod variation;
pub mod wait;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use replay::ReplayError;
pub use replay::replay_instance;
pub use runner::InstanceOutcome;
pub use runner::InstanceSpec;
pub use runner::ScenarioRunner;
pub use runner::StepSample;
pub use scheduler::InstanceScheduler;
pub use scheduler::RunOptions;
pub use scheduler::SchedulerError;
pub use scheduler::derive_correlation_id;
pub use scheduler::derive_seed_prefix;
pub use summary::LatencyStats;
pub use summary::RunSummary;
pub use summary::RunTotals;
pub use turbulence::TurbulenceEngine;
pub use variation::VariationEngine;
