// windtunnel-store/src/lib.rs
// ============================================================================
// Module: Windtunnel Artifact Store
// Description: Append-only per-run persistence with live tail reads.
// Purpose: Own on-disk run state behind a single-writer discipline.
// Dependencies: windtunnel-core, tokio, serde_json
// ============================================================================

//! ## Overview
//! One directory per run holds `manifest.json`, three append-only JSONL
//! streams (`instances`, `steps`, `assertions`), spilled raw payloads, and a
//! final `summary.json`. A dedicated writer task owns every file handle;
//! instance workers enqueue records through a bounded channel, which doubles
//! as backpressure. Every line is flushed before its append is acknowledged,
//! so a crashed process leaves a readable prefix. Readers never touch the
//! writer: they tail the files directly by sequence number.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod reader;
mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use reader::EventLine;
pub use reader::RunReader;
pub use reader::StreamCursors;
pub use store::ArtifactStore;
pub use store::RunWriter;
pub use store::StoreError;
pub use store::new_run_id;
