// system-tests/src/lib.rs
// ============================================================================
// Module: System Test Support
// Description: Workspace member hosting the end-to-end suites.
// Purpose: Keep the e2e suites separate from the engine crates.
// Dependencies: test-only helpers under tests/
// ============================================================================

//! ## Overview
//! All content lives in the `tests/` directory: an in-process stub SUT and
//! the end-to-end suites driving the engine against it. This library target
//! exists so the member participates in the workspace build.
