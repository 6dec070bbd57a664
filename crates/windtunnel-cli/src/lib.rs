// windtunnel-cli/src/lib.rs
// ============================================================================
// Module: Windtunnel CLI Library
// Description: Shared helpers for the command-line driver.
// Purpose: Expose the message catalog to the binary and its tests.
// Dependencies: crate::i18n
// ============================================================================

//! ## Overview
//! The CLI routes user-facing strings through a small message catalog via
//! the [`t!`](crate::t) macro, keeping output consistent and ready for
//! future locales.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod i18n;
