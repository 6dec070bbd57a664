// windtunnel-config/src/lib.rs
// ============================================================================
// Module: Windtunnel Configuration Loaders
// Description: Strict, fail-closed loading of SUT and scenario files.
// Purpose: Produce validated configuration values for the core engine.
// Dependencies: windtunnel-core, serde_yaml, serde_json
// ============================================================================

//! ## Overview
//! Loaders read YAML or JSON (selected by extension) under hard size limits,
//! deserialize with unknown keys rejected, and run core validation before
//! returning anything. Missing or invalid configuration fails closed: no
//! partially-valid SUT or scenario ever reaches the scheduler.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use thiserror::Error;
use windtunnel_core::core::scenario::Scenario;
use windtunnel_core::core::scenario::ScenarioError;
use windtunnel_core::core::sut::SutConfig;
use windtunnel_core::core::sut::SutError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum size of a single configuration file.
pub const MAX_CONFIG_FILE_BYTES: usize = 1024 * 1024;

/// Extensions recognized as scenario files in a directory.
const SCENARIO_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File read failed.
    #[error("failed to read {path}: {detail}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Failure description.
        detail: String,
    },
    /// File exceeds the size limit.
    #[error("refusing to read {path}: {size} bytes exceeds limit {limit}")]
    TooLarge {
        /// Offending path.
        path: PathBuf,
        /// Actual size in bytes.
        size: u64,
        /// Allowed limit in bytes.
        limit: usize,
    },
    /// File extension is not a recognized format.
    #[error("unrecognized config format: {path}")]
    UnknownFormat {
        /// Offending path.
        path: PathBuf,
    },
    /// Deserialization failed.
    #[error("failed to parse {path}: {detail}")]
    Parse {
        /// Offending path.
        path: PathBuf,
        /// Parser diagnostic.
        detail: String,
    },
    /// SUT validation failed.
    #[error(transparent)]
    InvalidSut(#[from] SutError),
    /// Scenario validation failed.
    #[error(transparent)]
    InvalidScenario(#[from] ScenarioError),
    /// A scenario directory contained no scenario files.
    #[error("no scenario files found under {path}")]
    Empty {
        /// Searched directory.
        path: PathBuf,
    },
}

// ============================================================================
// SECTION: Loaders
// ============================================================================

/// Loads and validates a SUT configuration file.
///
/// # Errors
///
/// Returns [`ConfigError`] on read, parse, or validation failure.
pub fn load_sut(path: &Path) -> Result<SutConfig, ConfigError> {
    let sut: SutConfig = load_document(path)?;
    sut.validate()?;
    Ok(sut)
}

/// Loads and validates one scenario file.
///
/// # Errors
///
/// Returns [`ConfigError`] on read, parse, or validation failure.
pub fn load_scenario(path: &Path) -> Result<Scenario, ConfigError> {
    let scenario: Scenario = load_document(path)?;
    scenario.validate()?;
    Ok(scenario)
}

/// Loads scenarios from a file or a directory of scenario files.
///
/// Directory entries load in lexicographic order so run manifests are
/// stable across hosts.
///
/// # Errors
///
/// Returns [`ConfigError`] on the first failing file, or
/// [`ConfigError::Empty`] when a directory holds no scenario files.
pub fn load_scenarios(path: &Path) -> Result<Vec<Scenario>, ConfigError> {
    if path.is_file() {
        return Ok(vec![load_scenario(path)?]);
    }

    let entries = fs::read_dir(path).map_err(|err| ConfigError::Io {
        path: path.to_path_buf(),
        detail: err.to_string(),
    })?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|candidate| {
            candidate.is_file()
                && candidate
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| SCENARIO_EXTENSIONS.contains(&ext))
        })
        .collect();
    files.sort();

    if files.is_empty() {
        return Err(ConfigError::Empty {
            path: path.to_path_buf(),
        });
    }

    let mut scenarios = Vec::with_capacity(files.len());
    for file in files {
        scenarios.push(load_scenario(&file)?);
    }
    Ok(scenarios)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Reads and deserializes one document under the size limit.
fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let metadata = fs::metadata(path).map_err(|err| ConfigError::Io {
        path: path.to_path_buf(),
        detail: err.to_string(),
    })?;
    if metadata.len() > MAX_CONFIG_FILE_BYTES as u64 {
        return Err(ConfigError::TooLarge {
            path: path.to_path_buf(),
            size: metadata.len(),
            limit: MAX_CONFIG_FILE_BYTES,
        });
    }

    let bytes = fs::read(path).map_err(|err| ConfigError::Io {
        path: path.to_path_buf(),
        detail: err.to_string(),
    })?;

    let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or_default();
    match extension {
        "yaml" | "yml" => {
            serde_yaml::from_slice(&bytes).map_err(|err| ConfigError::Parse {
                path: path.to_path_buf(),
                detail: err.to_string(),
            })
        }
        "json" => serde_json::from_slice(&bytes).map_err(|err| ConfigError::Parse {
            path: path.to_path_buf(),
            detail: err.to_string(),
        }),
        _ => Err(ConfigError::UnknownFormat {
            path: path.to_path_buf(),
        }),
    }
}
