//! Engine-level error taxonomy for cfgprobe.
//!
//! Probe-local failures never surface here; they become indeterminate
//! results inside the resolver (see [`crate::probe::ProbeExecutionError`]).
//! Everything in [`ConfigureError`] aborts the run before any output is
//! written.

use crate::engine::EngineState;
use std::path::PathBuf;

/// Errors that abort a configuration run.
#[derive(Debug, thiserror::Error)]
pub enum ConfigureError {
    #[error("duplicate capability: {name}")]
    DuplicateCapability { name: String },

    #[error("dependency cycle detected: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("capability {capability} depends on unknown capability {dependency}")]
    UnknownDependency {
        capability: String,
        dependency: String,
    },

    #[error("invalid capability {name}: {reason}")]
    InvalidCapability { name: String, reason: String },

    #[error("override names unknown capability: {name}")]
    UnknownOverride { name: String },

    #[error("invalid override {name}={value}: {reason}")]
    InvalidOverride {
        name: String,
        value: String,
        reason: String,
    },

    #[error(
        "{indeterminate} of {probed} core probes were indeterminate; refusing to emit a degraded record"
    )]
    MajorityProbeFailure { indeterminate: usize, probed: usize },

    #[error("capability {name} was left unresolved")]
    Unresolved { name: String },

    #[error("another probe run holds the lock at {lock:?} (remove it if that run is gone)")]
    EngineBusy { lock: PathBuf },

    #[error("invalid engine transition from {from:?} to {to:?}")]
    InvalidTransition { from: EngineState, to: EngineState },

    #[error("catalog error: {0}")]
    Catalog(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigureError {
    /// Registry, catalog or override misconfiguration, caught before probing.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ConfigureError::DuplicateCapability { .. }
                | ConfigureError::CyclicDependency { .. }
                | ConfigureError::UnknownDependency { .. }
                | ConfigureError::InvalidCapability { .. }
                | ConfigureError::UnknownOverride { .. }
                | ConfigureError::InvalidOverride { .. }
                | ConfigureError::Catalog(_)
        )
    }
}

impl From<toml::de::Error> for ConfigureError {
    fn from(err: toml::de::Error) -> Self {
        ConfigureError::Catalog(err.to_string())
    }
}

/// Result type for cfgprobe engine operations.
pub type Result<T> = std::result::Result<T, ConfigureError>;
