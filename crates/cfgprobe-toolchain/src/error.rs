//! Error types for cfgprobe-toolchain

use std::path::PathBuf;
use thiserror::Error;

/// Errors that keep a trial compile, link or run from executing at all.
///
/// A compiler that runs and rejects the unit is not an error here; that is
/// reported as a [`crate::TrialOutcome::Failed`].
#[derive(Error, Debug)]
pub enum ToolchainError {
    /// No usable C compiler was found
    #[error("no C compiler found (tried {tried:?})")]
    CompilerNotFound { tried: Vec<String> },

    /// The compiler (or the trial binary) could not be spawned
    #[error("failed to spawn {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A trial step exceeded its time budget
    #[error("{step} step timed out after {timeout_ms} ms")]
    TimedOut { step: &'static str, timeout_ms: u64 },

    /// The process was killed by a signal instead of exiting
    #[error("{step} step terminated by signal")]
    Terminated { step: &'static str },

    /// Trial binaries cannot be executed when targeting another platform
    #[error("cannot run test programs when cross-compiling for {target}")]
    CrossCompiling { target: String },

    /// Scratch directory setup failed
    #[error("scratch directory error at {path:?}: {source}")]
    Scratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
