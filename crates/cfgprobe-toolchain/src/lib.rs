//! cfgprobe-toolchain: the environment layer of cfgprobe
//!
//! This crate knows how to talk to a C toolchain. It provides:
//! - [`ProbeEnvironment`], the explicit target-environment descriptor
//! - compiler discovery (`$CC`, `cc`, `gcc`, `clang`)
//! - [`TrialRunner`], which compiles, links and runs one test unit in an
//!   isolated scratch directory with a per-step timeout
//! - classification of compiler diagnostics into "entity missing" versus
//!   inconclusive failures
//! - [`ToolchainFingerprint`], a content hash of the environment
//!
//! It has no notion of capabilities; that lives in `cfgprobe-core`.

pub mod diagnostics;
pub mod environment;
pub mod error;
pub mod fingerprint;
pub mod trial;

pub use diagnostics::{classify_build_failure, FailureClass};
pub use environment::{
    compiler_responds, default_scratch_root, discover_compiler, host_triple, triple_matches_host,
    ProbeEnvironment, DEFAULT_TIMEOUT_MS,
};
pub use error::ToolchainError;
pub use fingerprint::{fingerprint, fingerprint_with_banner, ToolchainFingerprint};
pub use trial::{TrialMode, TrialOutcome, TrialRunner};

/// Result type for toolchain operations
pub type Result<T> = std::result::Result<T, ToolchainError>;
