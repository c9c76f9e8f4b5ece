//! cfgprobe core library
//!
//! Declares capabilities, probes them against a toolchain, resolves the
//! outcomes into an immutable [`ConfigurationRecord`] and renders that
//! record as a `config.h`, a JSON report and a human summary.

pub mod capability;
pub mod catalog;
pub mod config;
pub mod emitter;
pub mod engine;
pub mod error;
pub mod fakes;
pub mod obs;
pub mod probe;
pub mod record;
pub mod registry;
pub mod resolver;
pub mod telemetry;

pub use capability::{is_c_identifier, macro_name, Capability, CapabilityKind, ResolvedValue};
pub use catalog::{Catalog, CatalogEntry, CatalogValue};
pub use config::{EngineConfig, Overrides};
pub use emitter::{
    c_string, write_if_changed, Emitter, HeaderEmitter, JsonEmitter, SummaryEmitter,
    WriteOutcome, FORMAT_VERSION,
};
pub use engine::{Engine, EngineOutput, EngineState, RunLock};
pub use error::{ConfigureError, Result};
pub use obs::{
    emit_probe_coerced, emit_probe_evaluated, emit_run_finished, emit_run_started, run_span,
    RunSpan,
};
pub use probe::{CompilerProbe, Probe, ProbeExecutionError, ProbeResult, ProbeState};
pub use record::{default_tarname, ConfigurationRecord, PackageMetadata, Provenance, RecordEntry};
pub use registry::ProbeRegistry;
pub use resolver::{ResolutionStats, Resolver};

pub use cfgprobe_toolchain::ProbeEnvironment;

/// Crate version, also written into JSON reports.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
