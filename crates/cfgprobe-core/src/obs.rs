//! Structured lifecycle events for probe runs.
//!
//! Every run enters a [`RunSpan`] carrying its run id; the `emit_*`
//! functions below are the only places lifecycle events are logged.

use tracing::{info, warn};

use crate::probe::ProbeState;
use crate::record::Provenance;

/// RAII guard that keeps a run-scoped span entered.
///
/// ```ignore
/// let _span = RunSpan::enter("6d0c...");
/// // every event below carries run_id
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str) -> Self {
        Self {
            _span: run_span(run_id).entered(),
        }
    }
}

/// The run-scoped span itself, for instrumenting futures.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("cfgprobe.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, capabilities: usize, waves: usize, jobs: usize) {
    info!(
        event = "probe.run_started",
        run_id = %run_id,
        capabilities = capabilities,
        waves = waves,
        jobs = jobs,
    );
}

pub fn emit_probe_evaluated(capability: &str, state: ProbeState, duration_ms: u64) {
    info!(
        event = "probe.evaluated",
        capability = %capability,
        state = state.name(),
        duration_ms = duration_ms,
    );
}

/// An indeterminate probe was replaced by a default or by absence.
pub fn emit_probe_coerced(capability: &str, provenance: &Provenance, reason: &str) {
    warn!(
        event = "probe.coerced",
        capability = %capability,
        resolution = provenance.name(),
        reason = %reason,
    );
}

pub fn emit_run_finished(run_id: &str, duration_ms: u64, indeterminate: usize, success: bool) {
    info!(
        event = "probe.run_finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        indeterminate = indeterminate,
        success = success,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _span = RunSpan::enter("test-run-id");
        emit_probe_evaluated("HAVE_DLFCN_H", ProbeState::Present, 3);
    }
}
