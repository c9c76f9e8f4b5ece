//! Resolution of probe outcomes into a configuration record.
//!
//! Capabilities are visited wave by wave (see
//! [`ProbeRegistry::evaluation_levels`]). Within a wave, anything that can
//! be settled without a probe is settled first; the rest is probed
//! concurrently, bounded by [`EngineConfig::jobs`]. A later wave only
//! starts once the previous one is fully resolved, so dependents always
//! see their dependencies' final values.

use std::collections::HashMap;
use std::time::Instant;

use cfgprobe_toolchain::ProbeEnvironment;
use futures::stream::{self, StreamExt};
use tracing::debug;

use crate::capability::{Capability, CapabilityKind, ResolvedValue};
use crate::config::{EngineConfig, Overrides};
use crate::error::{ConfigureError, Result};
use crate::obs::{emit_probe_coerced, emit_probe_evaluated};
use crate::probe::{Probe, ProbeExecutionError, ProbeResult, ProbeState};
use crate::record::{ConfigurationRecord, PackageMetadata, Provenance, RecordEntry};
use crate::registry::ProbeRegistry;

/// Counts gathered during one resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolutionStats {
    /// Capabilities that were actually probed.
    pub probed: usize,
    /// Probed capabilities whose outcome was indeterminate.
    pub indeterminate: usize,
    /// Probed core capabilities; the majority check is taken over these.
    pub probed_core: usize,
    pub indeterminate_core: usize,
}

/// Turns a registry plus probe outcomes into a [`ConfigurationRecord`].
pub struct Resolver<'a> {
    registry: &'a ProbeRegistry,
    probe: &'a dyn Probe,
    config: &'a EngineConfig,
}

impl<'a> Resolver<'a> {
    pub fn new(registry: &'a ProbeRegistry, probe: &'a dyn Probe, config: &'a EngineConfig) -> Self {
        Self {
            registry,
            probe,
            config,
        }
    }

    pub async fn resolve(
        &self,
        env: &ProbeEnvironment,
        overrides: &Overrides,
        package: PackageMetadata,
    ) -> Result<ConfigurationRecord> {
        self.resolve_with_stats(env, overrides, package)
            .await
            .map(|(record, _)| record)
    }

    /// Resolve every capability.
    ///
    /// Structural problems (cycles, unknown dependencies, bad overrides) are
    /// reported before any probe runs. Fails with
    /// [`ConfigureError::MajorityProbeFailure`] when too many core probes
    /// were indeterminate.
    pub async fn resolve_with_stats(
        &self,
        env: &ProbeEnvironment,
        overrides: &Overrides,
        package: PackageMetadata,
    ) -> Result<(ConfigurationRecord, ResolutionStats)> {
        let levels = self.registry.evaluation_levels()?;
        let forced = overrides.resolve(self.registry)?;

        let mut resolved: HashMap<String, (ResolvedValue, Provenance)> =
            HashMap::with_capacity(self.registry.len());
        let mut stats = ResolutionStats::default();

        for level in levels {
            let mut pending = Vec::new();
            for capability in level {
                match self.settle_without_probe(capability, &forced, &resolved) {
                    Some(settled) => {
                        resolved.insert(capability.name.clone(), settled);
                    }
                    None => pending.push(capability),
                }
            }
            if pending.is_empty() {
                continue;
            }

            let jobs = self.config.jobs.max(1);
            let outcomes: Vec<(&Capability, ProbeResult)> = stream::iter(pending)
                .map(|capability| async move { (capability, self.probe_one(capability, env).await) })
                .buffer_unordered(jobs)
                .collect()
                .await;

            for (capability, result) in outcomes {
                let (value, provenance) = finalize(capability, result);
                // A verdict the probe could not back with a value counts
                // against the run like any other indeterminate outcome.
                let indeterminate =
                    matches!(provenance, Provenance::Defaulted | Provenance::CoercedAbsent);
                stats.probed += 1;
                if capability.core {
                    stats.probed_core += 1;
                }
                if indeterminate {
                    stats.indeterminate += 1;
                    if capability.core {
                        stats.indeterminate_core += 1;
                    }
                }
                resolved.insert(capability.name.clone(), (value, provenance));
            }
        }

        if stats.probed_core > 0 {
            let ratio = stats.indeterminate_core as f64 / stats.probed_core as f64;
            if ratio > self.config.max_indeterminate_ratio {
                return Err(ConfigureError::MajorityProbeFailure {
                    indeterminate: stats.indeterminate_core,
                    probed: stats.probed_core,
                });
            }
        }

        let entries = self
            .registry
            .capabilities()
            .iter()
            .map(|capability| {
                let (value, provenance) = resolved.remove(&capability.name).ok_or_else(|| {
                    ConfigureError::Unresolved {
                        name: capability.name.clone(),
                    }
                })?;
                Ok(RecordEntry {
                    name: capability.name.clone(),
                    kind: capability.kind,
                    subject: capability.subject.clone(),
                    value,
                    provenance,
                    description: capability.description.clone(),
                    guarded: capability.guarded,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok((
            ConfigurationRecord::new(package.normalized(), None, entries),
            stats,
        ))
    }

    /// Overrides, failed dependencies and declared constants need no probe,
    /// in that order of precedence.
    fn settle_without_probe(
        &self,
        capability: &Capability,
        forced: &HashMap<String, ResolvedValue>,
        resolved: &HashMap<String, (ResolvedValue, Provenance)>,
    ) -> Option<(ResolvedValue, Provenance)> {
        if let Some(value) = forced.get(&capability.name) {
            debug!(capability = %capability.name, value = %value, "Override applied");
            return Some((value.clone(), Provenance::Override));
        }

        let mut missing: Vec<String> = Vec::new();
        for dependency in &capability.dependencies {
            let present = resolved
                .get(dependency)
                .is_some_and(|(value, _)| value.is_present());
            if !present && !missing.contains(dependency) {
                missing.push(dependency.clone());
            }
        }
        if !missing.is_empty() {
            debug!(capability = %capability.name, missing = ?missing, "Dependency absent; not probing");
            return Some((capability.absent_value(), Provenance::Propagated { missing }));
        }

        if capability.kind == CapabilityKind::Define {
            let value = capability.value.clone().unwrap_or(ResolvedValue::Undefined);
            return Some((value, Provenance::Declared));
        }

        None
    }

    /// Run one probe under the per-probe timeout. Errors become
    /// indeterminate results.
    async fn probe_one(&self, capability: &Capability, env: &ProbeEnvironment) -> ProbeResult {
        let started = Instant::now();
        let outcome =
            tokio::time::timeout(self.config.probe_timeout, self.probe.evaluate(capability, env))
                .await;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => ProbeResult::indeterminate(&capability.name, err.to_string()),
            Err(_) => {
                let timeout_ms = self.config.probe_timeout.as_millis() as u64;
                ProbeResult::indeterminate(
                    &capability.name,
                    ProbeExecutionError::TimedOut { timeout_ms }.to_string(),
                )
            }
        };

        emit_probe_evaluated(
            &capability.name,
            result.state,
            started.elapsed().as_millis() as u64,
        );
        result
    }
}

/// Map a probe outcome to the value recorded for `capability`.
fn finalize(capability: &Capability, result: ProbeResult) -> (ResolvedValue, Provenance) {
    let reason = match result.state {
        ProbeState::Present => {
            match result.value.or_else(|| capability.kind.present_value()) {
                Some(value) => return (value, Provenance::Probed),
                None => "probe reported present without a value".to_string(),
            }
        }
        ProbeState::Absent => return (capability.absent_value(), Provenance::Probed),
        ProbeState::Indeterminate => result
            .detail
            .unwrap_or_else(|| "indeterminate".to_string()),
    };

    let (value, provenance) = match &capability.default_on_indeterminate {
        Some(default) => (default.clone(), Provenance::Defaulted),
        None => (capability.absent_value(), Provenance::CoercedAbsent),
    };
    emit_probe_coerced(&capability.name, &provenance, &reason);
    (value, provenance)
}
