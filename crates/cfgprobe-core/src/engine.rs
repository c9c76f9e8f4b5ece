//! The per-invocation engine: probe, resolve, emit.
//!
//! An [`Engine`] walks `Idle → ProbingInProgress → Resolved → Emitted → Idle`.
//! A failure at any point returns it to `Idle` without producing output.
//! While a run is in flight, a lock file in the scratch root keeps other
//! invocations away from the same environment.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use cfgprobe_toolchain::ProbeEnvironment;
use serde::Serialize;
use tracing::{debug, warn, Instrument};
use uuid::Uuid;

use crate::config::{EngineConfig, Overrides};
use crate::emitter::{
    write_if_changed, Emitter, HeaderEmitter, JsonEmitter, SummaryEmitter, WriteOutcome,
};
use crate::error::{ConfigureError, Result};
use crate::obs::{emit_run_finished, emit_run_started, run_span};
use crate::probe::Probe;
use crate::record::{ConfigurationRecord, PackageMetadata};
use crate::registry::ProbeRegistry;
use crate::resolver::{ResolutionStats, Resolver};

const LOCK_FILE: &str = ".cfgprobe.lock";

/// Lifecycle of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Idle,
    ProbingInProgress,
    Resolved,
    Emitted,
}

impl EngineState {
    /// Forward edges of the lifecycle, plus the abort edges back to `Idle`.
    pub fn can_transition_to(self, to: EngineState) -> bool {
        use EngineState::*;
        matches!(
            (self, to),
            (Idle, ProbingInProgress)
                | (ProbingInProgress, Resolved)
                | (Resolved, Emitted)
                | (Emitted, Idle)
                | (ProbingInProgress, Idle)
                | (Resolved, Idle)
        )
    }
}

/// Everything one successful run produced, rendered but not yet written.
#[derive(Debug, Clone)]
pub struct EngineOutput {
    pub run_id: String,
    pub record: ConfigurationRecord,
    pub header: String,
    pub report: String,
    pub summary: String,
    pub stats: ResolutionStats,
}

impl EngineOutput {
    /// Write the header and, if requested, the JSON report.
    ///
    /// Returns the outcome for the header; files whose content is unchanged
    /// are left untouched.
    pub fn write(&self, header_path: &Path, report_path: Option<&Path>) -> Result<WriteOutcome> {
        let outcome = write_if_changed(header_path, &self.header)?;
        if let Some(path) = report_path {
            write_if_changed(path, &self.report)?;
        }
        Ok(outcome)
    }
}

/// Exclusive claim on a scratch root, released on drop.
///
/// The lock file holds the owner's pid. A lock whose owner is no longer
/// running (the run was killed before it could clean up) is reclaimed.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(scratch_root: &Path) -> Result<Self> {
        fs::create_dir_all(scratch_root)?;
        let path = scratch_root.join(LOCK_FILE);
        match Self::create(&path) {
            Err(ConfigureError::EngineBusy { .. }) if Self::is_stale(&path) => {
                warn!(lock = %path.display(), "Reclaiming run lock left by a dead process");
                fs::remove_file(&path)?;
                Self::create(&path)
            }
            other => other,
        }
    }

    fn create(path: &Path) -> Result<Self> {
        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(ConfigureError::EngineBusy {
                    lock: path.to_path_buf(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", std::process::id())?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// A lock is stale when it names a pid that is not running. A lock
    /// that cannot be read or parsed may belong to a run that has not
    /// written its pid yet, so it is left alone.
    fn is_stale(path: &Path) -> bool {
        let Ok(contents) = fs::read_to_string(path) else {
            return false;
        };
        match contents.trim().parse::<u32>() {
            Ok(pid) => !process_alive(pid),
            Err(_) => false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            debug!(lock = %self.path.display(), error = %e, "Failed to release run lock");
        }
    }
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn process_alive(pid: u32) -> bool {
    // `kill -0` checks existence without delivering a signal.
    std::process::Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(true)
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}

/// Drives one registry through probing, resolution and emission.
pub struct Engine {
    registry: ProbeRegistry,
    probe: Arc<dyn Probe>,
    config: EngineConfig,
    header: HeaderEmitter,
    state: EngineState,
}

impl Engine {
    pub fn new(registry: ProbeRegistry, probe: Arc<dyn Probe>, config: EngineConfig) -> Self {
        Self {
            registry,
            probe,
            config,
            header: HeaderEmitter::new(),
            state: EngineState::Idle,
        }
    }

    pub fn with_header_emitter(mut self, header: HeaderEmitter) -> Self {
        self.header = header;
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn registry(&self) -> &ProbeRegistry {
        &self.registry
    }

    fn transition(&mut self, to: EngineState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(ConfigureError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        debug!(from = ?self.state, to = ?to, "Engine transition");
        self.state = to;
        Ok(())
    }

    /// Run once against `env`.
    ///
    /// Nothing is written to disk here; call [`EngineOutput::write`] with
    /// the result.
    pub async fn run(
        &mut self,
        env: &ProbeEnvironment,
        overrides: &Overrides,
        package: PackageMetadata,
    ) -> Result<EngineOutput> {
        let run_id = Uuid::new_v4().to_string();
        let span = run_span(&run_id);
        self.run_with_id(run_id, env, overrides, package)
            .instrument(span)
            .await
    }

    async fn run_with_id(
        &mut self,
        run_id: String,
        env: &ProbeEnvironment,
        overrides: &Overrides,
        package: PackageMetadata,
    ) -> Result<EngineOutput> {
        self.transition(EngineState::ProbingInProgress)?;
        let started = Instant::now();

        let result = self.probe_and_emit(&run_id, env, overrides, package).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                self.transition(EngineState::Idle)?;
                emit_run_finished(&run_id, duration_ms, output.stats.indeterminate, true);
                Ok(output)
            }
            Err(e) => {
                self.state = EngineState::Idle;
                emit_run_finished(&run_id, duration_ms, 0, false);
                Err(e)
            }
        }
    }

    async fn probe_and_emit(
        &mut self,
        run_id: &str,
        env: &ProbeEnvironment,
        overrides: &Overrides,
        package: PackageMetadata,
    ) -> Result<EngineOutput> {
        let _lock = RunLock::acquire(&env.scratch_root)?;

        let waves = self.registry.evaluation_levels()?.len();
        emit_run_started(run_id, self.registry.len(), waves, self.config.jobs);

        let resolver = Resolver::new(&self.registry, &*self.probe, &self.config);
        let (record, stats) = resolver.resolve_with_stats(env, overrides, package).await?;

        let toolchain = if self.config.fingerprint {
            Some(cfgprobe_toolchain::fingerprint(env).await.digest)
        } else {
            None
        };
        let record = record.with_toolchain(toolchain);
        self.transition(EngineState::Resolved)?;

        let header = self.header.emit(&record)?;
        let report = JsonEmitter.emit(&record)?;
        let summary = SummaryEmitter.emit(&record)?;
        self.transition(EngineState::Emitted)?;

        Ok(EngineOutput {
            run_id: run_id.to_string(),
            record,
            header,
            report,
            summary,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_edges() {
        use EngineState::*;
        assert!(Idle.can_transition_to(ProbingInProgress));
        assert!(ProbingInProgress.can_transition_to(Resolved));
        assert!(Resolved.can_transition_to(Emitted));
        assert!(Emitted.can_transition_to(Idle));
        assert!(!Idle.can_transition_to(Emitted));
        assert!(!Emitted.can_transition_to(ProbingInProgress));
        assert!(!Idle.can_transition_to(Resolved));
    }

    #[test]
    fn test_lock_is_exclusive_and_released() {
        let scratch = tempfile::tempdir().unwrap();
        let lock = RunLock::acquire(scratch.path()).unwrap();
        assert!(lock.path().exists());
        assert!(matches!(
            RunLock::acquire(scratch.path()),
            Err(ConfigureError::EngineBusy { .. })
        ));
        drop(lock);
        assert!(RunLock::acquire(scratch.path()).is_ok());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_lock_of_dead_process_is_reclaimed() {
        let scratch = tempfile::tempdir().unwrap();
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();
        fs::write(scratch.path().join(LOCK_FILE), format!("{}\n", dead_pid)).unwrap();

        let lock = RunLock::acquire(scratch.path()).unwrap();
        let owner = fs::read_to_string(lock.path()).unwrap();
        assert_eq!(owner.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_lock_of_live_process_is_kept() {
        let scratch = tempfile::tempdir().unwrap();
        fs::write(
            scratch.path().join(LOCK_FILE),
            format!("{}\n", std::process::id()),
        )
        .unwrap();
        assert!(matches!(
            RunLock::acquire(scratch.path()),
            Err(ConfigureError::EngineBusy { .. })
        ));
    }

    #[test]
    fn test_unreadable_lock_is_kept() {
        let scratch = tempfile::tempdir().unwrap();
        fs::write(scratch.path().join(LOCK_FILE), "").unwrap();
        assert!(matches!(
            RunLock::acquire(scratch.path()),
            Err(ConfigureError::EngineBusy { .. })
        ));
    }
}
