//! Trial compile, link and run of a single test unit.
//!
//! Every trial gets its own scratch directory below
//! [`ProbeEnvironment::scratch_root`], so concurrent trials never share
//! object files or binaries. The directory is removed when the trial ends.

use crate::diagnostics::{classify_build_failure, FailureClass};
use crate::environment::ProbeEnvironment;
use crate::error::ToolchainError;
use crate::Result;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::{debug, trace};

const SOURCE_FILE: &str = "conftest.c";
const OBJECT_FILE: &str = "conftest.o";
const BINARY_FILE: &str = "conftest";

/// How far a trial unit is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrialMode {
    /// Preprocess and compile to an object file.
    Compile,
    /// Compile and link an executable.
    Link,
    /// Compile, link and execute; the exit status decides.
    Run,
}

impl TrialMode {
    pub fn name(&self) -> &'static str {
        match self {
            TrialMode::Compile => "compile",
            TrialMode::Link => "link",
            TrialMode::Run => "run",
        }
    }
}

/// Result of a trial that executed to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrialOutcome {
    /// Every step succeeded. `stdout` is the test program's output for
    /// [`TrialMode::Run`] and empty otherwise.
    Succeeded { stdout: String },

    /// A step ran and failed.
    Failed {
        step: &'static str,
        exit_code: i32,
        diagnostics: String,
        class: FailureClass,
    },
}

impl TrialOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, TrialOutcome::Succeeded { .. })
    }
}

/// Captured output of one child process.
#[derive(Debug)]
struct StepOutput {
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
}

/// Drives trial units through the configured compiler.
pub struct TrialRunner<'a> {
    env: &'a ProbeEnvironment,
    entities: Vec<&'a str>,
}

impl<'a> TrialRunner<'a> {
    pub fn new(env: &'a ProbeEnvironment) -> Self {
        Self {
            env,
            entities: Vec::new(),
        }
    }

    /// Names the unit tests for. A build failure is only classified as
    /// [`FailureClass::MissingEntity`] when the diagnostics name one of them.
    pub fn with_entities(mut self, entities: impl IntoIterator<Item = &'a str>) -> Self {
        self.entities.extend(entities);
        self
    }

    /// Build (and for [`TrialMode::Run`], execute) `source`.
    ///
    /// Returns `Err` only when the trial could not be carried out at all;
    /// a compiler that runs and rejects the unit yields
    /// [`TrialOutcome::Failed`].
    pub async fn run(&self, source: &str, mode: TrialMode) -> Result<TrialOutcome> {
        if mode == TrialMode::Run && self.env.is_cross_compiling() {
            return Err(ToolchainError::CrossCompiling {
                target: self.env.effective_target().to_string(),
            });
        }

        let scratch = self.scratch_dir()?;
        let dir = scratch.path();
        let start = Instant::now();

        tokio::fs::write(dir.join(SOURCE_FILE), source).await?;
        trace!(mode = mode.name(), dir = ?dir, "Wrote trial unit");

        let build_step = if mode == TrialMode::Compile {
            "compile"
        } else {
            "link"
        };
        let build = self
            .execute(self.build_command(dir, mode), dir, build_step)
            .await?;

        let outcome = match build.exit_code {
            Some(0) if mode != TrialMode::Run => TrialOutcome::Succeeded {
                stdout: String::new(),
            },
            Some(0) => self.execute_binary(dir).await?,
            Some(code) => TrialOutcome::Failed {
                step: build_step,
                exit_code: code,
                class: classify_build_failure(&build.stderr, &self.entities),
                diagnostics: build.stderr,
            },
            None => return Err(ToolchainError::Terminated { step: build_step }),
        };

        debug!(
            mode = mode.name(),
            succeeded = outcome.succeeded(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Trial finished"
        );
        Ok(outcome)
    }

    fn scratch_dir(&self) -> Result<tempfile::TempDir> {
        let root = &self.env.scratch_root;
        std::fs::create_dir_all(root).map_err(|source| ToolchainError::Scratch {
            path: root.clone(),
            source,
        })?;
        tempfile::Builder::new()
            .prefix("trial-")
            .tempdir_in(root)
            .map_err(|source| ToolchainError::Scratch {
                path: root.clone(),
                source,
            })
    }

    fn build_command(&self, dir: &Path, mode: TrialMode) -> Command {
        let mut cmd = Command::new(&self.env.compiler);
        cmd.args(&self.env.cflags);
        match mode {
            TrialMode::Compile => {
                cmd.arg("-c")
                    .arg(dir.join(SOURCE_FILE))
                    .arg("-o")
                    .arg(dir.join(OBJECT_FILE));
            }
            TrialMode::Link | TrialMode::Run => {
                cmd.arg(dir.join(SOURCE_FILE))
                    .arg("-o")
                    .arg(dir.join(BINARY_FILE))
                    .args(&self.env.ldflags)
                    .args(&self.env.libs);
            }
        }
        cmd
    }

    async fn execute_binary(&self, dir: &Path) -> Result<TrialOutcome> {
        let run = self
            .execute(Command::new(dir.join(BINARY_FILE)), dir, "run")
            .await?;
        Ok(match run.exit_code {
            Some(0) => TrialOutcome::Succeeded { stdout: run.stdout },
            // A crashing test program counts as a failed behaviour check.
            code => TrialOutcome::Failed {
                step: "run",
                exit_code: code.unwrap_or(-1),
                diagnostics: run.stderr,
                class: FailureClass::Runtime,
            },
        })
    }

    async fn execute(
        &self,
        mut cmd: Command,
        dir: &Path,
        step: &'static str,
    ) -> Result<StepOutput> {
        let program = PathBuf::from(cmd.as_std().get_program());
        let child = cmd
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ToolchainError::Spawn { program, source })?;

        let output = tokio::time::timeout(self.env.timeout(), child.wait_with_output())
            .await
            .map_err(|_| ToolchainError::TimedOut {
                step,
                timeout_ms: self.env.timeout_ms,
            })??;

        Ok(StepOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trial_mode_names() {
        assert_eq!(TrialMode::Compile.name(), "compile");
        assert_eq!(TrialMode::Link.name(), "link");
        assert_eq!(TrialMode::Run.name(), "run");
    }

    #[tokio::test]
    async fn test_missing_compiler_is_not_executed() {
        let scratch = tempfile::tempdir().unwrap();
        let env = ProbeEnvironment::new("/nonexistent/cfgprobe-cc").with_scratch_root(scratch.path());

        let err = TrialRunner::new(&env)
            .run("int main(void) { return 0; }\n", TrialMode::Compile)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolchainError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_run_refused_when_cross_compiling() {
        let scratch = tempfile::tempdir().unwrap();
        let mut env = ProbeEnvironment::new("cc").with_scratch_root(scratch.path());
        env.host = "x86_64-linux".to_string();
        let env = env.with_target("riscv64gc-unknown-linux-gnu");

        let err = TrialRunner::new(&env)
            .run("int main(void) { return 0; }\n", TrialMode::Run)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolchainError::CrossCompiling { .. }));
    }
}
