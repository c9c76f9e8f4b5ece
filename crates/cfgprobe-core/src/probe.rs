//! Probes: evaluating a single capability against an environment.
//!
//! [`Probe`] is the seam between the resolver and the outside world. The
//! production implementation, [`CompilerProbe`], renders a minimal C test
//! unit per capability kind and hands it to the toolchain layer; tests use
//! [`crate::fakes::ScriptedProbe`].

use async_trait::async_trait;
use cfgprobe_toolchain::{
    FailureClass, ProbeEnvironment, ToolchainError, TrialMode, TrialOutcome, TrialRunner,
};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use thiserror::Error;
use tracing::{debug, trace};

use crate::capability::{Capability, CapabilityKind, ResolvedValue};

/// Tri-state probe outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeState {
    Present,
    Absent,
    Indeterminate,
}

impl ProbeState {
    pub fn name(&self) -> &'static str {
        match self {
            ProbeState::Present => "present",
            ProbeState::Absent => "absent",
            ProbeState::Indeterminate => "indeterminate",
        }
    }
}

/// Outcome of evaluating one capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub capability: String,
    pub state: ProbeState,
    /// Associated data, e.g. the integer printed by an `integer` probe.
    pub value: Option<ResolvedValue>,
    /// Diagnostic context for logs; never part of the record.
    pub detail: Option<String>,
}

impl ProbeResult {
    pub fn present(capability: &str) -> Self {
        Self::new(capability, ProbeState::Present, None)
    }

    pub fn present_with(capability: &str, value: ResolvedValue) -> Self {
        Self::new(capability, ProbeState::Present, Some(value))
    }

    pub fn absent(capability: &str) -> Self {
        Self::new(capability, ProbeState::Absent, None)
    }

    pub fn indeterminate(capability: &str, detail: impl Into<String>) -> Self {
        Self::new(capability, ProbeState::Indeterminate, None).with_detail(detail)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    fn new(capability: &str, state: ProbeState, value: Option<ResolvedValue>) -> Self {
        Self {
            capability: capability.to_string(),
            state,
            value,
            detail: None,
        }
    }
}

/// A probe could not reach a verdict.
///
/// Never fatal: the resolver turns these into indeterminate results.
#[derive(Debug, Error)]
pub enum ProbeExecutionError {
    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    #[error("probe timed out after {timeout_ms} ms")]
    TimedOut { timeout_ms: u64 },

    #[error("inconclusive {step} failure: {diagnostics}")]
    Inconclusive {
        step: &'static str,
        diagnostics: String,
    },

    #[error("test program printed {output:?}, expected an integer")]
    UnparsableOutput { output: String },

    #[error("{kind} capabilities are not probed")]
    NotProbeable { kind: CapabilityKind },
}

/// Evaluates one capability against a target environment.
///
/// Implementations must not change the environment; any scratch files
/// they create must be private to the call.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn evaluate(
        &self,
        capability: &Capability,
        env: &ProbeEnvironment,
    ) -> Result<ProbeResult, ProbeExecutionError>;
}

/// Probes capabilities with trial compiles through the toolchain layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompilerProbe;

impl CompilerProbe {
    pub fn new() -> Self {
        Self
    }

    /// Names whose absence a failed build of the test unit proves: the
    /// header, function or symbol itself and the headers it includes.
    pub fn entities_under_test(capability: &Capability) -> Vec<&str> {
        let mut entities: Vec<&str> = capability.includes.iter().map(String::as_str).collect();
        match capability.kind {
            CapabilityKind::Header | CapabilityKind::Function | CapabilityKind::Declaration => {
                entities.push(capability.subject.as_str())
            }
            // Programs and expressions name nothing a diagnostic could point at.
            CapabilityKind::Behavioral | CapabilityKind::Integer | CapabilityKind::Define => {}
        }
        entities
    }

    /// The C test unit and trial mode for `capability`.
    pub fn test_unit(capability: &Capability) -> Result<(String, TrialMode), ProbeExecutionError> {
        let mut src = String::new();
        for include in &capability.includes {
            let _ = writeln!(src, "#include <{}>", include);
        }
        let subject = capability.subject.as_str();

        let mode = match capability.kind {
            CapabilityKind::Header => {
                let _ = writeln!(src, "#include <{}>", subject);
                src.push_str("int main (void) { return 0; }\n");
                TrialMode::Compile
            }
            CapabilityKind::Function => {
                // Declare the symbol ourselves so only the link step decides.
                let _ = write!(
                    src,
                    "#define {s} innocuous_{s}\n\
                     #include <limits.h>\n\
                     #undef {s}\n\
                     #ifdef __cplusplus\n\
                     extern \"C\"\n\
                     #endif\n\
                     char {s} (void);\n\
                     #if defined __stub_{s} || defined __stub___{s}\n\
                     choke me\n\
                     #endif\n\
                     int main (void) {{ return {s} (); }}\n",
                    s = subject
                );
                TrialMode::Link
            }
            CapabilityKind::Declaration => {
                let _ = write!(
                    src,
                    "int main (void)\n\
                     {{\n\
                     #ifndef {s}\n\
                     \x20 (void) {s};\n\
                     #endif\n\
                     \x20 return 0;\n\
                     }}\n",
                    s = subject
                );
                TrialMode::Compile
            }
            CapabilityKind::Behavioral => {
                src.push_str(capability.program.as_deref().unwrap_or_default());
                if !src.ends_with('\n') {
                    src.push('\n');
                }
                TrialMode::Run
            }
            CapabilityKind::Integer => {
                let _ = write!(
                    src,
                    "#include <stdio.h>\n\
                     int main (void) {{ printf (\"%lld\\n\", (long long) ({})); return 0; }}\n",
                    subject
                );
                TrialMode::Run
            }
            CapabilityKind::Define => {
                return Err(ProbeExecutionError::NotProbeable {
                    kind: capability.kind,
                })
            }
        };

        Ok((src, mode))
    }
}

#[async_trait]
impl Probe for CompilerProbe {
    async fn evaluate(
        &self,
        capability: &Capability,
        env: &ProbeEnvironment,
    ) -> Result<ProbeResult, ProbeExecutionError> {
        let (source, mode) = Self::test_unit(capability)?;
        trace!(capability = %capability.name, mode = mode.name(), "Probing");

        let outcome = TrialRunner::new(env)
            .with_entities(Self::entities_under_test(capability))
            .run(&source, mode)
            .await?;
        let name = capability.name.as_str();

        match outcome {
            TrialOutcome::Succeeded { stdout } if capability.kind == CapabilityKind::Integer => {
                let trimmed = stdout.trim();
                trimmed
                    .parse::<i64>()
                    .map(|v| ProbeResult::present_with(name, ResolvedValue::Integer(v)))
                    .map_err(|_| ProbeExecutionError::UnparsableOutput {
                        output: trimmed.to_string(),
                    })
            }
            TrialOutcome::Succeeded { .. } => Ok(ProbeResult::present(name)),
            TrialOutcome::Failed {
                class: FailureClass::MissingEntity,
                diagnostics,
                ..
            } => {
                debug!(capability = %name, "Entity missing");
                Ok(ProbeResult::absent(name).with_detail(first_line(&diagnostics)))
            }
            TrialOutcome::Failed {
                class: FailureClass::Runtime,
                exit_code,
                ..
            } if capability.kind == CapabilityKind::Behavioral => {
                Ok(ProbeResult::absent(name).with_detail(format!("test program exited {}", exit_code)))
            }
            TrialOutcome::Failed {
                step, diagnostics, ..
            } => Err(ProbeExecutionError::Inconclusive {
                step,
                diagnostics: first_line(&diagnostics),
            }),
        }
    }
}

fn first_line(text: &str) -> String {
    text.lines()
        .find(|l| !l.trim().is_empty())
        .unwrap_or_default()
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_unit_includes_header() {
        let cap = Capability::header("sys/stat.h").with_includes(["sys/types.h"]);
        let (src, mode) = CompilerProbe::test_unit(&cap).unwrap();
        assert_eq!(mode, TrialMode::Compile);
        assert!(src.starts_with("#include <sys/types.h>\n#include <sys/stat.h>\n"));
    }

    #[test]
    fn test_function_unit_links() {
        let (src, mode) = CompilerProbe::test_unit(&Capability::function("getpagesize")).unwrap();
        assert_eq!(mode, TrialMode::Link);
        assert!(src.contains("char getpagesize (void);"));
        assert!(src.contains("return getpagesize ();"));
    }

    #[test]
    fn test_declaration_unit_uses_ifndef() {
        let cap = Capability::declaration("bswap_16").with_includes(["byteswap.h"]);
        let (src, mode) = CompilerProbe::test_unit(&cap).unwrap();
        assert_eq!(mode, TrialMode::Compile);
        assert!(src.contains("#ifndef bswap_16"));
        assert!(src.contains("  (void) bswap_16;"));
    }

    #[test]
    fn test_integer_unit_prints_expression() {
        let (src, mode) =
            CompilerProbe::test_unit(&Capability::integer("SIZEOF_LONG", "sizeof (long)")).unwrap();
        assert_eq!(mode, TrialMode::Run);
        assert!(src.contains("(long long) (sizeof (long))"));
        assert!(src.contains("%lld\\n"));
    }

    #[test]
    fn test_define_is_not_probeable() {
        let cap = Capability::define("LT_OBJDIR", ResolvedValue::Text(".libs/".into()));
        assert!(matches!(
            CompilerProbe::test_unit(&cap),
            Err(ProbeExecutionError::NotProbeable { .. })
        ));
    }

    #[test]
    fn test_entities_cover_subject_and_includes() {
        let cap = Capability::declaration("bswap_16").with_includes(["byteswap.h"]);
        assert_eq!(CompilerProbe::entities_under_test(&cap), vec!["byteswap.h", "bswap_16"]);

        let cap = Capability::integer("SIZEOF_LONG", "sizeof (long)");
        assert!(CompilerProbe::entities_under_test(&cap).is_empty());
    }

    #[test]
    fn test_first_line_skips_blank_lines() {
        assert_eq!(first_line("\n\n  error: boom  \nmore"), "error: boom");
        assert_eq!(first_line(""), "");
    }
}
