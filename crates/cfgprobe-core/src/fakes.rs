//! Scripted probe for tests (no compiler involved).
//!
//! [`ScriptedProbe`] answers from a table keyed by capability name and
//! records every call, so tests can assert which capabilities were
//! actually probed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use cfgprobe_toolchain::{ProbeEnvironment, ToolchainError};

use crate::capability::{Capability, ResolvedValue};
use crate::probe::{Probe, ProbeExecutionError, ProbeResult};

/// What a scripted capability reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scripted {
    Present,
    PresentWith(ResolvedValue),
    Absent,
    Indeterminate,
    /// Fail the way a missing compiler does.
    ToolchainMissing,
    /// Never finish; only the resolver's timeout ends the probe.
    Hang,
    /// Finish after a delay.
    Delayed(Duration, Box<Scripted>),
}

/// In-memory [`Probe`] driven by a script.
#[derive(Debug)]
pub struct ScriptedProbe {
    outcomes: HashMap<String, Scripted>,
    fallback: Scripted,
    calls: Mutex<Vec<String>>,
}

impl Default for ScriptedProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProbe {
    /// Every unscripted capability reports present.
    pub fn new() -> Self {
        Self {
            outcomes: HashMap::new(),
            fallback: Scripted::Present,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with(mut self, name: impl Into<String>, outcome: Scripted) -> Self {
        self.outcomes.insert(name.into(), outcome);
        self
    }

    pub fn with_fallback(mut self, outcome: Scripted) -> Self {
        self.fallback = outcome;
        self
    }

    /// Capability names in the order their probes started.
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn was_probed(&self, name: &str) -> bool {
        self.calls().iter().any(|c| c == name)
    }

    fn answer(
        name: &str,
        outcome: &Scripted,
    ) -> futures::future::BoxFuture<'static, Result<ProbeResult, ProbeExecutionError>> {
        let name = name.to_string();
        let outcome = outcome.clone();
        Box::pin(async move {
            match outcome {
                Scripted::Present => Ok(ProbeResult::present(&name)),
                Scripted::PresentWith(value) => Ok(ProbeResult::present_with(&name, value)),
                Scripted::Absent => Ok(ProbeResult::absent(&name)),
                Scripted::Indeterminate => Ok(ProbeResult::indeterminate(&name, "scripted")),
                Scripted::ToolchainMissing => Err(ProbeExecutionError::Toolchain(
                    ToolchainError::CompilerNotFound {
                        tried: vec!["cc".to_string()],
                    },
                )),
                Scripted::Hang => {
                    futures::future::pending::<()>().await;
                    Ok(ProbeResult::indeterminate(&name, "unreachable"))
                }
                Scripted::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    Self::answer(&name, &inner).await
                }
            }
        })
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn evaluate(
        &self,
        capability: &Capability,
        _env: &ProbeEnvironment,
    ) -> Result<ProbeResult, ProbeExecutionError> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(capability.name.clone());
        let outcome = self
            .outcomes
            .get(&capability.name)
            .unwrap_or(&self.fallback);
        Self::answer(&capability.name, outcome).await
    }
}
