//! Engine tuning and invoker overrides.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::capability::ResolvedValue;
use crate::error::{ConfigureError, Result};
use crate::registry::ProbeRegistry;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of probes in flight.
    pub jobs: usize,
    /// Upper bound on a single probe, including every trial step.
    pub probe_timeout: Duration,
    /// Fraction of probed core capabilities that may be indeterminate
    /// before the run is refused.
    pub max_indeterminate_ratio: f64,
    /// Hash the compiler banner into the record.
    pub fingerprint: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            jobs: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            probe_timeout: Duration::from_secs(120),
            max_indeterminate_ratio: 0.5,
            fingerprint: true,
        }
    }
}

impl EngineConfig {
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_max_indeterminate_ratio(mut self, ratio: f64) -> Self {
        self.max_indeterminate_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn without_fingerprint(mut self) -> Self {
        self.fingerprint = false;
        self
    }
}

/// Forced values keyed by capability name, as raw strings.
///
/// Values are interpreted against the capability's kind only once the
/// registry is known, in [`Overrides::resolve`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    values: BTreeMap<String, String>,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Parse `NAME=VALUE`; a bare `NAME` means `NAME=1`.
    pub fn parse_assignment(assignment: &str) -> Result<(String, String)> {
        let (name, value) = match assignment.split_once('=') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => (assignment.trim(), "1"),
        };
        if name.is_empty() {
            return Err(ConfigureError::InvalidOverride {
                name: String::new(),
                value: value.to_string(),
                reason: "missing capability name".to_string(),
            });
        }
        Ok((name.to_string(), value.to_string()))
    }

    /// Later assignments to the same name win.
    pub fn from_assignments<I, S>(assignments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut values = BTreeMap::new();
        for assignment in assignments {
            let (name, value) = Self::parse_assignment(assignment.as_ref())?;
            values.insert(name, value);
        }
        Ok(Self { values })
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Type every override against `registry`.
    pub fn resolve(&self, registry: &ProbeRegistry) -> Result<HashMap<String, ResolvedValue>> {
        self.values
            .iter()
            .map(|(name, raw)| {
                let capability =
                    registry
                        .get(name)
                        .ok_or_else(|| ConfigureError::UnknownOverride {
                            name: name.clone(),
                        })?;
                let value = ResolvedValue::parse_for(capability.kind, raw).ok_or_else(|| {
                    ConfigureError::InvalidOverride {
                        name: name.clone(),
                        value: raw.clone(),
                        reason: format!("not a valid {} value", capability.kind),
                    }
                })?;
                Ok((name.clone(), value))
            })
            .collect()
    }
}
