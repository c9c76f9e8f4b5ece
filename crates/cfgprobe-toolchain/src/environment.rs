//! Target-environment descriptor
//!
//! A [`ProbeEnvironment`] is the explicit input of a probe run: which
//! compiler to drive, with which flags, for which target, and where trial
//! units may be written. Nothing is read from ambient process state once
//! the descriptor has been built.

use crate::error::ToolchainError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Default time budget for a single trial step.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Compilers tried, in order, when none is configured.
const COMPILER_CANDIDATES: &[&str] = &["cc", "gcc", "clang"];

/// Time allowed for `--version` during compiler discovery.
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a probe needs to know about the build host and target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeEnvironment {
    /// C compiler driver used for trial compiles and links.
    pub compiler: PathBuf,

    /// Flags passed to every compile step.
    pub cflags: Vec<String>,

    /// Flags passed to every link step.
    pub ldflags: Vec<String>,

    /// Libraries appended to every link step.
    pub libs: Vec<String>,

    /// Target triple; `None` means the host.
    pub target: Option<String>,

    /// Host platform as `<arch>-<os>`.
    pub host: String,

    /// Directory under which per-probe scratch directories are created.
    pub scratch_root: PathBuf,

    /// Time budget for each trial step, in milliseconds.
    pub timeout_ms: u64,
}

impl ProbeEnvironment {
    /// Create a descriptor for `compiler` targeting the host.
    pub fn new(compiler: impl Into<PathBuf>) -> Self {
        Self {
            compiler: compiler.into(),
            cflags: Vec::new(),
            ldflags: Vec::new(),
            libs: Vec::new(),
            target: None,
            host: host_triple(),
            scratch_root: default_scratch_root(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    /// Build a descriptor around the first working compiler found.
    pub async fn discover() -> Result<Self> {
        Ok(Self::new(discover_compiler().await?))
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_cflags(mut self, flags: Vec<String>) -> Self {
        self.cflags = flags;
        self
    }

    pub fn with_ldflags(mut self, flags: Vec<String>) -> Self {
        self.ldflags = flags;
        self
    }

    pub fn with_libs(mut self, libs: Vec<String>) -> Self {
        self.libs = libs;
        self
    }

    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Time budget for a single trial step.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Whether test programs built for the target cannot run on the host.
    pub fn is_cross_compiling(&self) -> bool {
        match &self.target {
            Some(target) => !triple_matches_host(target, &self.host),
            None => false,
        }
    }

    /// The target triple, falling back to the host.
    pub fn effective_target(&self) -> &str {
        self.target.as_deref().unwrap_or(&self.host)
    }
}

/// Per-user scratch root below the system temp directory, so runs by
/// different users never contend for the same lock or trial directories.
pub fn default_scratch_root() -> PathBuf {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok();
    std::env::temp_dir().join(scratch_dir_name(user.as_deref()))
}

fn scratch_dir_name(user: Option<&str>) -> String {
    let user: String = user
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    if user.is_empty() || user.chars().all(|c| c == '.') {
        "cfgprobe".to_string()
    } else {
        format!("cfgprobe-{}", user)
    }
}

/// Host platform as `<arch>-<os>`, e.g. `x86_64-linux`.
pub fn host_triple() -> String {
    format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS)
}

/// Loose triple comparison: same architecture and an OS component that
/// names the host OS (`x86_64-unknown-linux-gnu` matches `x86_64-linux`).
pub fn triple_matches_host(target: &str, host: &str) -> bool {
    let Some((host_arch, host_os)) = host.split_once('-') else {
        return target == host;
    };
    let mut parts = target.split('-');
    let target_arch = parts.next().unwrap_or_default();
    if target_arch != host_arch {
        return false;
    }
    let os_aliases: &[&str] = match host_os {
        "macos" => &["darwin", "apple", "macos"],
        other => return parts.any(|p| p == other || p.starts_with(other)),
    };
    parts.any(|p| os_aliases.contains(&p))
}

/// Locate a C compiler: `$CC` first, then the usual driver names.
pub async fn discover_compiler() -> Result<PathBuf> {
    let mut candidates: Vec<String> = Vec::new();
    if let Ok(cc) = std::env::var("CC") {
        if !cc.trim().is_empty() {
            candidates.push(cc.trim().to_string());
        }
    }
    candidates.extend(COMPILER_CANDIDATES.iter().map(|c| c.to_string()));

    let mut tried = Vec::new();
    for candidate in candidates {
        if compiler_responds(Path::new(&candidate)).await {
            info!(compiler = %candidate, "Using C compiler");
            return Ok(PathBuf::from(candidate));
        }
        debug!(compiler = %candidate, "Compiler candidate not usable");
        tried.push(candidate);
    }

    Err(ToolchainError::CompilerNotFound { tried })
}

/// Check whether `compiler --version` runs successfully.
pub async fn compiler_responds(compiler: &Path) -> bool {
    let status = Command::new(compiler)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();
    matches!(
        tokio::time::timeout(DISCOVERY_TIMEOUT, status).await,
        Ok(Ok(s)) if s.success()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_target_is_not_cross() {
        let env = ProbeEnvironment::new("cc");
        assert!(!env.is_cross_compiling());
        assert_eq!(env.effective_target(), env.host);
    }

    #[test]
    fn test_matching_gnu_triple_is_not_cross() {
        let mut env = ProbeEnvironment::new("cc");
        env.host = "x86_64-linux".to_string();
        let env = env.with_target("x86_64-unknown-linux-gnu");
        assert!(!env.is_cross_compiling());
    }

    #[test]
    fn test_foreign_arch_is_cross() {
        let mut env = ProbeEnvironment::new("cc");
        env.host = "x86_64-linux".to_string();
        let env = env.with_target("aarch64-unknown-linux-gnu");
        assert!(env.is_cross_compiling());
    }

    #[test]
    fn test_macos_host_matches_darwin_triple() {
        assert!(triple_matches_host("aarch64-apple-darwin", "aarch64-macos"));
        assert!(!triple_matches_host("aarch64-unknown-linux-gnu", "aarch64-macos"));
    }

    #[tokio::test]
    async fn test_missing_compiler_does_not_respond() {
        assert!(!compiler_responds(Path::new("/nonexistent/cfgprobe-cc")).await);
    }

    #[test]
    fn test_scratch_dir_is_per_user() {
        assert_eq!(scratch_dir_name(Some("alice")), "cfgprobe-alice");
        assert_ne!(scratch_dir_name(Some("alice")), scratch_dir_name(Some("bob")));
    }

    #[test]
    fn test_scratch_dir_name_is_sanitized() {
        assert_eq!(scratch_dir_name(Some("../evil user")), "cfgprobe-..eviluser");
        assert_eq!(scratch_dir_name(Some("..")), "cfgprobe");
        assert_eq!(scratch_dir_name(None), "cfgprobe");
    }

    #[test]
    fn test_default_scratch_root_is_in_temp_dir() {
        let env = ProbeEnvironment::new("cc");
        assert!(env.scratch_root.starts_with(std::env::temp_dir()));
        let name = env.scratch_root.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("cfgprobe"));
    }

    #[test]
    fn test_builder_sets_fields() {
        let env = ProbeEnvironment::new("gcc")
            .with_cflags(vec!["-O2".to_string()])
            .with_libs(vec!["-lm".to_string()])
            .with_timeout_ms(500);
        assert_eq!(env.cflags, vec!["-O2"]);
        assert_eq!(env.libs, vec!["-lm"]);
        assert_eq!(env.timeout(), Duration::from_millis(500));
    }
}
