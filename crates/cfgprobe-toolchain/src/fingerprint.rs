//! Toolchain fingerprinting
//!
//! A fingerprint identifies the environment a record was produced against:
//! compiler identity, flags and target. It changes whenever any input that
//! could change a probe outcome changes.

use crate::environment::ProbeEnvironment;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// Content-addressable identity of a [`ProbeEnvironment`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolchainFingerprint {
    /// SHA-256 over compiler banner, flags and target
    pub digest: String,
    /// First line of `compiler --version`, when it could be obtained
    pub compiler_banner: Option<String>,
}

impl ToolchainFingerprint {
    /// Short digest (first 12 characters)
    pub fn short(&self) -> &str {
        &self.digest[..12.min(self.digest.len())]
    }
}

impl std::fmt::Display for ToolchainFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest)
    }
}

/// Fingerprint `env`, querying the compiler for its version banner.
pub async fn fingerprint(env: &ProbeEnvironment) -> ToolchainFingerprint {
    let banner = compiler_banner(env).await;
    fingerprint_with_banner(env, banner)
}

/// Fingerprint `env` with an already known compiler banner.
pub fn fingerprint_with_banner(
    env: &ProbeEnvironment,
    compiler_banner: Option<String>,
) -> ToolchainFingerprint {
    let mut hasher = Sha256::new();

    hasher.update(b"compiler:");
    hasher.update(env.compiler.to_string_lossy().as_bytes());
    hasher.update(b"\0");
    if let Some(banner) = &compiler_banner {
        hasher.update(banner.as_bytes());
    }
    hasher.update(b"\0");

    for (label, values) in [
        ("cflags", &env.cflags),
        ("ldflags", &env.ldflags),
        ("libs", &env.libs),
    ] {
        hasher.update(label.as_bytes());
        hasher.update(b":");
        for value in values {
            hasher.update(value.as_bytes());
            hasher.update(b"\0");
        }
    }

    hasher.update(b"target:");
    hasher.update(env.effective_target().as_bytes());

    let digest = hex::encode(hasher.finalize());
    debug!("Toolchain fingerprint: {}", &digest[..12]);
    ToolchainFingerprint {
        digest,
        compiler_banner,
    }
}

async fn compiler_banner(env: &ProbeEnvironment) -> Option<String> {
    let output = Command::new(&env.compiler)
        .arg("--version")
        .stdin(Stdio::null())
        .output();

    match tokio::time::timeout(env.timeout(), output).await {
        Ok(Ok(out)) if out.status.success() => String::from_utf8_lossy(&out.stdout)
            .lines()
            .next()
            .map(|l| l.trim().to_string()),
        Ok(Ok(_)) | Ok(Err(_)) => {
            warn!(compiler = ?env.compiler, "Compiler did not report a version");
            None
        }
        Err(_) => {
            warn!(compiler = ?env.compiler, "Compiler version query timed out");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_deterministic() {
        let env = ProbeEnvironment::new("cc");
        let a = fingerprint_with_banner(&env, Some("cc (GCC) 13.2.0".to_string()));
        let b = fingerprint_with_banner(&env, Some("cc (GCC) 13.2.0".to_string()));
        assert_eq!(a, b);
        assert_eq!(a.digest.len(), 64); // SHA256 hex
    }

    #[test]
    fn test_changing_flags_changes_fingerprint() {
        let env = ProbeEnvironment::new("cc");
        let a = fingerprint_with_banner(&env, None);
        let b = fingerprint_with_banner(&env.clone().with_cflags(vec!["-m32".to_string()]), None);
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn test_changing_compiler_version_changes_fingerprint() {
        let env = ProbeEnvironment::new("cc");
        let a = fingerprint_with_banner(&env, Some("gcc 12".to_string()));
        let b = fingerprint_with_banner(&env, Some("gcc 13".to_string()));
        assert_ne!(a.digest, b.digest);
        assert_eq!(a.short().len(), 12);
    }

    #[tokio::test]
    async fn test_missing_compiler_has_no_banner() {
        let env = ProbeEnvironment::new("/nonexistent/cfgprobe-cc");
        let fp = fingerprint(&env).await;
        assert!(fp.compiler_banner.is_none());
    }
}
