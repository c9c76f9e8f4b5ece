//! Whole-engine runs: lifecycle, locking and output writing.

use std::sync::Arc;

use cfgprobe_core::fakes::{Scripted, ScriptedProbe};
use cfgprobe_core::{
    Capability, Catalog, ConfigureError, Engine, EngineConfig, EngineState, Overrides,
    PackageMetadata, ProbeEnvironment, ProbeRegistry, RunLock, WriteOutcome,
};

fn registry() -> ProbeRegistry {
    ProbeRegistry::from_capabilities(vec![
        Capability::header("byteswap.h"),
        Capability::declaration("bswap_16").depends_on("HAVE_BYTESWAP_H"),
        Capability::header("dlfcn.h"),
        Capability::behavioral("HAVE_MMAP", "int main (void) { return 0; }"),
    ])
    .unwrap()
}

fn config() -> EngineConfig {
    EngineConfig::default().with_jobs(2).without_fingerprint()
}

#[tokio::test]
async fn test_run_returns_to_idle_with_output() {
    let scratch = tempfile::tempdir().unwrap();
    let env = ProbeEnvironment::new("cc").with_scratch_root(scratch.path());
    let probe = Arc::new(ScriptedProbe::new().with("HAVE_BYTESWAP_H", Scripted::Absent));
    let mut engine = Engine::new(registry(), probe.clone(), config());

    let output = engine
        .run(&env, &Overrides::new(), PackageMetadata::new("libsframe", "BFD_VERSION"))
        .await
        .unwrap();

    assert_eq!(engine.state(), EngineState::Idle);
    assert!(output.header.contains("#define HAVE_DLFCN_H 1"));
    assert!(output.header.contains("#define HAVE_DECL_BSWAP_16 0"));
    assert!(output.summary.contains("checking for dlfcn.h... yes"));
    assert_eq!(output.record.len(), 4);
    assert_eq!(output.stats.probed, 3);
    assert!(output.record.toolchain.is_none());
    assert!(!scratch.path().join(".cfgprobe.lock").exists());
}

#[tokio::test]
async fn test_override_scenario_through_engine() {
    let scratch = tempfile::tempdir().unwrap();
    let env = ProbeEnvironment::new("cc").with_scratch_root(scratch.path());
    let probe = Arc::new(ScriptedProbe::new());
    let mut engine = Engine::new(registry(), probe.clone(), config());
    let overrides = Overrides::from_assignments(["HAVE_MMAP=0"]).unwrap();

    let output = engine
        .run(&env, &overrides, PackageMetadata::new("libsframe", "1.0"))
        .await
        .unwrap();

    assert!(output.header.contains("/* #undef HAVE_MMAP */"));
    assert!(!probe.was_probed("HAVE_MMAP"));
}

#[tokio::test]
async fn test_busy_environment_rejected() {
    let scratch = tempfile::tempdir().unwrap();
    let env = ProbeEnvironment::new("cc").with_scratch_root(scratch.path());
    let probe = Arc::new(ScriptedProbe::new());
    let mut engine = Engine::new(registry(), probe.clone(), config());

    let _held = RunLock::acquire(scratch.path()).unwrap();
    let err = engine
        .run(&env, &Overrides::new(), PackageMetadata::new("x", "1"))
        .await
        .unwrap_err();

    assert!(matches!(err, ConfigureError::EngineBusy { .. }));
    assert_eq!(engine.state(), EngineState::Idle);
    assert!(probe.calls().is_empty());
}

#[tokio::test]
async fn test_failed_run_resets_state_and_writes_nothing() {
    let scratch = tempfile::tempdir().unwrap();
    let env = ProbeEnvironment::new("cc").with_scratch_root(scratch.path());
    let probe = Arc::new(ScriptedProbe::new().with_fallback(Scripted::ToolchainMissing));
    let mut engine = Engine::new(registry(), probe, config());

    let err = engine
        .run(&env, &Overrides::new(), PackageMetadata::new("x", "1"))
        .await
        .unwrap_err();

    assert!(matches!(err, ConfigureError::MajorityProbeFailure { .. }));
    assert_eq!(engine.state(), EngineState::Idle);
    assert!(!scratch.path().join(".cfgprobe.lock").exists());

    // The engine can run again after a failure.
    let err = engine
        .run(&env, &Overrides::new(), PackageMetadata::new("x", "1"))
        .await
        .unwrap_err();
    assert!(matches!(err, ConfigureError::MajorityProbeFailure { .. }));
}

#[tokio::test]
async fn test_output_write_is_idempotent() {
    let scratch = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    let env = ProbeEnvironment::new("cc").with_scratch_root(scratch.path());
    let mut engine = Engine::new(registry(), Arc::new(ScriptedProbe::new()), config());
    let header_path = out.path().join("config.h");
    let report_path = out.path().join("config.json");

    let first = engine
        .run(&env, &Overrides::new(), PackageMetadata::new("x", "1"))
        .await
        .unwrap();
    assert_eq!(
        first.write(&header_path, Some(&report_path)).unwrap(),
        WriteOutcome::Written
    );

    let second = engine
        .run(&env, &Overrides::new(), PackageMetadata::new("x", "1"))
        .await
        .unwrap();
    assert_ne!(first.run_id, second.run_id);
    assert_eq!(
        second.write(&header_path, Some(&report_path)).unwrap(),
        WriteOutcome::Unchanged
    );
    assert!(report_path.exists());
}

#[tokio::test]
async fn test_catalog_drives_engine() {
    let catalog = Catalog::from_toml_str(
        r#"
[package]
name = "demo"
version = "0.1"

[[capability]]
kind = "header"
subject = "stdint.h"

[[capability]]
name = "_GNU_SOURCE"
kind = "define"
value = 1
guarded = true
"#,
    )
    .unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let env = ProbeEnvironment::new("cc").with_scratch_root(scratch.path());
    let mut engine = Engine::new(
        catalog.registry().unwrap(),
        Arc::new(ScriptedProbe::new()),
        config(),
    );

    let output = engine
        .run(&env, &Overrides::new(), catalog.package())
        .await
        .unwrap();

    assert!(output.header.contains("#define HAVE_STDINT_H 1"));
    assert!(output.header.contains("#ifndef _GNU_SOURCE\n# define _GNU_SOURCE 1\n#endif"));
    assert!(output.header.contains("#define PACKAGE_TARNAME \"demo\""));
}
