//! Header, report and summary output for resolved records.

use cfgprobe_core::fakes::{Scripted, ScriptedProbe};
use cfgprobe_core::{
    write_if_changed, Capability, ConfigurationRecord, Emitter, EngineConfig, HeaderEmitter,
    JsonEmitter, Overrides, PackageMetadata, ProbeEnvironment, ProbeRegistry, ResolvedValue,
    Resolver, SummaryEmitter, WriteOutcome, FORMAT_VERSION,
};

async fn resolve(registry: &ProbeRegistry, probe: &ScriptedProbe) -> ConfigurationRecord {
    let scratch = tempfile::tempdir().unwrap();
    let env = ProbeEnvironment::new("cc").with_scratch_root(scratch.path());
    let config = EngineConfig::default().without_fingerprint();
    Resolver::new(registry, probe, &config)
        .resolve(
            &env,
            &Overrides::new(),
            PackageMetadata::new("libsframe", "BFD_VERSION"),
        )
        .await
        .unwrap()
}

fn example_registry() -> ProbeRegistry {
    ProbeRegistry::from_capabilities(vec![
        Capability::header("byteswap.h"),
        Capability::declaration("bswap_16")
            .with_includes(["byteswap.h"])
            .depends_on("HAVE_BYTESWAP_H"),
        Capability::header("dlfcn.h"),
    ])
    .unwrap()
}

#[tokio::test]
async fn test_dlfcn_and_bswap_example() {
    let registry = example_registry();
    let probe = ScriptedProbe::new().with("HAVE_BYTESWAP_H", Scripted::Absent);
    let header = HeaderEmitter::new().emit(&resolve(&registry, &probe).await).unwrap();

    assert!(header.contains("\n#define HAVE_DLFCN_H 1\n"));
    assert!(header.contains("\n#define HAVE_DECL_BSWAP_16 0\n"));
    assert!(header.contains("\n/* #undef HAVE_BYTESWAP_H */\n"));
    assert!(!header.contains("#define HAVE_BYTESWAP_H"));
}

#[tokio::test]
async fn test_absent_presence_never_defined_to_zero() {
    let registry = ProbeRegistry::from_capabilities(vec![
        Capability::header("endian.h"),
        Capability::function("getpagesize"),
        Capability::behavioral("HAVE_MMAP", "int main (void) { return 0; }"),
    ])
    .unwrap();
    let probe = ScriptedProbe::new().with_fallback(Scripted::Absent);
    let header = HeaderEmitter::new().emit(&resolve(&registry, &probe).await).unwrap();

    for name in ["HAVE_ENDIAN_H", "HAVE_GETPAGESIZE", "HAVE_MMAP"] {
        assert!(header.contains(&format!("/* #undef {} */", name)));
        assert!(!header.contains(&format!("#define {} 0", name)));
    }
}

#[tokio::test]
async fn test_entries_follow_declaration_order() {
    let registry = ProbeRegistry::from_capabilities(vec![
        Capability::header("unistd.h"),
        Capability::header("dlfcn.h"),
        Capability::header("stdint.h"),
    ])
    .unwrap();
    let header = HeaderEmitter::new()
        .emit(&resolve(&registry, &ScriptedProbe::new()).await)
        .unwrap();

    let unistd = header.find("HAVE_UNISTD_H 1").unwrap();
    let dlfcn = header.find("HAVE_DLFCN_H 1").unwrap();
    let stdint = header.find("HAVE_STDINT_H 1").unwrap();
    assert!(unistd < dlfcn && dlfcn < stdint);
}

#[tokio::test]
async fn test_package_block_and_descriptions() {
    let registry = example_registry();
    let probe = ScriptedProbe::new();
    let header = HeaderEmitter::new()
        .with_source("libsframe.toml")
        .emit(&resolve(&registry, &probe).await)
        .unwrap();

    assert!(header.starts_with("/* config.h.  Generated from libsframe.toml by cfgprobe.  */\n"));
    assert!(header.contains(&format!("cfgprobe header format {}", FORMAT_VERSION)));
    assert!(header.contains("/* Name of package */\n#define PACKAGE \"libsframe\"\n"));
    assert!(header.contains("#define PACKAGE_BUGREPORT \"\"\n"));
    assert!(header.contains("#define PACKAGE_STRING \"libsframe BFD_VERSION\"\n"));
    assert!(header.contains("#define PACKAGE_TARNAME \"libsframe\"\n"));
    assert!(header.contains("#define VERSION \"BFD_VERSION\"\n"));
    assert!(header.contains(
        "/* Define to 1 if you have the <dlfcn.h> header file. */\n#define HAVE_DLFCN_H 1\n"
    ));

    let package_at = header.find("#define PACKAGE ").unwrap();
    let first_entry = header.find("HAVE_BYTESWAP_H").unwrap();
    assert!(package_at < first_entry);
}

#[tokio::test]
async fn test_guarded_and_string_defines() {
    let registry = ProbeRegistry::from_capabilities(vec![
        Capability::define("LT_OBJDIR", ResolvedValue::Text(".libs/".to_string())),
        Capability::define("_GNU_SOURCE", ResolvedValue::Flag(true)).guarded(),
        Capability::define("_MINIX", ResolvedValue::Undefined),
    ])
    .unwrap();
    let header = HeaderEmitter::new()
        .emit(&resolve(&registry, &ScriptedProbe::new()).await)
        .unwrap();

    assert!(header.contains("#define LT_OBJDIR \".libs/\"\n"));
    assert!(header.contains("#ifndef _GNU_SOURCE\n# define _GNU_SOURCE 1\n#endif\n"));
    assert!(header.contains("/* #undef _MINIX */\n"));
}

#[tokio::test]
async fn test_header_is_byte_identical_across_runs() {
    let registry = example_registry();
    let first = HeaderEmitter::new()
        .emit(&resolve(&registry, &ScriptedProbe::new()).await)
        .unwrap();
    let second = HeaderEmitter::new()
        .emit(&resolve(&registry, &ScriptedProbe::new()).await)
        .unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_regeneration_leaves_file_untouched() {
    let registry = example_registry();
    let header = HeaderEmitter::new()
        .emit(&resolve(&registry, &ScriptedProbe::new()).await)
        .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.h");

    assert_eq!(write_if_changed(&path, &header).unwrap(), WriteOutcome::Written);
    let modified = std::fs::metadata(&path).unwrap().modified().unwrap();
    assert_eq!(write_if_changed(&path, &header).unwrap(), WriteOutcome::Unchanged);
    assert_eq!(std::fs::metadata(&path).unwrap().modified().unwrap(), modified);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), header);
}

#[tokio::test]
async fn test_json_report_carries_provenance_and_digest() {
    let registry = example_registry();
    let probe = ScriptedProbe::new().with("HAVE_BYTESWAP_H", Scripted::Absent);
    let record = resolve(&registry, &probe).await;
    let report: serde_json::Value =
        serde_json::from_str(&JsonEmitter.emit(&record).unwrap()).unwrap();

    assert_eq!(report["format_version"], FORMAT_VERSION);
    assert_eq!(report["digest"], record.digest());
    assert_eq!(report["package"]["name"], "libsframe");
    let entries = report["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[1]["name"], "HAVE_DECL_BSWAP_16");
    assert_eq!(entries[1]["value"], false);
    assert_eq!(entries[1]["provenance"]["source"], "propagated");
}

#[tokio::test]
async fn test_summary_lines() {
    let registry = example_registry();
    let probe = ScriptedProbe::new().with("HAVE_BYTESWAP_H", Scripted::Absent);
    let summary = SummaryEmitter.emit(&resolve(&registry, &probe).await).unwrap();

    assert_eq!(
        summary,
        "checking for byteswap.h... no\n\
         checking whether bswap_16 is declared... no (requires HAVE_BYTESWAP_H)\n\
         checking for dlfcn.h... yes\n"
    );
}
