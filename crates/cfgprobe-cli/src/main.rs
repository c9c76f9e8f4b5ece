//! cfgprobe - capability detection and config header generation
//!
//! ## Commands
//!
//! - `run`: probe a toolchain against a catalog and write `config.h`
//! - `check`: validate a catalog and print its evaluation waves
//!
//! ## Exit status
//!
//! 0 on success, 2 for catalog/registry/override errors, 3 when too many
//! core probes were inconclusive, 4 when another run holds the scratch
//! directory, 1 for anything else.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};

use cfgprobe_core::{
    Catalog, CompilerProbe, ConfigureError, Engine, EngineConfig, HeaderEmitter, Overrides,
    PackageMetadata, ProbeEnvironment, WriteOutcome,
};
use cfgprobe_toolchain::{discover_compiler, DEFAULT_TIMEOUT_MS};

#[derive(Parser)]
#[command(name = "cfgprobe")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Probe a C toolchain and emit a deterministic config.h", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe every capability in a catalog and write the results
    Run(RunArgs),

    /// Validate a catalog without probing
    Check {
        /// Catalog file (TOML)
        #[arg(short, long)]
        catalog: PathBuf,

        /// Print the evaluation waves as JSON
        #[arg(long)]
        waves_json: bool,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Catalog file (TOML)
    #[arg(short, long)]
    catalog: PathBuf,

    /// Header to write
    #[arg(short, long, default_value = "config.h")]
    output: PathBuf,

    /// Also write a JSON report here
    #[arg(long)]
    report: Option<PathBuf>,

    /// C compiler (auto-detected when omitted)
    #[arg(long, env = "CC")]
    cc: Option<PathBuf>,

    /// Extra compile flags
    #[arg(long, env = "CFLAGS", default_value = "")]
    cflags: String,

    /// Extra link flags
    #[arg(long, env = "LDFLAGS", default_value = "")]
    ldflags: String,

    /// Libraries appended to link steps
    #[arg(long, env = "LIBS", default_value = "")]
    libs: String,

    /// Target triple (defaults to the host)
    #[arg(long, env = "CFGPROBE_TARGET")]
    target: Option<String>,

    /// Scratch directory for trial compiles
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Maximum concurrent probes (default: available parallelism)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Per-step compiler timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS)]
    step_timeout_ms: u64,

    /// Overall per-probe timeout in seconds
    #[arg(long, default_value = "120")]
    probe_timeout: u64,

    /// Force a capability's value without probing (NAME=VALUE, repeatable)
    #[arg(short = 'D', long = "define", value_name = "NAME=VALUE")]
    defines: Vec<String>,

    /// Override the catalog's package name
    #[arg(long)]
    package_name: Option<String>,

    /// Override the catalog's package version
    #[arg(long)]
    package_version: Option<String>,

    /// Override the catalog's bug-report address
    #[arg(long)]
    bugreport: Option<String>,

    /// Override the catalog's package URL
    #[arg(long)]
    url: Option<String>,

    /// Skip hashing the compiler banner into the report
    #[arg(long)]
    no_fingerprint: bool,

    /// Do not print the `checking for ...` summary
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    cfgprobe_core::telemetry::init_tracing(cli.json, level);

    let result = match cli.command {
        Commands::Run(args) => cmd_run(args).await,
        Commands::Check {
            catalog,
            waves_json,
        } => cmd_check(&catalog, waves_json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("cfgprobe: {:#}", err);
            ExitCode::from(exit_status(&err))
        }
    }
}

/// Map an error chain to the documented exit status.
fn exit_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<ConfigureError>() {
        Some(e) if e.is_structural() => 2,
        Some(ConfigureError::MajorityProbeFailure { .. }) => 3,
        Some(ConfigureError::EngineBusy { .. }) => 4,
        _ => 1,
    }
}

fn split_flags(flags: &str) -> Vec<String> {
    flags.split_whitespace().map(str::to_string).collect()
}

fn catalog_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

async fn build_environment(args: &RunArgs) -> ProbeEnvironment {
    let compiler = match &args.cc {
        Some(cc) => cc.clone(),
        None => match discover_compiler().await {
            Ok(cc) => cc,
            Err(e) => {
                // Keep going: every probe will come back indeterminate.
                warn!(error = %e, "No C compiler found");
                PathBuf::from("cc")
            }
        },
    };

    let mut env = ProbeEnvironment::new(compiler)
        .with_cflags(split_flags(&args.cflags))
        .with_ldflags(split_flags(&args.ldflags))
        .with_libs(split_flags(&args.libs))
        .with_timeout_ms(args.step_timeout_ms);
    if let Some(target) = &args.target {
        env = env.with_target(target.clone());
    }
    if let Some(dir) = &args.scratch_dir {
        env = env.with_scratch_root(dir.clone());
    }
    env
}

fn package_metadata(catalog: &Catalog, args: &RunArgs) -> PackageMetadata {
    let mut package = catalog.package.clone();
    if let Some(name) = &args.package_name {
        package.name = name.clone();
        package.tarname.clear();
    }
    if let Some(version) = &args.package_version {
        package.version = version.clone();
    }
    if let Some(bugreport) = &args.bugreport {
        package.bugreport = bugreport.clone();
    }
    if let Some(url) = &args.url {
        package.url = url.clone();
    }
    package.normalized()
}

async fn cmd_run(args: RunArgs) -> Result<()> {
    let catalog = Catalog::load(&args.catalog)
        .with_context(|| format!("Failed to load catalog {:?}", args.catalog))?;
    let registry = catalog.registry()?;
    let overrides = Overrides::from_assignments(&args.defines)?;
    let env = build_environment(&args).await;

    let mut config = EngineConfig::default()
        .with_probe_timeout(Duration::from_secs(args.probe_timeout));
    if let Some(jobs) = args.jobs {
        config = config.with_jobs(jobs);
    }
    if args.no_fingerprint {
        config = config.without_fingerprint();
    }

    info!(
        catalog = %args.catalog.display(),
        capabilities = registry.len(),
        compiler = %env.compiler.display(),
        target = %env.effective_target(),
        "Starting probe run"
    );

    let header = HeaderEmitter::new().with_source(catalog_label(&args.catalog));
    let mut engine =
        Engine::new(registry, Arc::new(CompilerProbe), config).with_header_emitter(header);
    let output = engine
        .run(&env, &overrides, package_metadata(&catalog, &args))
        .await?;

    if !args.quiet {
        print!("{}", output.summary);
    }

    let outcome = output
        .write(&args.output, args.report.as_deref())
        .with_context(|| format!("Failed to write {:?}", args.output))?;
    match outcome {
        WriteOutcome::Written => println!("config.status: creating {}", args.output.display()),
        WriteOutcome::Unchanged => {
            println!("config.status: {} is unchanged", args.output.display())
        }
    }
    Ok(())
}

fn cmd_check(catalog_path: &Path, waves_json: bool) -> Result<()> {
    let catalog = Catalog::load(catalog_path)
        .with_context(|| format!("Failed to load catalog {:?}", catalog_path))?;
    let registry = catalog.registry()?;
    let levels = registry.evaluation_levels()?;

    if waves_json {
        let waves: Vec<Vec<&str>> = levels
            .iter()
            .map(|level| level.iter().map(|c| c.name.as_str()).collect())
            .collect();
        let doc = serde_json::json!({
            "package": catalog.package().package_string(),
            "capabilities": registry.len(),
            "waves": waves,
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    println!(
        "{}: {} capabilities in {} waves",
        catalog.package().package_string(),
        registry.len(),
        levels.len()
    );
    for (i, level) in levels.iter().enumerate() {
        let names: Vec<&str> = level.iter().map(|c| c.name.as_str()).collect();
        println!("  wave {}: {}", i, names.join(" "));
    }
    Ok(())
}
