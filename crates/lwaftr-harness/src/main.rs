//! lwAFTR validation harness CLI.
//!
//! - `end-to-end [-r]`: golden-capture checks in both topologies, or
//!   regeneration of the goldens
//! - `soak [DURATION] [--vlan]`: timed soak of every registered case
//! - `subcommands`: live-daemon checks of `run`, `monitor` and `loadtest`

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use lwaftr_harness::case::Registry;
use lwaftr_harness::config::{
    soak_duration_from_secs, HarnessConfig, HarnessConfigInput, RunMode,
};
use lwaftr_harness::matrix::MatrixRunner;
use lwaftr_harness::report::BatchReport;
use lwaftr_harness::soak::SoakRunner;
use lwaftr_harness::subject::ProcessSubject;
use lwaftr_harness::suites::{all_suites, SuiteEnv};
use lwaftr_netsim::discovery::{is_root, tap_backend};
use lwaftr_netsim::tap::TapBackend;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "lwaftr-harness", about = "lwAFTR end-to-end, soak and subcommand tests")]
struct Cli {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Root of the lwAFTR tests tree (overrides TESTS_DIR).
    #[arg(long)]
    tests_dir: Option<PathBuf>,

    /// Root for test-case file references (overrides TEST_BASE).
    #[arg(long)]
    test_base: Option<PathBuf>,

    /// Subject binary (overrides LWAFTR_SUBJECT_BIN).
    #[arg(long)]
    subject: Option<PathBuf>,

    /// Test case registry. Defaults to `<tests-dir>/end-to-end/test_list.toml`.
    #[arg(long)]
    registry: Option<PathBuf>,

    /// Print the batch report as JSON on stdout.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Run even when not root.
    #[arg(long, default_value_t = false)]
    allow_unprivileged: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compare the subject's output captures against the goldens.
    EndToEnd {
        /// Regenerate goldens and counters instead of verifying.
        #[arg(short = 'r', long = "regen", default_value_t = false)]
        regen: bool,
    },
    /// Run `soaktest` on every case in both topologies.
    Soak {
        /// Seconds per soak run.
        duration: Option<f64>,
        /// Use the VLAN test data.
        #[arg(long, default_value_t = false)]
        vlan: bool,
    },
    /// Exercise `run`, `monitor` and `loadtest` against a live daemon.
    Subcommands,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    match run(Cli::parse()) {
        Ok(report) if report.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<BatchReport> {
    if !cli.allow_unprivileged && !is_root() {
        bail!("This harness must be run as root");
    }

    let mut cfg = resolve_config(&cli)?;
    cfg.progress = !cli.json;
    tracing::info!(
        tests_dir = %cfg.tests_dir.display(),
        subject = %cfg.subject_bin.display(),
        nics = %cfg.nics,
        "lwaftr-harness starting"
    );
    let subject = ProcessSubject::from_config(&cfg);

    let report = match cli.command {
        Command::EndToEnd { .. } => {
            let registry = load_registry(&cli, &cfg)?;
            MatrixRunner::new(&cfg, &subject).run(&registry)?
        }
        Command::Soak { duration, vlan } => {
            let registry = load_registry(&cli, &cfg)?;
            let mut runner = SoakRunner::new(&cfg, &subject);
            if let Some(secs) = duration {
                runner = runner.with_duration(soak_duration_from_secs(secs)?);
            }
            if vlan {
                runner = runner.with_test_base(cfg.vlan_test_base());
            }
            runner.run(&registry)?
        }
        Command::Subcommands => {
            let taps = tap_backend().map(|b| -> Arc<dyn TapBackend> { Arc::new(b) });
            all_suites(&SuiteEnv::new(&cfg, &subject, taps))?
        }
    };

    if cli.json {
        println!("{}", report.to_json());
    } else {
        println!("{report}");
    }
    Ok(report)
}

fn resolve_config(cli: &Cli) -> anyhow::Result<HarnessConfig> {
    let mut input = match &cli.config {
        Some(path) => HarnessConfigInput::from_file(path)?,
        None => HarnessConfigInput::default(),
    }
    .with_env();

    if let Some(dir) = &cli.tests_dir {
        input.tests_dir = Some(dir.clone());
    }
    if let Some(base) = &cli.test_base {
        input.test_base = Some(base.clone());
    }
    if let Some(bin) = &cli.subject {
        input.subject_bin = Some(bin.clone());
    }
    if let Command::EndToEnd { regen: true } = cli.command {
        input.mode = Some(RunMode::Regenerate);
    }
    input.resolve().context("resolving harness configuration")
}

fn load_registry(cli: &Cli, cfg: &HarnessConfig) -> anyhow::Result<Registry> {
    let path = cli
        .registry
        .clone()
        .unwrap_or_else(|| cfg.tests_dir.join("end-to-end").join("test_list.toml"));
    let registry = Registry::load(&path)
        .with_context(|| format!("loading test registry {}", path.display()))?;
    tracing::info!(cases = registry.len(), path = %path.display(), "registry loaded");
    Ok(registry)
}
