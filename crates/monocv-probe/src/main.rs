//! Monotonic condition variable probe.
//!
//! Runs timed-wait, hand-off and broadcast scenarios against
//! `MonotonicCondvar` and reports how the host's condition variable behaves.

mod report;
mod scenarios;

use anyhow::{Context, Result};
use clap::Parser;
use monocv_common::config::{OutputFormat, ProbeConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::report::ProbeReport;

/// Environment variable naming a probe configuration file.
const CONFIG_ENV: &str = "MONOCV_PROBE_CONFIG";

/// Probe command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "monocv-probe",
    about = "Measure monotonic condition variable timeouts and wakeups",
    version,
    long_about = None
)]
struct Args {
    /// Path to a probe configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Timed waits to perform (overrides config file).
    #[arg(long, short = 'n')]
    iterations: Option<u32>,

    /// Timeout for each timed wait, e.g. "50ms" (overrides config file).
    #[arg(long, short = 't', value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Print the report as JSON.
    #[arg(long)]
    json: bool,

    /// Also write the report to this file.
    #[arg(long, short = 'o', value_name = "FILE")]
    output: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args.log_level);

    match run(&args) {
        Ok(report) if report.failed() => {
            error!(verdict = %report.verdict, "Probe detected a misbehaving condition variable");
            ExitCode::FAILURE
        }
        Ok(report) => {
            info!(verdict = %report.verdict, "Probe complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(2)
        }
    }
}

/// Initialize logging with the specified log level. Logs go to stderr so
/// the report on stdout stays machine-readable.
fn init_logging(level: &str) {
    let filter = format!("monocv_probe={level},monocv_sync={level},monocv_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: &Args) -> Result<ProbeReport> {
    info!(version = env!("CARGO_PKG_VERSION"), "Starting condition variable probe");

    let mut config = load_config(args.config.as_deref(), std::env::var_os(CONFIG_ENV))?;
    apply_overrides(&mut config, args);

    info!(
        timeout = ?config.timeout.wait_timeout,
        rounds = config.handoff.rounds,
        waiters = config.broadcast.waiters,
        "Configuration loaded"
    );

    let report = run_scenarios(&config)?;

    let rendered = match config.output {
        OutputFormat::Text => report.to_text(),
        OutputFormat::Json => report.to_json().context("Failed to serialize report")?,
    };
    println!("{rendered}");

    if let Some(path) = &config.report_path {
        std::fs::write(path, &rendered)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "Report written");
    }

    Ok(report)
}

fn run_scenarios(config: &ProbeConfig) -> Result<ProbeReport> {
    let max_samples = config.metrics.max_samples;

    let timeout = config
        .timeout
        .enabled
        .then(|| scenarios::run_timeout(&config.timeout, max_samples))
        .transpose()
        .context("Timeout scenario failed")?;
    let handoff = config
        .handoff
        .enabled
        .then(|| scenarios::run_handoff(&config.handoff, max_samples))
        .transpose()
        .context("Hand-off scenario failed")?;
    let broadcast = config
        .broadcast
        .enabled
        .then(|| scenarios::run_broadcast(&config.broadcast, max_samples))
        .transpose()
        .context("Broadcast scenario failed")?;

    Ok(ProbeReport::new(timeout, handoff, broadcast))
}

/// Load configuration from file or use defaults.
///
/// Resolution priority:
/// 1. Command-line `--config` argument
/// 2. `MONOCV_PROBE_CONFIG` environment variable
/// 3. Built-in defaults
fn load_config(
    cli_path: Option<&std::path::Path>,
    env_path: Option<std::ffi::OsString>,
) -> Result<ProbeConfig> {
    if let Some(config_path) = cli_path {
        info!(?config_path, "Loading config from command-line argument");
        return ProbeConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()));
    }

    if let Some(env_path) = env_path {
        let config_path = PathBuf::from(env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from {CONFIG_ENV}");
            return ProbeConfig::from_file(&config_path).with_context(|| {
                format!("Failed to load config from {CONFIG_ENV}={}", config_path.display())
            });
        }
        warn!(
            path = %config_path.display(),
            "{CONFIG_ENV} set but file does not exist, using defaults"
        );
    }

    info!("No config file given, using built-in defaults");
    Ok(ProbeConfig::default())
}

fn apply_overrides(config: &mut ProbeConfig, args: &Args) {
    if let Some(iterations) = args.iterations {
        config.timeout.iterations = iterations;
    }
    if let Some(timeout) = args.timeout {
        config.timeout.wait_timeout = timeout;
    }
    if args.json {
        config.output = OutputFormat::Json;
    }
    if let Some(path) = &args.output {
        config.report_path = Some(path.clone());
    }
}
