//! Command-line runner for Android app-lifecycle scenarios.
//!
//! Runs lifecycle scenarios against an attached device over `adb`, checks
//! the device log after each one, and exits non-zero on any crash, uncaught
//! exception, or ANR.
//!
//! # Usage
//!
//! ```bash
//! # Run every built-in scenario
//! lifeline run --all
//!
//! # Run selected scenarios on a specific device
//! lifeline -s emulator-5554 run launch_and_back home_and_resume
//!
//! # Run scenarios from a JSON file and keep the report
//! lifeline run --file scenarios.json --report report.json
//!
//! # List the built-in scenarios
//! lifeline list
//!
//! # Classify a saved log without a device
//! lifeline check-log /tmp/lifeline/run_.../launch_and_back/logcat.txt
//!
//! # Show the device under test
//! lifeline device-info
//! ```
//!
//! Exit codes: `0` success (or no device, without `--require-device`),
//! `1` an app failure was detected, `2` the harness itself failed, `3` bad
//! configuration or usage.

use clap::{ArgAction, Parser, Subcommand};
use lifeline_core::channel::DeviceId;
use lifeline_core::config::{lifeline_dir, HarnessConfig};
use lifeline_core::crash::{self, CrashKind};
use lifeline_core::device::{self, DeviceInfo};
use lifeline_core::runner::{Outcome, RunReport, Runner};
use lifeline_core::scenario::{self, Scenario};
use lifeline_core::session::Harness;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Run Android app-lifecycle scenarios and fail on crashes, exceptions, and ANRs.
#[derive(Parser)]
#[command(name = "lifeline")]
#[command(about = "Run Android app-lifecycle scenarios and fail on crashes, exceptions, and ANRs")]
#[command(version)]
struct Cli {
    /// Device serial to target (adb -s)
    #[arg(short, long, global = true, env = "LIFELINE_SERIAL")]
    serial: Option<String>,

    /// Config file [default: ~/.lifeline/config.json]
    #[arg(short, long, global = true, env = "LIFELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Root directory for run artifacts
    #[arg(long, global = true, env = "LIFELINE_ARTIFACTS")]
    artifacts: Option<PathBuf>,

    /// Output format: text or json
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Also write logs to ~/.lifeline/logs/lifeline.log
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run lifecycle scenarios against the device
    Run {
        /// Built-in scenario names
        names: Vec<String>,
        /// Run every built-in scenario
        #[arg(long, conflicts_with = "names")]
        all: bool,
        /// Load scenarios from a JSON file instead of the built-ins
        #[arg(long, conflicts_with_all = ["names", "all"])]
        file: Option<PathBuf>,
        /// Where to write the JSON report [default: <run dir>/report.json]
        #[arg(long)]
        report: Option<PathBuf>,
        /// Fail instead of skipping when no device is available
        #[arg(long)]
        require_device: bool,
    },

    /// List the built-in scenarios
    List,

    /// Show the identity of the attached device
    DeviceInfo,

    /// Classify a saved device log
    CheckLog {
        /// Path to a logcat dump
        path: PathBuf,
    },

    /// Write the effective configuration to the config file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug)]
enum CliError {
    TestFailed(String),
    Infrastructure(String),
    Usage(String),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::TestFailed(_) => ExitCode::from(1),
            CliError::Infrastructure(_) => ExitCode::from(2),
            CliError::Usage(_) => ExitCode::from(3),
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::TestFailed(msg) => write!(f, "Test failed: {}", msg),
            CliError::Infrastructure(msg) => write!(f, "Infrastructure error: {}", msg),
            CliError::Usage(msg) => write!(f, "Usage error: {}", msg),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_file);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

fn init_tracing(verbose: u8, log_file: bool) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = log_file
        .then(|| lifeline_dir().join("logs"))
        .filter(|dir| std::fs::create_dir_all(dir).is_ok())
        .map(|dir| {
            fmt::layer()
                .with_writer(tracing_appender::rolling::never(dir, "lifeline.log"))
                .with_ansi(false)
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .init();
}

/// Loads the config file and applies command-line overrides.
fn load_config(cli: &Cli) -> Result<HarnessConfig, CliError> {
    let config = match &cli.config {
        Some(path) => HarnessConfig::load_from(path).map_err(|e| CliError::Usage(e.to_string()))?,
        None => HarnessConfig::load(),
    };
    Ok(apply_overrides(cli, config))
}

fn apply_overrides(cli: &Cli, mut config: HarnessConfig) -> HarnessConfig {
    if let Some(serial) = &cli.serial {
        config.serial = Some(DeviceId::new(serial.as_str()));
    }
    if let Some(artifacts) = &cli.artifacts {
        config.artifacts_root = artifacts.clone();
    }
    config
}

fn run(cli: Cli) -> Result<(), CliError> {
    match &cli.command {
        Command::Run {
            names,
            all,
            file,
            report,
            require_device,
        } => {
            let config = load_config(&cli)?;
            let scenarios = select_scenarios(&config, names, *all, file.as_deref())?;
            run_scenarios(&cli, &config, &scenarios, report.as_deref(), *require_device)
        }
        Command::List => {
            let config = load_config(&cli)?;
            list_scenarios(&cli, &config)
        }
        Command::DeviceInfo => {
            let config = load_config(&cli)?;
            show_device(&cli, &config)
        }
        Command::CheckLog { path } => check_log(&cli, path),
        Command::InitConfig { force } => {
            let config = match &cli.config {
                Some(path) if !path.exists() => apply_overrides(&cli, HarnessConfig::default()),
                _ => load_config(&cli)?,
            };
            init_config(&cli, &config, *force)
        }
    }
}

fn select_scenarios(
    config: &HarnessConfig,
    names: &[String],
    all: bool,
    file: Option<&Path>,
) -> Result<Vec<Scenario>, CliError> {
    if let Some(path) = file {
        let scenarios = scenario::load_file(path).map_err(|e| CliError::Usage(e.to_string()))?;
        if scenarios.is_empty() {
            return Err(CliError::Usage(format!("{} contains no scenarios", path.display())));
        }
        return Ok(scenarios);
    }
    if all {
        return Ok(scenario::builtin(&config.activity_a, &config.activity_b));
    }
    if names.is_empty() {
        return Err(CliError::Usage(
            "no scenarios selected: name some, or pass --all or --file".to_string(),
        ));
    }
    names
        .iter()
        .map(|name| {
            scenario::find_builtin(name, &config.activity_a, &config.activity_b)
                .ok_or_else(|| {
                    CliError::Usage(format!("unknown scenario '{}' (see `lifeline list`)", name))
                })
        })
        .collect()
}

fn run_scenarios(
    cli: &Cli,
    config: &HarnessConfig,
    scenarios: &[Scenario],
    report_path: Option<&Path>,
    require_device: bool,
) -> Result<(), CliError> {
    let mut harness = Harness::from_config(config);
    if cli.format == OutputFormat::Json {
        // Keep stdout clean for the report.
        harness = harness.with_echo(Arc::new(Mutex::new(io::stderr())));
    }

    if !device::device_is_available(harness.channel()) {
        let state = device::device_state(harness.channel())
            .unwrap_or_else(|| "unreachable".to_string());
        if require_device {
            return Err(CliError::Infrastructure(format!("no device available (state: {})", state)));
        }
        warn!(state = %state, "no device available");
        eprintln!(
            "No device available (state: {}); skipping {} scenario(s)",
            state,
            scenarios.len()
        );
        return Ok(());
    }

    info!(run_id = harness.run_id(), scenarios = scenarios.len(), "starting run");
    let report = Runner::new(&harness).run(scenarios);

    let path = report_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| harness.run_dir().join("report.json"));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            CliError::Infrastructure(format!("cannot create {}: {}", parent.display(), e))
        })?;
    }
    report
        .write_json(&path)
        .map_err(|e| {
            CliError::Infrastructure(format!("cannot write report {}: {}", path.display(), e))
        })?;

    print_report(cli, &report)?;
    eprintln!("Report written to {}", path.display());

    if report.errors() > 0 {
        return Err(CliError::Infrastructure(format!(
            "{} of {} scenario(s) could not be run",
            report.errors(),
            report.results.len()
        )));
    }
    if report.failed() > 0 {
        return Err(CliError::TestFailed(format!(
            "{} of {} scenario(s) failed",
            report.failed(),
            report.results.len()
        )));
    }
    Ok(())
}

fn print_report(cli: &Cli, report: &RunReport) -> Result<(), CliError> {
    if cli.format == OutputFormat::Json {
        let json = serde_json::to_string_pretty(report)
            .map_err(|e| CliError::Infrastructure(e.to_string()))?;
        println!("{}", json);
        return Ok(());
    }

    println!(
        "Run {} ({} to {})",
        report.run_id,
        report.started_at.format("%Y-%m-%d %H:%M:%S"),
        report.finished_at.format("%H:%M:%S")
    );
    if let Some(device) = &report.device {
        println!("Device: {} ({})", device.device, device.build);
    }
    for result in &report.results {
        let status = match result.outcome {
            Outcome::Passed => "PASS",
            Outcome::Failed(_) => "FAIL",
            Outcome::Error => "ERROR",
        };
        println!("{:<5} {} ({}ms)", status, result.name, result.duration_ms);
        if let Some(message) = &result.message {
            for line in message.lines() {
                println!("      {}", line);
            }
        }
        for issue in &result.teardown_issues {
            println!("      teardown: {:?}", issue);
        }
    }
    println!(
        "{} passed, {} failed, {} errors",
        report.passed(),
        report.failed(),
        report.errors()
    );
    Ok(())
}

fn list_scenarios(cli: &Cli, config: &HarnessConfig) -> Result<(), CliError> {
    let scenarios = scenario::builtin(&config.activity_a, &config.activity_b);
    if cli.format == OutputFormat::Json {
        let json = serde_json::to_string_pretty(&scenarios)
            .map_err(|e| CliError::Infrastructure(e.to_string()))?;
        println!("{}", json);
    } else {
        for s in &scenarios {
            println!("{:<24} {}", s.name, s.description);
        }
    }
    Ok(())
}

fn show_device(cli: &Cli, config: &HarnessConfig) -> Result<(), CliError> {
    let harness = Harness::from_config(config);
    if !device::device_is_available(harness.channel()) {
        return Err(CliError::Infrastructure("no device available".to_string()));
    }
    let info = DeviceInfo::query(harness.channel())
        .map_err(|e| CliError::Infrastructure(e.to_string()))?;
    if cli.format == OutputFormat::Json {
        let json = serde_json::to_string_pretty(&info)
            .map_err(|e| CliError::Infrastructure(e.to_string()))?;
        println!("{}", json);
    } else {
        if let Some(serial) = &info.serial {
            println!("serial: {}", serial);
        }
        println!("device: {}", info.device);
        println!("build:  {}", info.build);
    }
    Ok(())
}

fn check_log(cli: &Cli, path: &Path) -> Result<(), CliError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CliError::Usage(format!("cannot read {}: {}", path.display(), e)))?;
    let kind = crash::classify(&text);
    let evidence = crash::find_evidence(&text, kind);

    if cli.format == OutputFormat::Json {
        let output = serde_json::json!({
            "kind": kind,
            "failure": kind.is_failure(),
            "line": evidence.as_ref().map(|(line, _)| line),
            "text": evidence.as_ref().map(|(_, text)| text),
        });
        println!("{}", output);
    } else {
        println!("{}", kind);
        if let Some((line, text)) = &evidence {
            println!("  line {}: {}", line, text);
        }
    }

    if kind == CrashKind::None {
        Ok(())
    } else {
        Err(CliError::TestFailed(format!("{} in {}", kind, path.display())))
    }
}

fn init_config(cli: &Cli, config: &HarnessConfig, force: bool) -> Result<(), CliError> {
    let path = cli.config.clone().unwrap_or_else(HarnessConfig::default_path);
    if path.exists() && !force {
        return Err(CliError::Usage(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    config
        .save_to(&path)
        .map_err(|e| CliError::Infrastructure(format!("cannot write {}: {}", path.display(), e)))?;
    eprintln!("Wrote {}", path.display());
    Ok(())
}
