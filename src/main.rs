//! CLI entry point for the PVCAM stall probe.
//!
//! # Usage
//!
//! Run against the simulated camera with defaults (200 frames, 2 s deadline):
//! ```bash
//! pvcam_stall_probe run
//! ```
//!
//! Run five times against real hardware, JSON report:
//! ```bash
//! pvcam_stall_probe run --backend pvcam --runs 5 --json
//! ```
//!
//! List cameras:
//! ```bash
//! pvcam_stall_probe list --backend pvcam
//! ```
//!
//! Exit status: 0 completed, 1 stalled, 2 setup failed.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pvcam_stall_probe::acquisition::AcquisitionRunner;
use pvcam_stall_probe::config::{Backend, LogFormat, ProbeConfig, ReportFormat, DEFAULT_CONFIG_PATH};
use pvcam_stall_probe::{logging, sdk, Report};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "pvcam_stall_probe")]
#[command(about = "Detects silent frame-delivery stalls in PVCAM continuous acquisition", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Camera backend (overrides config)
    #[arg(long, global = true, value_enum)]
    backend: Option<Backend>,

    /// Log format (overrides config)
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run continuous acquisition and report completion or stall
    Run {
        /// Frames needed for success
        #[arg(long)]
        target: Option<u32>,

        /// Per-frame deadline, e.g. "2s" or "500ms"
        #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration)]
        deadline: Option<Duration>,

        /// Consecutive runs; stops at the first that does not complete
        #[arg(long)]
        runs: Option<u32>,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List cameras the backend can open
    List,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let mut config = ProbeConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    if let Some(backend) = cli.backend {
        config.camera.backend = backend;
    }
    if let Some(format) = cli.log_format {
        config.application.log_format = format;
    }

    match cli.command {
        Commands::Run {
            target,
            deadline,
            runs,
            json,
        } => {
            if let Some(target) = target {
                config.acquisition.target_frames = target;
            }
            if let Some(deadline) = deadline {
                config.acquisition.frame_deadline = deadline;
            }
            if let Some(runs) = runs {
                config.acquisition.runs = runs;
            }
            if json {
                config.report.format = ReportFormat::Json;
            }
            config.validate()?;
            logging::init_from_config(&config)?;
            run_probe(config).await
        }
        Commands::List => {
            config.validate()?;
            logging::init_from_config(&config)?;
            list_cameras(config).await
        }
    }
}

async fn run_probe(config: ProbeConfig) -> Result<ExitCode> {
    tracing::info!(
        app = %config.application.name,
        backend = ?config.camera.backend,
        camera = %config.camera.name,
        target = config.acquisition.target_frames,
        deadline = ?config.acquisition.frame_deadline,
        runs = config.acquisition.runs,
        "Starting stall probe"
    );

    // PVCAM calls block; keep them off the async workers.
    let reports = tokio::task::spawn_blocking(move || -> Result<Vec<Report>> {
        let sdk = sdk::connect(config.camera.backend, &config.mock)?;
        let runner = AcquisitionRunner::new(sdk, config.acquisition_settings());

        let mut reports = Vec::new();
        for run in 1..=config.acquisition.runs {
            let outcome = runner.run(run);
            let report = Report::from_outcome(&outcome);
            print_report(&report, config.report.format)?;
            let completed = outcome.is_completed();
            reports.push(report);
            if !completed {
                break;
            }
        }
        Ok(reports)
    })
    .await
    .context("Acquisition task failed")??;

    let exit_code = reports.last().map_or(0, Report::exit_code);
    if reports.len() > 1 {
        let completed = reports.iter().filter(|r| r.exit_code() == 0).count();
        tracing::info!(completed, runs = reports.len(), "Probe finished");
    }
    Ok(ExitCode::from(u8::try_from(exit_code).unwrap_or(1)))
}

fn print_report(report: &Report, format: ReportFormat) -> Result<()> {
    match format {
        ReportFormat::Text => print!("{}", report.render_text()),
        ReportFormat::Json => println!("{}", report.render_json()?),
    }
    Ok(())
}

async fn list_cameras(config: ProbeConfig) -> Result<ExitCode> {
    let names = tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
        let sdk = sdk::connect(config.camera.backend, &config.mock)?;
        Ok(sdk.enumerate_cameras()?)
    })
    .await
    .context("Camera enumeration task failed")??;

    if names.is_empty() {
        println!("No cameras found");
    }
    for (index, name) in names.iter().enumerate() {
        println!("{index}: {name}");
    }
    Ok(ExitCode::SUCCESS)
}
