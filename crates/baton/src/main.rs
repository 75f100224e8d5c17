//! baton - two-phase task scheduling driver
//!
//! # Quick Start
//!
//! ```bash
//! # Run the startup pipeline with defaults
//! baton run
//!
//! # Coalesce the UI steps and log as JSON
//! baton --log-format json run --coalesce
//!
//! # Print a sample configuration
//! baton sample-config > baton.toml
//! ```
//!
//! # Configuration
//!
//! Configuration can be provided via:
//! - A TOML configuration file (`--config <FILE>`)
//! - Environment variables (prefixed with `BATON_`)
//!
//! Command-line logging flags take precedence over both.
//!
//! This crate is a thin CLI wrapper around [`baton_app`], which holds the
//! configuration, logging and pipeline logic.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use baton_app::logging::{self, LogFormat};
use baton_app::{run_startup, AppConfig};
use baton_task::TaskScheduler;

/// Two-phase task scheduling driver
#[derive(Parser)]
#[command(name = "baton")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Log output format (overrides the config file)
    #[arg(long, global = true)]
    log_format: Option<CliLogFormat>,

    #[command(subcommand)]
    command: Commands,
}

/// Log output format for CLI
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CliLogFormat {
    Text,
    Json,
}

impl From<CliLogFormat> for LogFormat {
    fn from(fmt: CliLogFormat) -> Self {
        match fmt {
            CliLogFormat::Text => LogFormat::Text,
            CliLogFormat::Json => LogFormat::Json,
        }
    }
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Run the startup pipeline
    Run {
        /// Run all UI steps in a single UI task
        #[arg(long)]
        coalesce: bool,

        /// Override the number of worker threads
        #[arg(long)]
        pool_threads: Option<usize>,

        /// Override the number of heartbeats to wait for
        #[arg(long)]
        heartbeats: Option<u64>,
    },

    /// Print sample configuration
    SampleConfig,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::SampleConfig = cli.command {
        print!("{}", AppConfig::sample_config());
        return Ok(());
    }

    let config = load_config(&cli)?;
    init_logging(&cli, &config)?;

    match cli.command {
        Commands::Run {
            coalesce,
            pool_threads,
            heartbeats,
        } => cmd_run(config, coalesce, pool_threads, heartbeats),
        Commands::SampleConfig => Ok(()),
    }
}

/// Load configuration from file or use defaults.
fn load_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let config = match cli.config {
        Some(ref config_path) => AppConfig::from_file_with_env(config_path)?,
        None => {
            let mut config = AppConfig::default();
            config.apply_env_overrides();
            config
        }
    };
    Ok(config)
}

fn init_logging(cli: &Cli, config: &AppConfig) -> anyhow::Result<()> {
    let mut log_config = config.logging.to_log_config()?;
    if cli.trace {
        log_config = log_config.with_level("trace");
    } else if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    if let Some(format) = cli.log_format {
        log_config = log_config.with_format(format.into());
    }

    logging::init(&log_config)?;

    tracing::debug!(config = ?cli.config, "Logging initialized");
    Ok(())
}

fn cmd_run(
    mut config: AppConfig,
    coalesce: bool,
    pool_threads: Option<usize>,
    heartbeats: Option<u64>,
) -> anyhow::Result<()> {
    if coalesce {
        config.startup.coalesce_ui_steps = true;
    }
    if let Some(threads) = pool_threads {
        config.scheduler.pool_threads = threads;
    }
    if let Some(beats) = heartbeats {
        config.startup.heartbeats = beats;
    }
    config.validate()?;

    let scheduler = TaskScheduler::new(config.scheduler.clone())?;
    let report = run_startup(&scheduler, &config.startup)?;
    scheduler.shutdown();

    println!(
        "pre-native: {}/{} | ui steps: {} | deferred: {} | heartbeats: {} | elapsed: {:?}",
        report.pre_native_ran,
        report.pre_native_queued,
        report.ui_steps_ran,
        report.deferred_ran,
        report.heartbeats,
        report.elapsed
    );
    Ok(())
}
