//! CLI entry point for Galileo.
//!
//! Runs the simulated experiment under the measurement kernel with the text
//! console on stdin/stdout.
//!
//! # Usage
//!
//! ```bash
//! galileo run --points 500 --interval 0.05
//! galileo run --config config/galileo.toml --plot-program target/debug/galileo-plot
//! ```

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use galileo::config::{GalileoConfig, DEFAULT_CONFIG_PATH};
use galileo::console::{Console, ConsoleResources};
use galileo::consumer::{ConsumerLauncher, ProcessLauncher, ThreadLauncher};
use galileo::kernel::{Kernel, KernelSettings};
use galileo::plotter::run_consumer;
use galileo::sim::SimulatedExperiment;
use galileo::tracing_setup;

#[derive(Parser)]
#[command(name = "galileo")]
#[command(about = "Measurement kernel with overlapped logging and live plotting", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the simulated experiment interactively
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Number of measurements (unlimited by default)
        #[arg(long)]
        points: Option<u64>,

        /// Measurement interval in seconds
        #[arg(long)]
        interval: Option<f64>,

        /// Plotting consumer executable (in-process headless consumer if omitted)
        #[arg(long)]
        plot_program: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            points,
            interval,
            plot_program,
        } => run(config, points, interval, plot_program),
    }
}

fn run(config_path: PathBuf, points: Option<u64>, interval: Option<f64>, plot_program: Option<PathBuf>) -> Result<()> {
    let mut config = GalileoConfig::load_from(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if points.is_some() {
        config.simulation.points = points;
    }
    if let Some(interval) = interval {
        config.simulation.interval_secs = interval;
    }
    if plot_program.is_some() {
        config.plotting.consumer_program = plot_program;
    }
    config.validate()?;

    tracing_setup::init_from_config(&config).map_err(anyhow::Error::msg)?;
    info!(name = %config.application.name, "Configuration loaded");

    let resources = ConsoleResources::load(&config.console)?;
    let experiment = Arc::new(SimulatedExperiment::new(config.simulation.clone()));
    let kernel = Kernel::builder(experiment, launcher(&config))
        .settings(KernelSettings::from_config(&config.plotting))
        .build();

    kernel.start().context("starting measurements")?;

    let console = Console::new(&kernel, resources);
    console.run(io::stdin().lock(), io::stdout().lock())?;
    Ok(())
}

fn launcher(config: &GalileoConfig) -> Box<dyn ConsumerLauncher> {
    match &config.plotting.consumer_program {
        Some(program) => Box::new(ProcessLauncher::new(program)),
        None => Box::new(ThreadLauncher::new(|config, mut endpoint| {
            if let Err(e) = run_consumer(&mut endpoint, &config) {
                tracing::error!(error = %e, "Plotting consumer failed");
            }
        })),
    }
}
