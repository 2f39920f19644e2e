//! Headless plotting consumer run as a child process of `galileo`.
//!
//! The first stdin line carries the consumer configuration, the following
//! lines are kernel commands. Events go back on stdout, so all logging is
//! written to stderr.

use std::io::{self, BufReader};

use anyhow::{Context, Result};
use tracing::{info, Level};

use galileo::consumer::StdioEndpoint;
use galileo::plotter::run_consumer;
use galileo::tracing_setup::{self, Target, TracingConfig};

fn main() -> Result<()> {
    tracing_setup::init(TracingConfig::new(Level::INFO).with_target(Target::Stderr).with_ansi(false))
        .map_err(anyhow::Error::msg)?;

    let (config, mut endpoint) = StdioEndpoint::connect(BufReader::new(io::stdin()), io::stdout())
        .context("waiting for the kernel's plot configuration")?;
    info!(rows = config.rows, cols = config.cols, "Plotting consumer connected");

    let summary = run_consumer(&mut endpoint, &config)?;
    info!(batches = summary.batches, points = summary.points, "Plotting consumer finished");
    Ok(())
}
