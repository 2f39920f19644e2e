//! Headless plotting consumer.
//!
//! [`PlotBuffer`] is the data model behind a live plot: per-subplot point
//! history, running extrema and axis limits with a small over-range.
//! [`run_consumer`] drives the consumer side of the kernel protocol on top of
//! it. Rendering is left to whoever owns the buffer; the `galileo-plot` binary
//! only reports what it received.

use std::thread;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::channel::{Command, ConsumerEvent};
use crate::consumer::{ConsumerConfig, ConsumerEndpoint};
use crate::error::{KernelError, KernelResult};
use crate::snapshot::PlotPointSet;

/// Total number of floats a buffer may hold across all subplots.
pub const MAX_FLOATS: usize = 10_000_000;
/// Fraction of the data span added on each side of an axis.
pub const OVERRANGE: f64 = 0.01;
/// Keeps the over-range non-zero for a single point.
pub const SMALL: f64 = 1e-12;

/// Visible axis range of one subplot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisLimits {
    /// `(min, max)` of the x axis.
    pub x: (f64, f64),
    /// `(min, max)` of the y axis.
    pub y: (f64, f64),
}

#[derive(Debug, Clone, Copy)]
struct Extrema {
    x: (f64, f64),
    y: (f64, f64),
}

impl Extrema {
    const EMPTY: Extrema = Extrema {
        x: (f64::INFINITY, f64::NEG_INFINITY),
        y: (f64::INFINITY, f64::NEG_INFINITY),
    };

    /// Widen to include `(x, y)`. Returns whether the range changed.
    fn include(&mut self, x: f64, y: f64) -> bool {
        let before = (self.x, self.y);
        self.x = (self.x.0.min(x), self.x.1.max(x));
        self.y = (self.y.0.min(y), self.y.1.max(y));
        before != (self.x, self.y)
    }

    fn limits(&self) -> AxisLimits {
        let pad = |(lo, hi): (f64, f64)| {
            let delta = OVERRANGE * (hi - lo + SMALL);
            (lo - delta, hi + delta)
        };
        AxisLimits {
            x: pad(self.x),
            y: pad(self.y),
        }
    }
}

#[derive(Debug, Clone)]
struct Subplot {
    xs: Vec<f64>,
    ys: Vec<f64>,
    extrema: Extrema,
    limits: Option<AxisLimits>,
}

impl Subplot {
    fn new() -> Self {
        Self {
            xs: Vec::new(),
            ys: Vec::new(),
            extrema: Extrema::EMPTY,
            limits: None,
        }
    }
}

/// Point history of a grid of subplots.
#[derive(Debug, Clone)]
pub struct PlotBuffer {
    rows: usize,
    cols: usize,
    max_points: usize,
    autoscale: bool,
    subplots: Vec<Subplot>,
}

impl PlotBuffer {
    /// Empty buffer for a `rows` x `cols` grid, auto-scaling on.
    pub fn new(rows: usize, cols: usize) -> Self {
        let cells = (rows * cols).max(1);
        Self {
            rows,
            cols,
            max_points: MAX_FLOATS / (cells * 2),
            autoscale: true,
            subplots: vec![Subplot::new(); cells],
        }
    }

    /// Points per subplot the buffer can hold.
    pub fn capacity(&self) -> usize {
        self.max_points
    }

    /// Points stored per subplot.
    pub fn len(&self) -> usize {
        self.subplots[0].xs.len()
    }

    /// Whether no point has been plotted.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the buffer holds its maximum number of points.
    pub fn is_full(&self) -> bool {
        self.len() >= self.max_points
    }

    /// Whether axis limits follow the data.
    pub fn autoscale(&self) -> bool {
        self.autoscale
    }

    /// Append one point to every subplot. Returns whether any axis limits
    /// changed (the plot needs a full redraw).
    pub fn push(&mut self, set: &PlotPointSet) -> KernelResult<bool> {
        if set.rows() != self.rows || set.points.iter().any(|row| row.len() != self.cols) {
            return Err(KernelError::Channel(format!(
                "plot data is {}x{}, plot grid is {}x{}",
                set.rows(),
                set.cols(),
                self.rows,
                self.cols
            )));
        }
        if self.is_full() {
            return Ok(false);
        }

        let mut rescaled = false;
        for (subplot, &(x, y)) in self.subplots.iter_mut().zip(set.points.iter().flatten()) {
            subplot.xs.push(x);
            subplot.ys.push(y);
            let widened = subplot.extrema.include(x, y);
            if self.autoscale && (widened || subplot.limits.is_none()) {
                subplot.limits = Some(subplot.extrema.limits());
                rescaled = true;
            }
        }
        Ok(rescaled)
    }

    /// Turn autoscaling on or off. Turning it on snaps the limits to the data.
    pub fn set_autoscale(&mut self, on: bool) {
        self.autoscale = on;
        if on {
            for subplot in self.subplots.iter_mut().filter(|s| !s.xs.is_empty()) {
                subplot.limits = Some(subplot.extrema.limits());
            }
        }
    }

    /// Drop every stored point.
    pub fn clear(&mut self) {
        for subplot in &mut self.subplots {
            *subplot = Subplot::new();
        }
    }

    /// Axis limits of one subplot, once it has data.
    pub fn limits(&self, row: usize, col: usize) -> Option<AxisLimits> {
        self.subplot(row, col).and_then(|s| s.limits)
    }

    /// Plotted x and y values of one subplot.
    pub fn points(&self, row: usize, col: usize) -> Option<(&[f64], &[f64])> {
        self.subplot(row, col).map(|s| (s.xs.as_slice(), s.ys.as_slice()))
    }

    fn subplot(&self, row: usize, col: usize) -> Option<&Subplot> {
        if row < self.rows && col < self.cols {
            self.subplots.get(row * self.cols + col)
        } else {
            None
        }
    }
}

/// What a consumer run received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerSummary {
    /// `data` commands plotted.
    pub batches: u64,
    /// Replot, autoscale and clear commands handled.
    pub commands: u64,
    /// Points per subplot held at exit.
    pub points: usize,
}

/// Serve the kernel until `quit` arrives or the kernel side disappears.
///
/// Asks for data at start-up and then once per refresh interval, but only
/// after the previous batch has arrived, so at most one request is ever
/// outstanding. `plot_shown` is raised when the first batch is drawn.
pub fn run_consumer<E: ConsumerEndpoint>(endpoint: &mut E, config: &ConsumerConfig) -> KernelResult<ConsumerSummary> {
    let mut buffer = PlotBuffer::new(config.rows, config.cols);
    let mut summary = ConsumerSummary::default();
    let mut shown = false;

    endpoint.raise(ConsumerEvent::RequestData)?;
    let mut awaiting = true;
    let mut last_request = Instant::now();

    loop {
        loop {
            let command = match endpoint.try_command() {
                Ok(Some(command)) => command,
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "Kernel side closed; plotting consumer exiting");
                    summary.points = buffer.len();
                    return Ok(summary);
                }
            };

            match command {
                Command::Data(points) => {
                    awaiting = false;
                    summary.batches += 1;
                    match buffer.push(&points) {
                        Ok(rescaled) => debug!(rescaled, points = buffer.len(), "Plot updated"),
                        Err(e) => warn!(error = %e, "Discarding plot data"),
                    }
                    if !shown {
                        shown = true;
                        endpoint.raise(ConsumerEvent::PlotShown)?;
                    }
                }
                Command::Replot => {
                    summary.commands += 1;
                    shown = true;
                    endpoint.raise(ConsumerEvent::PlotShown)?;
                }
                Command::AutoscaleOn | Command::AutoscaleOff => {
                    summary.commands += 1;
                    buffer.set_autoscale(matches!(command, Command::AutoscaleOn));
                    endpoint.raise(ConsumerEvent::CommandDone)?;
                }
                Command::Clear => {
                    summary.commands += 1;
                    buffer.clear();
                    endpoint.raise(ConsumerEvent::CommandDone)?;
                }
                Command::Quit => {
                    summary.points = buffer.len();
                    info!(batches = summary.batches, points = summary.points, "Plotting consumer quitting");
                    return Ok(summary);
                }
            }
        }

        if !awaiting && !buffer.is_full() && last_request.elapsed() >= config.refresh_interval {
            endpoint.raise(ConsumerEvent::RequestData)?;
            awaiting = true;
            last_request = Instant::now();
        }

        thread::sleep(config.listen_interval);
    }
}
