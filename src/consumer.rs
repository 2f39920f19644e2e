//! Launching and supervising the plotting consumer.
//!
//! The consumer is an external collaborator. The kernel only needs to start it
//! with a [`ConsumerConfig`], obtain a [`CommandSink`] to talk to it, and be
//! able to wait for it to exit or terminate it. Two launchers are provided:
//!
//! - [`ThreadLauncher`] runs a consumer function on a named thread in this
//!   process. Used for embedding and by the test suite.
//! - [`ProcessLauncher`] spawns a child process (see the `galileo-plot`
//!   binary). Commands go to its stdin, events come back on its stdout and are
//!   applied to the kernel's [`SignalSet`] by a bridge thread.
//!
//! Consumers see the other side through a [`ConsumerEndpoint`].

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, Command as ProcessCommand, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::channel::{parse_command, parse_event, Command, CommandSink, ConsumerEvent, JsonLineSink, LocalSink};
use crate::error::{KernelError, KernelResult};
use crate::signal::SignalSet;
use crate::snapshot::PlotGrid;

/// Granularity of liveness polling while waiting for a consumer to exit.
const EXIT_POLL: Duration = Duration::from_millis(10);

/// Startup configuration handed to the consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Subplot rows.
    pub rows: usize,
    /// Subplot columns.
    pub cols: usize,
    /// Variable-index pair of every subplot.
    pub pairs: Vec<Vec<(usize, usize)>>,
    /// `(x label, y label)` of every subplot.
    pub axis_labels: Vec<Vec<(String, String)>>,
    /// How often the consumer asks for fresh data.
    pub refresh_interval: Duration,
    /// How often the consumer polls for commands.
    pub listen_interval: Duration,
}

impl ConsumerConfig {
    /// Consumer settings for `grid` at the given intervals.
    pub fn new(grid: &PlotGrid, refresh_interval: Duration, listen_interval: Duration) -> Self {
        Self {
            rows: grid.rows(),
            cols: grid.cols(),
            pairs: grid.pairs().to_vec(),
            axis_labels: grid.axis_labels(),
            refresh_interval,
            listen_interval,
        }
    }
}

/// Consumer-side view of the command channel and the signal set.
pub trait ConsumerEndpoint {
    /// Next pending command, if any. Errors once the kernel side is gone.
    fn try_command(&mut self) -> KernelResult<Option<Command>>;

    /// Report an event to the kernel.
    fn raise(&mut self, event: ConsumerEvent) -> KernelResult<()>;
}

/// Supervision handle for a launched consumer.
pub trait ConsumerHandle: Send {
    /// Whether the consumer is still running.
    fn is_alive(&mut self) -> bool;

    /// Wait up to `timeout` for the consumer to exit. Returns whether it did.
    fn wait_exit(&mut self, timeout: Duration) -> bool;

    /// Forcibly end the consumer.
    fn terminate(&mut self) -> KernelResult<()>;
}

/// A started consumer: where to send commands, and how to supervise it.
pub struct LaunchedConsumer {
    /// Kernel-to-consumer command transport.
    pub sink: Box<dyn CommandSink>,
    /// Liveness, exit and termination of the consumer.
    pub handle: Box<dyn ConsumerHandle>,
}

/// Starts plotting consumers.
pub trait ConsumerLauncher: Send {
    /// Start a consumer that raises its events on `signals`.
    fn launch(&mut self, config: ConsumerConfig, signals: Arc<SignalSet>) -> KernelResult<LaunchedConsumer>;
}

impl<L: ConsumerLauncher + ?Sized> ConsumerLauncher for Box<L> {
    fn launch(&mut self, config: ConsumerConfig, signals: Arc<SignalSet>) -> KernelResult<LaunchedConsumer> {
        (**self).launch(config, signals)
    }
}

// =============================================================================
// In-process consumers
// =============================================================================

/// Endpoint of a consumer running on a thread of this process.
pub struct LocalEndpoint {
    rx: mpsc::UnboundedReceiver<Command>,
    signals: Arc<SignalSet>,
}

impl LocalEndpoint {
    /// Endpoint reading commands from `rx` and raising events on `signals`.
    pub fn new(rx: mpsc::UnboundedReceiver<Command>, signals: Arc<SignalSet>) -> Self {
        Self { rx, signals }
    }

    /// Direct access to the shared latches.
    pub fn signals(&self) -> &Arc<SignalSet> {
        &self.signals
    }
}

impl ConsumerEndpoint for LocalEndpoint {
    fn try_command(&mut self) -> KernelResult<Option<Command>> {
        match self.rx.try_recv() {
            Ok(command) => Ok(Some(command)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(KernelError::Channel("kernel hung up".into())),
        }
    }

    fn raise(&mut self, event: ConsumerEvent) -> KernelResult<()> {
        self.signals.apply(event);
        Ok(())
    }
}

type ConsumerBody = dyn Fn(ConsumerConfig, LocalEndpoint) + Send + Sync;

/// Runs a consumer function on a `galileo-plot` thread.
#[derive(Clone)]
pub struct ThreadLauncher {
    body: Arc<ConsumerBody>,
}

impl ThreadLauncher {
    /// Launcher that runs `body` on a `galileo-plot` thread.
    pub fn new<F>(body: F) -> Self
    where
        F: Fn(ConsumerConfig, LocalEndpoint) + Send + Sync + 'static,
    {
        Self { body: Arc::new(body) }
    }
}

impl ConsumerLauncher for ThreadLauncher {
    fn launch(&mut self, config: ConsumerConfig, signals: Arc<SignalSet>) -> KernelResult<LaunchedConsumer> {
        let (tx, rx) = mpsc::unbounded_channel();
        let endpoint = LocalEndpoint::new(rx, signals);
        let body = Arc::clone(&self.body);

        let handle = thread::Builder::new()
            .name("galileo-plot".into())
            .spawn(move || body(config, endpoint))
            .map_err(|e| KernelError::ConsumerLaunch(e.to_string()))?;

        Ok(LaunchedConsumer {
            sink: Box::new(LocalSink::new(tx)),
            handle: Box::new(ThreadHandle { handle: Some(handle) }),
        })
    }
}

struct ThreadHandle {
    handle: Option<JoinHandle<()>>,
}

impl ConsumerHandle for ThreadHandle {
    fn is_alive(&mut self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn wait_exit(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_alive() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(EXIT_POLL);
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Plotting thread panicked");
            }
        }
        true
    }

    fn terminate(&mut self) -> KernelResult<()> {
        // Threads cannot be killed; dropping the handle detaches it.
        if self.handle.take().is_some() {
            warn!("Detached unresponsive in-process plotting consumer");
        }
        Ok(())
    }
}

// =============================================================================
// Child-process consumers
// =============================================================================

/// Spawns the consumer as a child process speaking JSON lines on stdio.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessLauncher {
    /// Launcher that spawns `program` as the consumer process.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append a command-line argument for the child.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Kill a child whose launch failed half-way.
fn abandon(child: &mut Child) {
    if let Err(e) = child.kill() {
        warn!(pid = child.id(), error = %e, "Could not kill the half-launched plotting process");
    }
    if let Err(e) = child.wait() {
        warn!(pid = child.id(), error = %e, "Could not reap the half-launched plotting process");
    }
}

/// Handshake: the consumer configuration as the first stdin line.
fn send_config(stdin: &mut impl Write, config: &ConsumerConfig) -> KernelResult<()> {
    let line = serde_json::to_string(config)
        .map_err(|e| KernelError::ConsumerLaunch(format!("failed to encode consumer config: {e}")))?;
    writeln!(stdin, "{line}")?;
    stdin.flush()?;
    Ok(())
}

impl ConsumerLauncher for ProcessLauncher {
    fn launch(&mut self, config: ConsumerConfig, signals: Arc<SignalSet>) -> KernelResult<LaunchedConsumer> {
        let mut child = ProcessCommand::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| KernelError::ConsumerLaunch(format!("{}: {e}", self.program.display())))?;

        let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            abandon(&mut child);
            return Err(KernelError::ConsumerLaunch("child stdio not captured".into()));
        };

        if let Err(e) = send_config(&mut stdin, &config) {
            abandon(&mut child);
            return Err(e);
        }

        thread::Builder::new()
            .name("galileo-plot-bridge".into())
            .spawn(move || bridge_events(BufReader::new(stdout), &signals))?;

        info!(pid = child.id(), program = %self.program.display(), "Plotting process spawned");

        Ok(LaunchedConsumer {
            sink: Box::new(JsonLineSink::new(stdin)),
            handle: Box::new(ProcessHandle { child }),
        })
    }
}

/// Apply event lines from the consumer to the signal set until EOF.
fn bridge_events(reader: impl BufRead, signals: &SignalSet) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Plotting process output unreadable");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match parse_event(&line) {
            Ok(event) => signals.apply(event),
            Err(e) => warn!(error = %e, "Ignoring consumer output"),
        }
    }
    debug!("Plotting process closed its output");
}

struct ProcessHandle {
    child: Child,
}

impl ConsumerHandle for ProcessHandle {
    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn wait_exit(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.is_alive() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(EXIT_POLL);
        }
        true
    }

    fn terminate(&mut self) -> KernelResult<()> {
        self.child.kill()?;
        self.child.wait()?;
        Ok(())
    }
}

/// Endpoint of a consumer process: commands arrive on `reader` (stdin), events
/// leave on `writer` (stdout).
pub struct StdioEndpoint<W: Write> {
    rx: mpsc::UnboundedReceiver<Command>,
    writer: W,
}

impl<W: Write> StdioEndpoint<W> {
    /// Read the startup configuration line, then forward the remaining command
    /// lines from `reader` on a background thread.
    pub fn connect<R>(mut reader: R, writer: W) -> KernelResult<(ConsumerConfig, Self)>
    where
        R: BufRead + Send + 'static,
    {
        let mut first = String::new();
        if reader.read_line(&mut first)? == 0 {
            return Err(KernelError::Channel("no startup configuration received".into()));
        }
        let config: ConsumerConfig = serde_json::from_str(first.trim())
            .map_err(|e| KernelError::Channel(format!("malformed startup configuration: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();
        thread::Builder::new()
            .name("galileo-plot-listen".into())
            .spawn(move || {
                for line in reader.lines() {
                    let Ok(line) = line else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match parse_command(&line) {
                        Ok(command) => {
                            if tx.send(command).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "Ignoring kernel input"),
                    }
                }
            })?;

        Ok((config, Self { rx, writer }))
    }
}

impl<W: Write> ConsumerEndpoint for StdioEndpoint<W> {
    fn try_command(&mut self) -> KernelResult<Option<Command>> {
        match self.rx.try_recv() {
            Ok(command) => Ok(Some(command)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(KernelError::Channel("kernel closed the pipe".into())),
        }
    }

    fn raise(&mut self, event: ConsumerEvent) -> KernelResult<()> {
        let line = serde_json::to_string(&event)
            .map_err(|e| KernelError::Channel(format!("failed to encode event: {e}")))?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        Ok(())
    }
}
