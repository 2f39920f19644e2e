//! The Galileo measurement kernel.
//!
//! [`Kernel`] owns the lifecycle state machine and the public command surface.
//! It launches the plotting consumer and the measurement loop, forwards plot
//! commands, and waits on the consumer's acknowledgement signals.
//!
//! # State Machine
//!
//! ```text
//! Stopped ──start──> Running ──pause──> Paused
//!    ▲                │   ▲               │
//!    │                │   └────resume─────┘
//!    └──────stop──────┴───────────────────┘
//!
//! any ──quit──> Quitting ──> Stopped (terminal, `is_quit()`)
//! ```
//!
//! Redundant or out-of-order commands never fail: they log a warning and
//! return [`CommandOutcome::Ignored`]. Every wait on a consumer signal also
//! watches the consumer's liveness, so a vanished consumer becomes
//! [`KernelError::ConsumerExited`] instead of a hang.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{error, info, warn};

use crate::channel::{Command, CommandChannel};
use crate::config::PlottingConfig;
use crate::consumer::{ConsumerConfig, ConsumerHandle, ConsumerLauncher};
use crate::error::{KernelError, KernelResult};
use crate::experiment::Experiment;
use crate::measurement_loop::{spawn_loop, LoopContext, LoopControl, LoopHandle, LoopReport};
use crate::signal::{Signal, SignalSet};
use crate::snapshot::{PlotGrid, SharedSnapshotBuffer, Snapshot};

/// Kernel lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelState {
    /// No measurement loop. Also the final state after quit.
    Stopped,
    /// The loop is measuring.
    Running,
    /// The loop is held between two tokens.
    Paused,
    /// `quit` is shutting the consumer down.
    Quitting,
}

impl fmt::Display for KernelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelState::Stopped => write!(f, "Stopped"),
            KernelState::Running => write!(f, "Running"),
            KernelState::Paused => write!(f, "Paused"),
            KernelState::Quitting => write!(f, "Quitting"),
        }
    }
}

impl KernelState {
    /// Whether a measurement loop is live in this state.
    pub fn is_measuring(&self) -> bool {
        matches!(self, KernelState::Running | KernelState::Paused)
    }
}

/// Why a command was ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Misuse {
    /// `start` while running or paused.
    AlreadyRunning,
    /// `pause` while paused.
    AlreadyPaused,
    /// `resume` while running.
    NotPaused,
    /// `stop` with no loop.
    AlreadyStopped,
    /// `pause` or `resume` with no loop.
    MeasurementsTerminated,
    /// `plot` while a window is shown.
    PlotAlreadyShown,
    /// A plot command before any consumer was launched.
    NoPlotting,
    /// Any command after `quit`.
    AfterQuit,
}

impl fmt::Display for Misuse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Misuse::AlreadyRunning => "measurements are already running",
            Misuse::AlreadyPaused => "measurements are already paused",
            Misuse::NotPaused => "measurements are not paused",
            Misuse::AlreadyStopped => "measurements have already been terminated, cannot stop again",
            Misuse::MeasurementsTerminated => "measurements have already been permanently terminated",
            Misuse::PlotAlreadyShown => "a plot window should already be open",
            Misuse::NoPlotting => "the live plotting service is not running",
            Misuse::AfterQuit => "the kernel has quit",
        };
        f.write_str(text)
    }
}

/// Result of a public kernel command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The command took effect.
    Done,
    /// The command was out of order; a warning was logged.
    Ignored(Misuse),
}

impl CommandOutcome {
    /// Whether the command took effect.
    pub fn is_done(&self) -> bool {
        matches!(self, CommandOutcome::Done)
    }
}

/// Result of [`Kernel::quit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuitReport {
    /// `Done`, or `Ignored(AfterQuit)` on a repeated quit.
    pub outcome: CommandOutcome,
    /// The consumer did not exit within the quit timeout and was terminated.
    pub forced_termination: bool,
    /// Fault reported by the measurement loop stopped on the way out.
    pub measurement_fault: Option<String>,
}

impl QuitReport {
    fn ignored(misuse: Misuse) -> Self {
        Self {
            outcome: CommandOutcome::Ignored(misuse),
            forced_termination: false,
            measurement_fault: None,
        }
    }
}

/// Immutable timing values of a kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelSettings {
    /// How often the consumer redraws and asks for data.
    pub refresh_interval: Duration,
    /// Poll period for consumer liveness while waiting on a signal.
    pub listen_interval: Duration,
    /// Grace period for the consumer to exit on quit.
    pub quit_timeout: Duration,
    /// Pause after acknowledged plot commands so the window can catch up.
    pub ui_lag: Duration,
}

impl Default for KernelSettings {
    fn default() -> Self {
        Self::from_config(&PlottingConfig::default())
    }
}

impl KernelSettings {
    /// Convert the `[plotting]` section; negative or non-finite values become zero.
    pub fn from_config(config: &PlottingConfig) -> Self {
        let secs = |value: f64| Duration::try_from_secs_f64(value).unwrap_or_default();
        Self {
            refresh_interval: secs(config.refresh_interval_secs),
            listen_interval: secs(config.listen_interval_secs),
            quit_timeout: secs(config.quit_timeout_secs),
            ui_lag: secs(config.ui_lag_secs),
        }
    }

    fn validate(&self) -> KernelResult<()> {
        if self.listen_interval.is_zero() || self.refresh_interval.is_zero() {
            return Err(KernelError::Configuration(
                "plot refresh and listen intervals must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Public command surface used by front ends.
pub trait KernelOps: Send + Sync {
    /// Experiment title shown to the operator.
    fn title(&self) -> &str;
    /// Launch plotting and measurements.
    fn start(&self) -> KernelResult<CommandOutcome>;
    /// Hold measurements at the next token boundary.
    fn pause(&self) -> KernelResult<CommandOutcome>;
    /// Continue paused measurements.
    fn resume(&self) -> KernelResult<CommandOutcome>;
    /// End measurements and wait for the loop to finish.
    fn stop(&self) -> KernelResult<CommandOutcome>;
    /// Stop everything and close the plotting consumer. Terminal.
    fn quit(&self) -> KernelResult<QuitReport>;
    /// Reopen a hidden plot window.
    fn plot(&self) -> KernelResult<CommandOutcome>;
    /// Turn plot auto-scaling on.
    fn autoscale_on(&self) -> KernelResult<CommandOutcome>;
    /// Freeze the current plot ranges.
    fn autoscale_off(&self) -> KernelResult<CommandOutcome>;
    /// Drop every plotted point.
    fn clear_plot(&self) -> KernelResult<CommandOutcome>;
    /// Current lifecycle state.
    fn state(&self) -> KernelState;
    /// Whether `quit` has completed.
    fn is_quit(&self) -> bool;
}

/// Connection to a launched plotting consumer.
#[derive(Clone)]
struct PlotLink {
    channel: Arc<CommandChannel>,
    signals: Arc<SignalSet>,
    handle: Arc<Mutex<Box<dyn ConsumerHandle>>>,
}

impl PlotLink {
    fn is_alive(&self) -> bool {
        self.handle.lock().is_alive()
    }
}

#[derive(Default)]
struct Lifecycle {
    measuring: Option<LoopHandle>,
}

/// Builder for [`Kernel`].
pub struct KernelBuilder {
    experiment: Arc<dyn Experiment>,
    launcher: Box<dyn ConsumerLauncher>,
    settings: KernelSettings,
    instrument_lock: Option<Arc<Mutex<()>>>,
    buffer: Option<SharedSnapshotBuffer>,
}

impl KernelBuilder {
    /// Replace the default timing values.
    pub fn settings(mut self, settings: KernelSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Share an instrument lock with other users of the same instruments.
    pub fn instrument_lock(mut self, lock: Arc<Mutex<()>>) -> Self {
        self.instrument_lock = Some(lock);
        self
    }

    /// Share a snapshot buffer (and its lock) with other readers.
    pub fn snapshot_buffer(mut self, buffer: SharedSnapshotBuffer) -> Self {
        self.buffer = Some(buffer);
        self
    }

    /// Create the kernel in `Stopped`. Nothing is launched yet.
    pub fn build(self) -> Kernel {
        info!(title = self.experiment.title(), "Initialising Galileo");
        Kernel {
            experiment: self.experiment,
            settings: self.settings,
            launcher: Mutex::new(self.launcher),
            instrument_lock: self.instrument_lock.unwrap_or_default(),
            buffer: self.buffer.unwrap_or_default(),
            state: RwLock::new(KernelState::Stopped),
            quit: AtomicBool::new(false),
            last_fault: Mutex::new(None),
            lifecycle: Mutex::new(Lifecycle::default()),
            link: Mutex::new(None),
        }
    }
}

/// The Galileo measurement kernel.
pub struct Kernel {
    experiment: Arc<dyn Experiment>,
    settings: KernelSettings,
    launcher: Mutex<Box<dyn ConsumerLauncher>>,
    instrument_lock: Arc<Mutex<()>>,
    buffer: SharedSnapshotBuffer,
    state: RwLock<KernelState>,
    quit: AtomicBool,
    last_fault: Mutex<Option<String>>,
    /// Serialises start/stop/pause/resume/quit.
    lifecycle: Mutex<Lifecycle>,
    link: Mutex<Option<PlotLink>>,
}

impl Kernel {
    /// Start building a kernel for `experiment` that plots through `launcher`.
    pub fn builder(experiment: Arc<dyn Experiment>, launcher: impl ConsumerLauncher + 'static) -> KernelBuilder {
        KernelBuilder {
            experiment,
            launcher: Box::new(launcher),
            settings: KernelSettings::default(),
            instrument_lock: None,
            buffer: None,
        }
    }

    /// Timing values this kernel was built with.
    pub fn settings(&self) -> &KernelSettings {
        &self.settings
    }

    /// Current state. A loop that ended on its own (exhausted sequence or
    /// fault) is reaped here and the kernel reports `Stopped`.
    pub fn state(&self) -> KernelState {
        if let Some(mut lifecycle) = self.lifecycle.try_lock() {
            self.reap(&mut lifecycle);
        }
        *self.state.read()
    }

    /// Whether `quit` has completed.
    pub fn is_quit(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    /// Fault that ended the most recent measurement loop, if any.
    pub fn last_fault(&self) -> Option<String> {
        self.last_fault.lock().clone()
    }

    /// Copy of the latest published snapshot.
    pub fn latest_snapshot(&self) -> Option<Snapshot> {
        self.buffer.latest()
    }

    /// Launch the plotting consumer (unless one is still running from an
    /// earlier start) and the measurement loop.
    ///
    /// Blocks until the consumer's first data request, and after launching
    /// the loop until a plot window is shown or the loop has already ended.
    pub fn start(&self) -> KernelResult<CommandOutcome> {
        let mut lifecycle = self.lifecycle.lock();
        if self.is_quit() {
            return self.ignored("start", Misuse::AfterQuit);
        }
        self.reap(&mut lifecycle);
        if self.state.read().is_measuring() {
            return self.ignored("start", Misuse::AlreadyRunning);
        }

        let grid = PlotGrid::new(
            self.experiment.plot_variable_pairs(),
            self.experiment.variable_labels(),
        )?;
        self.settings.validate()?;

        let existing = self.link.lock().clone();
        let link = match existing {
            Some(link) if link.is_alive() => link,
            _ => self.launch_consumer(&grid)?,
        };

        self.await_signal(&link, &link.signals.request_data)?;
        info!("Live data plotting service has started");

        info!(title = self.experiment.title(), "Starting experiment");
        self.experiment
            .start()
            .map_err(|e| KernelError::MeasurementFault(format!("experiment start failed: {e:#}")))?;

        *self.last_fault.lock() = None;
        let handle = spawn_loop(LoopContext {
            experiment: Arc::clone(&self.experiment),
            grid,
            buffer: self.buffer.clone(),
            channel: Arc::clone(&link.channel),
            signals: Arc::clone(&link.signals),
            control: Arc::new(LoopControl::new()),
            instrument_lock: Arc::clone(&self.instrument_lock),
            interval: self.experiment.measurement_interval(),
        })?;
        lifecycle.measuring = Some(handle);
        self.set_state(KernelState::Running);

        info!("Measurements have started. Waiting for a plot window to open");
        let shown = self.await_signal_or(&link, &link.signals.plot_shown, || {
            lifecycle.measuring.as_ref().is_some_and(LoopHandle::is_finished)
        })?;
        if !shown {
            // The loop ended (empty sequence or fault) before any plot data.
            if let Some(report) = self.reap(&mut lifecycle) {
                report.into_result()?;
            }
            info!("Measurements ended before a plot window opened");
        }
        Ok(CommandOutcome::Done)
    }

    /// Hold the loop at its next interval wait.
    pub fn pause(&self) -> KernelResult<CommandOutcome> {
        let mut lifecycle = self.lifecycle.lock();
        if self.is_quit() {
            return self.ignored("pause", Misuse::AfterQuit);
        }
        self.reap(&mut lifecycle);
        match (*self.state.read(), lifecycle.measuring.as_ref()) {
            (KernelState::Running, Some(handle)) => handle.control().pause(),
            (KernelState::Paused, _) => return self.ignored("pause", Misuse::AlreadyPaused),
            _ => return self.ignored("pause", Misuse::MeasurementsTerminated),
        }
        self.set_state(KernelState::Paused);
        info!("Measurements are paused");
        Ok(CommandOutcome::Done)
    }

    /// Release a paused loop. It measures again once the rest of its
    /// interval, if any, has passed.
    pub fn resume(&self) -> KernelResult<CommandOutcome> {
        let mut lifecycle = self.lifecycle.lock();
        if self.is_quit() {
            return self.ignored("resume", Misuse::AfterQuit);
        }
        self.reap(&mut lifecycle);
        match (*self.state.read(), lifecycle.measuring.as_ref()) {
            (KernelState::Paused, Some(handle)) => handle.control().resume(),
            (KernelState::Running, _) => return self.ignored("resume", Misuse::NotPaused),
            _ => return self.ignored("resume", Misuse::MeasurementsTerminated),
        }
        self.set_state(KernelState::Running);
        info!("Measurements have been resumed");
        Ok(CommandOutcome::Done)
    }

    /// Stop the measurement loop and wait until it has finished its current
    /// cycle and run the experiment's finish hook.
    pub fn stop(&self) -> KernelResult<CommandOutcome> {
        let mut lifecycle = self.lifecycle.lock();
        if self.is_quit() {
            return self.ignored("stop", Misuse::AfterQuit);
        }
        if let Some(report) = self.reap(&mut lifecycle) {
            // The loop already ended on its own; report how.
            return report.into_result().map(|_| CommandOutcome::Done);
        }
        if !self.state.read().is_measuring() {
            return self.ignored("stop", Misuse::AlreadyStopped);
        }
        self.stop_locked(&mut lifecycle)
            .into_result()
            .map(|_| CommandOutcome::Done)
    }

    /// Stop measurements if needed, ask the consumer to quit, and terminate it
    /// if it has not exited within the quit timeout.
    pub fn quit(&self) -> KernelResult<QuitReport> {
        let mut lifecycle = self.lifecycle.lock();
        if self.is_quit() {
            warn!(command = "quit", reason = %Misuse::AfterQuit, "Command ignored");
            return Ok(QuitReport::ignored(Misuse::AfterQuit));
        }

        let mut measurement_fault = self.reap(&mut lifecycle).and_then(|report| report.fault);
        if self.state.read().is_measuring() {
            measurement_fault = self.stop_locked(&mut lifecycle).fault;
        }
        self.set_state(KernelState::Quitting);

        info!("Terminating data plotting");
        let link = self.link.lock().take();
        let mut forced_termination = false;
        if let Some(link) = link {
            if let Err(e) = link.channel.send(Command::Quit) {
                warn!(error = %e, "Could not send quit to the plotting consumer");
            }
            let mut handle = link.handle.lock();
            if !handle.wait_exit(self.settings.quit_timeout) {
                warn!(
                    timeout_ms = self.settings.quit_timeout.as_millis() as u64,
                    "Data plotting time-out, forcibly terminating"
                );
                forced_termination = true;
                if let Err(e) = handle.terminate() {
                    error!(error = %e, "Failed to terminate the plotting consumer");
                }
            }
        }

        self.quit.store(true, Ordering::SeqCst);
        self.set_state(KernelState::Stopped);
        info!("Live plotting service is terminated. Yet it moves.");

        Ok(QuitReport {
            outcome: CommandOutcome::Done,
            forced_termination,
            measurement_fault,
        })
    }

    /// Reopen the plot window if it is hidden.
    pub fn plot(&self) -> KernelResult<CommandOutcome> {
        let link = match self.plot_link("plot")? {
            Ok(link) => link,
            Err(outcome) => return Ok(outcome),
        };
        if link.signals.plot_shown.is_set() {
            return self.ignored("plot", Misuse::PlotAlreadyShown);
        }

        link.signals.command_done.clear();
        info!("Waiting for a plot window to open");
        link.channel.send(Command::Replot)?;
        self.await_signal(&link, &link.signals.plot_shown)?;
        thread::sleep(self.settings.ui_lag);
        info!("A plot window should have opened");
        Ok(CommandOutcome::Done)
    }

    /// Ask the consumer to auto-scale and wait for its acknowledgement.
    pub fn autoscale_on(&self) -> KernelResult<CommandOutcome> {
        self.acknowledged("autoscale_on", Command::AutoscaleOn, "Auto-scale is on")
    }

    /// Ask the consumer to freeze its ranges and wait for its acknowledgement.
    pub fn autoscale_off(&self) -> KernelResult<CommandOutcome> {
        self.acknowledged("autoscale_off", Command::AutoscaleOff, "Auto-scale is off")
    }

    /// Ask the consumer to clear its buffer and wait for its acknowledgement.
    pub fn clear_plot(&self) -> KernelResult<CommandOutcome> {
        self.acknowledged("clear_plot", Command::Clear, "Plotting buffer cleared")
    }

    fn acknowledged(&self, op: &'static str, command: Command, done: &str) -> KernelResult<CommandOutcome> {
        let link = match self.plot_link(op)? {
            Ok(link) => link,
            Err(outcome) => return Ok(outcome),
        };

        link.signals.command_done.clear();
        link.channel.send(command)?;
        self.await_signal(&link, &link.signals.command_done)?;
        thread::sleep(self.settings.ui_lag);
        info!("{done}");
        Ok(CommandOutcome::Done)
    }

    /// The consumer link, or the outcome to return when plotting is not
    /// available.
    fn plot_link(&self, op: &'static str) -> KernelResult<Result<PlotLink, CommandOutcome>> {
        if self.is_quit() {
            return self.ignored(op, Misuse::AfterQuit).map(Err);
        }
        match self.link.lock().clone() {
            Some(link) => Ok(Ok(link)),
            None => self.ignored(op, Misuse::NoPlotting).map(Err),
        }
    }

    fn launch_consumer(&self, grid: &PlotGrid) -> KernelResult<PlotLink> {
        info!("Starting the live data plotting service");
        let signals = Arc::new(SignalSet::new());
        let config = ConsumerConfig::new(grid, self.settings.refresh_interval, self.settings.listen_interval);
        let launched = self.launcher.lock().launch(config, Arc::clone(&signals))?;

        let link = PlotLink {
            channel: Arc::new(CommandChannel::new(launched.sink)),
            signals,
            handle: Arc::new(Mutex::new(launched.handle)),
        };
        *self.link.lock() = Some(link.clone());
        Ok(link)
    }

    /// Block until `signal` is set, checking consumer liveness every listen
    /// interval.
    fn await_signal(&self, link: &PlotLink, signal: &Signal) -> KernelResult<()> {
        self.await_signal_or(link, signal, || false).map(|_| ())
    }

    /// Like [`await_signal`](Self::await_signal), but gives up and returns
    /// `Ok(false)` once `ended` reports true.
    fn await_signal_or(&self, link: &PlotLink, signal: &Signal, mut ended: impl FnMut() -> bool) -> KernelResult<bool> {
        loop {
            if signal.wait_timeout(self.settings.listen_interval) {
                return Ok(true);
            }
            if ended() {
                return Ok(signal.is_set());
            }
            if !link.is_alive() {
                return if signal.is_set() {
                    Ok(true)
                } else {
                    error!("Plotting consumer exited while the kernel was waiting on it");
                    Err(KernelError::ConsumerExited)
                };
            }
        }
    }

    fn stop_locked(&self, lifecycle: &mut Lifecycle) -> LoopReport {
        info!("Terminating measurements");
        let report = match lifecycle.measuring.take() {
            Some(handle) => {
                handle.control().request_stop();
                handle.join()
            }
            None => LoopReport::default(),
        };
        self.set_state(KernelState::Stopped);
        self.record(&report);
        report
    }

    /// Collect a loop that has exited by itself.
    fn reap(&self, lifecycle: &mut Lifecycle) -> Option<LoopReport> {
        if !lifecycle.measuring.as_ref().is_some_and(LoopHandle::is_finished) {
            return None;
        }
        let report = lifecycle.measuring.take()?.join();
        self.set_state(KernelState::Stopped);
        self.record(&report);
        Some(report)
    }

    fn record(&self, report: &LoopReport) {
        if let Some(fault) = &report.fault {
            error!(%fault, iterations = report.iterations, "Measurement loop ended with a fault");
            *self.last_fault.lock() = Some(fault.clone());
        }
    }

    fn set_state(&self, state: KernelState) {
        let mut current = self.state.write();
        if *current != state {
            info!(from = %*current, to = %state, "Kernel state change");
            *current = state;
        }
    }

    fn ignored<T: From<CommandOutcome>>(&self, op: &str, misuse: Misuse) -> KernelResult<T> {
        warn!(command = op, reason = %misuse, "Command ignored");
        Ok(T::from(CommandOutcome::Ignored(misuse)))
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        if !self.is_quit() && (self.state.read().is_measuring() || self.link.lock().is_some()) {
            if let Err(e) = self.quit() {
                error!(error = %e, "Error quitting kernel on drop");
            }
        }
    }
}

impl KernelOps for Kernel {
    fn title(&self) -> &str {
        self.experiment.title()
    }
    fn start(&self) -> KernelResult<CommandOutcome> {
        Kernel::start(self)
    }
    fn pause(&self) -> KernelResult<CommandOutcome> {
        Kernel::pause(self)
    }
    fn resume(&self) -> KernelResult<CommandOutcome> {
        Kernel::resume(self)
    }
    fn stop(&self) -> KernelResult<CommandOutcome> {
        Kernel::stop(self)
    }
    fn quit(&self) -> KernelResult<QuitReport> {
        Kernel::quit(self)
    }
    fn plot(&self) -> KernelResult<CommandOutcome> {
        Kernel::plot(self)
    }
    fn autoscale_on(&self) -> KernelResult<CommandOutcome> {
        Kernel::autoscale_on(self)
    }
    fn autoscale_off(&self) -> KernelResult<CommandOutcome> {
        Kernel::autoscale_off(self)
    }
    fn clear_plot(&self) -> KernelResult<CommandOutcome> {
        Kernel::clear_plot(self)
    }
    fn state(&self) -> KernelState {
        Kernel::state(self)
    }
    fn is_quit(&self) -> bool {
        Kernel::is_quit(self)
    }
}

/// A kernel that does nothing but track its flags.
#[derive(Debug)]
pub struct DummyKernel {
    state: RwLock<KernelState>,
    quit: AtomicBool,
}

impl Default for DummyKernel {
    fn default() -> Self {
        Self {
            state: RwLock::new(KernelState::Stopped),
            quit: AtomicBool::new(false),
        }
    }
}

impl DummyKernel {
    /// A stopped dummy kernel.
    pub fn new() -> Self {
        Self::default()
    }

    fn transition(&self, to: KernelState) -> KernelResult<CommandOutcome> {
        *self.state.write() = to;
        Ok(CommandOutcome::Done)
    }
}

impl KernelOps for DummyKernel {
    fn title(&self) -> &str {
        "Dummy Kernel"
    }
    fn start(&self) -> KernelResult<CommandOutcome> {
        self.transition(KernelState::Running)
    }
    fn pause(&self) -> KernelResult<CommandOutcome> {
        self.transition(KernelState::Paused)
    }
    fn resume(&self) -> KernelResult<CommandOutcome> {
        self.transition(KernelState::Running)
    }
    fn stop(&self) -> KernelResult<CommandOutcome> {
        self.transition(KernelState::Stopped)
    }
    fn quit(&self) -> KernelResult<QuitReport> {
        self.quit.store(true, Ordering::SeqCst);
        *self.state.write() = KernelState::Stopped;
        Ok(QuitReport {
            outcome: CommandOutcome::Done,
            forced_termination: false,
            measurement_fault: None,
        })
    }
    fn plot(&self) -> KernelResult<CommandOutcome> {
        Ok(CommandOutcome::Done)
    }
    fn autoscale_on(&self) -> KernelResult<CommandOutcome> {
        Ok(CommandOutcome::Done)
    }
    fn autoscale_off(&self) -> KernelResult<CommandOutcome> {
        Ok(CommandOutcome::Done)
    }
    fn clear_plot(&self) -> KernelResult<CommandOutcome> {
        Ok(CommandOutcome::Done)
    }
    fn state(&self) -> KernelState {
        *self.state.read()
    }
    fn is_quit(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }
}

impl From<CommandOutcome> for QuitReport {
    fn from(outcome: CommandOutcome) -> Self {
        Self {
            outcome,
            forced_termination: false,
            measurement_fault: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(KernelState::Paused.to_string(), "Paused");
        assert!(KernelState::Running.is_measuring());
        assert!(!KernelState::Quitting.is_measuring());
    }

    #[test]
    fn test_settings_from_config() {
        let settings = KernelSettings::default();
        assert_eq!(settings.refresh_interval, Duration::from_millis(500));
        assert_eq!(settings.listen_interval, Duration::from_millis(50));
        assert_eq!(settings.quit_timeout, Duration::from_secs(1));
        assert_eq!(settings.ui_lag, Duration::from_millis(300));
        assert!(settings.validate().is_ok());

        let zero = KernelSettings {
            listen_interval: Duration::ZERO,
            ..KernelSettings::default()
        };
        assert!(matches!(zero.validate(), Err(KernelError::Configuration(_))));
    }

    #[test]
    fn test_dummy_kernel_tracks_flags() {
        let kernel = DummyKernel::new();
        assert_eq!(kernel.title(), "Dummy Kernel");
        kernel.start().unwrap();
        kernel.pause().unwrap();
        assert_eq!(KernelOps::state(&kernel), KernelState::Paused);
        kernel.resume().unwrap();
        kernel.stop().unwrap();
        assert_eq!(KernelOps::state(&kernel), KernelState::Stopped);
        assert!(kernel.plot().unwrap().is_done());
        assert!(!kernel.is_quit());
        kernel.quit().unwrap();
        assert!(kernel.is_quit());
    }

    #[test]
    fn test_misuse_messages() {
        assert!(Misuse::AlreadyStopped.to_string().contains("cannot stop again"));
        assert_eq!(QuitReport::from(CommandOutcome::Ignored(Misuse::AfterQuit)).outcome, CommandOutcome::Ignored(Misuse::AfterQuit));
    }
}
