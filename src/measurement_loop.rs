//! The background measurement loop.
//!
//! One `galileo-measure` thread walks the experiment's token sequence. Each
//! iteration:
//!
//! 1. checks the stop flag,
//! 2. measures while holding the exclusive instrument lock,
//! 3. waits for the previous log call (join-before-next),
//! 4. copies the snapshot into the shared buffer,
//! 5. hands the snapshot to the logging thread,
//! 6. answers a pending `request_data` edge with one `data` command,
//!    clearing the edge before the send,
//! 7. waits one measurement interval, or until resumed when paused.
//!
//! On exit the logging thread is drained and `finish` runs exactly once, also
//! after a fault. Pause and stop act at iteration boundaries only.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::channel::{Command, CommandChannel};
use crate::error::{KernelError, KernelResult};
use crate::experiment::Experiment;
use crate::logging_worker::{describe_panic, LoggingWorker};
use crate::signal::SignalSet;
use crate::snapshot::{PlotGrid, SharedSnapshotBuffer};

#[derive(Debug, Default)]
struct ControlState {
    paused: bool,
    stopped: bool,
}

/// Pause and stop flags observed by the loop between iterations.
///
/// Waiting happens on a condition variable, so `resume` and `request_stop`
/// wake a sleeping loop immediately.
#[derive(Debug, Default)]
pub struct LoopControl {
    state: Mutex<ControlState>,
    cond: Condvar,
}

impl LoopControl {
    /// Running, not paused.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold the loop at its next interval wait.
    pub fn pause(&self) {
        self.state.lock().paused = true;
        self.cond.notify_all();
    }

    /// Release a paused loop.
    pub fn resume(&self) {
        self.state.lock().paused = false;
        self.cond.notify_all();
    }

    /// Ask the loop to exit before its next token.
    pub fn request_stop(&self) {
        self.state.lock().stopped = true;
        self.cond.notify_all();
    }

    /// Whether a stop was requested.
    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Sleep for `interval`, or for as long as the loop is paused.
    ///
    /// Returns `false` as soon as a stop is requested. A pause requested during
    /// the sleep takes effect immediately; after `resume` the remaining part of
    /// the interval, if any, is still honoured.
    pub fn wait_interval(&self, interval: Duration) -> bool {
        let deadline = Instant::now() + interval;
        let mut state = self.state.lock();
        loop {
            if state.stopped {
                return false;
            }
            if state.paused {
                self.cond.wait(&mut state);
                continue;
            }
            if Instant::now() >= deadline {
                return true;
            }
            self.cond.wait_until(&mut state, deadline);
        }
    }
}

/// Everything the loop thread needs, moved into it at spawn.
pub struct LoopContext {
    /// Measured, logged and finished by the loop.
    pub experiment: Arc<dyn Experiment>,
    /// Extracts plot points from each snapshot.
    pub grid: PlotGrid,
    /// Receives every new snapshot.
    pub buffer: SharedSnapshotBuffer,
    /// Where `data` commands go.
    pub channel: Arc<CommandChannel>,
    /// `request_data` is answered and cleared here.
    pub signals: Arc<SignalSet>,
    /// Shared with the kernel's [`LoopHandle`].
    pub control: Arc<LoopControl>,
    /// Held for the duration of each `measure` call.
    pub instrument_lock: Arc<Mutex<()>>,
    /// Sleep between tokens.
    pub interval: Duration,
}

/// Summary of a finished loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopReport {
    /// Completed measurement iterations.
    pub iterations: u64,
    /// `data` commands sent in answer to `request_data`.
    pub data_sent: u64,
    /// Log calls completed by the logging thread.
    pub logged: u64,
    /// Measurement, logging or finish failure that ended the loop.
    pub fault: Option<String>,
}

impl LoopReport {
    /// The report itself, or its fault as [`KernelError::MeasurementFault`].
    pub fn into_result(self) -> KernelResult<LoopReport> {
        match &self.fault {
            Some(fault) => Err(KernelError::MeasurementFault(fault.clone())),
            None => Ok(self),
        }
    }
}

/// Join handle of a running loop.
pub struct LoopHandle {
    handle: JoinHandle<LoopReport>,
    control: Arc<LoopControl>,
}

impl LoopHandle {
    /// Pause and stop flags shared with the loop thread.
    pub fn control(&self) -> &Arc<LoopControl> {
        &self.control
    }

    /// Whether the loop thread has exited (stop, exhausted sequence or fault).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the loop thread. Returns immediately if it already exited.
    pub fn join(self) -> LoopReport {
        match self.handle.join() {
            Ok(report) => report,
            Err(payload) => LoopReport {
                fault: Some(format!("measurement thread panicked: {}", describe_panic(&*payload))),
                ..Default::default()
            },
        }
    }
}

/// Start the loop on its own thread.
pub fn spawn_loop(ctx: LoopContext) -> KernelResult<LoopHandle> {
    let control = Arc::clone(&ctx.control);
    let handle = thread::Builder::new()
        .name("galileo-measure".into())
        .spawn(move || run_loop(ctx))?;
    Ok(LoopHandle { handle, control })
}

fn run_loop(ctx: LoopContext) -> LoopReport {
    let mut report = LoopReport::default();
    info!(
        title = ctx.experiment.title(),
        interval_ms = ctx.interval.as_millis() as u64,
        "Measurement loop started"
    );

    match LoggingWorker::spawn(Arc::clone(&ctx.experiment)) {
        Ok(worker) => {
            for _token in ctx.experiment.sequence() {
                if ctx.control.is_stopped() {
                    break;
                }

                match iterate(&ctx, &worker) {
                    Ok(sent) => {
                        report.iterations += 1;
                        report.data_sent += u64::from(sent);
                    }
                    Err(e) => {
                        error!(error = %e, iteration = report.iterations, "Measurement loop terminated");
                        report.fault = Some(e.to_string());
                        break;
                    }
                }

                if !ctx.control.wait_interval(ctx.interval) {
                    break;
                }
            }

            let drained = worker.wait_idle();
            report.logged = worker.logged();
            if let Err(e) = drained.and(worker.shutdown()) {
                report.fault.get_or_insert(e.to_string());
            }
        }
        Err(e) => report.fault = Some(format!("failed to start logging thread: {e}")),
    }

    if let Err(e) = guarded("finish", || ctx.experiment.finish()) {
        error!(error = %e, "Experiment finish hook failed");
        report.fault = Some(match report.fault.take() {
            Some(earlier) => format!("{earlier}; {e}"),
            None => e.to_string(),
        });
    }

    info!(
        iterations = report.iterations,
        data_sent = report.data_sent,
        logged = report.logged,
        faulted = report.fault.is_some(),
        "Measurements have been terminated"
    );
    report
}

/// One measurement cycle. Returns whether plot data was sent.
fn iterate(ctx: &LoopContext, worker: &LoggingWorker) -> KernelResult<bool> {
    let snapshot = {
        let _instrument = ctx.instrument_lock.lock();
        guarded("measurement", || {
            ctx.experiment.measure()?;
            Ok(ctx.experiment.current_values())
        })?
    };

    worker.wait_idle()?;
    ctx.buffer.publish(&snapshot);
    worker.submit(snapshot);

    if !ctx.signals.request_data.is_set() {
        return Ok(false);
    }

    let points = ctx
        .buffer
        .with_latest(|latest| ctx.grid.extract(latest))
        .unwrap_or_else(|| Err(KernelError::MeasurementFault("no snapshot published".into())))?;

    // Cleared before sending: a reply can raise the next request at once.
    ctx.signals.request_data.clear();
    let sent = match ctx.channel.send(Command::Data(points)) {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Could not deliver plot data");
            false
        }
    };
    debug!(sent, "Answered plot data request");
    Ok(sent)
}

/// Run a collaborator hook, turning errors and panics into measurement faults.
fn guarded<T>(hook: &str, f: impl FnOnce() -> anyhow::Result<T>) -> KernelResult<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(KernelError::MeasurementFault(format!("{hook} failed: {e:#}"))),
        Err(payload) => Err(KernelError::MeasurementFault(format!(
            "{hook} panicked: {}",
            describe_panic(&*payload)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::CommandSink;
    use crate::experiment::{counted_sequence, TokenSequence};
    use crate::snapshot::Snapshot;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Experiment whose `t` and `T` follow the token count.
    #[derive(Default)]
    struct Ramp {
        n: AtomicU64,
        tokens: u64,
        finished: AtomicU64,
    }

    impl Experiment for Ramp {
        fn title(&self) -> &str {
            "ramp"
        }
        fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn measure(&self) -> anyhow::Result<()> {
            self.n.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn current_values(&self) -> Snapshot {
            let n = self.n.load(Ordering::SeqCst) as f64;
            Snapshot::new().with("t", n * 0.01).with("T", n)
        }
        fn log(&self, _snapshot: &Snapshot) -> anyhow::Result<()> {
            Ok(())
        }
        fn finish(&self) -> anyhow::Result<()> {
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn sequence(&self) -> TokenSequence {
            counted_sequence(Some(self.tokens))
        }
        fn measurement_interval(&self) -> Duration {
            Duration::ZERO
        }
        fn plot_variable_pairs(&self) -> Vec<Vec<(usize, usize)>> {
            vec![vec![(0, 1)]]
        }
        fn variable_labels(&self) -> Vec<String> {
            vec!["t".into(), "T".into()]
        }
    }

    /// A consumer that asks for the next batch while the current one is
    /// still being delivered.
    struct EagerConsumer {
        signals: Arc<SignalSet>,
        batches: Arc<AtomicU64>,
    }

    impl CommandSink for EagerConsumer {
        fn send(&mut self, command: &Command) -> KernelResult<()> {
            if matches!(command, Command::Data(_)) {
                self.batches.fetch_add(1, Ordering::SeqCst);
                self.signals.request_data.set();
            }
            Ok(())
        }
    }

    fn context(experiment: Arc<Ramp>, sink: Box<dyn CommandSink>, signals: Arc<SignalSet>) -> LoopContext {
        LoopContext {
            grid: PlotGrid::new(experiment.plot_variable_pairs(), experiment.variable_labels()).unwrap(),
            experiment,
            buffer: SharedSnapshotBuffer::new(),
            channel: Arc::new(CommandChannel::new(sink)),
            signals,
            control: Arc::new(LoopControl::new()),
            instrument_lock: Arc::new(Mutex::new(())),
            interval: Duration::ZERO,
        }
    }

    #[test]
    fn test_request_raised_during_send_is_kept() {
        let experiment = Arc::new(Ramp::default());
        let signals = Arc::new(SignalSet::new());
        let batches = Arc::new(AtomicU64::new(0));
        let sink = EagerConsumer {
            signals: Arc::clone(&signals),
            batches: Arc::clone(&batches),
        };
        let ctx = context(Arc::clone(&experiment), Box::new(sink), Arc::clone(&signals));
        let worker = LoggingWorker::spawn(experiment).unwrap();

        signals.request_data.set();
        for _ in 0..3 {
            assert!(iterate(&ctx, &worker).unwrap());
            assert!(signals.request_data.is_set());
        }
        assert_eq!(batches.load(Ordering::SeqCst), 3);
        worker.shutdown().unwrap();
    }

    #[test]
    fn test_no_data_without_request() {
        let experiment = Arc::new(Ramp {
            tokens: 4,
            ..Default::default()
        });
        let signals = Arc::new(SignalSet::new());
        let batches = Arc::new(AtomicU64::new(0));
        let sink = EagerConsumer {
            signals: Arc::clone(&signals),
            batches: Arc::clone(&batches),
        };
        let report = spawn_loop(context(Arc::clone(&experiment), Box::new(sink), signals))
            .unwrap()
            .join();

        assert_eq!(report.iterations, 4);
        assert_eq!(report.logged, 4);
        assert_eq!(report.data_sent, 0);
        assert!(report.fault.is_none());
        assert_eq!(batches.load(Ordering::SeqCst), 0);
        assert_eq!(experiment.finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wait_interval_sleeps() {
        let control = LoopControl::new();
        let start = Instant::now();
        assert!(control.wait_interval(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_stop_wakes_paused_wait() {
        let control = Arc::new(LoopControl::new());
        control.pause();

        let stopper = Arc::clone(&control);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            stopper.request_stop();
        });

        let start = Instant::now();
        assert!(!control.wait_interval(Duration::from_millis(1)));
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(control.is_stopped());
        handle.join().unwrap();
    }

    #[test]
    fn test_resume_wakes_paused_wait() {
        let control = Arc::new(LoopControl::new());
        control.pause();

        let resumer = Arc::clone(&control);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            resumer.resume();
        });

        let start = Instant::now();
        assert!(control.wait_interval(Duration::from_millis(1)));
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(30));
        assert!(waited < Duration::from_secs(1));
        handle.join().unwrap();
    }

    #[test]
    fn test_guarded_catches_panics() {
        let result: KernelResult<()> = guarded("measurement", || panic!("lock-in on fire"));
        let err = result.unwrap_err();
        assert!(err.to_string().contains("lock-in on fire"));

        let result = guarded("measurement", || Err::<(), _>(anyhow::anyhow!("timeout")));
        assert!(matches!(result, Err(KernelError::MeasurementFault(msg)) if msg.contains("timeout")));
    }

    #[test]
    fn test_report_into_result() {
        assert!(LoopReport::default().into_result().is_ok());
        let faulted = LoopReport {
            fault: Some("boom".into()),
            ..Default::default()
        };
        assert!(matches!(faulted.into_result(), Err(KernelError::MeasurementFault(_))));
    }
}
