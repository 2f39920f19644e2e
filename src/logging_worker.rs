//! Dedicated data-logging thread.
//!
//! Snapshots are handed to the `galileo-log` thread through a capacity-1 slot.
//! The measurement loop waits for the previous log call to finish before it
//! hands over the next snapshot (join-before-next), so at most one log call is
//! ever in flight and log order equals measurement order.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::error::{KernelError, KernelResult};
use crate::experiment::Experiment;
use crate::snapshot::Snapshot;

#[derive(Default)]
struct Slot {
    pending: Option<Snapshot>,
    busy: bool,
    closed: bool,
    fault: Option<String>,
    logged: u64,
}

impl Slot {
    fn idle(&self) -> bool {
        self.pending.is_none() && !self.busy
    }
}

#[derive(Default)]
struct Shared {
    slot: Mutex<Slot>,
    cond: Condvar,
}

/// Handle to the logging thread.
pub struct LoggingWorker {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl LoggingWorker {
    /// Spawn the worker thread for `experiment`.
    pub fn spawn(experiment: Arc<dyn Experiment>) -> KernelResult<Self> {
        let shared = Arc::new(Shared::default());
        let worker_shared = Arc::clone(&shared);

        let handle = thread::Builder::new()
            .name("galileo-log".into())
            .spawn(move || run_worker(&worker_shared, experiment.as_ref()))?;

        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Hand a snapshot to the worker. Blocks while a previous snapshot is
    /// still queued or being logged.
    pub fn submit(&self, snapshot: Snapshot) {
        let mut slot = self.shared.slot.lock();
        while !slot.idle() {
            self.shared.cond.wait(&mut slot);
        }
        slot.pending = Some(snapshot);
        self.shared.cond.notify_all();
    }

    /// Wait for the in-flight log call, if any, and report its failure.
    pub fn wait_idle(&self) -> KernelResult<()> {
        let mut slot = self.shared.slot.lock();
        while !slot.idle() {
            self.shared.cond.wait(&mut slot);
        }
        match slot.fault.take() {
            Some(fault) => Err(KernelError::MeasurementFault(fault)),
            None => Ok(()),
        }
    }

    /// Number of completed log calls.
    pub fn logged(&self) -> u64 {
        self.shared.slot.lock().logged
    }

    /// Drain the slot, stop the thread and report the last failure.
    pub fn shutdown(mut self) -> KernelResult<()> {
        let result = self.wait_idle();
        self.close();
        result
    }

    fn close(&mut self) {
        {
            let mut slot = self.shared.slot.lock();
            slot.closed = true;
            self.shared.cond.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Logging thread panicked");
            }
        }
    }
}

impl Drop for LoggingWorker {
    fn drop(&mut self) {
        self.close();
    }
}

fn run_worker(shared: &Shared, experiment: &dyn Experiment) {
    loop {
        let snapshot = {
            let mut slot = shared.slot.lock();
            while slot.pending.is_none() && !slot.closed {
                shared.cond.wait(&mut slot);
            }
            match slot.pending.take() {
                Some(snapshot) => {
                    slot.busy = true;
                    snapshot
                }
                None => break,
            }
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| experiment.log(&snapshot)));
        let fault = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("logging failed: {e:#}")),
            Err(payload) => Some(format!("logging panicked: {}", describe_panic(&*payload))),
        };

        let mut slot = shared.slot.lock();
        slot.busy = false;
        slot.logged += 1;
        if let Some(fault) = fault {
            error!(%fault, "Data logging failed");
            slot.fault.get_or_insert(fault);
        }
        shared.cond.notify_all();
    }
    debug!("Logging thread exiting");
}

/// Best-effort text of a panic payload.
pub(crate) fn describe_panic(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
