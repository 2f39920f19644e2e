//! One-shot signal latches used for kernel/consumer handshakes.
//!
//! A [`Signal`] is a boolean latch with a blocking wait. The plotting consumer
//! raises signals through [`SignalSet::apply`]; the kernel and the measurement
//! loop observe and clear them.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::channel::ConsumerEvent;

/// Boolean latch with blocking wait, set and clear.
#[derive(Debug, Default)]
pub struct Signal {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    /// A lowered latch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the latch and wake every waiter.
    pub fn set(&self) {
        let mut flag = self.flag.lock();
        *flag = true;
        self.cond.notify_all();
    }

    /// Lower the latch. Waiters keep waiting.
    pub fn clear(&self) {
        *self.flag.lock() = false;
    }

    /// Current value, without waiting.
    pub fn is_set(&self) -> bool {
        *self.flag.lock()
    }

    /// Block until the signal is set or `timeout` elapses. Returns whether the
    /// signal was observed set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flag = self.flag.lock();
        while !*flag {
            if self.cond.wait_until(&mut flag, deadline).timed_out() {
                break;
            }
        }
        *flag
    }
}

/// The three named latches shared between the kernel and the plotting consumer.
#[derive(Debug, Default)]
pub struct SignalSet {
    /// Consumer is ready for the next batch of plot data.
    pub request_data: Signal,
    /// A plot window is currently shown.
    pub plot_shown: Signal,
    /// The last autoscale/clear command was completed.
    pub command_done: Signal,
}

impl SignalSet {
    /// All three latches lowered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply an event reported by the consumer.
    pub fn apply(&self, event: ConsumerEvent) {
        match event {
            ConsumerEvent::RequestData => self.request_data.set(),
            ConsumerEvent::PlotShown => self.plot_shown.set(),
            ConsumerEvent::PlotHidden => self.plot_shown.clear(),
            ConsumerEvent::CommandDone => self.command_done.set(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_wait_returns_after_set() {
        let signal = Arc::new(Signal::new());
        let setter = Arc::clone(&signal);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            setter.set();
        });

        assert!(signal.wait_timeout(Duration::from_secs(5)));
        assert!(signal.is_set());
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_timeout_expires() {
        let signal = Signal::new();
        let start = Instant::now();
        assert!(!signal.wait_timeout(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));

        signal.set();
        assert!(signal.wait_timeout(Duration::ZERO));
        signal.clear();
        assert!(!signal.is_set());
    }

    #[test]
    fn test_apply_events() {
        let signals = SignalSet::new();
        signals.apply(ConsumerEvent::RequestData);
        signals.apply(ConsumerEvent::PlotShown);
        signals.apply(ConsumerEvent::CommandDone);
        assert!(signals.request_data.is_set());
        assert!(signals.plot_shown.is_set());
        assert!(signals.command_done.is_set());

        signals.apply(ConsumerEvent::PlotHidden);
        assert!(!signals.plot_shown.is_set());
    }
}
