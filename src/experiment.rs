//! The experiment collaborator driven by the kernel.
//!
//! The kernel never talks to instruments itself. It calls an [`Experiment`],
//! which owns the measurement algorithm, the data logger and the iteration
//! sequence. Methods take `&self` because `log` runs on the logging thread
//! while the next `measure` runs on the measurement thread; implementations
//! keep their mutable state behind their own locks.

use std::time::Duration;

use anyhow::Result;

use crate::snapshot::Snapshot;

/// Opaque iteration marker produced by [`Experiment::sequence`].
///
/// Tokens only control how many iterations run; the kernel does not look
/// inside them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(pub u64);

/// Lazy, possibly infinite token sequence.
pub type TokenSequence = Box<dyn Iterator<Item = Token> + Send>;

/// Measurement collaborator interface.
pub trait Experiment: Send + Sync {
    /// Human readable title, shown when the run starts.
    fn title(&self) -> &str;

    /// Prepare instruments and output before the first measurement.
    fn start(&self) -> Result<()>;

    /// Take one measurement (blocking instrument I/O).
    fn measure(&self) -> Result<()>;

    /// Values of the last measurement. Valid after [`measure`](Self::measure).
    fn current_values(&self) -> Snapshot;

    /// Persist one snapshot. Invoked off the measurement path and may block.
    fn log(&self, snapshot: &Snapshot) -> Result<()>;

    /// Finish up after the last measurement. Called exactly once per run.
    fn finish(&self) -> Result<()>;

    /// Token sequence controlling iteration count.
    fn sequence(&self) -> TokenSequence;

    /// Pause between measurements.
    fn measurement_interval(&self) -> Duration;

    /// Variable-index pairs `(x, y)` for every subplot, row by row.
    fn plot_variable_pairs(&self) -> Vec<Vec<(usize, usize)>>;

    /// Axis label for every variable index.
    fn variable_labels(&self) -> Vec<String>;
}

/// Sequence of `count` tokens, or an endless one when `count` is `None`.
pub fn counted_sequence(count: Option<u64>) -> TokenSequence {
    match count {
        Some(n) => Box::new((0..n).map(Token)),
        None => Box::new((0..).map(Token)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counted_sequence() {
        let tokens: Vec<_> = counted_sequence(Some(3)).collect();
        assert_eq!(tokens, vec![Token(0), Token(1), Token(2)]);
        assert_eq!(counted_sequence(None).take(1000).count(), 1000);
    }
}
