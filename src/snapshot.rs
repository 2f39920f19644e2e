//! Measurement snapshots and the lock-guarded buffer holding the latest one.
//!
//! A [`Snapshot`] is the complete set of channel values at one loop iteration.
//! The measurement loop is the only producer; everything else sees copies
//! taken through [`SharedSnapshotBuffer`], whose lock is held only for the
//! duration of a copy.
//!
//! [`PlotGrid`] describes which snapshot entries feed which subplot and turns a
//! snapshot into a [`PlotPointSet`] on demand.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};

/// Ordered mapping from channel name to value for one measurement instant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    entries: Vec<(String, f64)>,
}

impl Snapshot {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value. An existing channel keeps its position.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    /// Value of a named channel.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    /// Value at a variable index (insertion order).
    pub fn value_at(&self, index: usize) -> Option<f64> {
        self.entries.get(index).map(|(_, v)| *v)
    }

    /// Number of variables.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no variable is set.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Variables and values in measurement order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), *v))
    }

    /// Variable names in measurement order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for Snapshot {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut snapshot = Snapshot::new();
        for (name, value) in iter {
            snapshot.insert(name, value);
        }
        snapshot
    }
}

/// Lock-guarded holder of the most recent snapshot.
///
/// Cloning the handle shares the same buffer, so several kernels (or a front
/// end) can be given the same data lock.
#[derive(Debug, Clone, Default)]
pub struct SharedSnapshotBuffer {
    inner: Arc<Mutex<Option<Snapshot>>>,
}

impl SharedSnapshotBuffer {
    /// Empty buffer with its own lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held snapshot with a copy of `snapshot`.
    pub fn publish(&self, snapshot: &Snapshot) {
        let copy = snapshot.clone();
        *self.inner.lock() = Some(copy);
    }

    /// Copy of the latest snapshot, if any has been published.
    pub fn latest(&self) -> Option<Snapshot> {
        self.inner.lock().clone()
    }

    /// Run `f` against the latest snapshot while holding the lock.
    ///
    /// `f` must not block: no I/O under the buffer lock.
    pub fn with_latest<R>(&self, f: impl FnOnce(&Snapshot) -> R) -> Option<R> {
        self.inner.lock().as_ref().map(f)
    }
}

/// Per-subplot `(x, y)` points derived from one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotPointSet {
    /// `points[row][col]` is the `(x, y)` pair for that subplot.
    pub points: Vec<Vec<(f64, f64)>>,
}

impl PlotPointSet {
    /// Subplot rows.
    pub fn rows(&self) -> usize {
        self.points.len()
    }

    /// Subplot columns.
    pub fn cols(&self) -> usize {
        self.points.first().map_or(0, Vec::len)
    }
}

/// Subplot geometry: a rectangular grid of `(x index, y index)` pairs plus the
/// label of every variable index.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotGrid {
    pairs: Vec<Vec<(usize, usize)>>,
    labels: Vec<String>,
}

impl PlotGrid {
    /// Validate the geometry against the variable labels.
    pub fn new(pairs: Vec<Vec<(usize, usize)>>, labels: Vec<String>) -> KernelResult<Self> {
        let cols = match pairs.first() {
            Some(row) if !row.is_empty() => row.len(),
            _ => {
                return Err(KernelError::Configuration(
                    "plot grid must have at least one subplot".into(),
                ))
            }
        };

        for (i, row) in pairs.iter().enumerate() {
            if row.len() != cols {
                return Err(KernelError::Configuration(format!(
                    "plot grid row {i} has {} subplots, expected {cols}",
                    row.len()
                )));
            }
            for (j, &(x, y)) in row.iter().enumerate() {
                for index in [x, y] {
                    if index >= labels.len() {
                        return Err(KernelError::Configuration(format!(
                            "subplot ({i}, {j}) refers to variable {index}, but only {} variables are labelled",
                            labels.len()
                        )));
                    }
                }
            }
        }

        Ok(Self { pairs, labels })
    }

    /// Number of subplot rows.
    pub fn rows(&self) -> usize {
        self.pairs.len()
    }

    /// Number of subplot columns.
    pub fn cols(&self) -> usize {
        self.pairs[0].len()
    }

    /// Index pairs per subplot, row-major.
    pub fn pairs(&self) -> &[Vec<(usize, usize)>] {
        &self.pairs
    }

    /// `(x label, y label)` for every subplot, in grid order.
    pub fn axis_labels(&self) -> Vec<Vec<(String, String)>> {
        self.pairs
            .iter()
            .map(|row| {
                row.iter()
                    .map(|&(x, y)| (self.labels[x].clone(), self.labels[y].clone()))
                    .collect()
            })
            .collect()
    }

    /// Pick the plotted values out of `snapshot`.
    pub fn extract(&self, snapshot: &Snapshot) -> KernelResult<PlotPointSet> {
        let value = |index: usize| {
            snapshot.value_at(index).ok_or_else(|| {
                KernelError::MeasurementFault(format!(
                    "snapshot has {} values, plot needs variable {index}",
                    snapshot.len()
                ))
            })
        };

        let points = self
            .pairs
            .iter()
            .map(|row| {
                row.iter()
                    .map(|&(x, y)| Ok((value(x)?, value(y)?)))
                    .collect::<KernelResult<Vec<_>>>()
            })
            .collect::<KernelResult<Vec<_>>>()?;

        Ok(PlotPointSet { points })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("v{i}")).collect()
    }

    #[test]
    fn test_snapshot_keeps_insertion_order() {
        let mut snapshot = Snapshot::new().with("t", 0.5).with("T", 4.2);
        snapshot.insert("t", 0.6);

        assert_eq!(snapshot.names().collect::<Vec<_>>(), vec!["t", "T"]);
        assert_eq!(snapshot.get("t"), Some(0.6));
        assert_eq!(snapshot.value_at(1), Some(4.2));
        assert_eq!(snapshot.value_at(2), None);
    }

    #[test]
    fn test_buffer_hands_out_copies() {
        let buffer = SharedSnapshotBuffer::new();
        assert!(buffer.latest().is_none());

        let mut snapshot = Snapshot::new().with("T", 1.0);
        buffer.publish(&snapshot);
        snapshot.insert("T", 2.0);

        assert_eq!(buffer.latest().and_then(|s| s.get("T")), Some(1.0));
        assert_eq!(buffer.with_latest(Snapshot::len), Some(1));
    }

    #[test]
    fn test_grid_rejects_bad_geometry() {
        assert!(PlotGrid::new(vec![], labels(2)).is_err());
        assert!(PlotGrid::new(vec![vec![]], labels(2)).is_err());
        assert!(PlotGrid::new(vec![vec![(0, 1)], vec![(0, 1), (1, 0)]], labels(2)).is_err());

        let err = PlotGrid::new(vec![vec![(0, 5)]], labels(2)).unwrap_err();
        assert!(matches!(err, KernelError::Configuration(_)));
    }

    #[test]
    fn test_grid_extracts_points() {
        let grid = PlotGrid::new(vec![vec![(0, 1), (0, 2)], vec![(1, 3), (2, 3)]], labels(4)).unwrap();
        assert_eq!((grid.rows(), grid.cols()), (2, 2));
        assert_eq!(grid.axis_labels()[1][0], ("v1".to_string(), "v3".to_string()));

        let snapshot: Snapshot = [("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)]
            .into_iter()
            .collect();
        let points = grid.extract(&snapshot).unwrap();
        assert_eq!(points.points, vec![vec![(1.0, 2.0), (1.0, 3.0)], vec![(2.0, 4.0), (3.0, 4.0)]]);

        let short = Snapshot::new().with("a", 1.0);
        assert!(matches!(grid.extract(&short), Err(KernelError::MeasurementFault(_))));
    }
}
