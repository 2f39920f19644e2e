//! Simulated magnetic-impedance experiment.
//!
//! Stands in for a lock-in amplifier and a thermometer so the kernel can be
//! run without hardware. Every measurement produces `n, t, T, H, X, Y`:
//! point index, elapsed time, a temperature random walk, a slow field sweep
//! and lock-in X/Y readings with noise. Rows are logged to a CSV file.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::config::SimulationConfig;
use crate::experiment::{counted_sequence, Experiment, TokenSequence};
use crate::snapshot::Snapshot;

/// Variable names, in snapshot order.
pub const VARIABLES: [&str; 6] = ["n", "t", "T", "H", "X", "Y"];

const LABELS: [&str; 6] = ["n", "t (s)", "T (K)", "H (T)", "X (V)", "Y (V)"];

const BASE_TEMPERATURE: f64 = 4.2;
const FIELD_AMPLITUDE: f64 = 9.0;

struct Instruments {
    rng: StdRng,
    started: Instant,
    n: u64,
    temperature: f64,
    values: Snapshot,
}

impl Instruments {
    fn new(rng: StdRng) -> Self {
        Self {
            rng,
            started: Instant::now(),
            n: 0,
            temperature: BASE_TEMPERATURE,
            values: Snapshot::new(),
        }
    }

    fn reset(&mut self) {
        self.started = Instant::now();
        self.n = 0;
        self.temperature = BASE_TEMPERATURE;
        self.values = Snapshot::new();
    }

    fn read(&mut self) {
        let t = self.started.elapsed().as_secs_f64();
        self.temperature = (self.temperature + self.rng.gen_range(-0.05..0.05)).max(0.0);
        let field = FIELD_AMPLITUDE * (self.n as f64 * 1e-3).sin();
        let x = 1e-6 * (1.0 + 0.1 * field * field) + self.rng.gen_range(-1e-8..1e-8);
        let y = 1e-7 * field + self.rng.gen_range(-1e-8..1e-8);

        self.values = [
            ("n", self.n as f64),
            ("t", t),
            ("T", self.temperature),
            ("H", field),
            ("X", x),
            ("Y", y),
        ]
        .into_iter()
        .collect();
        self.n += 1;
    }
}

/// Random-walk experiment writing CSV.
pub struct SimulatedExperiment {
    title: String,
    config: SimulationConfig,
    instruments: Mutex<Instruments>,
    writer: Mutex<Option<csv::Writer<File>>>,
}

impl SimulatedExperiment {
    /// Simulated experiment seeded from the system RNG.
    pub fn new(config: SimulationConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Deterministic noise, for tests.
    pub fn with_seed(config: SimulationConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: SimulationConfig, rng: StdRng) -> Self {
        Self {
            title: "Simulated magnetic-impedance sweep".to_string(),
            config,
            instruments: Mutex::new(Instruments::new(rng)),
            writer: Mutex::new(None),
        }
    }

    /// Path of the CSV file written by `log`.
    pub fn output(&self) -> &Path {
        &self.config.output
    }

    fn open_output(&self) -> Result<csv::Writer<File>> {
        let path = &self.config.output;
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        let mut file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        writeln!(file, "# {} started {}", self.title, chrono::Local::now().to_rfc3339())?;

        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(VARIABLES)?;
        Ok(writer)
    }
}

impl Experiment for SimulatedExperiment {
    fn title(&self) -> &str {
        &self.title
    }

    fn start(&self) -> Result<()> {
        self.instruments.lock().reset();
        *self.writer.lock() = Some(self.open_output()?);
        info!(output = %self.config.output.display(), "Simulation output opened");
        Ok(())
    }

    fn measure(&self) -> Result<()> {
        self.instruments.lock().read();
        Ok(())
    }

    fn current_values(&self) -> Snapshot {
        self.instruments.lock().values.clone()
    }

    fn log(&self, snapshot: &Snapshot) -> Result<()> {
        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or_else(|| anyhow!("output file is not open"))?;
        writer.write_record(snapshot.iter().map(|(_, value)| value.to_string()))?;
        debug!(n = snapshot.get("n"), "Logged data point");
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        if let Some(mut writer) = self.writer.lock().take() {
            writer.flush()?;
        }
        info!(points = self.instruments.lock().n, "Simulation output closed");
        Ok(())
    }

    fn sequence(&self) -> TokenSequence {
        counted_sequence(self.config.points)
    }

    fn measurement_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.config.interval_secs).unwrap_or_default()
    }

    fn plot_variable_pairs(&self) -> Vec<Vec<(usize, usize)>> {
        // T vs t, X vs H / X vs t, Y vs t
        vec![vec![(1, 2), (3, 4)], vec![(1, 4), (1, 5)]]
    }

    fn variable_labels(&self) -> Vec<String> {
        LABELS.iter().map(|label| label.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::PlotGrid;

    fn config(dir: &Path, points: Option<u64>) -> SimulationConfig {
        SimulationConfig {
            points,
            interval_secs: 0.01,
            output: dir.join("run").join("data.csv"),
        }
    }

    #[test]
    fn test_measure_produces_all_variables() {
        let dir = tempfile::tempdir().unwrap();
        let experiment = SimulatedExperiment::with_seed(config(dir.path(), Some(3)), 7);

        experiment.measure().unwrap();
        experiment.measure().unwrap();
        let values = experiment.current_values();
        assert_eq!(values.names().collect::<Vec<_>>(), VARIABLES.to_vec());
        assert_eq!(values.get("n"), Some(1.0));
        assert!(values.get("T").unwrap() > 3.0);
    }

    #[test]
    fn test_plot_layout_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let experiment = SimulatedExperiment::new(config(dir.path(), None));
        let grid = PlotGrid::new(experiment.plot_variable_pairs(), experiment.variable_labels()).unwrap();
        assert_eq!((grid.rows(), grid.cols()), (2, 2));
        assert_eq!(experiment.sequence().take(10).count(), 10);
        assert_eq!(experiment.measurement_interval(), Duration::from_millis(10));
    }

    #[test]
    fn test_csv_output() {
        let dir = tempfile::tempdir().unwrap();
        let experiment = SimulatedExperiment::with_seed(config(dir.path(), Some(2)), 1);

        assert!(experiment.log(&Snapshot::new().with("n", 0.0)).is_err());

        experiment.start().unwrap();
        for _ in 0..2 {
            experiment.measure().unwrap();
            experiment.log(&experiment.current_values()).unwrap();
        }
        experiment.finish().unwrap();

        let text = fs::read_to_string(experiment.output()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert!(lines[0].starts_with("# Simulated"));
        assert_eq!(lines[1], "n,t,T,H,X,Y");
        assert_eq!(lines.len(), 4);
        assert!(lines[3].starts_with("1,"));
    }
}
