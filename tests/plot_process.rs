//! Kernel driving the `galileo-plot` child process over stdio.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use galileo::config::SimulationConfig;
use galileo::consumer::ProcessLauncher;
use galileo::sim::SimulatedExperiment;
use galileo::{CommandOutcome, Kernel, KernelSettings, KernelState};

fn settings() -> KernelSettings {
    KernelSettings {
        refresh_interval: Duration::from_millis(20),
        listen_interval: Duration::from_millis(5),
        quit_timeout: Duration::from_secs(2),
        ui_lag: Duration::ZERO,
    }
}

#[test]
fn test_process_consumer_session() {
    let dir = tempfile::tempdir().unwrap();
    let experiment = Arc::new(SimulatedExperiment::with_seed(
        SimulationConfig {
            points: Some(20),
            interval_secs: 0.01,
            output: dir.path().join("process.csv"),
        },
        3,
    ));
    let launcher = ProcessLauncher::new(env!("CARGO_BIN_EXE_galileo-plot"));
    let kernel = Kernel::builder(experiment.clone(), launcher).settings(settings()).build();

    assert_eq!(kernel.start().unwrap(), CommandOutcome::Done);
    assert_eq!(kernel.autoscale_off().unwrap(), CommandOutcome::Done);
    assert_eq!(kernel.clear_plot().unwrap(), CommandOutcome::Done);

    for _ in 0..200 {
        if kernel.state() == KernelState::Stopped {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(kernel.state(), KernelState::Stopped);

    let report = kernel.quit().unwrap();
    assert!(!report.forced_termination);
    assert!(report.measurement_fault.is_none());

    let csv = std::fs::read_to_string(experiment.output()).unwrap();
    assert_eq!(csv.lines().count(), 22);
}
