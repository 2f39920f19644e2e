//! # Galileo Measurement Kernel
//!
//! This crate runs an experiment continuously on a background thread, logs
//! every data point on a second thread so slow I/O never delays the next
//! measurement, and keeps a live-plotting consumer fed without flooding it.
//!
//! ## Crate Structure
//!
//! - **`kernel`**: The `Kernel` state machine (start, pause, resume, stop, quit)
//!   and the plot commands. Front ends talk to it through `KernelOps`.
//! - **`measurement_loop`**: The measurement thread and its pause/stop control.
//! - **`logging_worker`**: The logging thread with its single-slot handoff.
//! - **`experiment`**: The `Experiment` trait implemented by measurement code.
//! - **`snapshot`**: Named data points, the shared latest-snapshot buffer and
//!   the plot grid that turns a snapshot into plot points.
//! - **`signal`** / **`channel`**: The latches and the command channel shared
//!   with the plotting consumer.
//! - **`consumer`**: Launching the consumer in a thread or a child process.
//! - **`plotter`**: A headless consumer: plot buffer and protocol driver.
//! - **`console`**: The text front end.
//! - **`sim`**: A simulated experiment for running without hardware.
//! - **`config`**, **`error`**, **`tracing_setup`**: Configuration, the
//!   `KernelError` type and log output.

pub mod channel;
pub mod config;
pub mod console;
pub mod consumer;
pub mod error;
pub mod experiment;
pub mod kernel;
pub mod logging_worker;
pub mod measurement_loop;
pub mod plotter;
pub mod signal;
pub mod sim;
pub mod snapshot;
pub mod tracing_setup;

pub use error::{KernelError, KernelResult};
pub use experiment::{Experiment, Token, TokenSequence};
pub use kernel::{CommandOutcome, Kernel, KernelOps, KernelSettings, KernelState, Misuse, QuitReport};
pub use snapshot::Snapshot;
