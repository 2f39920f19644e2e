//! Custom error types for the kernel.
//!
//! `KernelError` is the single error type returned by the public kernel
//! surface. It mirrors the fault taxonomy of the measurement kernel:
//!
//! - **`Configuration`**: inconsistent subplot/variable geometry or invalid
//!   timing values. Detected before anything is launched and always fatal.
//! - **`MeasurementFault`**: a failure (error or panic) inside measurement,
//!   logging or the finish hook. It terminates the measurement loop and is
//!   reported on the next join or status check.
//! - **`ConsumerLaunch`** / **`ConsumerExited`**: the plotting consumer could not
//!   be started, or disappeared while the kernel was waiting on one of its
//!   signals.
//! - **`Channel`**: a command could not be written to the plotting consumer.
//!
//! Redundant or out-of-order user commands are *not* errors; they are reported
//! through [`CommandOutcome::Ignored`](crate::kernel::CommandOutcome).

use thiserror::Error;

/// Convenience alias for results using the kernel error type.
pub type KernelResult<T> = std::result::Result<T, KernelError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum KernelError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Configuration loading error: {0}")]
    Config(#[from] figment::Error),

    #[error("Measurement fault: {0}")]
    MeasurementFault(String),

    #[error("Failed to launch plotting consumer: {0}")]
    ConsumerLaunch(String),

    #[error("Plotting consumer exited unexpectedly")]
    ConsumerExited,

    #[error("Command channel error: {0}")]
    Channel(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KernelError {
    /// Whether the kernel can keep accepting commands after this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            KernelError::MeasurementFault(_) | KernelError::Channel(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KernelError::Configuration("empty plot grid".into());
        assert_eq!(err.to_string(), "Configuration error: empty plot grid");

        let err = KernelError::MeasurementFault("lock-in timed out".into());
        assert_eq!(err.to_string(), "Measurement fault: lock-in timed out");
    }

    #[test]
    fn test_recoverable() {
        assert!(KernelError::MeasurementFault("x".into()).is_recoverable());
        assert!(!KernelError::Configuration("x".into()).is_recoverable());
        assert!(!KernelError::ConsumerExited.is_recoverable());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: KernelError = io.into();
        assert!(matches!(err, KernelError::Io(_)));
    }
}
