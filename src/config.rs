//! Configuration loading using Figment.
//!
//! Configuration is layered:
//! 1. built-in defaults
//! 2. a TOML file (`config/galileo.toml` unless another path is given)
//! 3. environment variables prefixed with `GALILEO_`, nested with `__`
//!
//! Example: `GALILEO_PLOTTING__QUIT_TIMEOUT_SECS=2.5`.
//!
//! # Example
//! ```no_run
//! use galileo::config::GalileoConfig;
//!
//! let config = GalileoConfig::load()?;
//! config.validate()?;
//! println!("Application: {}", config.application.name);
//! # Ok::<(), galileo::error::KernelError>(())
//! ```

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, KernelResult};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/galileo.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GalileoConfig {
    /// `[application]`
    pub application: ApplicationConfig,
    /// `[plotting]`
    pub plotting: PlottingConfig,
    /// `[console]`
    pub console: ConsoleConfig,
    /// `[simulation]`
    pub simulation: SimulationConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "Galileo".to_string(),
            log_level: "info".to_string(),
            log_format: "compact".to_string(),
        }
    }
}

/// Timing of the plotting consumer handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlottingConfig {
    /// Interval between plot refreshes (data requests) in seconds
    pub refresh_interval_secs: f64,
    /// Interval between command polls of the consumer in seconds
    pub listen_interval_secs: f64,
    /// How long `quit` waits for the consumer before terminating it
    pub quit_timeout_secs: f64,
    /// Settling delay after an acknowledged plot command
    pub ui_lag_secs: f64,
    /// Consumer executable; the in-process headless consumer is used when unset
    pub consumer_program: Option<PathBuf>,
}

impl Default for PlottingConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 0.5,
            listen_interval_secs: 0.05,
            quit_timeout_secs: 1.0,
            ui_lag_secs: 0.3,
            consumer_program: None,
        }
    }
}

/// Text console resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Prompt printed after every question
    pub prompt: String,
    /// File replacing the built-in help text
    pub help_file: Option<PathBuf>,
    /// File replacing the built-in prompt questions (one per line)
    pub questions_file: Option<PathBuf>,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            prompt: "?>".to_string(),
            help_file: None,
            questions_file: None,
        }
    }
}

/// Settings of the simulated experiment run by the `galileo` binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of measurements; unlimited when unset
    pub points: Option<u64>,
    /// Measurement interval in seconds
    pub interval_secs: f64,
    /// CSV output file
    pub output: PathBuf,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            points: None,
            interval_secs: 0.1,
            output: PathBuf::from("data/galileo.csv"),
        }
    }
}

impl GalileoConfig {
    /// Load from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> KernelResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load from a specific file path and the environment. A missing file
    /// leaves the defaults in place.
    pub fn load_from<P: AsRef<Path>>(path: P) -> KernelResult<Self> {
        let config = Figment::from(Serialized::defaults(GalileoConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("GALILEO_").split("__"))
            .extract()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> KernelResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(KernelError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(KernelError::Configuration(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            )));
        }

        let positive = [
            ("plotting.refresh_interval_secs", self.plotting.refresh_interval_secs),
            ("plotting.listen_interval_secs", self.plotting.listen_interval_secs),
            ("simulation.interval_secs", self.simulation.interval_secs),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(KernelError::Configuration(format!(
                    "{name} must be a positive number of seconds, got {value}"
                )));
            }
        }

        let non_negative = [
            ("plotting.quit_timeout_secs", self.plotting.quit_timeout_secs),
            ("plotting.ui_lag_secs", self.plotting.ui_lag_secs),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(KernelError::Configuration(format!(
                    "{name} must not be negative, got {value}"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = GalileoConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.plotting.quit_timeout_secs, 1.0);
        assert_eq!(config.console.prompt, "?>");
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            [application]
            log_level = "debug"

            [plotting]
            refresh_interval_secs = 0.25
            consumer_program = "/usr/local/bin/galileo-plot"

            [simulation]
            points = 50
            "#
        )
        .unwrap();

        let config = GalileoConfig::load_from(file.path()).unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.application.name, "Galileo");
        assert_eq!(config.plotting.refresh_interval_secs, 0.25);
        assert_eq!(config.plotting.listen_interval_secs, 0.05);
        assert_eq!(
            config.plotting.consumer_program,
            Some(PathBuf::from("/usr/local/bin/galileo-plot"))
        );
        assert_eq!(config.simulation.points, Some(50));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = GalileoConfig::load_from("/nonexistent/galileo.toml").unwrap();
        assert_eq!(config.plotting, PlottingConfig::default());
    }

    #[test]
    fn test_invalid_values() {
        let mut config = GalileoConfig::default();
        config.application.log_level = "loud".into();
        assert!(config.validate().is_err());

        let mut config = GalileoConfig::default();
        config.plotting.listen_interval_secs = 0.0;
        assert!(config.validate().is_err());

        let mut config = GalileoConfig::default();
        config.plotting.quit_timeout_secs = -1.0;
        assert!(matches!(config.validate(), Err(KernelError::Configuration(_))));
    }
}
