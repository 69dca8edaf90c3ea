//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load TOML configuration files
//! for the DAQ HAT library and tools.
//!
//! # Usage
//!
//! ```rust,no_run
//! use daqhat_common::config::{ConfigLoader, ConfigError, DaqConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = DaqConfig::load(Path::new("daqhat.toml"))?;
//!     config.validate()?;
//!     println!("Lock file: {}", config.bus.lock_file.display());
//!     Ok(())
//! }
//! ```

use crate::board::BoardModel;
use crate::consts::{
    ADDRESS_LINES, DEFAULT_ADDRESS_PINS, DEFAULT_GPIO_ROOT, DEFAULT_LOCK_FILE,
    DEFAULT_LOCK_TIMEOUT_MS, DEFAULT_SYNC_POLL_US, DEFAULT_SYNC_TIMEOUT_MS,
    DEFAULT_TRIGGER_POLL_US, MAX_CHANNELS, MAX_NUMBER_HATS,
};
use crate::types::Calibration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Error type for configuration loading operations.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, detailed tracing information.
    Trace,
    /// Debug information useful during development.
    Debug,
    /// General information about application operation.
    #[default]
    Info,
    /// Warning messages for potentially problematic situations.
    Warn,
    /// Error messages for serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common configuration fields.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "daqhat-bench-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
            service_name: "daqhat".to_string(),
        }
    }
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Shared bus arbitration and address-select settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusConfig {
    /// Cross-process lock file. Created with mode 0666 if absent.
    pub lock_file: PathBuf,
    /// Bound on acquiring the bus lock, in milliseconds.
    pub lock_timeout_ms: u64,
    /// Address-select GPIO pins, least significant bit first.
    pub address_pins: Vec<u32>,
    /// Root of the sysfs GPIO class directory.
    pub gpio_root: PathBuf,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            lock_file: PathBuf::from(DEFAULT_LOCK_FILE),
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
            address_pins: DEFAULT_ADDRESS_PINS.to_vec(),
            gpio_root: PathBuf::from(DEFAULT_GPIO_ROOT),
        }
    }
}

impl BusConfig {
    /// Lock timeout as a `Duration`.
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Scan engine timing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScanTuning {
    /// Bound on waiting for a shared or external clock to lock.
    pub sync_timeout_ms: u64,
    /// Interval between sync-status polls.
    pub sync_poll_us: u64,
    /// Interval between trigger-input polls.
    pub trigger_poll_us: u64,
}

impl Default for ScanTuning {
    fn default() -> Self {
        Self {
            sync_timeout_ms: DEFAULT_SYNC_TIMEOUT_MS,
            sync_poll_us: DEFAULT_SYNC_POLL_US,
            trigger_poll_us: DEFAULT_TRIGGER_POLL_US,
        }
    }
}

impl ScanTuning {
    /// Sync timeout as a `Duration`.
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    /// Sync poll interval as a `Duration`.
    pub fn sync_poll(&self) -> Duration {
        Duration::from_micros(self.sync_poll_us)
    }

    /// Trigger poll interval as a `Duration`.
    pub fn trigger_poll(&self) -> Duration {
        Duration::from_micros(self.trigger_poll_us)
    }
}

/// Signal presented to one simulated input channel, in volts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Waveform {
    /// Fixed level.
    Constant {
        /// Level in volts
        volts: f64,
    },
    /// Linear ramp starting at `start`, rising `slope` volts per second.
    Ramp {
        /// Level at t = 0
        start: f64,
        /// Volts per second
        slope: f64,
    },
    /// `offset + amplitude * sin(2π f t)`.
    Sine {
        /// Peak amplitude in volts
        amplitude: f64,
        /// Frequency in Hz
        frequency: f64,
        /// DC offset in volts
        #[serde(default)]
        offset: f64,
    },
}

impl Default for Waveform {
    fn default() -> Self {
        Self::Constant { volts: 0.0 }
    }
}

impl Waveform {
    /// Signal level at `t` seconds after the sample clock started.
    pub fn value_at(&self, t: f64) -> f64 {
        match *self {
            Self::Constant { volts } => volts,
            Self::Ramp { start, slope } => start + slope * t,
            Self::Sine {
                amplitude,
                frequency,
                offset,
            } => offset + amplitude * (std::f64::consts::TAU * frequency * t).sin(),
        }
    }
}

/// One simulated board on the software backplane.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimBoardConfig {
    /// Bus address (0..8)
    pub address: u8,
    /// Board type
    pub model: BoardModel,
    /// Per-channel signals; channels without an entry read 0 V.
    #[serde(default)]
    pub waveforms: Vec<Waveform>,
    /// Per-channel factory coefficients; channels without an entry fall
    /// back to slope 1.0 / offset 0.0.
    #[serde(default)]
    pub calibration: Vec<Calibration>,
}

/// Simulation backplane contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Boards present on the simulated bus.
    pub boards: Vec<SimBoardConfig>,
}

/// Full configuration document.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// service_name = "daqhat"
///
/// [bus]
/// lock_timeout_ms = 5000
///
/// [scan]
/// sync_timeout_ms = 10000
///
/// [[simulation.boards]]
/// address = 0
/// model = "mcc118"
/// waveforms = [{ kind = "sine", amplitude = 1.0, frequency = 10.0 }]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaqConfig {
    /// Logging and identity.
    pub shared: SharedConfig,
    /// Bus arbitration.
    pub bus: BusConfig,
    /// Scan engine timing.
    pub scan: ScanTuning,
    /// Simulated boards.
    pub simulation: SimulationConfig,
}

impl DaqConfig {
    /// Load from `path` if given, otherwise return defaults.
    ///
    /// # Errors
    /// Any loader or validation error.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `service_name` is empty
    /// - `lock_timeout_ms` or `sync_timeout_ms` is zero
    /// - `address_pins` does not hold exactly one pin per address line
    /// - a simulated board address is out of range or duplicated
    /// - a simulated board lists more waveforms or coefficients than channels
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;

        if self.bus.lock_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "bus.lock_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.bus.address_pins.len() != ADDRESS_LINES {
            return Err(ConfigError::ValidationError(format!(
                "bus.address_pins must list {ADDRESS_LINES} pins, got {}",
                self.bus.address_pins.len()
            )));
        }
        if self.scan.sync_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "scan.sync_timeout_ms must be > 0".to_string(),
            ));
        }

        let mut seen = [false; MAX_NUMBER_HATS];
        for board in &self.simulation.boards {
            let index = usize::from(board.address);
            if index >= MAX_NUMBER_HATS {
                return Err(ConfigError::ValidationError(format!(
                    "simulated board address {} out of range 0..{MAX_NUMBER_HATS}",
                    board.address
                )));
            }
            if seen[index] {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate simulated board address {}",
                    board.address
                )));
            }
            seen[index] = true;

            let channels = usize::from(board.model.info().channel_count);
            debug_assert!(channels <= MAX_CHANNELS);
            if board.waveforms.len() > channels || board.calibration.len() > channels {
                return Err(ConfigError::ValidationError(format!(
                    "board {} ({}) has {channels} channels",
                    board.address, board.model
                )));
            }
            for cal in &board.calibration {
                cal.validate()
                    .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
            }
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// Blanket-implemented for any `serde::de::DeserializeOwned` type.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_log_level_default() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
        assert_eq!(LogLevel::Warn.as_filter(), "warn");
    }

    #[test]
    fn test_log_level_deserialization() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct TestWrapper {
            level: LogLevel,
        }

        assert_eq!(
            toml::from_str::<TestWrapper>("level = \"trace\"")
                .unwrap()
                .level,
            LogLevel::Trace
        );
        assert_eq!(
            toml::from_str::<TestWrapper>("level = \"error\"")
                .unwrap()
                .level,
            LogLevel::Error
        );
    }

    #[test]
    fn test_shared_config_validation_empty_service_name() {
        let config = SharedConfig {
            log_level: LogLevel::Info,
            service_name: "".to_string(),
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_config_loader_file_not_found() {
        let result = DaqConfig::load(Path::new("/nonexistent/path/daqhat.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound)));
    }

    #[test]
    fn test_config_loader_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid toml {{{{").unwrap();

        let result = DaqConfig::load(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = DaqConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bus.lock_timeout(), Duration::from_secs(5));
        assert_eq!(config.bus.address_pins, vec![12, 13, 26]);
        assert_eq!(config.scan.sync_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_zero_lock_timeout_rejected() {
        let mut config = DaqConfig::default();
        config.bus.lock_timeout_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_waveform_values() {
        assert_eq!(Waveform::default().value_at(3.0), 0.0);
        let ramp = Waveform::Ramp {
            start: -1.0,
            slope: 2.0,
        };
        assert_eq!(ramp.value_at(0.5), 0.0);
        let sine = Waveform::Sine {
            amplitude: 2.0,
            frequency: 1.0,
            offset: 1.0,
        };
        assert!((sine.value_at(0.25) - 3.0).abs() < 1e-12);
    }
}
