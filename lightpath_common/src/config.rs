//! Configuration loading traits and types.
//!
//! This module provides a standardized way to load TOML configuration files
//! and device definition directories for lightpath.
//!
//! # Usage
//!
//! ```rust,no_run
//! use lightpath_common::config::{ConfigError, LightpathConfig, load_device_dir};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = LightpathConfig::from_file(Path::new("lightpath.toml"))?;
//!     if let Some(dir) = &config.devices_dir {
//!         let schemas = load_device_dir(dir)?;
//!         println!("{} devices", schemas.len());
//!     }
//!     Ok(())
//! }
//! ```

use crate::consts::{
    DEFAULT_MINIMUM_TRANSMISSION, DEFAULT_SETTLE_TIME_S, DEFAULT_TIMEOUT_S, MAX_DURATION_S,
};
use crate::schema::DeviceSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Error type for configuration loading operations.
///
/// This enum represents all possible errors that can occur when loading
/// configuration files.
#[derive(Debug, Clone, PartialEq, Error)]
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
/// Represents the verbosity level of logging output.
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
    /// Filter directive understood by `tracing_subscriber::EnvFilter`.
    pub fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common configuration fields shared across lightpath consumers.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "lightpath-tst"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if:
    /// - `service_name` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Per-device operation defaults, applied to every built device as the
/// initial `timeout` and `settle_time` options.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Write confirmation timeout in seconds.
    #[serde(default = "default_timeout_s")]
    pub timeout_s: f64,

    /// Delay after a successful `set` before its status completes.
    #[serde(default = "default_settle_time_s")]
    pub settle_time_s: f64,
}

impl DefaultsConfig {
    /// Timeout as a `Duration`; the built-in default if out of range.
    pub fn timeout(&self) -> Duration {
        duration_from_secs(self.timeout_s)
            .filter(|d| !d.is_zero())
            .unwrap_or_else(|| Duration::from_secs_f64(DEFAULT_TIMEOUT_S))
    }

    /// Settle time as a `Duration`; zero if out of range.
    pub fn settle_time(&self) -> Duration {
        duration_from_secs(self.settle_time_s).unwrap_or_default()
    }

    /// Validate the defaults.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` for non-positive timeouts,
    /// negative settle times, or either above `MAX_DURATION_S`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.timeout_s > 0.0 && self.timeout_s <= MAX_DURATION_S) {
            return Err(ConfigError::ValidationError(format!(
                "defaults.timeout_s must be in (0, {MAX_DURATION_S}], got {}",
                self.timeout_s
            )));
        }
        if !(self.settle_time_s >= 0.0 && self.settle_time_s <= MAX_DURATION_S) {
            return Err(ConfigError::ValidationError(format!(
                "defaults.settle_time_s must be in [0, {MAX_DURATION_S}], got {}",
                self.settle_time_s
            )));
        }
        Ok(())
    }
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            timeout_s: DEFAULT_TIMEOUT_S,
            settle_time_s: DEFAULT_SETTLE_TIME_S,
        }
    }
}

/// Convert seconds to a `Duration`.
///
/// Returns `None` for negative, NaN or infinite values and for anything
/// above `MAX_DURATION_S`.
pub fn duration_from_secs(seconds: f64) -> Option<Duration> {
    if !(0.0..=MAX_DURATION_S).contains(&seconds) {
        return None;
    }
    Duration::try_from_secs_f64(seconds).ok()
}

fn default_timeout_s() -> f64 {
    DEFAULT_TIMEOUT_S
}

fn default_settle_time_s() -> f64 {
    DEFAULT_SETTLE_TIME_S
}

/// Beam path analysis settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BeamPathConfig {
    /// Inserted devices passing less than this fraction block the beam.
    #[serde(default = "default_minimum_transmission")]
    pub minimum_transmission: f64,
}

impl Default for BeamPathConfig {
    fn default() -> Self {
        Self {
            minimum_transmission: DEFAULT_MINIMUM_TRANSMISSION,
        }
    }
}

fn default_minimum_transmission() -> f64 {
    DEFAULT_MINIMUM_TRANSMISSION
}

/// Top-level lightpath configuration.
///
/// # TOML Example
///
/// ```toml
/// devices_dir = "devices"
///
/// [shared]
/// service_name = "lightpath-tst"
///
/// [defaults]
/// timeout_s = 2.0
///
/// [beampath]
/// minimum_transmission = 0.2
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightpathConfig {
    /// Shared service settings.
    pub shared: SharedConfig,

    /// Device operation defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Beam path analysis settings.
    #[serde(default)]
    pub beampath: BeamPathConfig,

    /// Directory of device definition files. Relative paths resolve against
    /// the configuration file's directory when loaded with `from_file`.
    #[serde(default)]
    pub devices_dir: Option<PathBuf>,
}

impl LightpathConfig {
    /// Load, resolve and validate a configuration file.
    ///
    /// # Errors
    /// Any `ConfigError` from loading or validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        if let Some(dir) = config.devices_dir.take() {
            config.devices_dir = Some(match path.parent() {
                Some(base) if dir.is_relative() => base.join(dir),
                _ => dir,
            });
        }
        config.validate()?;
        info!(
            "Loaded lightpath config '{}' from {:?}",
            config.shared.service_name, path
        );
        Ok(config)
    }

    /// Validate all sections.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` naming the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.defaults.validate()?;
        let min = self.beampath.minimum_transmission;
        if !(0.0..=1.0).contains(&min) {
            return Err(ConfigError::ValidationError(format!(
                "beampath.minimum_transmission must be within [0, 1], got {min}"
            )));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// This trait provides a default implementation that works with any type
/// implementing `serde::de::DeserializeOwned`.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the TOML configuration file
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))
    }
}

// Blanket implementation for all types that implement DeserializeOwned.
impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

/// Load every `*.toml` device definition in `dir`, in file name order.
///
/// # Errors
/// - `ConfigError::FileNotFound` if `dir` does not exist
/// - `ConfigError::ParseError` for any unreadable or malformed file
/// - `ConfigError::ValidationError` if two files define the same device name
pub fn load_device_dir(dir: &Path) -> Result<Vec<DeviceSchema>, ConfigError> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ConfigError::FileNotFound
        } else {
            ConfigError::ParseError(e.to_string())
        }
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| ConfigError::ParseError(e.to_string()))?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "toml") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut names = HashSet::new();
    let mut schemas = Vec::with_capacity(paths.len());
    for path in paths {
        let schema = DeviceSchema::load(&path)?;
        if !names.insert(schema.name.clone()) {
            return Err(ConfigError::ValidationError(format!(
                "device '{}' defined twice (second definition in {})",
                schema.name,
                path.display()
            )));
        }
        debug!("Loaded device definition '{}' from {:?}", schema.name, path);
        schemas.push(schema);
    }

    info!("Loaded {} device definitions from {:?}", schemas.len(), dir);
    Ok(schemas)
}
