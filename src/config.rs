//! Configuration loading using Figment
//!
//! Settings are loaded from:
//! 1. `config/default.toml` (base configuration)
//! 2. Environment variables prefixed with `MIMS_`, nested keys separated by
//!    a double underscore, e.g. `MIMS_INGEST__POLL_INTERVAL_MS=500`
//!
//! Every section has defaults, so an empty or missing file yields a usable
//! configuration.
//!
//! # Example
//! ```no_run
//! use mims_daq::config::Settings;
//!
//! let settings = Settings::load()?;
//! settings.validate()?;
//! println!("Polling every {} ms", settings.ingest.poll_interval_ms);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Ingest session options
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Sliding average defaults for curve displays
    #[serde(default)]
    pub smoothing: SmoothingConfig,
    /// Export destination
    #[serde(default)]
    pub export: ExportConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Options applied to every ingest session.
///
/// Changing any of these while a session runs requires a restart, because
/// the column layout and every derived value depend on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Delay between two reads of the data file when no new line is available
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Divisor applied to every exchange rate (must be finite and nonzero)
    #[serde(default = "default_normalization")]
    pub normalization_factor: f64,
    /// Drop the mass 18 (water) channel from the concentration layout
    #[serde(default = "default_true")]
    pub hide_water: bool,
    /// Add an inorganic carbon column next to CO2
    #[serde(default = "default_true")]
    pub include_inorganic_carbon: bool,
    /// Capacity of the update channel feeding each curve display
    #[serde(default = "default_curve_capacity")]
    pub curve_channel_capacity: usize,
}

/// Sliding average configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmoothingConfig {
    /// Half-width used when a curve is opened without an explicit one
    #[serde(default = "default_half_width")]
    pub default_half_width: usize,
}

/// Export configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Output directory for CSV exports
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

// Default value functions
fn default_name() -> String {
    "MIMS DAQ".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_poll_interval() -> u64 {
    1500
}

fn default_normalization() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

fn default_curve_capacity() -> usize {
    64
}

fn default_half_width() -> usize {
    10
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("exports")
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            normalization_factor: default_normalization(),
            hide_water: true,
            include_inorganic_carbon: true,
            curve_channel_capacity: default_curve_capacity(),
        }
    }
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        Self {
            default_half_width: default_half_width(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
        }
    }
}

impl IngestConfig {
    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Settings {
    /// Load configuration from `config/default.toml` and environment variables
    ///
    /// Environment variables override the file with prefix `MIMS_`.
    /// Example: `MIMS_APPLICATION__LOG_LEVEL=debug`
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("MIMS_").split("__"))
            .extract()
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            ));
        }

        if self.ingest.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".to_string());
        }

        let norm = self.ingest.normalization_factor;
        if !norm.is_finite() || norm == 0.0 {
            return Err(format!(
                "Invalid normalization_factor {norm}. Must be a finite, nonzero number"
            ));
        }

        if self.ingest.curve_channel_capacity == 0 {
            return Err("curve_channel_capacity must be greater than 0".to_string());
        }

        Ok(())
    }
}
