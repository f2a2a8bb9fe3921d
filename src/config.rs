//! Sorter configuration using Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration, optional)
//! 2. environment variables prefixed with `DDAS_SORT_`, nested keys joined by `__`
//!
//! # Example
//! ```no_run
//! use ddas_sort::config::SorterConfig;
//!
//! let config = SorterConfig::load_from("config/ddas-sort.toml")?;
//! println!("window: {} ns", config.sorter.window_ns);
//! # Ok::<(), ddas_sort::error::SortError>(())
//! ```
//!
//! `DDAS_SORT_SORTER__WINDOW_NS=5e9` overrides `sorter.window_ns`.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{SortError, SortResult};
use crate::logging::LogFormat;

/// Top-level sorter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SorterConfig {
    /// Merge and source settings
    #[serde(default)]
    pub sorter: SortSettings,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Modules read directly from hardware FIFOs
    #[serde(default)]
    pub readers: Vec<ReaderSettings>,
}

/// Merge window and chunk handling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SortSettings {
    /// Finalization window in nanoseconds
    #[serde(default = "default_window_ns")]
    pub window_ns: f64,
    /// Liveness timeout while waiting for a chunk
    #[serde(default = "default_chunk_timeout", with = "humantime_serde")]
    pub chunk_timeout: Duration,
    /// Source id stamped on output until a record carries one
    #[serde(default)]
    pub default_source_id: u32,
    /// Upper bound on chunks framed from a byte stream
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

/// One module on the direct-hardware path
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderSettings {
    /// Module (slot) number passed to the FIFO read
    pub module: u16,
    /// Fixed hit length of this module's firmware configuration, in words
    pub expected_event_length: usize,
    /// Nanoseconds per tick; derived from the module type when absent
    #[serde(default)]
    pub calibration_ns: Option<f64>,
    /// Module-type word (MSPS, ADC bits, revision)
    #[serde(default)]
    pub module_type: u32,
    /// Take hit times from the external clock
    #[serde(default)]
    pub use_external_clock: bool,
    /// Fail the read on a hit length mismatch instead of skipping the hit
    #[serde(default = "default_strict_length")]
    pub strict_length: bool,
}

// Default value functions
fn default_window_ns() -> f64 {
    1e10
}

fn default_chunk_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_max_chunk_bytes() -> usize {
    1 << 20
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_strict_length() -> bool {
    true
}

impl Default for SortSettings {
    fn default() -> Self {
        Self {
            window_ns: default_window_ns(),
            chunk_timeout: default_chunk_timeout(),
            default_source_id: 0,
            max_chunk_bytes: default_max_chunk_bytes(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

impl SorterConfig {
    /// Load configuration from `path` (if it exists) and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> SortResult<Self> {
        Self::figment(Some(path.as_ref())).extract().map_err(SortError::from)
    }

    /// Load configuration from defaults and the environment only.
    pub fn load_env() -> SortResult<Self> {
        Self::figment(None).extract().map_err(SortError::from)
    }

    fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(SorterConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed("DDAS_SORT_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> SortResult<()> {
        let invalid = |message: String| Err(SortError::Configuration(message));

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return invalid(format!(
                "Invalid logging.level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            ));
        }

        let window = self.sorter.window_ns;
        if !window.is_finite() || window < 0.0 {
            return invalid(format!(
                "Invalid sorter.window_ns {window}. Must be finite and >= 0"
            ));
        }

        if self.sorter.chunk_timeout.is_zero() {
            return invalid("sorter.chunk_timeout must be greater than zero".to_string());
        }

        if self.sorter.max_chunk_bytes == 0 {
            return invalid("sorter.max_chunk_bytes must be greater than zero".to_string());
        }

        let mut modules = HashSet::new();
        for reader in &self.readers {
            if !modules.insert(reader.module) {
                return invalid(format!("Duplicate reader module: {}", reader.module));
            }
            if reader.expected_event_length == 0 {
                return invalid(format!(
                    "Reader module {}: expected_event_length must be non-zero",
                    reader.module
                ));
            }
            if let Some(calibration) = reader.calibration_ns {
                if !calibration.is_finite() || calibration <= 0.0 {
                    return invalid(format!(
                        "Reader module {}: calibration_ns {calibration} must be positive",
                        reader.module
                    ));
                }
            }
        }

        Ok(())
    }
}

impl ReaderSettings {
    /// Reader for `module` with hits of `expected_event_length` words.
    #[must_use]
    pub fn new(module: u16, expected_event_length: usize) -> Self {
        Self {
            module,
            expected_event_length,
            calibration_ns: None,
            module_type: 0,
            use_external_clock: false,
            strict_length: default_strict_length(),
        }
    }
}
