//! Observer configuration.
//!
//! Loaded from the `[observer]` section of a validator's TOML configuration,
//! or constructed directly with the builder-style setters.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::window::DEFAULT_END_CUSHION_BLOCKS;

/// Shortest accepted opinion loop tick.
pub const MIN_TICK_INTERVAL_MS: u64 = 10;

/// Longest accepted opinion loop tick.
pub const MAX_TICK_INTERVAL_MS: u64 = 60_000;

/// Top-level configuration file layout. Sections other than `[observer]`
/// belong to other validator components and are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    observer: ObserverConfig,
}

/// Tuning for the opinion loop and speculative preparation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObserverConfig {
    /// Interval between opinion loop passes, in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Capacity of the channel carrying finished preparations back to the
    /// loop.
    #[serde(default = "default_prepared_channel_capacity")]
    pub prepared_channel_capacity: usize,

    /// Blocks added to the latest height when checking a candidate's upper
    /// block bound.
    #[serde(default = "default_end_cushion_blocks")]
    pub end_cushion_blocks: u64,

    /// Fraction (as `1 / divisor`) of a candidate's block window that
    /// speculative execution may spend.
    #[serde(default = "default_run_budget_divisor")]
    pub run_budget_divisor: u64,

    /// Expected L1 block time in seconds.
    #[serde(default = "default_block_time_secs")]
    pub block_time_secs: u64,

    /// Block span of the time bounds given to prepared assertions.
    #[serde(default = "default_time_bounds_window_blocks")]
    pub time_bounds_window_blocks: u64,

    /// Timestamp span of the time bounds given to prepared assertions.
    #[serde(default = "default_time_bounds_window_secs")]
    pub time_bounds_window_secs: u64,
}

const fn default_tick_interval_ms() -> u64 {
    1_000
}

const fn default_prepared_channel_capacity() -> usize {
    20
}

const fn default_end_cushion_blocks() -> u64 {
    DEFAULT_END_CUSHION_BLOCKS
}

const fn default_run_budget_divisor() -> u64 {
    10
}

const fn default_block_time_secs() -> u64 {
    13
}

const fn default_time_bounds_window_blocks() -> u64 {
    20
}

const fn default_time_bounds_window_secs() -> u64 {
    600
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            prepared_channel_capacity: default_prepared_channel_capacity(),
            end_cushion_blocks: default_end_cushion_blocks(),
            run_budget_divisor: default_run_budget_divisor(),
            block_time_secs: default_block_time_secs(),
            time_bounds_window_blocks: default_time_bounds_window_blocks(),
            time_bounds_window_secs: default_time_bounds_window_secs(),
        }
    }
}

impl ObserverConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string containing an `[observer]`
    /// table.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid, contains unknown keys, or
    /// fails [`Self::validate`].
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        file.observer.validate()?;
        Ok(file.observer)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let file = ConfigFile {
            observer: self.clone(),
        };
        Ok(toml::to_string_pretty(&file)?)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_TICK_INTERVAL_MS..=MAX_TICK_INTERVAL_MS).contains(&self.tick_interval_ms) {
            return Err(ConfigError::invalid(
                "tick_interval_ms",
                format!(
                    "must be within {MIN_TICK_INTERVAL_MS}..={MAX_TICK_INTERVAL_MS}, got {}",
                    self.tick_interval_ms
                ),
            ));
        }
        if self.prepared_channel_capacity == 0 {
            return Err(ConfigError::invalid(
                "prepared_channel_capacity",
                "must be at least 1",
            ));
        }
        if self.run_budget_divisor == 0 {
            return Err(ConfigError::invalid("run_budget_divisor", "must be at least 1"));
        }
        if self.block_time_secs == 0 {
            return Err(ConfigError::invalid("block_time_secs", "must be at least 1"));
        }
        if self.time_bounds_window_blocks <= self.end_cushion_blocks {
            return Err(ConfigError::invalid(
                "time_bounds_window_blocks",
                format!(
                    "{} must exceed end_cushion_blocks ({})",
                    self.time_bounds_window_blocks, self.end_cushion_blocks
                ),
            ));
        }
        Ok(())
    }

    /// Sets the tick interval.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // intervals are far below u64::MAX ms
    pub const fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Sets the prepared channel capacity.
    #[must_use]
    pub const fn with_prepared_channel_capacity(mut self, capacity: usize) -> Self {
        self.prepared_channel_capacity = capacity;
        self
    }

    /// Sets the end cushion.
    #[must_use]
    pub const fn with_end_cushion_blocks(mut self, blocks: u64) -> Self {
        self.end_cushion_blocks = blocks;
        self
    }

    /// Sets the time bounds window used by the default policy.
    #[must_use]
    pub const fn with_time_bounds_window(mut self, blocks: u64, secs: u64) -> Self {
        self.time_bounds_window_blocks = blocks;
        self.time_bounds_window_secs = secs;
        self
    }

    /// Tick interval as a duration.
    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Block time as a duration.
    #[must_use]
    pub const fn block_time(&self) -> Duration {
        Duration::from_secs(self.block_time_secs)
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A field holds a value the observer cannot run with.
    #[error("invalid observer setting `{field}`: {reason}")]
    Validation {
        /// Name of the offending field.
        field: &'static str,
        /// What is wrong with its value.
        reason: String,
    },
}

impl ConfigError {
    /// Creates a validation error for `field`.
    #[must_use]
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = ObserverConfig::from_toml("").unwrap();
        assert_eq!(config, ObserverConfig::default());
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.prepared_channel_capacity, 20);
        assert_eq!(config.end_cushion_blocks, 3);
    }

    #[test]
    fn parses_observer_section() {
        let toml = r"
            [observer]
            tick_interval_ms = 250
            block_time_secs = 2
        ";
        let config = ObserverConfig::from_toml(toml).unwrap();
        assert_eq!(config.tick_interval_ms, 250);
        assert_eq!(config.block_time(), Duration::from_secs(2));
        assert_eq!(config.run_budget_divisor, 10);
    }

    #[test]
    fn rejects_unknown_keys() {
        let toml = r"
            [observer]
            tick_interval = 250
        ";
        assert!(matches!(
            ObserverConfig::from_toml(toml),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn rejects_zero_capacity() {
        let toml = r"
            [observer]
            prepared_channel_capacity = 0
        ";
        let err = ObserverConfig::from_toml(toml).unwrap_err();
        assert!(err.to_string().contains("prepared_channel_capacity"));
    }

    #[test]
    fn rejects_window_inside_cushion() {
        let config = ObserverConfig::default().with_time_bounds_window(3, 600);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation {
                field: "time_bounds_window_blocks",
                ..
            })
        ));
    }

    #[test]
    fn wider_cushion_needs_wider_window() {
        let config = ObserverConfig::default().with_end_cushion_blocks(25);
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid observer setting `time_bounds_window_blocks`: 20 must exceed end_cushion_blocks (25)"
        );
        assert!(config.with_time_bounds_window(30, 600).validate().is_ok());
    }

    #[test]
    fn zero_tick_interval_is_rejected() {
        let config = ObserverConfig::default().with_tick_interval(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation {
                field: "tick_interval_ms",
                ..
            })
        ));
    }

    #[test]
    fn round_trips_through_file() {
        let config = ObserverConfig::default()
            .with_tick_interval(Duration::from_millis(500))
            .with_prepared_channel_capacity(4);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml().unwrap().as_bytes()).unwrap();

        let loaded = ObserverConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }
}
