//! Bus configuration module.
//!
//! Parses configuration from environment variables. Every variable has a
//! default, so an empty environment yields a working single-node setup.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `CONVEYOR_RATE_LIMIT` | 1000 | Events admitted per window per event type |
//! | `CONVEYOR_RATE_WINDOW_SECS` | 60 | Sliding-window length in seconds |
//! | `CONVEYOR_REDELIVERY_COOLDOWN_SECS` | 60 | Hold time before a delayed event is republished |
//! | `CONVEYOR_CHANNEL_CAPACITY` | 1024 | Per-subscription delivery buffer |
//! | `CONVEYOR_COUNTER_SWEEP_SECS` | 30 | Interval between expired-counter sweeps |

use std::env;
use std::time::Duration;

use thiserror::Error;

/// Default events admitted per window per event type.
const DEFAULT_RATE_LIMIT: u64 = 1000;

/// Default rate-limit window in seconds.
const DEFAULT_RATE_WINDOW_SECS: u64 = 60;

/// Default redelivery cooldown in seconds.
const DEFAULT_REDELIVERY_COOLDOWN_SECS: u64 = 60;

/// Default per-subscription delivery buffer.
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default interval between expired-counter sweeps, in seconds.
const DEFAULT_COUNTER_SWEEP_SECS: u64 = 30;

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {var}: {message}")]
    Invalid {
        /// The offending variable.
        var: String,
        /// Why the value was rejected.
        message: String,
    },
}

impl ConfigError {
    /// Creates a new invalid-value error.
    pub fn invalid(var: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            var: var.into(),
            message: message.into(),
        }
    }
}

/// Bus configuration parsed from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Events admitted per window per event type on the high-traffic path.
    pub rate_limit: u64,

    /// Sliding-window length for the rate limiter.
    pub rate_window: Duration,

    /// Hold time before a delayed event is republished to its original topic.
    pub redelivery_cooldown: Duration,

    /// Per-subscription delivery buffer capacity.
    pub channel_capacity: usize,

    /// Interval between expired-counter sweeps in the in-process store.
    pub counter_sweep_interval: Duration,
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable is set but fails to parse as a
    /// positive integer.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use conveyor_bus::config::Config;
    ///
    /// let config = Config::from_env().expect("failed to load config");
    /// println!("rate limit: {} per {:?}", config.rate_limit, config.rate_window);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let rate_limit = parse_positive_u64("CONVEYOR_RATE_LIMIT", DEFAULT_RATE_LIMIT)?;
        let rate_window_secs =
            parse_positive_u64("CONVEYOR_RATE_WINDOW_SECS", DEFAULT_RATE_WINDOW_SECS)?;
        let cooldown_secs = parse_positive_u64(
            "CONVEYOR_REDELIVERY_COOLDOWN_SECS",
            DEFAULT_REDELIVERY_COOLDOWN_SECS,
        )?;
        let channel_capacity =
            parse_positive_u64("CONVEYOR_CHANNEL_CAPACITY", DEFAULT_CHANNEL_CAPACITY as u64)?;
        let sweep_secs =
            parse_positive_u64("CONVEYOR_COUNTER_SWEEP_SECS", DEFAULT_COUNTER_SWEEP_SECS)?;

        Ok(Self {
            rate_limit,
            rate_window: Duration::from_secs(rate_window_secs),
            redelivery_cooldown: Duration::from_secs(cooldown_secs),
            channel_capacity: channel_capacity as usize,
            counter_sweep_interval: Duration::from_secs(sweep_secs),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rate_limit: DEFAULT_RATE_LIMIT,
            rate_window: Duration::from_secs(DEFAULT_RATE_WINDOW_SECS),
            redelivery_cooldown: Duration::from_secs(DEFAULT_REDELIVERY_COOLDOWN_SECS),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            counter_sweep_interval: Duration::from_secs(DEFAULT_COUNTER_SWEEP_SECS),
        }
    }
}

/// Parse a positive integer environment variable, falling back to a default
/// when unset.
fn parse_positive_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|e| ConfigError::invalid(name, e.to_string()))?,
        Err(env::VarError::NotPresent) => default,
        Err(env::VarError::NotUnicode(_)) => {
            return Err(ConfigError::invalid(name, "contains invalid unicode"))
        }
    };

    if value == 0 {
        return Err(ConfigError::invalid(name, "must be greater than zero"));
    }

    Ok(value)
}
