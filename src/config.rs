//! Engine tuning knobs parsed from environment variables.
//!
//! Every knob is optional. Missing variables fall back to the defaults
//! below; present-but-unparsable values are rejected so a typo never
//! silently turns into a default.

use std::time::Duration;

use crate::error::ErrorCode;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_DEGRADED_POLL_INTERVAL_MS: u64 = 8_000;
pub const DEFAULT_METRIC_SETTLE_MS: u64 = 500;
pub const DEFAULT_METRIC_RETRY_ATTEMPTS: u32 = 6;
pub const DEFAULT_METRIC_RETRY_INTERVAL_MS: u64 = 500;
pub const DEFAULT_RESET_DEBOUNCE_MS: u64 = 200;
pub const DEFAULT_ACK_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_RECONNECT_BASE_MS: u64 = 1_000;
pub const DEFAULT_RECONNECT_MAX_MS: u64 = 10_000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("{key} must be greater than zero")]
    Zero { key: &'static str },
}

impl ErrorCode for ConfigError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Invalid { .. } => "E_CONFIG_INVALID",
            Self::Zero { .. } => "E_CONFIG_ZERO",
        }
    }
}

/// Timing policy for one reconciliation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Fallback poll cadence while the push subscription is healthy.
    pub poll_interval: Duration,
    /// Fallback poll cadence while disconnected.
    pub degraded_poll_interval: Duration,
    /// Delay between a slide change and the metric resolution it triggers.
    pub metric_settle: Duration,
    /// Extra fetches of a missing round on a transition slide.
    pub metric_retry_attempts: u32,
    /// Spacing between those extra fetches.
    pub metric_retry_interval: Duration,
    /// Window in which confirmed deletions collapse into one reset.
    pub reset_debounce: Duration,
    /// How long a subscribe attempt may go unacknowledged.
    pub ack_timeout: Duration,
    /// First reconnect delay; doubles per failed attempt.
    pub reconnect_base: Duration,
    /// Reconnect delay cap.
    pub reconnect_max: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            degraded_poll_interval: Duration::from_millis(DEFAULT_DEGRADED_POLL_INTERVAL_MS),
            metric_settle: Duration::from_millis(DEFAULT_METRIC_SETTLE_MS),
            metric_retry_attempts: DEFAULT_METRIC_RETRY_ATTEMPTS,
            metric_retry_interval: Duration::from_millis(DEFAULT_METRIC_RETRY_INTERVAL_MS),
            reset_debounce: Duration::from_millis(DEFAULT_RESET_DEBOUNCE_MS),
            ack_timeout: Duration::from_millis(DEFAULT_ACK_TIMEOUT_MS),
            reconnect_base: Duration::from_millis(DEFAULT_RECONNECT_BASE_MS),
            reconnect_max: Duration::from_millis(DEFAULT_RECONNECT_MAX_MS),
        }
    }
}

impl SyncConfig {
    /// Build config from the process environment.
    ///
    /// Optional (milliseconds unless noted):
    /// - `TEAMSYNC_POLL_INTERVAL_MS`: default 30000
    /// - `TEAMSYNC_DEGRADED_POLL_INTERVAL_MS`: default 8000
    /// - `TEAMSYNC_METRIC_SETTLE_MS`: default 500
    /// - `TEAMSYNC_METRIC_RETRY_ATTEMPTS` (count): default 6
    /// - `TEAMSYNC_METRIC_RETRY_INTERVAL_MS`: default 500
    /// - `TEAMSYNC_RESET_DEBOUNCE_MS`: default 200
    /// - `TEAMSYNC_ACK_TIMEOUT_MS`: default 10000
    /// - `TEAMSYNC_RECONNECT_BASE_MS`: default 1000
    /// - `TEAMSYNC_RECONNECT_MAX_MS`: default 10000
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a variable is present but unparsable, or
    /// when an interval that drives a timer is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`SyncConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let millis = |key: &'static str, default: u64| -> Result<Duration, ConfigError> {
            parse_or(&lookup, key, default).map(Duration::from_millis)
        };

        let config = Self {
            poll_interval: millis("TEAMSYNC_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?,
            degraded_poll_interval: millis("TEAMSYNC_DEGRADED_POLL_INTERVAL_MS", DEFAULT_DEGRADED_POLL_INTERVAL_MS)?,
            metric_settle: millis("TEAMSYNC_METRIC_SETTLE_MS", DEFAULT_METRIC_SETTLE_MS)?,
            metric_retry_attempts: parse_or(&lookup, "TEAMSYNC_METRIC_RETRY_ATTEMPTS", DEFAULT_METRIC_RETRY_ATTEMPTS)?,
            metric_retry_interval: millis("TEAMSYNC_METRIC_RETRY_INTERVAL_MS", DEFAULT_METRIC_RETRY_INTERVAL_MS)?,
            reset_debounce: millis("TEAMSYNC_RESET_DEBOUNCE_MS", DEFAULT_RESET_DEBOUNCE_MS)?,
            ack_timeout: millis("TEAMSYNC_ACK_TIMEOUT_MS", DEFAULT_ACK_TIMEOUT_MS)?,
            reconnect_base: millis("TEAMSYNC_RECONNECT_BASE_MS", DEFAULT_RECONNECT_BASE_MS)?,
            reconnect_max: millis("TEAMSYNC_RECONNECT_MAX_MS", DEFAULT_RECONNECT_MAX_MS)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let timers = [
            ("TEAMSYNC_POLL_INTERVAL_MS", self.poll_interval),
            ("TEAMSYNC_DEGRADED_POLL_INTERVAL_MS", self.degraded_poll_interval),
            ("TEAMSYNC_ACK_TIMEOUT_MS", self.ack_timeout),
            ("TEAMSYNC_RECONNECT_BASE_MS", self.reconnect_base),
        ];
        for (key, value) in timers {
            if value.is_zero() {
                return Err(ConfigError::Zero { key });
            }
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    raw.trim()
        .parse::<T>()
        .map_err(|_| ConfigError::Invalid { key, value: raw })
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
