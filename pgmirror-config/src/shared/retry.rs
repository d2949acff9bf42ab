use std::time::Duration;

use serde::Deserialize;

use crate::shared::ValidationError;

/// Backoff settings used when establishing connections.
///
/// Only connection establishment is retried. Failures after a connection is up abort the
/// current table or run instead.
#[derive(Clone, Debug, Deserialize)]
pub struct RetryConfig {
    /// Total number of connection attempts, including the first one.
    ///
    /// Default: 5
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt, in milliseconds.
    ///
    /// Default: 500ms
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Upper bound for the delay between attempts, in milliseconds.
    ///
    /// Default: 30000ms
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier applied to the delay after each failed attempt. Must be >= 1.0.
    ///
    /// Default: 2.0
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl RetryConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "job.connect_retry.max_attempts".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.backoff_factor.is_nan() || self.backoff_factor < 1.0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "job.connect_retry.backoff_factor".to_string(),
                constraint: "must be greater than or equal to 1.0".to_string(),
            });
        }

        if self.initial_delay_ms > self.max_delay_ms {
            return Err(ValidationError::InvalidFieldValue {
                field: "job.connect_retry.initial_delay_ms".to_string(),
                constraint: "must not exceed `max_delay_ms`".to_string(),
            });
        }

        Ok(())
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(RetryConfig::default().validate().is_ok());
    }

    #[test]
    fn delays_are_converted_from_milliseconds() {
        let config = RetryConfig::default();

        assert_eq!(config.initial_delay(), Duration::from_millis(500));
        assert_eq!(config.max_delay(), Duration::from_secs(30));
    }

    #[test]
    fn rejects_shrinking_backoff() {
        let config = RetryConfig {
            backoff_factor: 0.5,
            ..RetryConfig::default()
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_attempts() {
        let config = RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        };

        assert!(config.validate().is_err());
    }
}
