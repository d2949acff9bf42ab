use std::time::Duration;

use serde::Deserialize;

use crate::shared::ValidationError;

/// When the job binary triggers runs.
#[derive(Clone, Debug, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between two run triggers. Default: 86400 (once a day).
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Whether the first run starts immediately or after one full interval. Default: true.
    #[serde(default = "default_run_on_start")]
    pub run_on_start: bool,
}

impl ScheduleConfig {
    pub const DEFAULT_INTERVAL_SECS: u64 = 24 * 60 * 60;

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.interval_secs == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "schedule.interval_secs".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            run_on_start: default_run_on_start(),
        }
    }
}

fn default_interval_secs() -> u64 {
    ScheduleConfig::DEFAULT_INTERVAL_SECS
}

fn default_run_on_start() -> bool {
    true
}
