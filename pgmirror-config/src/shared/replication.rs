use std::time::Duration;

use serde::Deserialize;

use crate::shared::{RetryConfig, ValidationError};

/// What a run does when a table fails to copy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableErrorPolicy {
    /// Stop the run at the first failing table.
    #[default]
    Abort,
    /// Log the failure, continue with the next table and report all failures at the end.
    Continue,
}

/// What a table copy does when a single row cannot be written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowErrorPolicy {
    /// Fail the whole table on the first rejected row.
    #[default]
    AbortTable,
    /// Log and count the rejected row, then keep copying.
    SkipRow,
}

/// Settings controlling a single replication run.
#[derive(Clone, Debug, Deserialize)]
pub struct ReplicationConfig {
    /// Schema whose base tables are replicated. Default: `public`.
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default)]
    pub table_error_policy: TableErrorPolicy,
    #[serde(default)]
    pub row_error_policy: RowErrorPolicy,
    /// Checks that each table exists in the destination before clearing it. Default: true.
    #[serde(default = "default_verify_destination_tables")]
    pub verify_destination_tables: bool,
    /// Upper bound for the duration of one run. Unbounded when absent.
    #[serde(default)]
    pub max_run_duration_secs: Option<u64>,
    #[serde(default)]
    pub connect_retry: RetryConfig,
}

impl ReplicationConfig {
    pub const DEFAULT_SCHEMA: &'static str = "public";

    pub fn max_run_duration(&self) -> Option<Duration> {
        self.max_run_duration_secs.map(Duration::from_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.schema.trim().is_empty() {
            return Err(ValidationError::InvalidFieldValue {
                field: "job.schema".to_string(),
                constraint: "must not be empty".to_string(),
            });
        }

        if self.max_run_duration_secs == Some(0) {
            return Err(ValidationError::InvalidFieldValue {
                field: "job.max_run_duration_secs".to_string(),
                constraint: "must be greater than 0 when set".to_string(),
            });
        }

        self.connect_retry.validate()
    }
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            schema: default_schema(),
            table_error_policy: TableErrorPolicy::default(),
            row_error_policy: RowErrorPolicy::default(),
            verify_destination_tables: default_verify_destination_tables(),
            max_run_duration_secs: None,
            connect_retry: RetryConfig::default(),
        }
    }
}

fn default_schema() -> String {
    ReplicationConfig::DEFAULT_SCHEMA.to_string()
}

fn default_verify_destination_tables() -> bool {
    true
}
