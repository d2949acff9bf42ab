use pgmirror_config::load_config;
use pgmirror_config::shared::JobConfig;

use crate::error::{JobError, JobResult};

/// Loads the job configuration from the `configuration` directory and `APP_` prefixed
/// environment variables.
///
/// The configuration is validated while loading.
pub fn load_job_config() -> JobResult<JobConfig> {
    load_config::<JobConfig>().map_err(JobError::config)
}
