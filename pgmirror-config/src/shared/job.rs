use serde::Deserialize;

use crate::load::Config;
use crate::shared::{PgConnectionConfig, Profile, ReplicationConfig, ScheduleConfig, ValidationError};

/// Top level configuration of the replication job.
#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    /// Database rows are copied from.
    pub source: PgConnectionConfig,
    /// Database rows are copied into.
    pub destination: PgConnectionConfig,
    #[serde(default)]
    pub job: ReplicationConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl JobConfig {
    /// Returns the connection settings for a profile.
    pub fn connection(&self, profile: Profile) -> &PgConnectionConfig {
        match profile {
            Profile::Source => &self.source,
            Profile::Destination => &self.destination,
        }
    }
}

impl Config for JobConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        self.source.validate(Profile::Source)?;
        self.destination.validate(Profile::Destination)?;
        self.job.validate()?;
        self.schedule.validate()
    }
}
