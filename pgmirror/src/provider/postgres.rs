use std::sync::Arc;

use pgmirror_config::shared::{JobConfig, PgConnectionConfig, Profile};

use crate::error::MirrorResult;
use crate::postgres::PgMirrorClient;
use crate::provider::ConnectionProvider;

/// [`ConnectionProvider`] opening Postgres connections from the configured profiles.
#[derive(Debug, Clone)]
pub struct PgConnectionProvider {
    source: Arc<PgConnectionConfig>,
    destination: Arc<PgConnectionConfig>,
}

impl PgConnectionProvider {
    pub fn new(source: PgConnectionConfig, destination: PgConnectionConfig) -> Self {
        Self {
            source: Arc::new(source),
            destination: Arc::new(destination),
        }
    }

    /// Builds a provider from the `source` and `destination` sections of a [`JobConfig`].
    pub fn from_config(config: &JobConfig) -> Self {
        Self::new(config.source.clone(), config.destination.clone())
    }
}

impl ConnectionProvider for PgConnectionProvider {
    type Source = PgMirrorClient;
    type Destination = PgMirrorClient;

    async fn connect_source(&self) -> MirrorResult<PgMirrorClient> {
        PgMirrorClient::connect(&self.source, Profile::Source).await
    }

    async fn connect_destination(&self) -> MirrorResult<PgMirrorClient> {
        PgMirrorClient::connect(&self.destination, Profile::Destination).await
    }
}
