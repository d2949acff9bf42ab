use std::sync::Arc;

use pgmirror_config::shared::Profile;
use tokio::sync::Mutex;

use crate::error::MirrorResult;
use crate::memory::connection::{MemoryDestination, MemorySource, Operation, OperationLog};
use crate::memory::database::MemoryDatabase;
use crate::mirror_error;
use crate::provider::ConnectionProvider;

/// [`ConnectionProvider`] connecting to a pair of [`MemoryDatabase`]s.
///
/// Connections opened by the provider record their operations in one shared log, available
/// through [`MemoryConnectionProvider::operations`].
#[derive(Debug, Clone)]
pub struct MemoryConnectionProvider {
    source: MemoryDatabase,
    destination: MemoryDatabase,
    log: OperationLog,
}

impl MemoryConnectionProvider {
    pub fn new(source: MemoryDatabase, destination: MemoryDatabase) -> Self {
        Self {
            source,
            destination,
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns every operation performed so far, in issue order.
    pub async fn operations(&self) -> Vec<Operation> {
        self.log.lock().await.clone()
    }

    /// Clears the operation log.
    pub async fn clear_operations(&self) {
        self.log.lock().await.clear();
    }

    async fn connect(&self, database: &MemoryDatabase, profile: Profile) -> MirrorResult<()> {
        self.log.lock().await.push(Operation::Connect(profile));

        if let Some(stall) = database.take_connect_stall().await {
            stall.reached.notify_one();
            stall.release.notified().await;
        }

        if let Some(kind) = database.take_connect_failure().await {
            return Err(mirror_error!(
                kind,
                "Failed to connect to PostgreSQL",
                format!("injected connection failure for the {profile} profile")
            ));
        }

        Ok(())
    }
}

impl ConnectionProvider for MemoryConnectionProvider {
    type Source = MemorySource;
    type Destination = MemoryDestination;

    async fn connect_source(&self) -> MirrorResult<MemorySource> {
        self.connect(&self.source, Profile::Source).await?;

        Ok(MemorySource::new(self.source.clone(), self.log.clone()))
    }

    async fn connect_destination(&self) -> MirrorResult<MemoryDestination> {
        self.connect(&self.destination, Profile::Destination).await?;

        Ok(MemoryDestination::new(
            self.destination.clone(),
            self.log.clone(),
        ))
    }
}
