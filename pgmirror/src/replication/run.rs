//! Coordination of a full replication run.

use std::time::Instant;

use pgmirror_config::shared::{Profile, ReplicationConfig, TableErrorPolicy};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::bail;
use crate::concurrency::cancel::RunCancellation;
use crate::concurrency::shutdown::ShutdownRx;
use crate::destination::Destination;
use crate::error::{ErrorKind, MirrorError, MirrorResult};
use crate::provider::ConnectionProvider;
use crate::replication::retry::connect_with_retry;
use crate::replication::table_copy::{TableCopySettings, copy_table};
use crate::source::Source;
use crate::types::{RunReport, TableName, TableReport};

/// A replication job copying every table of the source schema into the destination.
///
/// A job owns its connection provider and settings. At most one run of a job is active at a
/// time; a run started while another one is in flight fails with
/// [`ErrorKind::RunAlreadyInProgress`].
#[derive(Debug)]
pub struct ReplicationJob<P> {
    provider: P,
    config: ReplicationConfig,
    shutdown_rx: ShutdownRx,
    run_lock: Mutex<()>,
}

impl<P> ReplicationJob<P>
where
    P: ConnectionProvider,
{
    /// Creates a job. Shutdowns requested through `shutdown_rx` cancel the in-flight run and
    /// every later one.
    pub fn new(provider: P, config: ReplicationConfig, shutdown_rx: ShutdownRx) -> Self {
        Self {
            provider,
            config,
            shutdown_rx,
            run_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    /// Executes one full run.
    ///
    /// Both connections are acquired concurrently, the tables of the configured schema are
    /// enumerated and copied one after the other in enumeration order, and both connections are
    /// closed before returning, whatever the result. The run succeeds only if every table was
    /// copied.
    pub async fn run(&self) -> MirrorResult<RunReport> {
        let Ok(_run_guard) = self.run_lock.try_lock() else {
            bail!(
                ErrorKind::RunAlreadyInProgress,
                "A run of this job is already in progress"
            );
        };

        let started_at = Instant::now();
        let cancel = RunCancellation::new(self.shutdown_rx.clone(), self.config.max_run_duration());

        info!(schema = %self.config.schema, "starting replication run");

        let (source, destination) = self.acquire_connections(&cancel).await?;
        let result = self.copy_tables(&source, &destination, &cancel).await;
        release_connections(source, destination).await;

        match result {
            Ok(tables) => {
                let report = RunReport {
                    tables,
                    duration: started_at.elapsed(),
                };
                info!(
                    tables = report.tables.len(),
                    rows = report.total_rows(),
                    skipped_rows = report.total_skipped_rows(),
                    duration_ms = report.duration.as_millis() as u64,
                    "replication run completed"
                );

                Ok(report)
            }
            Err(err) => {
                error!(
                    error = %err,
                    duration_ms = started_at.elapsed().as_millis() as u64,
                    "replication run failed"
                );

                Err(err)
            }
        }
    }

    /// Connects to both databases concurrently.
    ///
    /// If only one side connects, that connection is closed before the error is returned.
    async fn acquire_connections(
        &self,
        cancel: &RunCancellation,
    ) -> MirrorResult<(P::Source, P::Destination)> {
        let retry = &self.config.connect_retry;
        let (source, destination) = tokio::join!(
            cancel.guard(connect_with_retry(retry, Profile::Source, || {
                self.provider.connect_source()
            })),
            cancel.guard(connect_with_retry(retry, Profile::Destination, || {
                self.provider.connect_destination()
            })),
        );

        match (source, destination) {
            (Ok(source), Ok(destination)) => Ok((source, destination)),
            (Ok(source), Err(err)) => {
                close_source(source).await;
                Err(err)
            }
            (Err(err), Ok(destination)) => {
                close_destination(destination).await;
                Err(err)
            }
            (Err(source_err), Err(destination_err)) => {
                warn!(error = %destination_err, "destination connection failed as well");
                Err(source_err)
            }
        }
    }

    /// Enumerates the tables of the source and copies them in order.
    async fn copy_tables(
        &self,
        source: &P::Source,
        destination: &P::Destination,
        cancel: &RunCancellation,
    ) -> MirrorResult<Vec<TableReport>> {
        let tables: Vec<TableName> = cancel.guard(source.list_tables(&self.config.schema)).await?;
        info!(
            schema = %self.config.schema,
            tables = tables.len(),
            "enumerated source tables"
        );

        let settings = TableCopySettings::from(&self.config);
        let mut reports = Vec::with_capacity(tables.len());
        let mut failures: Vec<MirrorError> = Vec::new();

        for table in &tables {
            let outcome = copy_table(source, destination, table, settings, cancel).await?;

            match outcome.into_result() {
                Ok(report) => reports.push(report),
                Err(err) => match self.config.table_error_policy {
                    TableErrorPolicy::Abort => return Err(err),
                    TableErrorPolicy::Continue => {
                        warn!(table = %table, "continuing with the next table");
                        failures.push(err);
                    }
                },
            }
        }

        if !failures.is_empty() {
            return Err(MirrorError::from(failures));
        }

        Ok(reports)
    }
}

/// Closes both connections, logging failures instead of returning them.
async fn release_connections<S: Source, D: Destination>(source: S, destination: D) {
    tokio::join!(close_source(source), close_destination(destination));
}

async fn close_source<S: Source>(source: S) {
    if let Err(err) = source.close().await {
        warn!(profile = %Profile::Source, error = %err, "failed to close connection");
    }
}

async fn close_destination<D: Destination>(destination: D) {
    if let Err(err) = destination.close().await {
        warn!(profile = %Profile::Destination, error = %err, "failed to close connection");
    }
}
