use pgmirror::concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel};
use pgmirror::error::ErrorKind;
use pgmirror::provider::{ConnectionProvider, PgConnectionProvider};
use pgmirror::replication::run::ReplicationJob;
use pgmirror_config::shared::{
    JobConfig, PgConnectionConfig, Profile, ReplicationConfig, ScheduleConfig,
};
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::error::JobResult;

/// Starts the job with the provided configuration.
///
/// Runs are triggered on the configured schedule until SIGINT or SIGTERM is received, which
/// also cancels the run in flight.
pub async fn start_job_with_config(config: JobConfig) -> JobResult<()> {
    info!("starting replication job");

    log_config(&config);

    let provider = PgConnectionProvider::from_config(&config);
    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let job = ReplicationJob::new(provider, config.job, shutdown_rx);

    let shutdown_handle = spawn_shutdown_listener(shutdown_tx.clone())?;
    let result = run_on_schedule(&job, &config.schedule, shutdown_tx.subscribe()).await;

    // The listener is still waiting for a signal when the schedule ended on its own.
    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    info!("replication job stopped");

    result
}

/// Triggers a run on every tick of the schedule until a shutdown is requested.
///
/// A failed run is logged and the job waits for the next tick; a canceled run ends the
/// schedule.
async fn run_on_schedule<P>(
    job: &ReplicationJob<P>,
    schedule: &ScheduleConfig,
    mut shutdown_rx: ShutdownRx,
) -> JobResult<()>
where
    P: ConnectionProvider,
{
    let period = schedule.interval();
    let start = if schedule.run_on_start {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut interval = interval_at(start, period);
    // A run longer than the period delays the next one instead of triggering a burst.
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut run_number: u64 = 0;
    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => {
                info!("shutdown requested, no further runs are scheduled");
                return Ok(());
            }
            _ = interval.tick() => {}
        }

        run_number += 1;
        let span = info_span!("replication_run", run = run_number);
        match job.run().instrument(span).await {
            Ok(_) => {
                info!(
                    run = run_number,
                    next_run_in_secs = period.as_secs(),
                    "waiting for the next scheduled run"
                );
            }
            Err(err) if err.kind() == ErrorKind::RunCanceled => {
                info!(run = run_number, "run canceled by shutdown");
                return Ok(());
            }
            Err(err) => {
                warn!(
                    run = run_number,
                    kind = ?err.kind(),
                    error = %err,
                    next_run_in_secs = period.as_secs(),
                    "run failed, waiting for the next scheduled run"
                );
            }
        }
    }
}

/// Spawns a task requesting a shutdown on SIGINT or SIGTERM.
fn spawn_shutdown_listener(shutdown_tx: ShutdownTx) -> JobResult<JoinHandle<()>> {
    let mut sigterm = signal(SignalKind::terminate())?;

    let handle = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("sigint (ctrl+c) received, shutting down job");
            }
            _ = sigterm.recv() => {
                info!("sigterm received, shutting down job");
            }
        }

        if let Err(e) = shutdown_tx.shutdown() {
            warn!(error = ?e, "failed to send shutdown signal");
        }
    });

    Ok(handle)
}

fn log_config(config: &JobConfig) {
    log_pg_connection_config(Profile::Source, &config.source);
    log_pg_connection_config(Profile::Destination, &config.destination);
    log_replication_config(&config.job);
    log_schedule_config(&config.schedule);
}

fn log_pg_connection_config(profile: Profile, config: &PgConnectionConfig) {
    debug!(
        %profile,
        host = config.host,
        port = config.port,
        dbname = config.name,
        username = config.username,
        tls_enabled = config.tls.enabled,
        "postgres connection config",
    );
}

fn log_replication_config(config: &ReplicationConfig) {
    debug!(
        schema = config.schema,
        table_error_policy = ?config.table_error_policy,
        row_error_policy = ?config.row_error_policy,
        verify_destination_tables = config.verify_destination_tables,
        max_run_duration_secs = config.max_run_duration_secs,
        connect_max_attempts = config.connect_retry.max_attempts,
        "replication config"
    );
}

fn log_schedule_config(config: &ScheduleConfig) {
    debug!(
        interval_secs = config.interval_secs,
        run_on_start = config.run_on_start,
        "schedule config"
    );
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pgmirror::memory::{MemoryConnectionProvider, MemoryDatabase, Operation};
    use pgmirror::types::TableName;
    use pgmirror_config::shared::RetryConfig;

    use super::*;

    async fn wait_for_destination_connects(provider: &MemoryConnectionProvider, connects: usize) {
        loop {
            let operations = provider.operations().await;
            let count = operations
                .iter()
                .filter(|operation| **operation == Operation::Connect(Profile::Destination))
                .count();
            if count >= connects {
                return;
            }

            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn failed_runs_do_not_end_the_schedule() {
        let source = MemoryDatabase::new();
        source
            .create_table(&TableName::new("public", "users").unwrap(), vec![])
            .await;
        let destination = MemoryDatabase::new();
        destination
            .fail_connections(u32::MAX, ErrorKind::AuthenticationError)
            .await;
        let provider = MemoryConnectionProvider::new(source, destination);
        let config = ReplicationConfig {
            connect_retry: RetryConfig {
                max_attempts: 1,
                ..RetryConfig::default()
            },
            ..ReplicationConfig::default()
        };
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let job = ReplicationJob::new(provider.clone(), config, shutdown_rx);
        let schedule = ScheduleConfig {
            interval_secs: 1,
            run_on_start: true,
        };

        let scheduler = run_on_schedule(&job, &schedule, shutdown_tx.subscribe());
        tokio::pin!(scheduler);
        tokio::select! {
            result = &mut scheduler => panic!("schedule ended after a failed run: {result:?}"),
            _ = wait_for_destination_connects(&provider, 2) => {}
        }

        shutdown_tx.shutdown().unwrap();
        scheduler.await.unwrap();
    }
}
