//! Replication job binary.
//!
//! Loads the configuration, initializes telemetry and copies every table of the source
//! database into the destination database on a fixed schedule until it is stopped.

use pgmirror_config::shared::JobConfig;
use pgmirror_telemetry::tracing::init_tracing;
use tracing::error;

use crate::config::load_job_config;
use crate::core::start_job_with_config;
use crate::error::{JobError, JobResult};

mod config;
mod core;
mod error;

/// Installs the aws-lc-rs provider as the process wide rustls crypto provider.
///
/// Feature unification may enable more than one provider, in which case rustls cannot pick
/// one on its own.
fn install_crypto_provider() {
    // Fails only when a provider is already installed.
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

fn main() -> JobResult<()> {
    install_crypto_provider();

    let job_config = load_job_config()?;

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME")).map_err(JobError::config)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(job_config))?;

    Ok(())
}

async fn async_main(job_config: JobConfig) -> JobResult<()> {
    if let Err(err) = start_job_with_config(job_config).await {
        error!("{err}");
        eprint!("{}", err.render_report());

        return Err(err);
    }

    Ok(())
}
