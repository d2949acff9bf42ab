//! Cancellation of a single run.
//!
//! A [`RunCancellation`] wraps every suspension point of a run so that a shutdown request or
//! an expired run deadline interrupts it promptly instead of at the next table boundary.

use std::future::{Future, pending};
use std::time::Duration;

use tokio::time::{Instant, sleep_until};

use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, MirrorResult};
use crate::{bail, mirror_error};

/// Shutdown and deadline observer for one run.
#[derive(Debug, Clone)]
pub struct RunCancellation {
    shutdown_rx: ShutdownRx,
    deadline: Option<Instant>,
    max_duration: Option<Duration>,
}

impl RunCancellation {
    /// Creates a cancellation scope starting now.
    ///
    /// Shutdowns already sent on `shutdown_rx` but not yet observed by it cancel the run at its
    /// first suspension point.
    pub fn new(shutdown_rx: ShutdownRx, max_duration: Option<Duration>) -> Self {
        Self {
            shutdown_rx,
            deadline: max_duration.map(|duration| Instant::now() + duration),
            max_duration,
        }
    }

    /// Fails with the run-level error if the run has already been canceled or timed out.
    pub fn check(&self) -> MirrorResult<()> {
        if self.shutdown_rx.has_changed().unwrap_or(false) {
            bail!(ErrorKind::RunCanceled, "Run canceled by shutdown request");
        }

        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(self.deadline_error());
        }

        Ok(())
    }

    /// Drives `future` to completion unless the run is canceled or its deadline passes first.
    ///
    /// When interrupted, `future` is dropped and [`ErrorKind::RunCanceled`] or
    /// [`ErrorKind::RunDeadlineExceeded`] is returned.
    pub async fn guard<F, T>(&self, future: F) -> MirrorResult<T>
    where
        F: Future<Output = MirrorResult<T>>,
    {
        self.check()?;

        let mut shutdown_rx = self.shutdown_rx.clone();
        let shutdown = async move {
            // A dropped sender can never request a shutdown anymore.
            if shutdown_rx.changed().await.is_err() {
                pending::<()>().await;
            }
        };
        let deadline = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;

            _ = shutdown => {
                bail!(ErrorKind::RunCanceled, "Run canceled by shutdown request");
            }
            _ = deadline => Err(self.deadline_error()),
            result = future => result,
        }
    }

    fn deadline_error(&self) -> crate::error::MirrorError {
        let max_duration = self.max_duration.unwrap_or_default();
        mirror_error!(
            ErrorKind::RunDeadlineExceeded,
            "Run exceeded its maximum duration",
            format!("the run did not complete within {}s", max_duration.as_secs_f64())
        )
    }
}
