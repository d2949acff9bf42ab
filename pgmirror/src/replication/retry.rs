//! Retrying connection establishment with exponential backoff.

use std::future::Future;
use std::time::Duration;

use pgmirror_config::shared::{Profile, RetryConfig};
use rand::Rng;
use tracing::{error, info, warn};

use crate::error::{MirrorError, MirrorResult};

/// Tracks connection attempts and computes the delay before the next one.
#[derive(Debug)]
pub struct ConnectBackoff {
    config: RetryConfig,
    attempt_count: u32,
}

impl ConnectBackoff {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempt_count: 0,
        }
    }

    /// Returns the number of failed attempts recorded so far.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Records a failed attempt.
    pub fn record_failure(&mut self) {
        self.attempt_count += 1;
    }

    /// Returns `true` if `error` is a connection failure and attempts are left.
    pub fn should_retry(&self, error: &MirrorError) -> bool {
        error.is_connection_retryable() && self.attempt_count < self.config.max_attempts
    }

    /// Calculates the next backoff delay with jitter.
    ///
    /// The delay is `initial_delay * backoff_factor^(attempt - 1)`, capped at `max_delay`, plus
    /// up to 30% of random jitter.
    pub fn calculate_backoff(&self) -> Duration {
        let attempt = self.attempt_count.saturating_sub(1);
        let multiplier = self.config.backoff_factor.powi(attempt as i32);
        let base_delay_ms = self.config.initial_delay().as_millis() as f64 * multiplier;

        let capped_delay_ms = base_delay_ms.min(self.config.max_delay().as_millis() as f64);

        let jitter_factor = rand::rng().random::<f64>() * 0.3;
        let jittered_delay_ms = capped_delay_ms * (1.0 + jitter_factor);

        Duration::from_millis(jittered_delay_ms as u64)
    }
}

/// Calls `connect` until it succeeds, fails with a non-retryable error or runs out of attempts.
pub async fn connect_with_retry<T, F, Fut>(
    config: &RetryConfig,
    profile: Profile,
    mut connect: F,
) -> MirrorResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = MirrorResult<T>>,
{
    let mut backoff = ConnectBackoff::new(config.clone());

    loop {
        match connect().await {
            Ok(connection) => {
                if backoff.attempt_count() > 0 {
                    info!(
                        %profile,
                        failed_attempts = backoff.attempt_count(),
                        "connection established after retrying"
                    );
                }

                return Ok(connection);
            }
            Err(err) => {
                backoff.record_failure();

                if !backoff.should_retry(&err) {
                    if err.is_connection_retryable() {
                        error!(
                            %profile,
                            attempts = backoff.attempt_count(),
                            "connection failed, max attempts exceeded"
                        );
                    }

                    return Err(err);
                }

                let delay = backoff.calculate_backoff();
                warn!(
                    %profile,
                    error = %err,
                    attempt = backoff.attempt_count(),
                    delay_ms = delay.as_millis() as u64,
                    "connection failed, retrying after backoff"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::ErrorKind;
    use crate::mirror_error;

    fn test_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            backoff_factor: 2.0,
        }
    }

    #[test]
    fn test_should_not_retry_authentication_errors() {
        let mut backoff = ConnectBackoff::new(test_config());
        backoff.record_failure();

        let error = mirror_error!(ErrorKind::AuthenticationError, "invalid credentials");

        assert!(!backoff.should_retry(&error));
    }

    #[test]
    fn test_should_not_retry_when_attempts_exhausted() {
        let mut backoff = ConnectBackoff::new(test_config());
        let error = mirror_error!(ErrorKind::SourceConnectionFailed, "connection refused");

        backoff.record_failure();
        assert!(backoff.should_retry(&error));
        backoff.record_failure();
        assert!(backoff.should_retry(&error));
        backoff.record_failure();
        assert!(!backoff.should_retry(&error));
    }

    #[test]
    fn test_calculate_backoff() {
        let mut backoff = ConnectBackoff::new(test_config());

        backoff.record_failure();
        let delay1 = backoff.calculate_backoff();
        assert!(delay1.as_millis() >= 100 && delay1.as_millis() <= 130);

        backoff.record_failure();
        let delay2 = backoff.calculate_backoff();
        assert!(delay2.as_millis() >= 200 && delay2.as_millis() <= 260);
    }

    #[test]
    fn test_calculate_backoff_caps_at_max() {
        let config = RetryConfig {
            max_attempts: 20,
            initial_delay_ms: 500,
            max_delay_ms: 1000,
            backoff_factor: 4.0,
        };
        let mut backoff = ConnectBackoff::new(config);

        for _ in 0..10 {
            backoff.record_failure();
        }

        assert!(backoff.calculate_backoff().as_millis() <= 1300);
    }

    #[tokio::test]
    async fn test_connect_with_retry_recovers_from_transient_failures() {
        let config = RetryConfig {
            initial_delay_ms: 1,
            max_delay_ms: 5,
            ..test_config()
        };
        let calls = &AtomicU32::new(0);

        let result = connect_with_retry(&config, Profile::Destination, || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(mirror_error!(ErrorKind::DestinationConnectionFailed, "refused"))
            } else {
                Ok("connected")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "connected");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_connect_with_retry_gives_up_after_max_attempts() {
        let config = RetryConfig {
            initial_delay_ms: 1,
            max_delay_ms: 5,
            ..test_config()
        };
        let calls = &AtomicU32::new(0);

        let result: MirrorResult<()> = connect_with_retry(&config, Profile::Source, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(mirror_error!(ErrorKind::SourceConnectionFailed, "refused"))
        })
        .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::SourceConnectionFailed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
