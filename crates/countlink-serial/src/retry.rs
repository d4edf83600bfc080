//! Bounded retry with linear backoff.
//!
//! Only transient failures ([`Error::is_retryable`]) are retried: command
//! timeouts and communication errors. Everything else, including
//! `NotConnected`, `InvalidResponse` and `ConnectionFailed`, surfaces on its
//! first occurrence. After the last attempt the last error is returned
//! unchanged.
//!
//! [`Error::is_retryable`]: countlink_core::Error::is_retryable

use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, warn};

use countlink_core::{Options, Result};

/// How often and how patiently a command is retried.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use countlink_serial::RetryPolicy;
///
/// let policy = RetryPolicy::new(3, Duration::from_millis(100));
/// assert_eq!(policy.delay_after(1), Duration::from_millis(100));
/// assert_eq!(policy.delay_after(2), Duration::from_millis(200));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// Create a policy making `attempts` total attempts (at least one).
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    /// Policy configured by `command_retries` and `retry_delay_ms`.
    pub fn from_options(options: &Options) -> Self {
        Self::new(options.total_attempts(), options.retry_delay())
    }

    /// Total attempts.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Pause after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Run `operation` until it succeeds, fails fatally, or attempts run out.
    ///
    /// `operation` receives the 1-based attempt number.
    pub async fn run<T, F, Fut>(&self, command: &str, mut operation: F) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(command, attempt, "Command succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < self.attempts => {
                    let delay = self.delay_after(attempt);
                    warn!(
                        command,
                        attempt,
                        max_attempts = self.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Command failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        error!(
                            command,
                            attempts = self.attempts,
                            error = %e,
                            "Command failed after all attempts"
                        );
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use countlink_core::Error;
    use rstest::rstest;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_last_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let calls = AtomicU32::new(0);

        let result = policy
            .run("COUNTS?", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(Error::timeout("COUNTS?", 1000))
                    } else {
                        Ok("1 2 0")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "1 2 0");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_linear() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let start = Instant::now();

        let _ = policy
            .run("*IDN?", |_| async { Err::<(), _>(Error::timeout("*IDN?", 10)) })
            .await;

        // 100 ms after attempt 1, 200 ms after attempt 2.
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let policy = RetryPolicy::new(2, Duration::ZERO);

        let err = policy
            .run("COUNTS?", |attempt| async move {
                Err::<(), _>(Error::timeout(format!("attempt {attempt}"), 10))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::CommandTimeout { ref command, .. } if command == "attempt 2"));
    }

    #[rstest]
    #[case(Error::invalid_response("COUNTS?", "1 2", "9 integers"))]
    #[case(Error::NotConnected)]
    #[case(Error::connection_failed("gone"))]
    #[case(Error::aborted("measure_rate"))]
    #[tokio::test(start_paused = true)]
    async fn test_fatal_errors_make_one_attempt(#[case] error: Error) {
        let policy = RetryPolicy::new(5, Duration::from_millis(10));
        let kind = error.kind();
        let mut pending = Some(error);
        let mut calls = 0;

        let err = policy
            .run("COUNTS?", |_| {
                calls += 1;
                let error = pending.take();
                async move { Err::<(), _>(error.unwrap_or(Error::NotConnected)) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls, 1);
        assert_eq!(err.kind(), kind);
    }

    #[test]
    fn test_zero_attempts_means_one() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.attempts(), 1);
        assert_eq!(
            RetryPolicy::from_options(&Options::default()).attempts(),
            3
        );
    }
}
