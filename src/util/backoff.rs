//! Exponential backoff and bounded retry of transient failures

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Exponential backoff with configurable min/max.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial.min(max),
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Advances to the next interval (doubles, capped at max).
    pub fn next(&mut self) {
        self.current = (self.current * 2).min(self.max);
    }

    pub fn reset(&mut self) {
        self.current = self.initial.min(self.max);
    }
}

/// How many times, and how far apart, a transient failure is retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Runs `op` until it succeeds, fails with an error `is_transient`
    /// rejects, or the retry budget is spent. `op` receives the 1-based
    /// attempt number. A raised `cancel` ends the backoff wait early and
    /// returns the last error.
    pub async fn run<T, E, F, Fut, P>(
        &self,
        label: &str,
        cancel: Option<&CancellationToken>,
        is_transient: P,
        mut op: F,
    ) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut backoff = ExponentialBackoff::new(self.initial_delay, self.max_delay);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt <= self.max_retries && is_transient(&e) => {
                    let delay = backoff.current();
                    warn!(
                        operation = label,
                        attempt,
                        max_attempts = self.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    match cancel {
                        Some(token) => {
                            tokio::select! {
                                _ = token.cancelled() => return Err(e),
                                _ = tokio::time::sleep(delay) => {}
                            }
                        }
                        None => tokio::time::sleep(delay).await,
                    }
                    backoff.next();
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn backoff_doubles_and_caps() {
        let mut backoff = ExponentialBackoff::new(Duration::from_secs(5), Duration::from_secs(12));
        assert_eq!(backoff.current(), Duration::from_secs(5));
        backoff.next();
        assert_eq!(backoff.current(), Duration::from_secs(10));
        backoff.next();
        assert_eq!(backoff.current(), Duration::from_secs(12));
        backoff.reset();
        assert_eq!(backoff.current(), Duration::from_secs(5));
    }

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1), Duration::from_millis(4))
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = fast(3)
            .run("test", None, |_| true, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err("busy".to_string())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = fast(3)
            .run("test", None, |_| false, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("malformed".to_string()) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_budget_is_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = fast(2)
            .run("test", None, |_| true, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("timeout".to_string()) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_stops_waiting() {
        let token = CancellationToken::new();
        token.cancel();
        let policy = RetryPolicy::new(5, Duration::from_secs(60), Duration::from_secs(60));
        let result: Result<(), String> = tokio::time::timeout(
            Duration::from_secs(5),
            policy.run("test", Some(&token), |_| true, |_| async {
                Err("timeout".to_string())
            }),
        )
        .await
        .expect("cancelled retry must not sleep");
        assert!(result.is_err());
    }
}
