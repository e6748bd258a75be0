//! Retry with exponential backoff
//!
//! Delay before retry `n` (1-based) is `initial * multiplier^(n-1)`, capped at
//! `max_delay`. No delay precedes the first attempt.

use crate::config::schema::RetryConfig;
use crate::error::{BoxError, CardkeepError, CardkeepResult};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Runs a fallible async operation up to `max_attempts` times
#[derive(Debug, Clone)]
pub struct BackoffExecutor {
    max_attempts: u32,
    initial_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    jitter: bool,
}

impl BackoffExecutor {
    /// Create an executor with doubling delays and no cap beyond one hour
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            multiplier: 2.0,
            max_delay: Duration::from_secs(3600),
            jitter: false,
        }
    }

    /// Create an executor from configuration
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, config.initial_delay())
            .with_multiplier(config.multiplier)
            .with_max_delay(config.max_delay())
            .with_jitter(config.jitter)
    }

    #[must_use]
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = if multiplier.is_finite() && multiplier >= 1.0 {
            multiplier
        } else {
            1.0
        };
        self
    }

    #[must_use]
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Unjittered delay before the given retry (1 = first retry)
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.multiplier.powi(exponent);
        let millis = self.initial_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    fn sleep_duration(&self, retry: u32) -> Duration {
        let delay = self.delay_for_retry(retry);
        if self.jitter && !delay.is_zero() {
            let millis = rand::thread_rng().gen_range(0..=delay.as_millis() as u64);
            Duration::from_millis(millis)
        } else {
            delay
        }
    }

    /// Execute `operation`, retrying on error.
    ///
    /// Returns the first success. After the last failed attempt returns
    /// `RetriesExhausted` carrying `dependency` and the final error.
    pub async fn run<T, E, F, Fut>(&self, dependency: &str, mut operation: F) -> CardkeepResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", dependency, attempt);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    let error: BoxError = e.into();
                    if attempt >= self.max_attempts {
                        warn!(
                            "{} failed after {} attempt(s): {}",
                            dependency, attempt, error
                        );
                        return Err(CardkeepError::RetriesExhausted {
                            dependency: dependency.to_string(),
                            attempts: attempt,
                            source: error,
                        });
                    }

                    let delay = self.sleep_duration(attempt);
                    warn!(
                        "{} attempt {}/{} failed: {}; retrying in {:?}",
                        dependency, attempt, self.max_attempts, error, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for BackoffExecutor {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[test]
    fn delays_double() {
        let exec = BackoffExecutor::new(5, Duration::from_millis(100));
        assert_eq!(exec.delay_for_retry(1), Duration::from_millis(100));
        assert_eq!(exec.delay_for_retry(2), Duration::from_millis(200));
        assert_eq!(exec.delay_for_retry(3), Duration::from_millis(400));
    }

    #[test]
    fn delays_are_capped() {
        let exec = BackoffExecutor::new(10, Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5));
        assert_eq!(exec.delay_for_retry(8), Duration::from_secs(5));
    }

    #[test]
    fn zero_attempts_means_one() {
        assert_eq!(BackoffExecutor::new(0, Duration::ZERO).max_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn always_failing_runs_exactly_n_times() {
        for n in 1..=4 {
            let calls = Arc::new(AtomicU32::new(0));
            let exec = BackoffExecutor::new(n, Duration::from_millis(10));

            let counter = calls.clone();
            let result: CardkeepResult<()> = exec
                .run("weather-api", || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err::<(), _>("connection refused")
                    }
                })
                .await;

            assert_eq!(calls.load(Ordering::SeqCst), n);
            match result {
                Err(CardkeepError::RetriesExhausted {
                    dependency,
                    attempts,
                    source,
                }) => {
                    assert_eq!(dependency, "weather-api");
                    assert_eq!(attempts, n);
                    assert_eq!(source.to_string(), "connection refused");
                }
                other => panic!("expected RetriesExhausted, got {:?}", other),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_first_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let exec = BackoffExecutor::new(5, Duration::from_millis(10));

        let counter = calls.clone();
        let value = exec
            .run("github", || {
                let counter = counter.clone();
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(format!("attempt {} failed", n))
                    } else {
                        Ok(n * 10)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 30);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_exponentially_between_attempts() {
        let exec = BackoffExecutor::new(3, Duration::from_secs(1));
        let start = Instant::now();

        let _ = exec
            .run("oura", || async { Err::<(), _>("timeout") })
            .await;

        // 1s before retry 1, 2s before retry 2
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_never_sleeps() {
        let exec = BackoffExecutor::new(1, Duration::from_secs(60));
        let start = Instant::now();

        let result = exec.run("quote", || async { Err::<(), _>("boom") }).await;

        assert!(result.is_err());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn jitter_never_exceeds_delay() {
        let exec = BackoffExecutor::new(4, Duration::from_millis(100)).with_jitter(true);
        let start = Instant::now();

        let _ = exec.run("soundcloud", || async { Err::<(), _>("x") }).await;

        assert!(start.elapsed() <= Duration::from_millis(700));
    }
}
