//! Generic retry-with-backoff helper shared by provider clients, the
//! credential manager, and the background task engine's handler wrapper.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

/// Marks an error as retryable or terminal. Provider/transport errors
/// implement this so `retry_with_backoff` knows when to give up early.
pub trait RetryableError {
    fn is_retryable(&self) -> bool;
}

/// Exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            jitter_fraction: 0.2,
        }
    }
}

impl RetryConfig {
    /// Delay before attempt `attempt` (1-indexed), with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis() as u64 * 2u64.saturating_pow(attempt.saturating_sub(1));
        let capped = exp.min(self.max_delay.as_millis() as u64);
        let jitter_range = (capped as f64 * self.jitter_fraction) as i64;
        let jitter = if jitter_range > 0 {
            rand::rng().random_range(-jitter_range..=jitter_range)
        } else {
            0
        };
        let millis = (capped as i64 + jitter).max(0) as u64;
        Duration::from_millis(millis)
    }
}

/// Retry an async operation whose error type doesn't carry retry
/// classification — every error is treated as retryable.
pub async fn retry<F, Fut, T, E>(mut op: F, config: &RetryConfig) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt >= config.max_attempts {
                    return Err(e);
                }
                tokio::time::sleep(config.delay_for(attempt)).await;
            }
        }
    }
}

/// Retry an async operation, consulting `RetryableError` to stop early on
/// terminal failures (auth errors, invalid request, validation).
pub async fn retry_with_check<F, Fut, T, E>(mut op: F, config: &RetryConfig) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt >= config.max_attempts || !e.is_retryable() {
                    return Err(e);
                }
                tokio::time::sleep(config.delay_for(attempt)).await;
            }
        }
    }
}

/// Alias kept for call sites mirroring the provider client's naming.
pub async fn retry_with_backoff<F, Fut, T, E>(op: F, config: &RetryConfig) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    retry(op, config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter_fraction: 0.0,
        };
        let result: Result<u32, &str> = retry(
            || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 { Err("not yet") } else { Ok(42) }
            },
            &config,
        )
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let config = RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter_fraction: 0.0,
        };
        let result: Result<u32, &str> = retry(|| async { Err("always fails") }, &config).await;
        assert_eq!(result, Err("always fails"));
    }

    #[derive(Debug)]
    struct Terminal;
    impl RetryableError for Terminal {
        fn is_retryable(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn retry_with_check_stops_on_terminal_error() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig::default();
        let result: Result<u32, Terminal> = retry_with_check(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Terminal)
            },
            &config,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
