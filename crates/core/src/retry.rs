//! Generic retry-with-backoff helper.
//!
//! Per §5/§7, only intent extraction and lexical search get an automatic
//! retry; the judge and other callers must not use this on failure paths
//! where the spec calls for fail-fast/degrade-silently behavior instead.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_delay_ms: 200,
            max_delay_ms: 2_000,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            base_delay_ms,
            max_delay_ms,
            jitter: true,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay_ms.saturating_mul(1u64 << attempt.min(16));
        let capped = exp.min(self.max_delay_ms);
        let millis = if self.jitter {
            let mut rng = rand::thread_rng();
            rng.gen_range((capped / 2).max(1)..=capped.max(1))
        } else {
            capped
        };
        Duration::from_millis(millis)
    }
}

/// Retries `f` according to `policy`. `is_retryable` decides whether a
/// given error should trigger another attempt; the final failure (retries
/// exhausted or a non-retryable error) is returned to the caller.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: &RetryPolicy,
    is_retryable: R,
    mut f: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    R: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < policy.max_retries && is_retryable(&e) => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying after transient error");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let policy = RetryPolicy::new(3, 1, 5);
        let attempts = AtomicU32::new(0);
        let result: std::result::Result<u32, &str> = retry_with_backoff(
            &policy,
            |_: &&str| true,
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("transient")
                    } else {
                        Ok(42)
                    }
                }
            },
        )
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_retryable() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);
        let result: std::result::Result<u32, &str> = retry_with_backoff(
            &policy,
            |_: &&str| false,
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async move { Err("permanent") }
            },
        )
        .await;
        assert_eq!(result, Err("permanent"));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
