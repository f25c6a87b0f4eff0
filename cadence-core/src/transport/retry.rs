//! Flat-interval retry wrapper for flaky browser interactions.
//!
//! WebDriver calls fail spuriously while a page is still rendering (stale
//! element references, elements not yet attached). Those resolve within a
//! few hundred milliseconds, so the handle retries at a short fixed interval
//! rather than backing off.

use std::future::Future;
use std::time::Duration;
use tracing::{trace, warn};

#[derive(Debug, Clone)]
pub struct RetryingHandle {
    max_attempts: u32,
    delay: Duration,
}

impl Default for RetryingHandle {
    fn default() -> Self {
        // 150 * 200ms: rides out a slow page render without masking a
        // genuinely dead session for more than half a minute.
        Self {
            max_attempts: 150,
            delay: Duration::from_millis(200),
        }
    }
}

impl RetryingHandle {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts, delay }
    }

    /// Run `op` until it succeeds or attempts are exhausted, returning the
    /// last error in the latter case.
    pub async fn run<T, E, Fut, Op>(&self, what: &str, mut op: Op) -> Result<T, E>
    where
        E: std::fmt::Display,
        Fut: Future<Output = Result<T, E>>,
        Op: FnMut() -> Fut,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.max_attempts => {
                    warn!(what, attempt, %err, "giving up after repeated failures");
                    return Err(err);
                }
                Err(err) => {
                    trace!(what, attempt, %err, "retrying");
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let handle = RetryingHandle::new(5, Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result: Result<u32, String> = handle
            .run("flaky", || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err("not yet".to_string())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhaustion_returns_last_error() {
        let handle = RetryingHandle::new(3, Duration::from_millis(1));
        let calls = AtomicU32::new(0);

        let result: Result<(), String> = handle
            .run("doomed", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("still broken".to_string()) }
            })
            .await;

        assert_eq!(result.unwrap_err(), "still broken");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
