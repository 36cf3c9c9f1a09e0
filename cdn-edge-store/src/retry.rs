//! Exponential-backoff retry, following the same shape as the teacher's own
//! `Retrier`/`RetryResult` pair: the sleep implementation is injectable so tests
//! never actually wait in wall-clock time.

use std::time::Duration;

use cdn_edge_error::Error;
use futures::future::BoxFuture;

/// Outcome of a single retry attempt.
pub enum RetryResult<T> {
    Ok(T),
    Retry(Error),
    Err(Error),
}

/// An iterator of delays to sleep between attempts. `ExponentialBackoff` is the
/// production implementation; tests can substitute a fixed-duration iterator.
pub struct ExponentialBackoff {
    current: Duration,
    multiplier: u32,
}

impl ExponentialBackoff {
    pub fn new(base: Duration) -> Self {
        ExponentialBackoff {
            current: base,
            multiplier: 2,
        }
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = self.current;
        self.current *= self.multiplier;
        Some(delay)
    }
}

type SleepFn = Box<dyn Fn(Duration) -> BoxFuture<'static, ()> + Send + Sync>;

/// Drives a sequence of attempts against a caller-supplied backoff schedule.
pub struct Retrier {
    sleep_fn: SleepFn,
}

impl Retrier {
    pub fn new(sleep_fn: SleepFn) -> Self {
        Retrier { sleep_fn }
    }

    /// Runs `attempt` up to `retry_config.count() + 1` times (once, then once per
    /// delay yielded by `retry_config`), stopping on the first `Ok`/`Err` or when
    /// the delay iterator is exhausted.
    pub async fn retry<T, I, F, Fut>(&self, mut retry_config: I, mut attempt: F) -> Result<T, Error>
    where
        I: Iterator<Item = Duration>,
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = RetryResult<T>>,
    {
        loop {
            match attempt().await {
                RetryResult::Ok(value) => return Ok(value),
                RetryResult::Err(err) => return Err(err),
                RetryResult::Retry(err) => match retry_config.next() {
                    Some(delay) => {
                        tracing::warn!(%err, delay_ms = delay.as_millis() as u64, "retrying after failure");
                        (self.sleep_fn)(delay).await;
                    }
                    None => return Err(err),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdn_edge_error::{make_err, Code};
    use futures::future::ready;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    fn immediate_retrier() -> Retrier {
        Retrier::new(Box::new(|_duration| Box::pin(ready(()))))
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let retrier = immediate_retrier();
        let run_count = Arc::new(AtomicI32::new(0));
        let rc = run_count.clone();
        let result = retrier
            .retry(ExponentialBackoff::new(Duration::from_millis(1)).take(3), || {
                let rc = rc.clone();
                async move {
                    rc.fetch_add(1, Ordering::Relaxed);
                    RetryResult::Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(run_count.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let retrier = immediate_retrier();
        let run_count = Arc::new(AtomicI32::new(0));
        let rc = run_count.clone();
        let result = retrier
            .retry(ExponentialBackoff::new(Duration::from_millis(1)).take(5), || {
                let rc = rc.clone();
                async move {
                    let n = rc.fetch_add(1, Ordering::Relaxed) + 1;
                    if n < 3 {
                        RetryResult::<i32>::Retry(make_err!(Code::Unavailable, "not yet"))
                    } else {
                        RetryResult::Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_retry_budget_exhausted() {
        let retrier = immediate_retrier();
        let run_count = Arc::new(AtomicI32::new(0));
        let rc = run_count.clone();
        let result: Result<i32, _> = retrier
            .retry(ExponentialBackoff::new(Duration::from_millis(1)).take(2), || {
                let rc = rc.clone();
                async move {
                    rc.fetch_add(1, Ordering::Relaxed);
                    RetryResult::Retry(make_err!(Code::Unavailable, "still failing"))
                }
            })
            .await;
        assert!(result.is_err());
        // Initial attempt + 2 retries = 3 calls.
        assert_eq!(run_count.load(Ordering::Relaxed), 3);
    }

    #[tokio::test]
    async fn non_retryable_error_stops_immediately() {
        let retrier = immediate_retrier();
        let run_count = Arc::new(AtomicI32::new(0));
        let rc = run_count.clone();
        let result: Result<i32, _> = retrier
            .retry(ExponentialBackoff::new(Duration::from_millis(1)).take(5), || {
                let rc = rc.clone();
                async move {
                    rc.fetch_add(1, Ordering::Relaxed);
                    RetryResult::Err(make_err!(Code::InvalidArgument, "bad input"))
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(run_count.load(Ordering::Relaxed), 1);
    }
}
