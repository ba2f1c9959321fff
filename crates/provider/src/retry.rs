use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

/// Delay before the first retry.
pub const FIRST_RETRY_DELAY: Duration = Duration::from_millis(20);

/// Delay before every later retry.
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Time-bounded retry loop around a store call.
///
/// A failed attempt is retried after 20ms, then every second, until the
/// budget is spent. The last sleep is shortened to what is left of the budget
/// and followed by one final attempt. A zero budget makes exactly one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    budget: Duration,
}

impl RetryPolicy {
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }

    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    /// Run `op` until it succeeds or the budget is exhausted, returning the
    /// last error in the latter case.
    pub async fn run<T, E, Op, Fut>(&self, operation: &'static str, mut op: Op) -> Result<T, E>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        if self.budget.is_zero() {
            return op().await;
        }

        let deadline = Instant::now() + self.budget;
        let mut delay = FIRST_RETRY_DELAY;
        let mut attempt: u32 = 1;
        loop {
            let err = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "store call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                warn!(operation, attempts = attempt, error = %err, "retry budget exhausted");
                return Err(err);
            }
            let sleep = delay.min(remaining);
            debug!(
                operation,
                attempt,
                sleep_ms = u64::try_from(sleep.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "store call failed, retrying"
            );
            tokio::time::sleep(sleep).await;
            delay = RETRY_DELAY;
            attempt += 1;
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    async fn always_fails(calls: &AtomicU32) -> Result<(), String> {
        calls.fetch_add(1, Ordering::SeqCst);
        Err("down".into())
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_budget_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let result = RetryPolicy::new(Duration::from_millis(250))
            .run("test", || always_fails(&calls))
            .await;

        assert_eq!(result, Err("down".to_owned()));
        // t=0, t=20ms, then a final attempt at the 250ms budget edge.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn delays_are_20ms_then_one_second() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let result = RetryPolicy::new(Duration::from_millis(2100))
            .run("test", || always_fails(&calls))
            .await;

        assert!(result.is_err());
        // t=0, 20ms, 1020ms, 2020ms, then a final one at 2100ms.
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(start.elapsed(), Duration::from_millis(2100));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_budget_is_a_single_attempt() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();
        let result = RetryPolicy::disabled()
            .run("test", || always_fails(&calls))
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = RetryPolicy::default()
            .run("test", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("blip".to_owned())
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
