use std::fmt::{Debug, Display};
use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

pub const DEFAULT_ATTEMPTS: usize = 20;
pub const DEFAULT_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    #[error("done trying: {0}")]
    Exhausted(E),

    #[error("timeout after {timeout:?} ({attempts} attempts): {last}")]
    Timeout {
        timeout: Duration,
        attempts: usize,
        last: E,
    },
}

impl<E> RetryError<E> {
    /// The error returned by the final attempt.
    pub fn last(&self) -> &E {
        match self {
            RetryError::Exhausted(e) => e,
            RetryError::Timeout { last, .. } => last,
        }
    }
}

/// Call `f` up to `max_attempts` times, sleeping `delay` after each failure.
///
/// There is no cancellation, so this is only for work with a known bound.
pub async fn run<T, E, F, Fut>(max_attempts: usize, delay: Duration, mut f: F) -> Result<T, RetryError<E>>
where
    E: Display + Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= max_attempts.max(1) => return Err(RetryError::Exhausted(e)),
            Err(e) => {
                tracing::debug!(attempt, error = %e, "attempt failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Call `f` until it succeeds, at most once per `interval`, giving up once
/// `timeout` has elapsed. The first attempt always happens, even when
/// `interval` is longer than `timeout`.
pub async fn wait_for<T, E, F, Fut>(
    mut f: F,
    timeout: Duration,
    interval: Duration,
) -> Result<T, RetryError<E>>
where
    E: Display + Debug,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let deadline = Instant::now() + timeout;
    let mut limiter = tokio::time::interval(interval.max(Duration::from_millis(1)));
    limiter.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    limiter.tick().await;

    let mut attempts = 0;
    loop {
        attempts += 1;
        let last = match f().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if Instant::now() >= deadline {
            return Err(RetryError::Timeout {
                timeout,
                attempts,
                last,
            });
        }

        tokio::select! {
            _ = limiter.tick() => {}
            _ = tokio::time::sleep_until(deadline) => {
                return Err(RetryError::Timeout { timeout, attempts, last });
            }
        }
    }
}
