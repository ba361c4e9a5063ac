//! C8 — composable retry policy, built on the `backoff` crate.
//!
//! Only retriable error classes (I/O, timeout, replicator consistency) are ever retried;
//! domain rejections are terminal and must not reach [`RetryPolicy::retry`] at all (§7, §8).

use std::future::Future;
use std::time::Duration;

use backoff::backoff::{Backoff, Constant};
use backoff::exponential::ExponentialBackoff;
use backoff::SystemClock;

/// One of `{never, once, constant(delay), exponential(...)}` (§4.8).
#[derive(Debug, Clone)]
pub enum RetryPolicy {
    Never,
    Once,
    Constant { delay: Duration },
    Exponential {
        initial: Duration,
        max_delay: Duration,
        max_retries: u32,
        random_factor: f64,
    },
}

impl RetryPolicy {
    pub fn exponential(initial: Duration, max_delay: Duration, max_retries: u32) -> Self {
        Self::Exponential {
            initial,
            max_delay,
            max_retries,
            random_factor: 0.2,
        }
    }

    fn backoff_iter(&self) -> RetryIter {
        match self {
            RetryPolicy::Never => RetryIter::Never,
            RetryPolicy::Once => RetryIter::Once { used: false },
            RetryPolicy::Constant { delay } => RetryIter::Constant(Constant::new(*delay)),
            RetryPolicy::Exponential {
                initial,
                max_delay,
                max_retries,
                random_factor,
            } => {
                let backoff = ExponentialBackoff::<SystemClock> {
                    current_interval: *initial,
                    initial_interval: *initial,
                    randomization_factor: *random_factor,
                    multiplier: 2.0,
                    max_interval: *max_delay,
                    max_elapsed_time: None,
                    clock: SystemClock::default(),
                    start_time: std::time::Instant::now(),
                };
                RetryIter::Exponential {
                    backoff,
                    retries_left: *max_retries,
                }
            }
        }
    }

    /// Runs `op`, retrying while `classify` marks the error retriable, sleeping between attempts
    /// per this policy. Returns the last error once attempts (or the policy) are exhausted.
    pub async fn retry<T, E, Fut, Op, Classify>(&self, mut op: Op, classify: Classify) -> Result<T, E>
    where
        Op: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        Classify: Fn(&E) -> bool,
    {
        let mut backoff = self.backoff_iter();

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) if classify(&error) => match backoff.next_delay() {
                    Some(delay) => {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                    None => return Err(error),
                },
                Err(error) => return Err(error),
            }
        }
    }
}

enum RetryIter {
    Never,
    Once { used: bool },
    Constant(Constant),
    Exponential {
        backoff: ExponentialBackoff<SystemClock>,
        retries_left: u32,
    },
}

impl RetryIter {
    fn next_delay(&mut self) -> Option<Duration> {
        match self {
            RetryIter::Never => None,
            RetryIter::Once { used } => {
                if *used {
                    None
                } else {
                    *used = true;
                    Some(Duration::ZERO)
                }
            }
            RetryIter::Constant(backoff) => backoff.next_backoff(),
            RetryIter::Exponential { backoff, retries_left } => {
                if *retries_left == 0 {
                    return None;
                }
                *retries_left -= 1;
                backoff.next_backoff()
            }
        }
    }
}

/// Never retries; used where the spec explicitly forbids it (e.g. C4's own persistence failures).
pub fn never() -> RetryPolicy {
    RetryPolicy::Never
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn never_does_not_retry() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), &str> = RetryPolicy::Never
            .retry(
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err("boom") }
                },
                |_| true,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn once_retries_exactly_once() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), &str> = RetryPolicy::Once
            .retry(
                || {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    async { Err("boom") }
                },
                |_| true,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retriable_errors_fail_fast() {
        let attempts = AtomicU32::new(0);
        let result: Result<(), &str> = RetryPolicy::Constant {
            delay: Duration::from_millis(1),
        }
        .retry(
            || {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err("domain rejection") }
            },
            |_| false,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, &str> = RetryPolicy::Constant {
            delay: Duration::from_millis(1),
        }
        .retry(
            || {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move { if n < 2 { Err("transient") } else { Ok(42) } }
            },
            |_| true,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
