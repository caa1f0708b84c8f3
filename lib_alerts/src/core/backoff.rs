//! # Bounded Retry With Exponential Backoff
//!
//! [`RetryPolicy`] drives one poll cycle: up to `max_attempts` tries, waiting
//! `base_delay × factor^(k-1)` after failed attempt `k` (1, 2, 4, 8 s with the
//! defaults). The delay is derived from the attempt number alone and is capped
//! at `max_delay`, so the sequence is non-decreasing.
//!
//! ## Exit paths
//! [`RetryPolicy::run`] is an explicit loop with three exits, one per
//! [`RetryOutcome`] variant: success, attempt bound reached, or the shutdown
//! token fired while waiting out a backoff delay.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retry bound and delay growth for a single poll cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total tries per cycle, including the first one.
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub base_delay: Duration,
    /// Multiplicative growth per attempt.
    pub factor: u32,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            factor: 2,
            max_delay: Duration::from_secs(60),
        }
    }
}

/// How a [`RetryPolicy::run`] call ended.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// The operation returned `Ok`.
    Succeeded {
        /// The value produced.
        value: T,
        /// Attempts used, 1-based.
        attempts: u32,
    },
    /// Every attempt failed.
    Exhausted {
        /// Error from the final attempt.
        last_error: E,
        /// Attempts used.
        attempts: u32,
    },
    /// The token fired before the cycle finished.
    Cancelled {
        /// Attempts completed before cancellation.
        attempts: u32,
    },
}

impl RetryPolicy {
    /// Creates a policy with a 60 s delay cap.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self { max_attempts, base_delay, ..Self::default() }
    }

    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = self.factor.max(1).checked_pow(exponent).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Every delay a fully failing cycle waits, in order.
    pub fn schedule(&self) -> Vec<Duration> {
        (1..self.max_attempts.max(1)).map(|k| self.delay_after(k)).collect()
    }

    /// Runs `op` until it succeeds, the attempt bound is reached, or `cancel`
    /// fires during a backoff wait. `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> RetryOutcome<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return RetryOutcome::Cancelled { attempts: attempt };
            }

            attempt += 1;
            let error = match op(attempt).await {
                Ok(value) => return RetryOutcome::Succeeded { value, attempts: attempt },
                Err(e) => e,
            };

            if attempt >= max_attempts {
                return RetryOutcome::Exhausted { last_error: error, attempts: attempt };
            }

            let delay = self.delay_after(attempt);
            warn!(attempt, max_attempts, delay_ms = delay.as_millis() as u64, error = %error, "attempt failed, backing off");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(attempt, "shutdown during backoff wait");
                    return RetryOutcome::Cancelled { attempts: attempt };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn default_schedule_doubles_from_one_second() {
        let secs: Vec<u64> = RetryPolicy::default().schedule().iter().map(Duration::as_secs).collect();
        assert_eq!(secs, vec![1, 2, 4, 8]);
    }

    #[test]
    fn delays_are_capped_and_never_shrink() {
        let policy = RetryPolicy { max_attempts: 40, max_delay: Duration::from_secs(30), ..Default::default() };
        let schedule = policy.schedule();
        assert!(schedule.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*schedule.last().unwrap(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let outcome = RetryPolicy::default()
            .run(&CancellationToken::new(), move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>("boom")
                }
            })
            .await;

        assert!(matches!(outcome, RetryOutcome::Exhausted { attempts: 5, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_a_later_attempt() {
        let outcome = RetryPolicy::default()
            .run(&CancellationToken::new(), |attempt| async move {
                if attempt < 3 { Err("not yet") } else { Ok(attempt * 10) }
            })
            .await;
        assert!(matches!(outcome, RetryOutcome::Succeeded { value: 30, attempts: 3 }));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_backoff_wait() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            trigger.cancel();
        });

        let outcome = RetryPolicy::default().run(&cancel, |_| async { Err::<(), _>("down") }).await;
        assert!(matches!(outcome, RetryOutcome::Cancelled { attempts: 2 }));
    }
}
