//! # Backoff
//!
//! Two flavours of backoff are used by the controller:
//!
//! - [`FibonacciBackoff`]: per-object requeue delay after failed reconciliations.
//!   Sequence with the defaults: 5s, 5s, 10s, 15s, 25s, 40s, ... capped at 300s.
//! - [`RetryPolicy`] + [`retry_on_error`]: bounded in-place retries of a single
//!   NSX call (realization polling, ALB probing, cleanup stages).

use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Default minimum requeue delay in seconds
pub const DEFAULT_MIN_BACKOFF_SECS: u64 = 5;
/// Default maximum requeue delay in seconds
pub const DEFAULT_MAX_BACKOFF_SECS: u64 = 300;

/// Fibonacci backoff calculator
///
/// Each backoff is the sum of the previous two, starting from `min_seconds`
/// twice and capped at `max_seconds`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_seconds: u64,
    prev_seconds: u64,
    current_seconds: u64,
    max_seconds: u64,
}

impl FibonacciBackoff {
    /// Create a new Fibonacci backoff with minimum and maximum values in seconds
    #[must_use]
    pub fn new(min_seconds: u64, max_seconds: u64) -> Self {
        Self {
            min_seconds,
            prev_seconds: 0,
            current_seconds: min_seconds,
            max_seconds,
        }
    }

    /// Get the next backoff duration in seconds and advance the sequence
    pub fn next_backoff_seconds(&mut self) -> u64 {
        let result = self.current_seconds;
        let next = self.prev_seconds + self.current_seconds;
        self.prev_seconds = self.current_seconds;
        self.current_seconds = std::cmp::min(next, self.max_seconds);
        result
    }

    /// Get the next backoff duration as a `Duration` and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_secs(self.next_backoff_seconds())
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev_seconds = 0;
        self.current_seconds = self.min_seconds;
    }

    /// Stateless variant: backoff for the given consecutive error count
    #[must_use]
    pub fn calculate_for_error_count(error_count: u32, min_seconds: u64, max_seconds: u64) -> Duration {
        if error_count <= 1 {
            return Duration::from_secs(min_seconds);
        }

        let mut prev = min_seconds;
        let mut current = min_seconds;
        for _ in 2..=error_count {
            let next = prev + current;
            prev = current;
            current = std::cmp::min(next, max_seconds);
            if current >= max_seconds {
                break;
            }
        }

        Duration::from_secs(current)
    }
}

impl Default for FibonacciBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_BACKOFF_SECS, DEFAULT_MAX_BACKOFF_SECS)
    }
}

/// Bounded exponential retry for a single operation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one
    pub attempts: u32,
    /// Delay before the second attempt
    pub initial: Duration,
    /// Multiplier applied to the delay after every attempt
    pub factor: u32,
    /// Upper bound of a single delay
    pub max: Duration,
}

impl RetryPolicy {
    /// Probing the ALB endpoint: 4 calls in total on non-404 failures
    pub const fn alb_probe() -> Self {
        Self {
            attempts: 4,
            initial: Duration::from_millis(500),
            factor: 2,
            max: Duration::from_secs(4),
        }
    }

    /// Per-stage retry of the cleanup command
    pub const fn cleanup_stage() -> Self {
        Self {
            attempts: 3,
            initial: Duration::from_secs(1),
            factor: 2,
            max: Duration::from_secs(10),
        }
    }

    /// No delay between attempts (unit tests)
    pub const fn immediate(attempts: u32) -> Self {
        Self {
            attempts,
            initial: Duration::ZERO,
            factor: 1,
            max: Duration::ZERO,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let scaled = self.initial.saturating_mul(self.factor.saturating_pow(exp));
        scaled.min(self.max)
    }
}

/// Run `op` until it succeeds, `should_retry` rejects the error, or the
/// attempt budget is spent. The last error is returned.
pub async fn retry_on_error<T, E, F, Fut, P>(policy: &RetryPolicy, mut op: F, should_retry: P) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
    E: std::fmt::Display,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < attempts && should_retry(&e) => {
                let delay = policy.delay_for(attempt);
                debug!("Attempt {}/{} failed: {}, retrying in {:?}", attempt, attempts, e, delay);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
