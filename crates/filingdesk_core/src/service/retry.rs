//! Bounded retry with exponential backoff for transient storage failures.
//!
//! Only errors reporting themselves as transient (SQLite busy/locked) are
//! retried. Every operation retried through here must be idempotent.

use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;

/// Exponential backoff settings for storage retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryPolicy {
    /// Policy that runs the operation once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Delay before retry number `attempt` (1-based): 50ms, 100ms, 200ms, ...
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let millis = self
            .initial_backoff_ms
            .saturating_mul(1_u64 << exponent)
            .min(self.max_backoff_ms);
        Duration::from_millis(millis)
    }
}

/// Classifies errors worth retrying.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Runs `op` until it succeeds, fails permanently, or attempts run out.
pub fn retry_transient<T, E, F>(policy: &RetryPolicy, operation: &str, mut op: F) -> Result<T, E>
where
    E: Transient + Display,
    F: FnMut() -> Result<T, E>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < max_attempts => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    "event=retry module=service status=retrying operation={} attempt={} max_attempts={} delay_ms={} error={}",
                    operation,
                    attempt,
                    max_attempts,
                    delay.as_millis(),
                    err
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{retry_transient, RetryPolicy, Transient};
    use std::fmt::{Display, Formatter};
    use std::time::Duration;

    #[derive(Debug)]
    struct FakeError {
        transient: bool,
    }

    impl Display for FakeError {
        fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
            write!(f, "fake transient={}", self.transient)
        }
    }

    impl Transient for FakeError {
        fn is_transient(&self) -> bool {
            self.transient
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
        }
    }

    #[test]
    fn delay_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(50));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(30), Duration::from_millis(2_000));
    }

    #[test]
    fn transient_errors_are_retried_until_success() {
        let mut calls = 0;
        let result = retry_transient(&fast_policy(5), "test", || {
            calls += 1;
            if calls < 3 {
                Err(FakeError { transient: true })
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn permanent_errors_fail_immediately() {
        let mut calls = 0;
        let result: Result<(), _> = retry_transient(&fast_policy(5), "test", || {
            calls += 1;
            Err(FakeError { transient: false })
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn attempts_are_bounded() {
        let mut calls = 0;
        let result: Result<(), _> = retry_transient(&fast_policy(3), "test", || {
            calls += 1;
            Err(FakeError { transient: true })
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }
}
