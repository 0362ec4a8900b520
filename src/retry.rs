//! Retry policy for remote calls.
//!
//! Only errors the caller's predicate accepts are retried; everything else is
//! returned on the first attempt. Delays double per attempt up to a ceiling.

use std::fmt::Display;
use std::time::Duration;
use tracing::warn;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(500), Duration::from_secs(16))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before retrying after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Run `operation`, retrying while `retryable` accepts the error and attempts remain.
    pub fn run<T, E, F, P>(&self, label: &str, operation: F, retryable: P) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
        P: Fn(&E) -> bool,
    {
        self.run_with_sleep(label, operation, retryable, std::thread::sleep)
    }

    /// Same as [`RetryPolicy::run`] with an injectable sleep, so tests need no wall-clock time.
    pub fn run_with_sleep<T, E, F, P, S>(
        &self,
        label: &str,
        mut operation: F,
        retryable: P,
        mut sleep: S,
    ) -> Result<T, E>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
        P: Fn(&E) -> bool,
        S: FnMut(Duration),
    {
        let mut attempt = 1u32;
        loop {
            match operation() {
                Ok(value) => return Ok(value),
                Err(err) if retryable(&err) && attempt < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} failed on attempt {}/{} ({}), retrying in {:?}",
                        label, attempt, self.max_attempts, err, delay
                    );
                    sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(4, Duration::from_millis(100), Duration::from_millis(250))
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.delay_for(1), Duration::from_millis(100));
        assert_eq!(p.delay_for(2), Duration::from_millis(200));
        assert_eq!(p.delay_for(3), Duration::from_millis(250));
        assert_eq!(p.delay_for(40), Duration::from_millis(250));
    }

    #[test]
    fn test_retries_transient_until_success() {
        let calls = Cell::new(0);
        let mut slept = Vec::new();
        let result: Result<u32, String> = policy().run_with_sleep(
            "op",
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 { Err("internal error".to_string()) } else { Ok(7) }
            },
            |e| e.contains("internal"),
            |d| slept.push(d),
        );
        assert_eq!(result, Ok(7));
        assert_eq!(calls.get(), 3);
        assert_eq!(slept, vec![Duration::from_millis(100), Duration::from_millis(200)]);
    }

    #[test]
    fn test_permanent_error_is_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), String> = policy().run_with_sleep(
            "op",
            || {
                calls.set(calls.get() + 1);
                Err("forbidden".to_string())
            },
            |e| e.contains("internal"),
            |_| panic!("should not sleep"),
        );
        assert_eq!(result, Err("forbidden".to_string()));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_gives_up_at_ceiling() {
        let calls = Cell::new(0);
        let result: Result<(), String> = policy().run_with_sleep(
            "op",
            || {
                calls.set(calls.get() + 1);
                Err("internal error".to_string())
            },
            |_| true,
            |_| {},
        );
        assert!(result.is_err());
        assert_eq!(calls.get(), 4);
    }
}
