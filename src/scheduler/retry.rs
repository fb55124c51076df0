//! Retry policy for queue admission.
//!
//! The policy is a plain value: it decides whether another attempt is allowed
//! and how long to wait before it, without knowing anything about the store.

use std::time::Duration;

/// Default maximum number of admission attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Fixed-attempt retry policy.
///
/// The default allows three attempts with no delay between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy allowing `max_attempts` attempts in total.
    ///
    /// A value of zero is treated as one: the first attempt always runs.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Default::default()
        }
    }

    /// Sets the delay between attempts.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Returns the maximum number of attempts.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the delay between attempts.
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Returns whether another attempt is allowed after `attempts_made`
    /// attempts have failed.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Returns the number of attempts left after `attempts_made`.
    pub fn remaining_attempts(&self, attempts_made: u32) -> u32 {
        self.max_attempts.saturating_sub(attempts_made)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.backoff(), Duration::ZERO);
    }

    #[test]
    fn test_should_retry_boundaries() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert!(!policy.should_retry(4));

        assert_eq!(policy.remaining_attempts(0), 3);
        assert_eq!(policy.remaining_attempts(2), 1);
        assert_eq!(policy.remaining_attempts(5), 0);
    }

    #[test]
    fn test_zero_attempts_still_runs_once() {
        let policy = RetryPolicy::new(0);
        assert_eq!(policy.max_attempts(), 1);
        assert!(!policy.should_retry(1));
    }

    #[test]
    fn test_with_backoff() {
        let policy = RetryPolicy::new(5).with_backoff(Duration::from_millis(20));
        assert_eq!(policy.max_attempts(), 5);
        assert_eq!(policy.backoff(), Duration::from_millis(20));
    }
}
