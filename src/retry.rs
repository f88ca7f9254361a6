//! Bounded retries for remote calls.
//!
//! Only `Unavailable` is retried. `Rejected`, `NotFound`, `AlreadyExists`
//! and every other outcome is returned to the caller on the first attempt.
//! Calls cannot be interrupted from here, so the deadline is enforced
//! between attempts: no new attempt starts once it would begin after the
//! deadline. Per-call timeouts belong to the ledger client itself.

use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::IdvaultError;

/// Exponential backoff with an attempt cap and an overall deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub deadline_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 1_000,
            deadline_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff before attempt `attempt + 1` (attempts count from 1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }

    /// Run `call`, retrying transient failures.
    pub fn run<T>(
        &self,
        operation: &str,
        mut call: impl FnMut() -> Result<T, IdvaultError>,
    ) -> Result<T, IdvaultError> {
        let deadline = Instant::now() + Duration::from_millis(self.deadline_ms);
        let mut attempt = 1;
        loop {
            match call() {
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let pause = self.backoff(attempt);
                    if Instant::now() + pause >= deadline {
                        warn!(operation, attempt, error = %e, "retry deadline reached");
                        return Err(e);
                    }
                    warn!(operation, attempt, error = %e, "transient failure, retrying");
                    thread::sleep(pause);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            deadline_ms: 1_000,
        }
    }

    #[test]
    fn retries_unavailable_until_success() {
        let calls = Cell::new(0);
        let out = fast(3).run("get", || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(IdvaultError::Unavailable("peer".into()))
            } else {
                Ok(7)
            }
        });
        assert_eq!(out.unwrap(), 7);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let out: Result<(), _> = fast(2).run("get", || {
            calls.set(calls.get() + 1);
            Err(IdvaultError::Unavailable("peer".into()))
        });
        assert!(matches!(out, Err(IdvaultError::Unavailable(_))));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn rejected_is_not_retried() {
        let calls = Cell::new(0);
        let out: Result<(), _> = fast(5).run("put", || {
            calls.set(calls.get() + 1);
            Err(IdvaultError::Rejected("endorsement".into()))
        });
        assert!(matches!(out, Err(IdvaultError::Rejected(_))));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn deadline_stops_retrying() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff_ms: 50,
            max_backoff_ms: 50,
            deadline_ms: 10,
        };
        let calls = Cell::new(0);
        let out: Result<(), _> = policy.run("get", || {
            calls.set(calls.get() + 1);
            Err(IdvaultError::Unavailable("peer".into()))
        });
        assert!(out.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(50));
        assert_eq!(policy.backoff(2), Duration::from_millis(100));
        assert_eq!(policy.backoff(30), Duration::from_millis(1_000));
        assert_eq!(policy.backoff(200), Duration::from_millis(1_000));
    }
}
