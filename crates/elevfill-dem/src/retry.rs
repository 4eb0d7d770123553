//! Bounded exponential backoff for transient acquisition failures.

use crate::cancel::CancelToken;
use crate::error::AcquisitionError;
use elevfill_metrics::metric_defs;
use std::time::{Duration, Instant};
use tracing::warn;

/// Granularity at which a backoff sleep notices cancellation.
const CANCEL_POLL: Duration = Duration::from_millis(50);

/// How often and how patiently to retry.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. `1` disables retries.
    pub max_attempts: u32,
    /// Pause before the second attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any single pause.
    pub max_backoff: Duration,
    /// Growth factor applied to the pause after each failure.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Pause after the `attempt`-th failure (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
        let secs = self.initial_backoff.as_secs_f64() * exp;
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// Only errors with [`AcquisitionError::is_transient`] are retried.
    /// Cancellation during a pause ends the loop with
    /// [`AcquisitionError::Cancelled`].
    pub fn run<T, F>(&self, cancel: &CancelToken, mut op: F) -> Result<T, AcquisitionError>
    where
        F: FnMut(u32) -> Result<T, AcquisitionError>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let pause = self.backoff(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        backoff_ms = pause.as_millis() as u64,
                        error = %e,
                        "transient acquisition failure, retrying"
                    );
                    metrics::counter!(metric_defs::ACQUISITION_RETRIES.name).increment(1);
                    sleep_unless_cancelled(pause, cancel)?;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn sleep_unless_cancelled(pause: Duration, cancel: &CancelToken) -> Result<(), AcquisitionError> {
    let deadline = Instant::now() + pause;
    loop {
        if cancel.is_cancelled() {
            return Err(AcquisitionError::Cancelled);
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        std::thread::sleep(CANCEL_POLL.min(deadline - now));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            multiplier: 2.0,
        }
    }

    fn transient() -> AcquisitionError {
        AcquisitionError::Status {
            url: "u".into(),
            status: 503,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_secs(1));
        assert_eq!(policy.backoff(3), Duration::from_secs(2));
        assert_eq!(policy.backoff(10), Duration::from_secs(8));
    }

    #[test]
    fn test_retries_transient_until_success() {
        let calls = Cell::new(0);
        let result = fast().run(&CancelToken::new(), |attempt| {
            calls.set(calls.get() + 1);
            if attempt < 3 {
                Err(transient())
            } else {
                Ok(attempt)
            }
        });
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let result: Result<(), _> = fast().run(&CancelToken::new(), |_| {
            calls.set(calls.get() + 1);
            Err(transient())
        });
        assert!(matches!(result, Err(AcquisitionError::Status { status: 503, .. })));
        assert_eq!(calls.get(), 4);
    }

    #[test]
    fn test_permanent_error_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = fast().run(&CancelToken::new(), |_| {
            calls.set(calls.get() + 1);
            Err(AcquisitionError::Collision { path: "d".into() })
        });
        assert!(matches!(result, Err(AcquisitionError::Collision { .. })));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_cancel_interrupts_backoff() {
        let cancel = CancelToken::new();
        let policy = RetryPolicy {
            initial_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(30),
            ..fast()
        };
        let result: Result<(), _> = policy.run(&cancel, |_| {
            cancel.cancel();
            Err(transient())
        });
        assert!(matches!(result, Err(AcquisitionError::Cancelled)));
    }

    #[test]
    fn test_none_is_single_attempt() {
        let calls = Cell::new(0);
        let _: Result<(), _> = RetryPolicy::none().run(&CancelToken::new(), |_| {
            calls.set(calls.get() + 1);
            Err(transient())
        });
        assert_eq!(calls.get(), 1);
    }
}
