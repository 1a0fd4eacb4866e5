//! Bounded retry with backoff for store round trips.

use std::thread;
use std::time::Duration;

/// Default exponential multiplier when not specified.
pub const DEFAULT_EXPONENTIAL_MULTIPLIER: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum BackoffConfig {
    /// Retry immediately.
    #[default]
    None,
    /// delay = base_delay_ms * attempt
    Linear { base_delay_ms: u64 },
    /// delay = base_delay_ms * multiplier^(attempt - 1)
    Exponential { base_delay_ms: u64, multiplier: f64 },
}

impl BackoffConfig {
    pub fn exponential(base_delay_ms: u64) -> Self {
        Self::Exponential {
            base_delay_ms,
            multiplier: DEFAULT_EXPONENTIAL_MULTIPLIER,
        }
    }

    /// Delay before retry number `attempt` (1-based). Attempt 0 never waits.
    pub fn calculate_delay_ms(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return 0;
        }
        match self {
            BackoffConfig::None => 0,
            BackoffConfig::Linear { base_delay_ms } => {
                base_delay_ms.saturating_mul(u64::from(attempt))
            }
            BackoffConfig::Exponential {
                base_delay_ms,
                multiplier,
            } => {
                let multiplier = if *multiplier > 0.0 {
                    *multiplier
                } else {
                    DEFAULT_EXPONENTIAL_MULTIPLIER
                };
                let factor = multiplier.powi(attempt.saturating_sub(1) as i32);
                (*base_delay_ms as f64 * factor) as u64
            }
        }
    }
}

/// How many times a failing call is attempted and how long to wait between.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one; at least 1.
    pub max_attempts: u32,
    pub backoff: BackoffConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffConfig::exponential(100),
        }
    }
}

/// Outcome of a retried call that never succeeded.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: BackoffConfig::None,
        }
    }

    /// Runs `op` until it succeeds, returns a non-retryable error, or the
    /// attempt budget is spent. `sleep` is called between attempts.
    pub fn run<T, E>(
        &self,
        mut op: impl FnMut(u32) -> Result<T, E>,
        is_retryable: impl Fn(&E) -> bool,
        sleep: &dyn Fn(Duration),
    ) -> Result<T, RetryExhausted<E>> {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if attempt < max_attempts && is_retryable(&err) => {
                    let delay = self.backoff.calculate_delay_ms(attempt);
                    if delay > 0 {
                        sleep(Duration::from_millis(delay));
                    }
                    attempt += 1;
                }
                Err(err) => {
                    return Err(RetryExhausted {
                        attempts: attempt,
                        last_error: err,
                    })
                }
            }
        }
    }
}

/// Sleeps the current thread; the default for production callers.
pub fn thread_sleep(duration: Duration) {
    thread::sleep(duration);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn exponential_delay_doubles() {
        let backoff = BackoffConfig::exponential(100);
        assert_eq!(backoff.calculate_delay_ms(0), 0);
        assert_eq!(backoff.calculate_delay_ms(1), 100);
        assert_eq!(backoff.calculate_delay_ms(2), 200);
        assert_eq!(backoff.calculate_delay_ms(4), 800);
    }

    #[test]
    fn linear_delay_scales_with_attempt() {
        let backoff = BackoffConfig::Linear { base_delay_ms: 50 };
        assert_eq!(backoff.calculate_delay_ms(3), 150);
    }

    #[test]
    fn run_retries_until_success() {
        let sleeps = RefCell::new(Vec::new());
        let policy = RetryPolicy {
            max_attempts: 4,
            backoff: BackoffConfig::Linear { base_delay_ms: 10 },
        };

        let result = policy.run(
            |attempt| if attempt < 3 { Err("busy") } else { Ok(attempt) },
            |_| true,
            &|duration| sleeps.borrow_mut().push(duration.as_millis()),
        );

        assert_eq!(result.unwrap(), 3);
        assert_eq!(*sleeps.borrow(), vec![10, 20]);
    }

    #[test]
    fn run_stops_on_non_retryable_error() {
        let policy = RetryPolicy {
            max_attempts: 5,
            backoff: BackoffConfig::None,
        };

        let err = policy
            .run(|_| Err::<(), _>("fatal"), |_| false, &|_| {})
            .unwrap_err();

        assert_eq!(err.attempts, 1);
        assert_eq!(err.last_error, "fatal");
    }

    #[test]
    fn run_reports_exhaustion() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: BackoffConfig::None,
        };

        let err = policy
            .run(|_| Err::<(), _>("busy"), |_| true, &|_| {})
            .unwrap_err();

        assert_eq!(err.attempts, 3);
    }
}
