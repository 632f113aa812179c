// SPDX-License-Identifier: MIT
//! Backoff retry for external calls.
//!
//! Two schedules are needed by the lifecycle code:
//! - exponential: binary downloads retry at 1000 ms * 2^attempt
//! - linear: subprocess start retries at attempt * 1000 ms
//!
//! # Example
//! ```rust,ignore
//! use costrict::retry::{retry_with_backoff, RetryPolicy};
//!
//! let result = retry_with_backoff(&RetryPolicy::exponential(3, Duration::from_secs(1)), || async {
//!     call_external_service().await
//! })
//! .await;
//! ```

use std::time::Duration;

use tracing::{debug, warn};

/// Delay progression between attempts.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// `initial · multiplier^(attempt-1)`, capped at `max`.
    Exponential {
        initial: Duration,
        multiplier: f64,
        max: Duration,
    },
    /// `step · attempt`.
    Linear { step: Duration },
}

/// Configuration for [`retry_with_backoff`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first try).
    pub max_attempts: u32,
    pub schedule: Schedule,
}

impl RetryPolicy {
    /// Exponential schedule with a 2.0 multiplier and a 30 s cap.
    pub fn exponential(max_attempts: u32, initial: Duration) -> Self {
        Self {
            max_attempts,
            schedule: Schedule::Exponential {
                initial,
                multiplier: 2.0,
                max: Duration::from_secs(30),
            },
        }
    }

    /// Linear schedule: the n-th failed attempt waits `n · step`.
    pub fn linear(max_attempts: u32, step: Duration) -> Self {
        Self {
            max_attempts,
            schedule: Schedule::Linear { step },
        }
    }

    /// A policy suitable for quick unit tests (no real waiting).
    pub fn instant(max_attempts: u32) -> Self {
        Self::linear(max_attempts, Duration::from_millis(1))
    }

    /// Delay to wait after the `attempt`-th failure (1-based).
    fn delay_after(&self, attempt: u32) -> Duration {
        match &self.schedule {
            Schedule::Exponential {
                initial,
                multiplier,
                max,
            } => {
                let ms = initial.as_millis() as f64 * multiplier.powi(attempt as i32 - 1);
                Duration::from_millis((ms as u128).min(max.as_millis()) as u64)
            }
            Schedule::Linear { step } => *step * attempt,
        }
    }
}

/// Retry an async operation per the given policy.
///
/// Calls `f()` up to `policy.max_attempts` times, sleeping the scheduled delay
/// between failures. Returns `Ok(value)` on the first success, or the last
/// error once all attempts are exhausted.
///
/// # Panics
/// Panics if `policy.max_attempts` is 0 (would never attempt the operation).
pub async fn retry_with_backoff<F, Fut, T, E>(policy: &RetryPolicy, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Debug,
{
    assert!(
        policy.max_attempts > 0,
        "RetryPolicy.max_attempts must be at least 1"
    );

    let mut last_err: Option<E> = None;

    for attempt in 1..=policy.max_attempts {
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "retry succeeded");
                }
                return Ok(value);
            }
            Err(e) => {
                if attempt < policy.max_attempts {
                    let delay = policy.delay_after(attempt);
                    warn!(
                        attempt,
                        max = policy.max_attempts,
                        delay_ms = delay.as_millis(),
                        err = ?e,
                        "attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                } else {
                    warn!(
                        attempt,
                        max = policy.max_attempts,
                        err = ?e,
                        "all retry attempts exhausted"
                    );
                    last_err = Some(e);
                }
            }
        }
    }

    // The loop always assigns last_err when every attempt fails.
    Err(last_err.expect("retry loop ended without setting last_err"))
}
