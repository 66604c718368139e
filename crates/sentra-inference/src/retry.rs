//! Bounded exponential back-off with jitter.
//!
//! [`RetryState`] is a pure state machine: given the failure class, a jitter
//! sample and the time left before the invocation deadline it decides whether
//! to try again and how long to wait. [`retry_with_backoff`] is the thin async
//! driver that sleeps and calls.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{ErrorKind, InferenceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries including the first one.
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, backoff_base_ms: u64, backoff_cap_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_base: Duration::from_millis(backoff_base_ms),
            backoff_cap: Duration::from_millis(backoff_cap_ms),
        }
    }

    /// Delay before the try that follows failed attempt `attempt` (1-based):
    /// `base * 2^(attempt-1) + jitter`, capped. `jitter_sample` is in `[0, 1)`
    /// and scales to `[0, base)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32, jitter_sample: f64) -> Duration {
        let base_ms = u64::try_from(self.backoff_base.as_millis()).unwrap_or(u64::MAX);
        let cap_ms = u64::try_from(self.backoff_cap.as_millis()).unwrap_or(u64::MAX);
        let exponent = attempt.saturating_sub(1).min(20);
        let computed = base_ms.saturating_mul(1u64 << exponent);

        #[allow(
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss,
            clippy::cast_precision_loss
        )]
        let jitter_ms = (base_ms as f64 * jitter_sample.clamp(0.0, 1.0)) as u64;
        let jitter_ms = jitter_ms.min(base_ms.saturating_sub(1));

        Duration::from_millis(computed.saturating_add(jitter_ms).min(cap_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, 500, 8_000)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Attempt bookkeeping for one invocation.
#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    attempts: u32,
}

impl RetryState {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Tries made so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record that an attempt is about to be made.
    pub fn begin_attempt(&mut self) {
        self.attempts += 1;
    }

    /// Decide what follows a failed attempt.
    ///
    /// Gives up on non-transient failures, once `max_attempts` is reached, or
    /// when the back-off would not finish before the deadline.
    #[must_use]
    pub fn on_failure(
        &self,
        kind: ErrorKind,
        jitter_sample: f64,
        remaining: Duration,
    ) -> RetryDecision {
        if !kind.is_transient() || self.attempts >= self.policy.max_attempts {
            return RetryDecision::GiveUp;
        }
        let delay = self.policy.delay_for(self.attempts, jitter_sample);
        if delay >= remaining {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(delay)
    }
}

/// Result of a retried operation plus the number of tries made.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, InferenceError>,
    pub attempts: u32,
}

/// Runs `operation` until it succeeds, fails permanently, runs out of
/// attempts or would overrun `deadline`.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: RetryPolicy,
    deadline: Instant,
    mut operation: F,
) -> RetryOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, InferenceError>>,
{
    let mut state = RetryState::new(policy);
    loop {
        state.begin_attempt();
        let err = match operation().await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts: state.attempts(),
                }
            }
            Err(err) => err,
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        match state.on_failure(err.kind(), rand::random::<f64>(), remaining) {
            RetryDecision::RetryAfter(delay) => {
                tracing::warn!(
                    attempt = state.attempts(),
                    max_attempts = policy.max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "transient inference error, retrying after back-off"
                );
                tokio::time::sleep(delay).await;
            }
            RetryDecision::GiveUp => {
                return RetryOutcome {
                    result: Err(err),
                    attempts: state.attempts(),
                }
            }
        }
    }
}
