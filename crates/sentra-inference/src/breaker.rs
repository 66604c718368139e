//! Per-model circuit breaker.
//!
//! One breaker per model, shared by every caller in the process. All state
//! lives behind a single mutex so concurrent failures cannot lose updates.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use sentra_core::ModelId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitStatus {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitStatus::Closed => "closed",
            CircuitStatus::Open => "open",
            CircuitStatus::HalfOpen => "half_open",
        }
    }
}

/// Point-in-time copy of a breaker's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitState {
    pub status: CircuitStatus,
    pub consecutive_failures: u32,
    pub opened_at: Option<Instant>,
}

/// Whether a caller may reach the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Breaker closed; call normally.
    Allowed,
    /// Cooldown elapsed; this caller is the single half-open probe.
    Probe,
    /// Breaker open (or a probe is already in flight); skip the call.
    Rejected,
}

#[derive(Debug)]
struct Inner {
    status: CircuitStatus,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

#[derive(Debug)]
pub struct CircuitBreaker {
    model_id: ModelId,
    threshold: u32,
    cooldown: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(model_id: ModelId, threshold: u32, cooldown: Duration) -> Self {
        Self {
            model_id,
            threshold: threshold.max(1),
            cooldown,
            inner: Mutex::new(Inner {
                status: CircuitStatus::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    #[must_use]
    pub fn model_id(&self) -> ModelId {
        self.model_id
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        let inner = self.lock();
        CircuitState {
            status: inner.status,
            consecutive_failures: inner.consecutive_failures,
            opened_at: inner.opened_at,
        }
    }

    #[must_use]
    pub fn admit(&self) -> Admission {
        self.admit_at(Instant::now())
    }

    /// Decide admission as of `now`.
    #[must_use]
    pub fn admit_at(&self, now: Instant) -> Admission {
        let mut inner = self.lock();
        match inner.status {
            CircuitStatus::Closed => Admission::Allowed,
            CircuitStatus::Open => {
                let cooled = inner
                    .opened_at
                    .is_none_or(|opened| now.saturating_duration_since(opened) >= self.cooldown);
                if cooled {
                    inner.status = CircuitStatus::HalfOpen;
                    inner.probe_in_flight = true;
                    tracing::info!(model = %self.model_id, "circuit half-open, probing");
                    Admission::Probe
                } else {
                    Admission::Rejected
                }
            }
            CircuitStatus::HalfOpen => {
                if inner.probe_in_flight {
                    Admission::Rejected
                } else {
                    inner.probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    /// A call succeeded: close the breaker and reset the failure counter.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        if inner.status != CircuitStatus::Closed {
            tracing::info!(model = %self.model_id, "circuit closed after successful probe");
        }
        inner.status = CircuitStatus::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.probe_in_flight = false;
    }

    pub fn record_failure(&self) {
        self.record_failure_at(Instant::now());
    }

    /// An invocation exhausted its attempts as of `now`.
    ///
    /// Opens the breaker when the counter reaches the threshold; a failed
    /// half-open probe reopens it immediately.
    pub fn record_failure_at(&self, now: Instant) {
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        match inner.status {
            CircuitStatus::HalfOpen => {
                inner.status = CircuitStatus::Open;
                inner.opened_at = Some(now);
                inner.probe_in_flight = false;
                tracing::warn!(
                    model = %self.model_id,
                    consecutive_failures = inner.consecutive_failures,
                    "half-open probe failed, circuit reopened"
                );
            }
            CircuitStatus::Closed if inner.consecutive_failures >= self.threshold => {
                inner.status = CircuitStatus::Open;
                inner.opened_at = Some(now);
                tracing::warn!(
                    model = %self.model_id,
                    consecutive_failures = inner.consecutive_failures,
                    threshold = self.threshold,
                    "circuit opened"
                );
            }
            CircuitStatus::Closed | CircuitStatus::Open => {}
        }
    }

    /// An invocation ended without saying anything about endpoint health
    /// (e.g. the request was rejected as invalid). Frees the probe slot so
    /// the next caller can probe; counters are untouched.
    pub fn release_probe(&self) {
        let mut inner = self.lock();
        inner.probe_in_flight = false;
    }
}

/// Holds the half-open trial slot for one admitted call.
///
/// Dropping an armed guard frees the slot, so a call abandoned mid-flight
/// (caller timeout, run deadline) cannot leave the breaker half-open with
/// nobody allowed through.
#[must_use = "dropping the guard immediately frees the trial slot"]
pub struct TrialGuard<'a> {
    breaker: Option<&'a CircuitBreaker>,
}

impl<'a> TrialGuard<'a> {
    /// Arm only for [`Admission::Probe`]; other admissions hold no slot.
    pub fn new(breaker: &'a CircuitBreaker, admission: Admission) -> Self {
        Self {
            breaker: (admission == Admission::Probe).then_some(breaker),
        }
    }

    /// The call reached an outcome that the caller will record itself.
    pub fn disarm(mut self) {
        self.breaker = None;
    }
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if let Some(breaker) = self.breaker.take() {
            tracing::debug!(model = %breaker.model_id, "half-open call abandoned, slot freed");
            breaker.release_probe();
        }
    }
}
