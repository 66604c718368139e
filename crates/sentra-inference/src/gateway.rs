//! Model gateway: breaker-gated, retried, time-limited model calls.
//!
//! [`ModelGateway::invoke`] never fails. Every outcome, including a skip
//! because the breaker is open, comes back as a finalized
//! [`ModelInvocation`] so consensus can treat it uniformly.

use std::sync::Arc;
use std::time::Duration;

use sentra_core::{InvocationOutcome, ModelId, ModelInvocation, PendingInvocation};
use tokio::time::Instant;

use crate::breaker::{Admission, CircuitBreaker, TrialGuard};
use crate::client::{AnalysisRequest, InferenceBackend, ModelSignal};
use crate::error::{ErrorKind, InferenceError};
use crate::retry::{retry_with_backoff, RetryPolicy};

/// Error recorded on invocations skipped by an open breaker.
pub const CIRCUIT_OPEN: &str = "circuit_open";

pub struct ModelGateway {
    model_id: ModelId,
    backend: Arc<dyn InferenceBackend>,
    breaker: Arc<CircuitBreaker>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl std::fmt::Debug for ModelGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelGateway")
            .field("model_id", &self.model_id)
            .field("policy", &self.policy)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ModelGateway {
    #[must_use]
    pub fn new(
        model_id: ModelId,
        backend: Arc<dyn InferenceBackend>,
        breaker: Arc<CircuitBreaker>,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        Self {
            model_id,
            backend,
            breaker,
            policy,
            timeout,
        }
    }

    #[must_use]
    pub fn model_id(&self) -> ModelId {
        self.model_id
    }

    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Upper bound on the wall time of one invocation: every attempt timing
    /// out plus the largest back-off.
    fn invocation_budget(&self) -> Duration {
        self.timeout
            .saturating_mul(self.policy.max_attempts)
            .saturating_add(self.policy.backoff_cap)
    }

    /// Call the model for one symbol and finalize the invocation.
    pub async fn invoke(&self, request: &AnalysisRequest) -> ModelInvocation {
        let articles = u32::try_from(request.articles.len()).unwrap_or(u32::MAX);
        let pending = PendingInvocation::new(self.model_id, &request.symbol, articles);

        let admission = self.breaker.admit();
        if admission == Admission::Rejected {
            tracing::debug!(
                model = %self.model_id,
                symbol = %request.symbol,
                "circuit open, skipping model call"
            );
            return pending.finish(
                InvocationOutcome::Skipped {
                    reason: CIRCUIT_OPEN.to_string(),
                },
                0,
                0,
            );
        }

        let trial = TrialGuard::new(&self.breaker, admission);
        let started = Instant::now();
        let deadline = started + self.invocation_budget();
        let timeout = self.timeout;
        let backend = self.backend.as_ref();

        let outcome = retry_with_backoff(self.policy, deadline, || {
            call_with_timeout(backend, request, timeout)
        })
        .await;

        trial.disarm();
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome.result {
            Ok(signal) => {
                self.breaker.record_success();
                tracing::debug!(
                    model = %self.model_id,
                    symbol = %request.symbol,
                    direction = %signal.direction,
                    confidence = signal.confidence,
                    elapsed_ms,
                    "model call succeeded"
                );
                pending.finish(
                    InvocationOutcome::Success {
                        direction: signal.direction,
                        confidence: signal.confidence,
                    },
                    elapsed_ms,
                    outcome.attempts,
                )
            }
            Err(err) => {
                let kind = err.kind();
                if kind.counts_toward_breaker() {
                    self.breaker.record_failure();
                } else {
                    self.breaker.release_probe();
                }
                tracing::warn!(
                    model = %self.model_id,
                    symbol = %request.symbol,
                    attempts = outcome.attempts,
                    error = %err,
                    "model call failed"
                );
                let message = err.describe();
                let terminal = if kind == ErrorKind::Timeout {
                    InvocationOutcome::TimedOut { message }
                } else {
                    InvocationOutcome::Failed { message }
                };
                pending.finish(terminal, elapsed_ms, outcome.attempts)
            }
        }
    }
}

async fn call_with_timeout(
    backend: &dyn InferenceBackend,
    request: &AnalysisRequest,
    timeout: Duration,
) -> Result<ModelSignal, InferenceError> {
    match tokio::time::timeout(timeout, backend.analyze(request)).await {
        Ok(result) => result,
        Err(_) => Err(InferenceError::Timeout {
            after_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}

/// The two model gateways consulted for every symbol.
#[derive(Debug, Clone)]
pub struct Gateways {
    pub model_a: Arc<ModelGateway>,
    pub model_b: Arc<ModelGateway>,
}

impl Gateways {
    #[must_use]
    pub fn new(model_a: ModelGateway, model_b: ModelGateway) -> Self {
        Self {
            model_a: Arc::new(model_a),
            model_b: Arc::new(model_b),
        }
    }

    #[must_use]
    pub fn get(&self, model_id: ModelId) -> &ModelGateway {
        match model_id {
            ModelId::A => &self.model_a,
            ModelId::B => &self.model_b,
        }
    }

    pub async fn invoke(&self, model_id: ModelId, request: &AnalysisRequest) -> ModelInvocation {
        self.get(model_id).invoke(request).await
    }

    /// Call both models concurrently and wait for both, whatever they return.
    pub async fn invoke_both(&self, request: &AnalysisRequest) -> (ModelInvocation, ModelInvocation) {
        tokio::join!(self.model_a.invoke(request), self.model_b.invoke(request))
    }
}
