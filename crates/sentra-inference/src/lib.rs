//! Resilient access to the two sentiment inference models.
//!
//! Layers, innermost first: [`client`] talks HTTP, [`retry`] decides
//! back-off, [`breaker`] gates calls per model, and [`gateway`] ties them
//! together into a call that always yields a finalized invocation.

pub mod breaker;
pub mod client;
pub mod error;
pub mod gateway;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use sentra_core::{AppConfig, ModelEndpointConfig, ModelId};

pub use breaker::{Admission, CircuitBreaker, CircuitState, CircuitStatus, TrialGuard};
pub use client::{AnalysisRequest, HttpInferenceClient, InferenceBackend, ModelSignal};
pub use error::{ErrorKind, InferenceError};
pub use gateway::{Gateways, ModelGateway, CIRCUIT_OPEN};
pub use retry::{retry_with_backoff, RetryDecision, RetryOutcome, RetryPolicy, RetryState};

fn http_gateway(
    model_id: ModelId,
    endpoint: &ModelEndpointConfig,
    config: &AppConfig,
) -> Result<ModelGateway, InferenceError> {
    let client = HttpInferenceClient::new(&endpoint.base_url)?;
    let breaker = CircuitBreaker::new(
        model_id,
        config.breaker_threshold,
        Duration::from_secs(config.breaker_cooldown_secs),
    );
    Ok(ModelGateway::new(
        model_id,
        Arc::new(client),
        Arc::new(breaker),
        RetryPolicy::new(
            config.retry_max_attempts,
            config.retry_backoff_base_ms,
            config.retry_backoff_cap_ms,
        ),
        Duration::from_secs(endpoint.timeout_secs),
    ))
}

/// Build both HTTP-backed gateways from application config.
///
/// Each model gets its own breaker; callers should build this once per
/// process and share it so breaker state is process-wide.
///
/// # Errors
///
/// Returns [`InferenceError`] if either endpoint URL is invalid or the HTTP
/// client cannot be constructed.
pub fn gateways_from_config(config: &AppConfig) -> Result<Gateways, InferenceError> {
    Ok(Gateways::new(
        http_gateway(ModelId::A, &config.model_a, config)?,
        http_gateway(ModelId::B, &config.model_b, config)?,
    ))
}
