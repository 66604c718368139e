//! HTTP client for a sentiment inference endpoint.
//!
//! Each endpoint exposes `POST {base_url}/analyze` accepting
//! `{symbol, articles[]}` and answering `{direction, confidence, raw_text?}`.
//! Non-2xx statuses are surfaced as [`InferenceError::Status`] so the retry
//! policy can classify them.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use sentra_core::{Article, Direction};
use serde::{Deserialize, Serialize};

use crate::error::InferenceError;

/// Longest response body kept in a [`InferenceError::Status`] message.
const MAX_ERROR_BODY_CHARS: usize = 300;

/// The payload sent to an inference model for one symbol.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRequest {
    pub symbol: String,
    pub articles: Vec<Article>,
}

impl AnalysisRequest {
    #[must_use]
    pub fn new(symbol: &str, articles: Vec<Article>) -> Self {
        Self {
            symbol: symbol.to_string(),
            articles,
        }
    }
}

/// A validated sentiment judgment from one model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSignal {
    pub direction: Direction,
    pub confidence: f64,
    pub raw_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    direction: String,
    confidence: f64,
    #[serde(default)]
    raw_text: Option<String>,
}

impl AnalyzeResponse {
    fn into_signal(self) -> Result<ModelSignal, InferenceError> {
        let direction = self
            .direction
            .trim()
            .to_ascii_lowercase()
            .parse::<Direction>()
            .map_err(|e| InferenceError::InvalidResponse(e.to_string()))?;

        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(InferenceError::InvalidResponse(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }

        Ok(ModelSignal {
            direction,
            confidence: self.confidence,
            raw_text: self.raw_text,
        })
    }
}

/// Anything that can turn an [`AnalysisRequest`] into a [`ModelSignal`].
///
/// The gateway is written against this trait so tests can script backend
/// behavior without a network.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Run one analysis attempt.
    ///
    /// # Errors
    ///
    /// Returns an [`InferenceError`] whose [`kind`](InferenceError::kind)
    /// decides retryability.
    async fn analyze(&self, request: &AnalysisRequest) -> Result<ModelSignal, InferenceError>;
}

/// Client for one HTTP inference endpoint.
///
/// The per-attempt deadline is enforced by the gateway; this client only
/// bounds connection setup.
#[derive(Debug, Clone)]
pub struct HttpInferenceClient {
    client: Client,
    analyze_url: Url,
}

impl HttpInferenceClient {
    /// Creates a client for the endpoint at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed, or [`InferenceError::InvalidBaseUrl`] if
    /// `base_url` is not a valid URL.
    pub fn new(base_url: &str) -> Result<Self, InferenceError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .user_agent("sentra/0.1 (sentiment-reports)")
            .build()?;
        Self::with_client(client, base_url)
    }

    /// Creates a client reusing an existing `reqwest::Client`.
    ///
    /// # Errors
    ///
    /// Returns [`InferenceError::InvalidBaseUrl`] if `base_url` is not a valid URL.
    pub fn with_client(client: Client, base_url: &str) -> Result<Self, InferenceError> {
        let normalised = format!("{}/", base_url.trim_end_matches('/'));
        let analyze_url = Url::parse(&normalised)
            .and_then(|base| base.join("analyze"))
            .map_err(|e| InferenceError::InvalidBaseUrl {
                url: base_url.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            analyze_url,
        })
    }

    #[must_use]
    pub fn analyze_url(&self) -> &Url {
        &self.analyze_url
    }
}

#[async_trait]
impl InferenceBackend for HttpInferenceClient {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<ModelSignal, InferenceError> {
        if request.symbol.trim().is_empty() {
            return Err(InferenceError::InvalidInput("symbol is empty".to_string()));
        }

        let response = self
            .client
            .post(self.analyze_url.clone())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let bytes = response.bytes().await?;
        let parsed: AnalyzeResponse = serde_json::from_slice(&bytes)
            .map_err(|e| InferenceError::InvalidResponse(e.to_string()))?;
        parsed.into_signal()
    }
}
