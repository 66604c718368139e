use std::fmt;

use thiserror::Error;

/// Classification of an inference failure, used by the retry policy and the
/// circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No response within the per-attempt timeout (or HTTP 408/504).
    Timeout,
    /// HTTP 429.
    RateLimited,
    /// Any other HTTP 5xx.
    ServerError,
    /// Connection refused or reset before a response arrived.
    Connection,
    /// The request itself was rejected (HTTP 400/422, empty symbol).
    InvalidInput,
    /// The endpoint answered with something that is not a usable signal.
    InvalidResponse,
}

impl ErrorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Connection => "connection",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::InvalidResponse => "invalid_response",
        }
    }

    /// Transient failures are worth another attempt after a back-off.
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::RateLimited
                | ErrorKind::ServerError
                | ErrorKind::Connection
        )
    }

    /// Whether an exhausted invocation of this kind counts as a breaker
    /// failure. A rejected request says nothing about endpoint health.
    #[must_use]
    pub fn counts_toward_breaker(self) -> bool {
        !matches!(self, ErrorKind::InvalidInput)
    }

    /// Map an HTTP status code from an inference endpoint to a failure class.
    #[must_use]
    pub fn from_status(status: u16) -> ErrorKind {
        match status {
            400 | 422 => ErrorKind::InvalidInput,
            429 => ErrorKind::RateLimited,
            408 | 504 => ErrorKind::Timeout,
            500..=599 => ErrorKind::ServerError,
            _ => ErrorKind::InvalidResponse,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by an inference backend.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// Network or TLS failure from the underlying HTTP client.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-2xx status.
    #[error("endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// No response within the per-attempt timeout.
    #[error("no response within {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// The request was rejected before it was sent.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The response body could not be turned into a signal.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The configured base URL could not be parsed.
    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },
}

impl InferenceError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            InferenceError::Http(e) => {
                if let Some(status) = e.status() {
                    ErrorKind::from_status(status.as_u16())
                } else if e.is_timeout() {
                    ErrorKind::Timeout
                } else if e.is_decode() || e.is_body() {
                    ErrorKind::InvalidResponse
                } else {
                    ErrorKind::Connection
                }
            }
            InferenceError::Status { status, .. } => ErrorKind::from_status(*status),
            InferenceError::Timeout { .. } => ErrorKind::Timeout,
            InferenceError::InvalidInput(_) | InferenceError::InvalidBaseUrl { .. } => {
                ErrorKind::InvalidInput
            }
            InferenceError::InvalidResponse(_) => ErrorKind::InvalidResponse,
        }
    }

    /// Short, log-friendly description prefixed with the failure class.
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{}: {self}", self.kind())
    }
}
