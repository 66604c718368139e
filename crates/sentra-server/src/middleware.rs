use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderValue},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use subtle::{Choice, ConstantTimeEq};
use uuid::Uuid;

/// Newtype wrapping a request ID string, stored as a request extension.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Who is asking. Decides how much error detail a response may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller {
    Authenticated,
    Anonymous,
}

/// Bearer keys that unlock detailed views.
///
/// Only SHA-256 digests of the keys are held, and presented tokens are
/// compared against every digest in constant time.
#[derive(Debug, Clone, Default)]
pub struct AuthState {
    key_digests: Arc<Vec<[u8; 32]>>,
}

fn digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

impl AuthState {
    #[must_use]
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let key_digests = keys
            .into_iter()
            .map(|k| k.as_ref().trim().to_string())
            .filter(|k| !k.is_empty())
            .map(|k| digest(&k))
            .collect();
        Self {
            key_digests: Arc::new(key_digests),
        }
    }

    /// Builds auth config from `SENTRA_API_KEYS` (comma-separated bearer
    /// tokens). With no keys every caller is anonymous.
    #[must_use]
    pub fn from_env() -> Self {
        let raw = std::env::var("SENTRA_API_KEYS").unwrap_or_default();
        let state = Self::from_keys(raw.split(','));
        if state.key_digests.is_empty() {
            tracing::warn!("SENTRA_API_KEYS not set; all API callers get redacted views");
        }
        state
    }

    fn allows(&self, token: &str) -> bool {
        let presented = digest(token);
        let matched = self
            .key_digests
            .iter()
            .fold(Choice::from(0), |acc, key| acc | key[..].ct_eq(&presented[..]));
        matched.into()
    }
}

/// Axum middleware that extracts or generates a request ID.
///
/// If the incoming request has an `x-request-id` header, that value is used.
/// Otherwise a new `UUIDv4` is generated. The ID is:
/// - Inserted into request extensions as [`RequestId`]
/// - Set on the response as the `x-request-id` header
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map_or_else(|| Uuid::new_v4().to_string(), String::from);

    req.extensions_mut().insert(RequestId(id.clone()));

    let mut res = next.run(req).await;

    if let Ok(val) = HeaderValue::from_str(&id) {
        res.headers_mut().insert("x-request-id", val);
    }

    res
}

/// Middleware tagging each request with its [`Caller`].
///
/// Missing or unknown tokens are not rejected; they just get the anonymous
/// view.
pub async fn classify_caller(
    State(auth): State<AuthState>,
    mut req: Request,
    next: Next,
) -> Response {
    let caller = match extract_bearer_token(req.headers().get(AUTHORIZATION)) {
        Some(token) if auth.allows(token) => Caller::Authenticated,
        _ => Caller::Anonymous,
    };
    req.extensions_mut().insert(caller);
    next.run(req).await
}

fn extract_bearer_token(value: Option<&HeaderValue>) -> Option<&str> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|s| !s.trim().is_empty())
}
