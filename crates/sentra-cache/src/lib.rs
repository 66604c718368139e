//! Two-tier cache fronting news fetches and model analysis.
//!
//! Reads check the in-process [`FastTier`] first, then the [`DurableStore`],
//! repopulating the fast tier on a durable hit. Writes go to both tiers.
//! Durable-tier errors degrade to a miss or a skipped write; the cache never
//! fails its caller.

mod durable;
mod fast;
mod key;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use durable::{DurableStore, MemoryStore, PgDurableStore};
pub use fast::FastTier;
pub use key::{CacheKey, Namespace};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("durable store error: {0}")]
    Db(#[from] sentra_db::DbError),

    #[error("cache value serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A cached value with its write time and TTL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub value: String,
    pub written_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl StoredEntry {
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        let ttl = i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX);
        self.written_at
            .checked_add_signed(Duration::seconds(ttl.min(i64::MAX / 1_000)))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Live while `now < written_at + ttl_seconds`.
    #[must_use]
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Fast,
    Durable,
}

/// A cache hit and the tier that served it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub value: String,
    pub written_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub tier: CacheTier,
}

pub struct TwoTierCache {
    fast: FastTier,
    durable: Arc<dyn DurableStore>,
}

impl std::fmt::Debug for TwoTierCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwoTierCache")
            .field("fast_entries", &self.fast.len())
            .finish_non_exhaustive()
    }
}

impl TwoTierCache {
    #[must_use]
    pub fn new(fast_capacity: usize, durable: Arc<dyn DurableStore>) -> Self {
        Self {
            fast: FastTier::new(fast_capacity),
            durable,
        }
    }

    #[must_use]
    pub fn fast_tier(&self) -> &FastTier {
        &self.fast
    }

    pub async fn get(&self, key: &CacheKey) -> Option<String> {
        self.lookup_at(key, Utc::now()).await.map(|entry| entry.value)
    }

    /// Look `key` up as of `now`, reporting which tier answered.
    pub async fn lookup_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<CacheEntry> {
        let key_str = key.to_string();

        if let Some(hit) = self.fast.get_at(&key_str, now) {
            tracing::debug!(key = %key_str, "fast-tier cache hit");
            return Some(CacheEntry {
                value: hit.value,
                written_at: hit.written_at,
                ttl_seconds: hit.ttl_seconds,
                tier: CacheTier::Fast,
            });
        }

        let stored = match self.durable.get(&key_str, now).await {
            Ok(Some(stored)) if stored.is_live_at(now) => stored,
            Ok(_) => return None,
            Err(e) => {
                tracing::warn!(key = %key_str, error = %e, "durable cache read failed, treating as miss");
                return None;
            }
        };

        tracing::debug!(key = %key_str, "durable-tier cache hit, repopulating fast tier");
        self.fast.insert(&key_str, stored.clone());
        Some(CacheEntry {
            value: stored.value,
            written_at: stored.written_at,
            ttl_seconds: stored.ttl_seconds,
            tier: CacheTier::Durable,
        })
    }

    pub async fn set(&self, key: &CacheKey, value: String, ttl_seconds: u64) {
        self.set_at(key, value, ttl_seconds, Utc::now()).await;
    }

    /// Write `value` to both tiers as of `now`. Last write wins.
    pub async fn set_at(
        &self,
        key: &CacheKey,
        value: String,
        ttl_seconds: u64,
        now: DateTime<Utc>,
    ) {
        let key_str = key.to_string();
        let entry = StoredEntry {
            value,
            written_at: now,
            ttl_seconds,
        };
        self.fast.insert(&key_str, entry.clone());
        if let Err(e) = self.durable.put(&key_str, key.namespace(), &entry).await {
            tracing::warn!(key = %key_str, error = %e, "durable cache write failed, skipped");
        }
    }

    pub async fn invalidate(&self, key: &CacheKey) {
        let key_str = key.to_string();
        self.fast.remove(&key_str);
        if let Err(e) = self.durable.delete(&key_str).await {
            tracing::warn!(key = %key_str, error = %e, "durable cache delete failed");
        }
    }

    /// Typed read. A value that no longer deserializes is treated as a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "cached value failed to deserialize");
                None
            }
        }
    }

    /// Typed write.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serde`] if `value` cannot be serialized; nothing
    /// is written then.
    pub async fn set_json<T: Serialize + Sync>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl_seconds: u64,
    ) -> Result<(), CacheError> {
        let raw = serde_json::to_string(value)?;
        self.set(key, raw, ttl_seconds).await;
        Ok(())
    }
}
