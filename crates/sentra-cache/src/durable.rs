//! Durable tier contract and its bindings.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{CacheError, Namespace, StoredEntry};

/// A key-value store with per-entry TTL and read-after-write consistency
/// per key.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// The entry for `key` if it is still live at `now`.
    async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<StoredEntry>, CacheError>;

    async fn put(
        &self,
        key: &str,
        namespace: Namespace,
        entry: &StoredEntry,
    ) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Postgres-backed durable tier over the `cache_entries` table.
#[derive(Debug, Clone)]
pub struct PgDurableStore {
    pool: PgPool,
}

impl PgDurableStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DurableStore for PgDurableStore {
    async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<StoredEntry>, CacheError> {
        let row = sentra_db::get_live_cache_entry(&self.pool, key, now).await?;
        Ok(row.map(|row| StoredEntry {
            value: row.value,
            written_at: row.written_at,
            ttl_seconds: u64::try_from(row.ttl_seconds).unwrap_or(0),
        }))
    }

    async fn put(
        &self,
        key: &str,
        namespace: Namespace,
        entry: &StoredEntry,
    ) -> Result<(), CacheError> {
        sentra_db::put_cache_entry(
            &self.pool,
            key,
            namespace.as_str(),
            &entry.value,
            entry.written_at,
            i64::try_from(entry.ttl_seconds).unwrap_or(i64::MAX),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        sentra_db::delete_cache_entry(&self.pool, key).await?;
        Ok(())
    }
}

/// Process-local durable tier, for tests and single-process tooling.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoredEntry>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn get(&self, key: &str, now: DateTime<Utc>) -> Result<Option<StoredEntry>, CacheError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live_at(now))
            .cloned())
    }

    async fn put(
        &self,
        key: &str,
        _namespace: Namespace,
        entry: &StoredEntry,
    ) -> Result<(), CacheError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), entry.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}
