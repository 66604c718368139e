//! Database operations for `cache_entries`, the durable cache tier.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

/// A row from the `cache_entries` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CacheEntryRow {
    pub cache_key: String,
    pub namespace: String,
    pub value: String,
    pub written_at: DateTime<Utc>,
    pub ttl_seconds: i64,
    pub expires_at: DateTime<Utc>,
}

/// Fetches an entry that is still live at `now`.
///
/// An entry is live while `now < written_at + ttl_seconds`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_live_cache_entry(
    pool: &PgPool,
    cache_key: &str,
    now: DateTime<Utc>,
) -> Result<Option<CacheEntryRow>, DbError> {
    let row = sqlx::query_as::<_, CacheEntryRow>(
        "SELECT cache_key, namespace, value, written_at, ttl_seconds, expires_at \
         FROM cache_entries \
         WHERE cache_key = $1 AND expires_at > $2",
    )
    .bind(cache_key)
    .bind(now)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// `written_at + ttl_seconds`, saturating at the latest representable
/// instant. Negative TTLs expire immediately.
fn expiry_for(written_at: DateTime<Utc>, ttl_seconds: i64) -> DateTime<Utc> {
    let ttl = ttl_seconds.clamp(0, i64::MAX / 1_000);
    written_at
        .checked_add_signed(chrono::Duration::seconds(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Writes an entry, replacing any existing value for the key.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn put_cache_entry(
    pool: &PgPool,
    cache_key: &str,
    namespace: &str,
    value: &str,
    written_at: DateTime<Utc>,
    ttl_seconds: i64,
) -> Result<(), DbError> {
    let expires_at = expiry_for(written_at, ttl_seconds);
    sqlx::query(
        "INSERT INTO cache_entries \
             (cache_key, namespace, value, written_at, ttl_seconds, expires_at) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (cache_key) DO UPDATE SET \
             namespace   = EXCLUDED.namespace, \
             value       = EXCLUDED.value, \
             written_at  = EXCLUDED.written_at, \
             ttl_seconds = EXCLUDED.ttl_seconds, \
             expires_at  = EXCLUDED.expires_at",
    )
    .bind(cache_key)
    .bind(namespace)
    .bind(value)
    .bind(written_at)
    .bind(ttl_seconds.max(0))
    .bind(expires_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Deletes an entry. Returns `true` if a row was removed.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the delete fails.
pub async fn delete_cache_entry(pool: &PgPool, cache_key: &str) -> Result<bool, DbError> {
    let result = sqlx::query("DELETE FROM cache_entries WHERE cache_key = $1")
        .bind(cache_key)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Deletes every entry expired at `now`. Returns the number removed.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the delete fails.
pub async fn purge_expired_cache_entries(pool: &PgPool, now: DateTime<Utc>) -> Result<u64, DbError> {
    let result = sqlx::query("DELETE FROM cache_entries WHERE expires_at <= $1")
        .bind(now)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
