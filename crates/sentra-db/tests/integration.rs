//! Offline unit tests for sentra-db pool configuration and row types.
//! These tests do not require a live database connection.

use sentra_core::load_app_config_from_env;
use sentra_db::{CacheEntryRow, DbError, JobRunRow, PoolConfig};
use sqlx::types::Json;

#[test]
fn pool_config_from_app_config_uses_core_values() {
    // Only DATABASE_URL is required; the remaining fields take defaults.
    std::env::set_var("DATABASE_URL", "postgres://example");
    std::env::set_var("SENTRA_DB_MAX_CONNECTIONS", "42");
    std::env::set_var("SENTRA_DB_MIN_CONNECTIONS", "7");
    std::env::set_var("SENTRA_DB_ACQUIRE_TIMEOUT_SECS", "9");
    let app_config = load_app_config_from_env().expect("config should load");

    let pool_config = PoolConfig::from_app_config(&app_config);
    assert_eq!(pool_config.max_connections, 42);
    assert_eq!(pool_config.min_connections, 7);
    assert_eq!(pool_config.acquire_timeout_secs, 9);
}

/// Compile-time smoke test: confirm that [`JobRunRow`] has all expected
/// fields with the correct types. No database required.
#[test]
fn job_run_row_has_expected_fields() {
    use chrono::{NaiveDate, Utc};
    use uuid::Uuid;

    let now = Utc::now();
    let row = JobRunRow {
        run_id: Uuid::new_v4(),
        scheduled_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
        report_type: "premarket".to_string(),
        status: "running".to_string(),
        current_stage: "init".to_string(),
        trigger_source: "scheduler".to_string(),
        started_at: now,
        stage_started_at: now,
        executed_at: None,
        symbol_count: 5,
        errors: Json(Vec::new()),
        warnings: Json(vec!["news unavailable for SPY".to_string()]),
    };

    assert_eq!(row.status, "running");
    assert_eq!(row.current_stage, "init");
    assert!(row.executed_at.is_none());
    assert!(row.errors.0.is_empty());
    assert_eq!(row.warnings.0.len(), 1);
}

#[test]
fn cache_entry_row_has_expected_fields() {
    use chrono::{Duration, Utc};

    let written_at = Utc::now();
    let row = CacheEntryRow {
        cache_key: "news:AAPL:20260302T1415".to_string(),
        namespace: "news".to_string(),
        value: "[]".to_string(),
        written_at,
        ttl_seconds: 900,
        expires_at: written_at + Duration::seconds(900),
    };

    assert_eq!(row.namespace, "news");
    assert_eq!(row.expires_at - row.written_at, Duration::seconds(900));
}

#[test]
fn invalid_transition_error_names_the_run() {
    let run_id = uuid::Uuid::nil();
    let err = DbError::InvalidJobRunTransition {
        run_id,
        expected: "running".to_string(),
    };
    assert_eq!(
        err.to_string(),
        "job run 00000000-0000-0000-0000-000000000000 is not in the expected state (running)"
    );
}
