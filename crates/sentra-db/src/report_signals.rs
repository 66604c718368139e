//! Database operations for `report_signals`.

use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

/// A row from the `report_signals` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReportSignalRow {
    pub id: i64,
    pub run_id: Uuid,
    pub symbol: String,
    pub agreement: String,
    pub final_direction: String,
    pub final_confidence: f64,
    pub action: String,
    pub payload: Json<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewReportSignal<'a> {
    pub run_id: Uuid,
    pub symbol: &'a str,
    pub agreement: &'a str,
    pub final_direction: &'a str,
    pub final_confidence: f64,
    pub action: &'a str,
    /// Full serialized consensus result including both invocations.
    pub payload: serde_json::Value,
}

/// Inserts the signal for `(run_id, symbol)` while the run is `running` at
/// stage `storage`. A signal already stored for the symbol is kept as is.
///
/// # Errors
///
/// Returns [`DbError::InvalidJobRunTransition`] if the run is missing, has
/// terminated, or is not at stage `storage`.
/// Returns [`DbError::Sqlx`] if any statement fails.
pub async fn insert_report_signal(
    pool: &PgPool,
    signal: &NewReportSignal<'_>,
) -> Result<(), DbError> {
    let inserted = sqlx::query(
        "INSERT INTO report_signals \
             (run_id, symbol, agreement, final_direction, final_confidence, action, payload) \
         SELECT $1, $2, $3, $4, $5, $6, $7 \
         WHERE EXISTS ( \
             SELECT 1 FROM job_runs \
             WHERE run_id = $1 AND status = 'running' AND current_stage = 'storage' \
         ) \
         ON CONFLICT (run_id, symbol) DO NOTHING",
    )
    .bind(signal.run_id)
    .bind(signal.symbol)
    .bind(signal.agreement)
    .bind(signal.final_direction)
    .bind(signal.final_confidence)
    .bind(signal.action)
    .bind(Json(&signal.payload))
    .execute(pool)
    .await?
    .rows_affected();

    if inserted == 0 && !run_accepts_signals(pool, signal.run_id).await? {
        return Err(DbError::InvalidJobRunTransition {
            run_id: signal.run_id,
            expected: "running at stage storage".to_string(),
        });
    }

    Ok(())
}

async fn run_accepts_signals(pool: &PgPool, run_id: Uuid) -> Result<bool, DbError> {
    let accepts: bool = sqlx::query_scalar(
        "SELECT EXISTS ( \
             SELECT 1 FROM job_runs \
             WHERE run_id = $1 AND status = 'running' AND current_stage = 'storage' \
         )",
    )
    .bind(run_id)
    .fetch_one(pool)
    .await?;
    Ok(accepts)
}

/// Returns the signals written for a run, ordered by symbol.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_report_signals(
    pool: &PgPool,
    run_id: Uuid,
) -> Result<Vec<ReportSignalRow>, DbError> {
    let rows = sqlx::query_as::<_, ReportSignalRow>(
        "SELECT id, run_id, symbol, agreement, final_direction, final_confidence, action, \
                payload, created_at \
         FROM report_signals \
         WHERE run_id = $1 \
         ORDER BY symbol",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
