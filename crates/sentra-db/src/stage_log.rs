//! Database operations for `job_stage_log`.

use chrono::{DateTime, Utc};
use sentra_core::Stage;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::DbError;

/// A row from the `job_stage_log` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StageLogRow {
    pub id: i64,
    pub run_id: Uuid,
    pub stage: String,
    pub started_at: DateTime<Utc>,
    /// `None` while the run is still in this stage.
    pub ended_at: Option<DateTime<Utc>>,
}

/// Close the currently open stage of a run, if any.
pub(crate) async fn close_open_stage(conn: &mut PgConnection, run_id: Uuid) -> Result<(), DbError> {
    sqlx::query(
        "UPDATE job_stage_log SET ended_at = NOW() \
         WHERE run_id = $1 AND ended_at IS NULL",
    )
    .bind(run_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Append the entry for a newly entered stage.
///
/// The `(run_id, stage)` unique constraint rejects a stage being entered twice.
pub(crate) async fn open_stage(
    conn: &mut PgConnection,
    run_id: Uuid,
    stage: Stage,
) -> Result<(), DbError> {
    sqlx::query("INSERT INTO job_stage_log (run_id, stage) VALUES ($1, $2)")
        .bind(run_id)
        .bind(stage.as_str())
        .execute(conn)
        .await?;
    Ok(())
}

/// Returns the stage log of a run in the order stages were entered.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_stage_log(pool: &PgPool, run_id: Uuid) -> Result<Vec<StageLogRow>, DbError> {
    let rows = sqlx::query_as::<_, StageLogRow>(
        "SELECT id, run_id, stage, started_at, ended_at \
         FROM job_stage_log \
         WHERE run_id = $1 \
         ORDER BY started_at, id",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
