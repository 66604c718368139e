//! Database operations for `job_runs`.
//!
//! Every state change runs in one transaction that also maintains
//! `job_stage_log` and `job_date_summaries`. Updates are guarded by
//! `status = 'running'` so a terminal run is never rewritten.

use chrono::{DateTime, NaiveDate, Utc};
use sentra_core::{ReportType, RunStatus, Stage, TriggerSource};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::job_date_summaries::refresh_job_date_summary;
use crate::stage_log::{close_open_stage, open_stage};
use crate::DbError;

const RUN_COLUMNS: &str = "run_id, scheduled_date, report_type, status, current_stage, \
     trigger_source, started_at, stage_started_at, executed_at, symbol_count, errors, warnings";

/// A row from the `job_runs` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRunRow {
    pub run_id: Uuid,
    pub scheduled_date: NaiveDate,
    pub report_type: String,
    pub status: String,
    pub current_stage: String,
    pub trigger_source: String,
    pub started_at: DateTime<Utc>,
    pub stage_started_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub symbol_count: i32,
    pub errors: Json<Vec<String>>,
    pub warnings: Json<Vec<String>>,
}

#[derive(Debug, Clone, Copy)]
pub struct NewJobRun {
    pub scheduled_date: NaiveDate,
    pub report_type: ReportType,
    pub trigger_source: TriggerSource,
    pub symbol_count: i32,
}

/// Creates a run in `running` status at stage `init`.
///
/// Also opens the `init` stage-log entry and points the date summary at the
/// new run.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if any statement fails; nothing is written then.
pub async fn create_job_run(pool: &PgPool, new_run: NewJobRun) -> Result<JobRunRow, DbError> {
    let run_id = Uuid::new_v4();
    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, JobRunRow>(&format!(
        "INSERT INTO job_runs \
             (run_id, scheduled_date, report_type, trigger_source, symbol_count) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING {RUN_COLUMNS}"
    ))
    .bind(run_id)
    .bind(new_run.scheduled_date)
    .bind(new_run.report_type.as_str())
    .bind(new_run.trigger_source.as_str())
    .bind(new_run.symbol_count)
    .fetch_one(&mut *tx)
    .await?;

    open_stage(&mut *tx, run_id, Stage::Init).await?;
    refresh_job_date_summary(&mut *tx, run_id).await?;
    tx.commit().await?;

    Ok(row)
}

/// Moves a running run from `from` to the stage immediately after it,
/// appending `warnings`.
///
/// # Errors
///
/// Returns [`DbError::InvalidJobRunTransition`] if `to` does not directly
/// follow `from`, or if the run is not `running` at stage `from`.
/// Returns [`DbError::Sqlx`] if any statement fails.
pub async fn advance_job_run_stage(
    pool: &PgPool,
    run_id: Uuid,
    from: Stage,
    to: Stage,
    warnings: &[String],
) -> Result<JobRunRow, DbError> {
    if from.next() != Some(to) {
        return Err(DbError::InvalidJobRunTransition {
            run_id,
            expected: format!("stage after {from} is not {to}"),
        });
    }

    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, JobRunRow>(&format!(
        "UPDATE job_runs \
         SET current_stage = $1, stage_started_at = NOW(), warnings = warnings || $2 \
         WHERE run_id = $3 AND status = 'running' AND current_stage = $4 \
         RETURNING {RUN_COLUMNS}"
    ))
    .bind(to.as_str())
    .bind(Json(warnings))
    .bind(run_id)
    .bind(from.as_str())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| DbError::InvalidJobRunTransition {
        run_id,
        expected: format!("running at stage {from}"),
    })?;

    close_open_stage(&mut *tx, run_id).await?;
    open_stage(&mut *tx, run_id, to).await?;
    refresh_job_date_summary(&mut *tx, run_id).await?;
    tx.commit().await?;

    Ok(row)
}

/// Terminates a running run with `status`, appending `errors` and `warnings`
/// and setting `executed_at = NOW()`.
///
/// # Errors
///
/// Returns [`DbError::InvalidJobRunTransition`] if `status` is `running` or
/// the run is already terminal. Returns [`DbError::Sqlx`] if any statement
/// fails.
pub async fn finish_job_run(
    pool: &PgPool,
    run_id: Uuid,
    status: RunStatus,
    errors: &[String],
    warnings: &[String],
) -> Result<JobRunRow, DbError> {
    if !status.is_terminal() {
        return Err(DbError::InvalidJobRunTransition {
            run_id,
            expected: "a terminal status".to_string(),
        });
    }

    let mut tx = pool.begin().await?;

    let row = sqlx::query_as::<_, JobRunRow>(&format!(
        "UPDATE job_runs \
         SET status = $1, executed_at = NOW(), \
             errors = errors || $2, warnings = warnings || $3 \
         WHERE run_id = $4 AND status = 'running' \
         RETURNING {RUN_COLUMNS}"
    ))
    .bind(status.as_str())
    .bind(Json(errors))
    .bind(Json(warnings))
    .bind(run_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| DbError::InvalidJobRunTransition {
        run_id,
        expected: "running".to_string(),
    })?;

    close_open_stage(&mut *tx, run_id).await?;
    refresh_job_date_summary(&mut *tx, run_id).await?;
    tx.commit().await?;

    Ok(row)
}

/// Fetches a single run by `run_id`.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists, or [`DbError::Sqlx`] if
/// the query fails.
pub async fn get_job_run(pool: &PgPool, run_id: Uuid) -> Result<JobRunRow, DbError> {
    let row = sqlx::query_as::<_, JobRunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM job_runs WHERE run_id = $1"
    ))
    .bind(run_id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Returns every run for one `(scheduled_date, report_type)`, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_job_runs(
    pool: &PgPool,
    scheduled_date: NaiveDate,
    report_type: ReportType,
) -> Result<Vec<JobRunRow>, DbError> {
    let rows = sqlx::query_as::<_, JobRunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM job_runs \
         WHERE scheduled_date = $1 AND report_type = $2 \
         ORDER BY started_at DESC, run_id"
    ))
    .bind(scheduled_date)
    .bind(report_type.as_str())
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns the most recent `limit` runs across all dates.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_recent_job_runs(pool: &PgPool, limit: i64) -> Result<Vec<JobRunRow>, DbError> {
    let rows = sqlx::query_as::<_, JobRunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM job_runs \
         ORDER BY started_at DESC, run_id \
         LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns running runs whose current stage began before `stage_cutoff` or
/// that started before `run_cutoff`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_stale_job_runs(
    pool: &PgPool,
    stage_cutoff: DateTime<Utc>,
    run_cutoff: DateTime<Utc>,
) -> Result<Vec<JobRunRow>, DbError> {
    let rows = sqlx::query_as::<_, JobRunRow>(&format!(
        "SELECT {RUN_COLUMNS} FROM job_runs \
         WHERE status = 'running' AND (stage_started_at < $1 OR started_at < $2) \
         ORDER BY started_at"
    ))
    .bind(stage_cutoff)
    .bind(run_cutoff)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
