//! Database operations for `job_date_summaries`, the "latest run" projection.

use chrono::{DateTime, NaiveDate, Utc};
use sentra_core::ReportType;
use sqlx::types::Json;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::DbError;

/// A row from the `job_date_summaries` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobDateSummaryRow {
    pub scheduled_date: NaiveDate,
    pub report_type: String,
    pub latest_run_id: Uuid,
    pub latest_started_at: DateTime<Utc>,
    pub status: String,
    pub current_stage: String,
    pub trigger_source: String,
    pub executed_at: Option<DateTime<Utc>>,
    pub errors: Json<Vec<String>>,
    pub warnings: Json<Vec<String>>,
    pub run_count: i32,
    pub updated_at: DateTime<Utc>,
}

/// Re-project the summary for the run's `(scheduled_date, report_type)` from
/// the run row.
///
/// The summary only moves to a run that started no earlier than the one it
/// currently mirrors, so a late write from an older run cannot hide a newer
/// in-flight run.
pub(crate) async fn refresh_job_date_summary(
    conn: &mut PgConnection,
    run_id: Uuid,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO job_date_summaries \
             (scheduled_date, report_type, latest_run_id, latest_started_at, status, \
              current_stage, trigger_source, executed_at, errors, warnings, run_count, updated_at) \
         SELECT r.scheduled_date, r.report_type, r.run_id, r.started_at, r.status, \
                r.current_stage, r.trigger_source, r.executed_at, r.errors, r.warnings, \
                (SELECT COUNT(*)::INTEGER FROM job_runs c \
                  WHERE c.scheduled_date = r.scheduled_date AND c.report_type = r.report_type), \
                NOW() \
         FROM job_runs r \
         WHERE r.run_id = $1 \
         ON CONFLICT (scheduled_date, report_type) DO UPDATE SET \
             latest_run_id     = EXCLUDED.latest_run_id, \
             latest_started_at = EXCLUDED.latest_started_at, \
             status            = EXCLUDED.status, \
             current_stage     = EXCLUDED.current_stage, \
             trigger_source    = EXCLUDED.trigger_source, \
             executed_at       = EXCLUDED.executed_at, \
             errors            = EXCLUDED.errors, \
             warnings          = EXCLUDED.warnings, \
             run_count         = EXCLUDED.run_count, \
             updated_at        = NOW() \
         WHERE job_date_summaries.latest_run_id = EXCLUDED.latest_run_id \
            OR job_date_summaries.latest_started_at <= EXCLUDED.latest_started_at",
    )
    .bind(run_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Fetches the summary for one `(scheduled_date, report_type)`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_job_date_summary(
    pool: &PgPool,
    scheduled_date: NaiveDate,
    report_type: ReportType,
) -> Result<Option<JobDateSummaryRow>, DbError> {
    let row = sqlx::query_as::<_, JobDateSummaryRow>(
        "SELECT scheduled_date, report_type, latest_run_id, latest_started_at, status, \
                current_stage, trigger_source, executed_at, errors, warnings, run_count, \
                updated_at \
         FROM job_date_summaries \
         WHERE scheduled_date = $1 AND report_type = $2",
    )
    .bind(scheduled_date)
    .bind(report_type.as_str())
    .fetch_optional(pool)
    .await?;

    Ok(row)
}
