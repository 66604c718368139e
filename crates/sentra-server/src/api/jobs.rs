use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use sentra_core::{ReportType, RunStatus, Stage, TriggerSource};
use sentra_pipeline::{JobDateSummary, JobRun, StageLogEntry};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::middleware::{Caller, RequestId};

use super::redact::{errors_for, warnings_for};
use super::{map_ledger_error, ApiError, ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Deserialize)]
pub(super) struct JobKeyQuery {
    pub date: Option<String>,
    pub report_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct JobStatusItem {
    scheduled_date: NaiveDate,
    report_type: ReportType,
    latest_run_id: Uuid,
    latest_started_at: DateTime<Utc>,
    status: RunStatus,
    current_stage: Stage,
    trigger_source: TriggerSource,
    executed_at: Option<DateTime<Utc>>,
    errors: Vec<String>,
    warnings: Vec<String>,
    run_count: u32,
}

#[derive(Debug, Serialize)]
pub(super) struct JobRunItem {
    run_id: Uuid,
    scheduled_date: NaiveDate,
    report_type: ReportType,
    status: RunStatus,
    current_stage: Stage,
    trigger_source: TriggerSource,
    started_at: DateTime<Utc>,
    executed_at: Option<DateTime<Utc>>,
    symbol_count: u32,
    errors: Vec<String>,
    warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
pub(super) struct StageItem {
    stage: Stage,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
}

impl JobStatusItem {
    fn present(summary: JobDateSummary, caller: Caller) -> Self {
        Self {
            scheduled_date: summary.scheduled_date,
            report_type: summary.report_type,
            latest_run_id: summary.latest_run_id,
            latest_started_at: summary.latest_started_at,
            status: summary.status,
            current_stage: summary.current_stage,
            trigger_source: summary.trigger_source,
            executed_at: summary.executed_at,
            errors: errors_for(caller, &summary.errors),
            warnings: warnings_for(caller, &summary.warnings),
            run_count: summary.run_count,
        }
    }
}

impl JobRunItem {
    fn present(run: JobRun, caller: Caller) -> Self {
        Self {
            run_id: run.run_id,
            scheduled_date: run.scheduled_date,
            report_type: run.report_type,
            status: run.status,
            current_stage: run.current_stage,
            trigger_source: run.trigger_source,
            started_at: run.started_at,
            executed_at: run.executed_at,
            symbol_count: run.symbol_count,
            errors: errors_for(caller, &run.errors),
            warnings: warnings_for(caller, &run.warnings),
        }
    }
}

impl From<StageLogEntry> for StageItem {
    fn from(entry: StageLogEntry) -> Self {
        Self {
            duration_ms: entry.duration_ms(),
            stage: entry.stage,
            started_at: entry.started_at,
            ended_at: entry.ended_at,
        }
    }
}

fn parse_job_key(req_id: &str, query: &JobKeyQuery) -> Result<(NaiveDate, ReportType), ApiError> {
    let date = query
        .date
        .as_deref()
        .ok_or_else(|| ApiError::new(req_id, "validation_error", "date is required"))?;
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| {
        ApiError::new(req_id, "validation_error", "date must be formatted YYYY-MM-DD")
    })?;

    let report_type = query
        .report_type
        .as_deref()
        .ok_or_else(|| ApiError::new(req_id, "validation_error", "report_type is required"))?;
    let report_type = report_type.parse::<ReportType>().map_err(|_| {
        ApiError::new(
            req_id,
            "validation_error",
            "report_type must be one of premarket, midday, end_of_day",
        )
    })?;

    Ok((date, report_type))
}

pub(super) async fn get_job_status(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<JobKeyQuery>,
) -> Result<Json<ApiResponse<JobStatusItem>>, ApiError> {
    let (date, report_type) = parse_job_key(&req_id.0, &query)?;

    let summary = state
        .ledger
        .date_summary(date, report_type)
        .await
        .map_err(|e| map_ledger_error(req_id.0.clone(), &e))?
        .ok_or_else(|| {
            ApiError::new(
                req_id.0.clone(),
                "not_found",
                format!("no {report_type} runs for {date}"),
            )
        })?;

    Ok(Json(ApiResponse {
        data: JobStatusItem::present(summary, caller),
        meta: ResponseMeta::new(req_id.0),
    }))
}

pub(super) async fn list_job_runs(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<JobKeyQuery>,
) -> Result<Json<ApiResponse<Vec<JobRunItem>>>, ApiError> {
    let (date, report_type) = parse_job_key(&req_id.0, &query)?;

    let runs = state
        .ledger
        .list_runs(date, report_type)
        .await
        .map_err(|e| map_ledger_error(req_id.0.clone(), &e))?;

    let data = runs
        .into_iter()
        .map(|run| JobRunItem::present(run, caller))
        .collect();

    Ok(Json(ApiResponse {
        data,
        meta: ResponseMeta::new(req_id.0),
    }))
}

pub(super) async fn list_run_stages(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Path(run_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<StageItem>>>, ApiError> {
    let run_id = Uuid::parse_str(&run_id)
        .map_err(|_| ApiError::new(req_id.0.clone(), "validation_error", "run_id must be a UUID"))?;

    let run = state
        .ledger
        .get_run(run_id)
        .await
        .map_err(|e| map_ledger_error(req_id.0.clone(), &e))?;
    if run.is_none() {
        return Err(ApiError::new(
            req_id.0,
            "not_found",
            format!("job run {run_id} not found"),
        ));
    }

    let entries = state
        .ledger
        .stage_log(run_id)
        .await
        .map_err(|e| map_ledger_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: entries.into_iter().map(StageItem::from).collect(),
        meta: ResponseMeta::new(req_id.0),
    }))
}
