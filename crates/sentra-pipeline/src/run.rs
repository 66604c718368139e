//! Run-ledger domain types and the run state machine.

use chrono::{DateTime, NaiveDate, Utc};
use sentra_core::{ReportType, RunStatus, Stage, TriggerSource};
use sentra_db::{JobDateSummaryRow, JobRunRow, StageLogRow};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::error::LedgerError;

/// Why [`RunState`] refused a transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("run is already {0}")]
    NotRunning(RunStatus),

    #[error("run is at stage {actual}, not {expected}")]
    StageMismatch { expected: Stage, actual: Stage },

    #[error("stage {to} does not directly follow {from}")]
    NotAdjacent { from: Stage, to: Stage },

    #[error("{0} is not a terminal status")]
    NotTerminal(RunStatus),
}

/// Status and stage of one run.
///
/// Stages only move forward one step at a time and a run terminates once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunState {
    status: RunStatus,
    stage: Stage,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            status: RunStatus::Running,
            stage: Stage::Init,
        }
    }

    #[must_use]
    pub fn status(self) -> RunStatus {
        self.status
    }

    #[must_use]
    pub fn stage(self) -> Stage {
        self.stage
    }

    /// Move from `from` to the stage right after it.
    ///
    /// # Errors
    ///
    /// Returns a [`TransitionError`] if the run is terminal, is not at
    /// `from`, or `to` is not the next stage.
    pub fn advance(self, from: Stage, to: Stage) -> Result<Self, TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::NotRunning(self.status));
        }
        if self.stage != from {
            return Err(TransitionError::StageMismatch {
                expected: from,
                actual: self.stage,
            });
        }
        if from.next() != Some(to) {
            return Err(TransitionError::NotAdjacent { from, to });
        }
        Ok(Self {
            status: self.status,
            stage: to,
        })
    }

    /// Terminate the run. The stage stays where the run stopped.
    ///
    /// # Errors
    ///
    /// Returns a [`TransitionError`] if the run is already terminal or
    /// `status` is `running`.
    pub fn finish(self, status: RunStatus) -> Result<Self, TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::NotRunning(self.status));
        }
        if !status.is_terminal() {
            return Err(TransitionError::NotTerminal(status));
        }
        Ok(Self {
            status,
            stage: self.stage,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NewRun {
    pub scheduled_date: NaiveDate,
    pub report_type: ReportType,
    pub trigger_source: TriggerSource,
    pub symbol_count: u32,
}

/// One execution attempt of one scheduled report for one date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRun {
    pub run_id: Uuid,
    pub scheduled_date: NaiveDate,
    pub report_type: ReportType,
    pub status: RunStatus,
    pub current_stage: Stage,
    pub trigger_source: TriggerSource,
    pub started_at: DateTime<Utc>,
    pub stage_started_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub symbol_count: u32,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl JobRun {
    #[must_use]
    pub fn state(&self) -> RunState {
        RunState {
            status: self.status,
            stage: self.current_stage,
        }
    }
}

/// The per-`(scheduled_date, report_type)` projection of the most recently
/// started run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobDateSummary {
    pub scheduled_date: NaiveDate,
    pub report_type: ReportType,
    pub latest_run_id: Uuid,
    pub latest_started_at: DateTime<Utc>,
    pub status: RunStatus,
    pub current_stage: Stage,
    pub trigger_source: TriggerSource,
    pub executed_at: Option<DateTime<Utc>>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub run_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl JobDateSummary {
    /// Project `run` as the latest run of its key.
    #[must_use]
    pub fn mirror(run: &JobRun, run_count: u32, updated_at: DateTime<Utc>) -> Self {
        Self {
            scheduled_date: run.scheduled_date,
            report_type: run.report_type,
            latest_run_id: run.run_id,
            latest_started_at: run.started_at,
            status: run.status,
            current_stage: run.current_stage,
            trigger_source: run.trigger_source,
            executed_at: run.executed_at,
            errors: run.errors.clone(),
            warnings: run.warnings.clone(),
            run_count,
            updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageLogEntry {
    pub run_id: Uuid,
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl StageLogEntry {
    #[must_use]
    pub fn duration_ms(&self) -> Option<i64> {
        self.ended_at
            .map(|ended| (ended - self.started_at).num_milliseconds())
    }
}

fn parse_column<T>(column: &str, raw: &str) -> Result<T, LedgerError>
where
    T: std::str::FromStr<Err = sentra_core::CoreError>,
{
    raw.parse()
        .map_err(|e| LedgerError::Corrupt(format!("{column}: {e}")))
}

fn count_column(column: &str, raw: i32) -> Result<u32, LedgerError> {
    u32::try_from(raw).map_err(|_| LedgerError::Corrupt(format!("{column}: negative value {raw}")))
}

impl TryFrom<JobRunRow> for JobRun {
    type Error = LedgerError;

    fn try_from(row: JobRunRow) -> Result<Self, Self::Error> {
        Ok(Self {
            run_id: row.run_id,
            scheduled_date: row.scheduled_date,
            report_type: parse_column("report_type", &row.report_type)?,
            status: parse_column("status", &row.status)?,
            current_stage: parse_column("current_stage", &row.current_stage)?,
            trigger_source: parse_column("trigger_source", &row.trigger_source)?,
            started_at: row.started_at,
            stage_started_at: row.stage_started_at,
            executed_at: row.executed_at,
            symbol_count: count_column("symbol_count", row.symbol_count)?,
            errors: row.errors.0,
            warnings: row.warnings.0,
        })
    }
}

impl TryFrom<JobDateSummaryRow> for JobDateSummary {
    type Error = LedgerError;

    fn try_from(row: JobDateSummaryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            scheduled_date: row.scheduled_date,
            report_type: parse_column("report_type", &row.report_type)?,
            latest_run_id: row.latest_run_id,
            latest_started_at: row.latest_started_at,
            status: parse_column("status", &row.status)?,
            current_stage: parse_column("current_stage", &row.current_stage)?,
            trigger_source: parse_column("trigger_source", &row.trigger_source)?,
            executed_at: row.executed_at,
            errors: row.errors.0,
            warnings: row.warnings.0,
            run_count: count_column("run_count", row.run_count)?,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<StageLogRow> for StageLogEntry {
    type Error = LedgerError;

    fn try_from(row: StageLogRow) -> Result<Self, Self::Error> {
        Ok(Self {
            run_id: row.run_id,
            stage: parse_column("stage", &row.stage)?,
            started_at: row.started_at,
            ended_at: row.ended_at,
        })
    }
}
