//! The run ledger: `JobRun`, `StageLogEntry`, `JobDateSummary` and the
//! persisted report signals.
//!
//! [`PgLedger`] is the production binding. [`MemoryLedger`] keeps the same
//! rules in process and backs controller and watchdog tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sentra_core::{ConsensusResult, ReportType, RunStatus, Stage};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::run::{JobDateSummary, JobRun, NewRun, StageLogEntry};

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Create a run in `running` at stage `init`.
    async fn create_run(&self, new_run: NewRun) -> Result<JobRun, LedgerError>;

    /// Move a running run from `from` to `to`, appending `warnings`.
    ///
    /// Fails with [`LedgerError::Rejected`] when the run is terminal or is
    /// not at `from`.
    async fn advance_stage(
        &self,
        run_id: Uuid,
        from: Stage,
        to: Stage,
        warnings: &[String],
    ) -> Result<JobRun, LedgerError>;

    /// Terminate a running run. Fails with [`LedgerError::Rejected`] when the
    /// run has already terminated.
    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        errors: &[String],
        warnings: &[String],
    ) -> Result<JobRun, LedgerError>;

    /// Persist one symbol's result while the run is `running` at stage
    /// `storage`. A result already stored for the symbol is never replaced.
    ///
    /// Fails with [`LedgerError::Rejected`] when the run has terminated or
    /// is at another stage.
    async fn store_signal(&self, run_id: Uuid, result: &ConsensusResult)
        -> Result<(), LedgerError>;

    async fn get_run(&self, run_id: Uuid) -> Result<Option<JobRun>, LedgerError>;

    /// Every run for one key, newest first.
    async fn list_runs(
        &self,
        scheduled_date: NaiveDate,
        report_type: ReportType,
    ) -> Result<Vec<JobRun>, LedgerError>;

    async fn list_recent_runs(&self, limit: usize) -> Result<Vec<JobRun>, LedgerError>;

    async fn date_summary(
        &self,
        scheduled_date: NaiveDate,
        report_type: ReportType,
    ) -> Result<Option<JobDateSummary>, LedgerError>;

    async fn stage_log(&self, run_id: Uuid) -> Result<Vec<StageLogEntry>, LedgerError>;

    /// Running runs whose stage began before `stage_cutoff` or that started
    /// before `run_cutoff`.
    async fn stale_runs(
        &self,
        stage_cutoff: DateTime<Utc>,
        run_cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobRun>, LedgerError>;

    /// Check that the ledger's backing store is reachable.
    async fn ping(&self) -> Result<(), LedgerError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn convert_runs(rows: Vec<sentra_db::JobRunRow>) -> Result<Vec<JobRun>, LedgerError> {
    rows.into_iter().map(JobRun::try_from).collect()
}

#[async_trait]
impl Ledger for PgLedger {
    async fn create_run(&self, new_run: NewRun) -> Result<JobRun, LedgerError> {
        let row = sentra_db::create_job_run(
            &self.pool,
            sentra_db::NewJobRun {
                scheduled_date: new_run.scheduled_date,
                report_type: new_run.report_type,
                trigger_source: new_run.trigger_source,
                symbol_count: i32::try_from(new_run.symbol_count).unwrap_or(i32::MAX),
            },
        )
        .await?;
        row.try_into()
    }

    async fn advance_stage(
        &self,
        run_id: Uuid,
        from: Stage,
        to: Stage,
        warnings: &[String],
    ) -> Result<JobRun, LedgerError> {
        let row = sentra_db::advance_job_run_stage(&self.pool, run_id, from, to, warnings).await?;
        row.try_into()
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        errors: &[String],
        warnings: &[String],
    ) -> Result<JobRun, LedgerError> {
        let row = sentra_db::finish_job_run(&self.pool, run_id, status, errors, warnings).await?;
        row.try_into()
    }

    async fn store_signal(
        &self,
        run_id: Uuid,
        result: &ConsensusResult,
    ) -> Result<(), LedgerError> {
        let payload = serde_json::to_value(result)?;
        sentra_db::insert_report_signal(
            &self.pool,
            &sentra_db::NewReportSignal {
                run_id,
                symbol: result.symbol(),
                agreement: result.agreement().as_str(),
                final_direction: result.final_direction().as_str(),
                final_confidence: result.final_confidence(),
                action: result.action().as_str(),
                payload,
            },
        )
        .await?;
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<JobRun>, LedgerError> {
        match sentra_db::get_job_run(&self.pool, run_id).await {
            Ok(row) => Ok(Some(row.try_into()?)),
            Err(sentra_db::DbError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_runs(
        &self,
        scheduled_date: NaiveDate,
        report_type: ReportType,
    ) -> Result<Vec<JobRun>, LedgerError> {
        convert_runs(sentra_db::list_job_runs(&self.pool, scheduled_date, report_type).await?)
    }

    async fn list_recent_runs(&self, limit: usize) -> Result<Vec<JobRun>, LedgerError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        convert_runs(sentra_db::list_recent_job_runs(&self.pool, limit).await?)
    }

    async fn date_summary(
        &self,
        scheduled_date: NaiveDate,
        report_type: ReportType,
    ) -> Result<Option<JobDateSummary>, LedgerError> {
        sentra_db::get_job_date_summary(&self.pool, scheduled_date, report_type)
            .await?
            .map(JobDateSummary::try_from)
            .transpose()
    }

    async fn stage_log(&self, run_id: Uuid) -> Result<Vec<StageLogEntry>, LedgerError> {
        sentra_db::list_stage_log(&self.pool, run_id)
            .await?
            .into_iter()
            .map(StageLogEntry::try_from)
            .collect()
    }

    async fn stale_runs(
        &self,
        stage_cutoff: DateTime<Utc>,
        run_cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobRun>, LedgerError> {
        convert_runs(sentra_db::list_stale_job_runs(&self.pool, stage_cutoff, run_cutoff).await?)
    }

    async fn ping(&self) -> Result<(), LedgerError> {
        sentra_db::health_check(&self.pool).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryState {
    runs: HashMap<Uuid, JobRun>,
    stage_log: Vec<StageLogEntry>,
    summaries: HashMap<(NaiveDate, ReportType), JobDateSummary>,
    signals: HashMap<Uuid, BTreeMap<String, ConsensusResult>>,
}

impl MemoryState {
    fn run_mut(&mut self, run_id: Uuid) -> Result<&mut JobRun, LedgerError> {
        self.runs.get_mut(&run_id).ok_or(LedgerError::NotFound(run_id))
    }

    fn close_open_stage(&mut self, run_id: Uuid, now: DateTime<Utc>) {
        for entry in &mut self.stage_log {
            if entry.run_id == run_id && entry.ended_at.is_none() {
                entry.ended_at = Some(now);
            }
        }
    }

    fn open_stage(&mut self, run_id: Uuid, stage: Stage, now: DateTime<Utc>) {
        self.stage_log.push(StageLogEntry {
            run_id,
            stage,
            started_at: now,
            ended_at: None,
        });
    }

    /// Re-project the summary from `run_id` unless a newer run owns it.
    fn refresh_summary(&mut self, run_id: Uuid, now: DateTime<Utc>) {
        let Some(run) = self.runs.get(&run_id) else {
            return;
        };
        let key = (run.scheduled_date, run.report_type);
        let run_count = self
            .runs
            .values()
            .filter(|r| (r.scheduled_date, r.report_type) == key)
            .count();
        let run_count = u32::try_from(run_count).unwrap_or(u32::MAX);

        let replace = self.summaries.get(&key).is_none_or(|current| {
            current.latest_run_id == run.run_id || current.latest_started_at <= run.started_at
        });
        if replace {
            let summary = JobDateSummary::mirror(run, run_count, now);
            self.summaries.insert(key, summary);
        } else if let Some(current) = self.summaries.get_mut(&key) {
            current.run_count = run_count;
        }
    }
}

/// A [`Ledger`] held entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: Mutex<MemoryState>,
}

impl MemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Signals stored for a run, ordered by symbol.
    #[must_use]
    pub fn signals(&self, run_id: Uuid) -> Vec<ConsensusResult> {
        self.lock()
            .signals
            .get(&run_id)
            .map(|by_symbol| by_symbol.values().cloned().collect())
            .unwrap_or_default()
    }
}

fn newest_first(mut runs: Vec<JobRun>) -> Vec<JobRun> {
    runs.sort_by(|a, b| {
        b.started_at
            .cmp(&a.started_at)
            .then_with(|| a.run_id.cmp(&b.run_id))
    });
    runs
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn create_run(&self, new_run: NewRun) -> Result<JobRun, LedgerError> {
        let now = Utc::now();
        let run = JobRun {
            run_id: Uuid::new_v4(),
            scheduled_date: new_run.scheduled_date,
            report_type: new_run.report_type,
            status: RunStatus::Running,
            current_stage: Stage::Init,
            trigger_source: new_run.trigger_source,
            started_at: now,
            stage_started_at: now,
            executed_at: None,
            symbol_count: new_run.symbol_count,
            errors: Vec::new(),
            warnings: Vec::new(),
        };

        let mut state = self.lock();
        state.runs.insert(run.run_id, run.clone());
        state.open_stage(run.run_id, Stage::Init, now);
        state.refresh_summary(run.run_id, now);
        Ok(run)
    }

    async fn advance_stage(
        &self,
        run_id: Uuid,
        from: Stage,
        to: Stage,
        warnings: &[String],
    ) -> Result<JobRun, LedgerError> {
        let now = Utc::now();
        let mut state = self.lock();
        let run = state.run_mut(run_id)?;
        let next = run
            .state()
            .advance(from, to)
            .map_err(|e| LedgerError::rejected(run_id, &e))?;
        run.current_stage = next.stage();
        run.stage_started_at = now;
        run.warnings.extend_from_slice(warnings);
        let updated = run.clone();

        state.close_open_stage(run_id, now);
        state.open_stage(run_id, to, now);
        state.refresh_summary(run_id, now);
        Ok(updated)
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        errors: &[String],
        warnings: &[String],
    ) -> Result<JobRun, LedgerError> {
        let now = Utc::now();
        let mut state = self.lock();
        let run = state.run_mut(run_id)?;
        let next = run
            .state()
            .finish(status)
            .map_err(|e| LedgerError::rejected(run_id, &e))?;
        run.status = next.status();
        run.executed_at = Some(now);
        run.errors.extend_from_slice(errors);
        run.warnings.extend_from_slice(warnings);
        let updated = run.clone();

        state.close_open_stage(run_id, now);
        state.refresh_summary(run_id, now);
        Ok(updated)
    }

    async fn store_signal(
        &self,
        run_id: Uuid,
        result: &ConsensusResult,
    ) -> Result<(), LedgerError> {
        let mut state = self.lock();
        let run = state.runs.get(&run_id).ok_or(LedgerError::NotFound(run_id))?;
        if run.status != RunStatus::Running || run.current_stage != Stage::Storage {
            return Err(LedgerError::Rejected {
                run_id,
                reason: "expected running at stage storage".to_string(),
            });
        }
        state
            .signals
            .entry(run_id)
            .or_default()
            .entry(result.symbol().to_string())
            .or_insert_with(|| result.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<JobRun>, LedgerError> {
        Ok(self.lock().runs.get(&run_id).cloned())
    }

    async fn list_runs(
        &self,
        scheduled_date: NaiveDate,
        report_type: ReportType,
    ) -> Result<Vec<JobRun>, LedgerError> {
        let runs = self
            .lock()
            .runs
            .values()
            .filter(|r| r.scheduled_date == scheduled_date && r.report_type == report_type)
            .cloned()
            .collect();
        Ok(newest_first(runs))
    }

    async fn list_recent_runs(&self, limit: usize) -> Result<Vec<JobRun>, LedgerError> {
        let runs = self.lock().runs.values().cloned().collect();
        let mut runs = newest_first(runs);
        runs.truncate(limit);
        Ok(runs)
    }

    async fn date_summary(
        &self,
        scheduled_date: NaiveDate,
        report_type: ReportType,
    ) -> Result<Option<JobDateSummary>, LedgerError> {
        Ok(self
            .lock()
            .summaries
            .get(&(scheduled_date, report_type))
            .cloned())
    }

    async fn stage_log(&self, run_id: Uuid) -> Result<Vec<StageLogEntry>, LedgerError> {
        Ok(self
            .lock()
            .stage_log
            .iter()
            .filter(|entry| entry.run_id == run_id)
            .cloned()
            .collect())
    }

    async fn stale_runs(
        &self,
        stage_cutoff: DateTime<Utc>,
        run_cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobRun>, LedgerError> {
        let mut runs: Vec<JobRun> = self
            .lock()
            .runs
            .values()
            .filter(|r| {
                r.status == RunStatus::Running
                    && (r.stage_started_at < stage_cutoff || r.started_at < run_cutoff)
            })
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.started_at);
        Ok(runs)
    }
}
