//! Stuck-run watchdog.
//!
//! A run is stuck when its current stage has not advanced within
//! `max_stage_secs`, or it is still running past `run_deadline_secs`. Stuck
//! runs are failed with a synthetic error. Whatever the owning controller
//! produces afterwards is discarded because the ledger rejects its writes.

use chrono::{DateTime, Duration, Utc};
use sentra_core::{AppConfig, RunStatus};
use uuid::Uuid;

use crate::error::LedgerError;
use crate::ledger::Ledger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogLimits {
    pub max_stage_secs: u64,
    pub run_deadline_secs: u64,
}

impl WatchdogLimits {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            max_stage_secs: config.max_stage_secs,
            run_deadline_secs: config.run_deadline_secs,
        }
    }
}

fn cutoff(now: DateTime<Utc>, secs: u64) -> DateTime<Utc> {
    let secs = i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1_000);
    now.checked_sub_signed(Duration::seconds(secs))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Fail every stuck run as of `now`. Returns the ids of the runs failed.
///
/// A run that terminates on its own between the scan and the write is left
/// alone.
///
/// # Errors
///
/// Returns [`LedgerError`] if the stale-run scan fails. Failures marking an
/// individual run are logged and skipped.
pub async fn sweep_stale_runs(
    ledger: &dyn Ledger,
    limits: WatchdogLimits,
    now: DateTime<Utc>,
) -> Result<Vec<Uuid>, LedgerError> {
    let stage_cutoff = cutoff(now, limits.max_stage_secs);
    let run_cutoff = cutoff(now, limits.run_deadline_secs);
    let stale = ledger.stale_runs(stage_cutoff, run_cutoff).await?;

    let mut failed = Vec::with_capacity(stale.len());
    for run in stale {
        let message = if run.started_at < run_cutoff {
            format!("run exceeded deadline of {}s", limits.run_deadline_secs)
        } else {
            format!(
                "stage {} exceeded max duration of {}s",
                run.current_stage, limits.max_stage_secs
            )
        };

        match ledger
            .finish_run(run.run_id, RunStatus::Failed, &[message.clone()], &[])
            .await
        {
            Ok(_) => {
                tracing::warn!(
                    run_id = %run.run_id,
                    stage = %run.current_stage,
                    reason = %message,
                    "watchdog failed stuck run"
                );
                failed.push(run.run_id);
            }
            Err(LedgerError::Rejected { .. }) => {
                tracing::debug!(run_id = %run.run_id, "run finished before watchdog could fail it");
            }
            Err(e) => {
                tracing::error!(run_id = %run.run_id, error = %e, "watchdog could not fail stuck run");
            }
        }
    }

    Ok(failed)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use sentra_core::{ReportType, Stage, TriggerSource};

    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::run::NewRun;

    const LIMITS: WatchdogLimits = WatchdogLimits {
        max_stage_secs: 600,
        run_deadline_secs: 1_800,
    };

    fn new_run() -> NewRun {
        NewRun {
            scheduled_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            report_type: ReportType::EndOfDay,
            trigger_source: TriggerSource::Scheduler,
            symbol_count: 1,
        }
    }

    #[tokio::test]
    async fn fresh_runs_are_left_alone() {
        let ledger = MemoryLedger::new();
        ledger.create_run(new_run()).await.unwrap();
        let failed = sweep_stale_runs(&ledger, LIMITS, Utc::now()).await.unwrap();
        assert!(failed.is_empty());
    }

    #[tokio::test]
    async fn stuck_stage_is_failed_with_synthetic_error() {
        let ledger = MemoryLedger::new();
        let run = ledger.create_run(new_run()).await.unwrap();
        ledger
            .advance_stage(run.run_id, Stage::Init, Stage::DataFetch, &[])
            .await
            .unwrap();

        let later = Utc::now() + Duration::minutes(11);
        let failed = sweep_stale_runs(&ledger, LIMITS, later).await.unwrap();
        assert_eq!(failed, vec![run.run_id]);

        let stored = ledger.get_run(run.run_id).await.unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(stored.current_stage, Stage::DataFetch);
        assert_eq!(
            stored.errors,
            vec!["stage data_fetch exceeded max duration of 600s".to_string()]
        );

        let summary = ledger
            .date_summary(run.scheduled_date, run.report_type)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn run_past_deadline_reports_deadline() {
        let ledger = MemoryLedger::new();
        let run = ledger.create_run(new_run()).await.unwrap();
        let later = Utc::now() + Duration::minutes(31);
        sweep_stale_runs(&ledger, LIMITS, later).await.unwrap();
        let stored = ledger.get_run(run.run_id).await.unwrap().unwrap();
        assert_eq!(stored.errors, vec!["run exceeded deadline of 1800s".to_string()]);
    }

    #[tokio::test]
    async fn terminal_runs_are_never_swept() {
        let ledger = MemoryLedger::new();
        let run = ledger.create_run(new_run()).await.unwrap();
        ledger
            .finish_run(run.run_id, RunStatus::Success, &[], &[])
            .await
            .unwrap();
        let later = Utc::now() + Duration::hours(2);
        assert!(sweep_stale_runs(&ledger, LIMITS, later).await.unwrap().is_empty());
    }
}
