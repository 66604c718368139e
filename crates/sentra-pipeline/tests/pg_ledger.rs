//! `PgLedger` against a real, migrated Postgres via `#[sqlx::test]`.

use chrono::{NaiveDate, Utc};
use sentra_core::{
    consensus, Direction, InvocationOutcome, ModelId, PendingInvocation, ReportType, RunStatus,
    Stage, TriggerSource,
};
use sentra_pipeline::{sweep_stale_runs, Ledger, LedgerError, NewRun, PgLedger, WatchdogLimits};

fn new_run() -> NewRun {
    NewRun {
        scheduled_date: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
        report_type: ReportType::Midday,
        trigger_source: TriggerSource::Scheduler,
        symbol_count: 1,
    }
}

#[sqlx::test(migrations = "../../migrations")]
async fn run_lifecycle_round_trips_through_domain_types(pool: sqlx::PgPool) {
    let ledger = PgLedger::new(pool.clone());
    let run = ledger.create_run(new_run()).await.unwrap();
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.current_stage, Stage::Init);

    let mut current = Stage::Init;
    while current != Stage::Storage {
        let next = current.next().unwrap();
        ledger
            .advance_stage(run.run_id, current, next, &[])
            .await
            .unwrap();
        current = next;
    }

    let signal = |model_id, confidence| {
        PendingInvocation::new(model_id, "AAPL", 3).finish(
            InvocationOutcome::Success {
                direction: Direction::Bullish,
                confidence,
            },
            40,
            1,
        )
    };
    let result = consensus(signal(ModelId::A, 0.9), signal(ModelId::B, 0.8));
    ledger.store_signal(run.run_id, &result).await.unwrap();
    ledger
        .advance_stage(run.run_id, Stage::Storage, Stage::Finalize, &[])
        .await
        .unwrap();

    let done = ledger
        .finish_run(run.run_id, RunStatus::Success, &[], &[])
        .await
        .unwrap();
    assert_eq!(done.status, RunStatus::Success);

    let stages: Vec<Stage> = ledger
        .stage_log(run.run_id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.stage)
        .collect();
    assert_eq!(stages, Stage::ALL.to_vec());

    let summary = ledger
        .date_summary(run.scheduled_date, run.report_type)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.latest_run_id, run.run_id);
    assert_eq!(summary.status, RunStatus::Success);

    let signals = sentra_db::list_report_signals(&pool, run.run_id).await.unwrap();
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].action, "STRONG_BUY");
}

#[sqlx::test(migrations = "../../migrations")]
async fn terminal_run_rejects_further_transitions(pool: sqlx::PgPool) {
    let ledger = PgLedger::new(pool);
    let run = ledger.create_run(new_run()).await.unwrap();
    ledger
        .finish_run(run.run_id, RunStatus::Failed, &["boom".to_string()], &[])
        .await
        .unwrap();

    let err = ledger
        .advance_stage(run.run_id, Stage::Init, Stage::DataFetch, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Rejected { .. }), "got {err:?}");
    assert!(ledger.get_run(uuid::Uuid::new_v4()).await.unwrap().is_none());
}

#[sqlx::test(migrations = "../../migrations")]
async fn watchdog_fails_stuck_run(pool: sqlx::PgPool) {
    let ledger = PgLedger::new(pool);
    let run = ledger.create_run(new_run()).await.unwrap();

    let limits = WatchdogLimits {
        max_stage_secs: 600,
        run_deadline_secs: 1_800,
    };
    let later = Utc::now() + chrono::Duration::minutes(11);
    let failed = sweep_stale_runs(&ledger, limits, later).await.unwrap();
    assert_eq!(failed, vec![run.run_id]);

    let stored = ledger.get_run(run.run_id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
    assert_eq!(stored.errors.len(), 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn failed_run_rejects_late_signals(pool: sqlx::PgPool) {
    let ledger = PgLedger::new(pool.clone());
    let run = ledger.create_run(new_run()).await.unwrap();
    for (from, to) in [
        (Stage::Init, Stage::DataFetch),
        (Stage::DataFetch, Stage::AiAnalysis),
        (Stage::AiAnalysis, Stage::Storage),
    ] {
        ledger.advance_stage(run.run_id, from, to, &[]).await.unwrap();
    }
    ledger
        .finish_run(run.run_id, RunStatus::Failed, &["stage deadline exceeded".to_string()], &[])
        .await
        .unwrap();

    let invocation = |model_id| {
        PendingInvocation::new(model_id, "MSFT", 2).finish(
            InvocationOutcome::Success {
                direction: Direction::Bearish,
                confidence: 0.7,
            },
            30,
            1,
        )
    };
    let result = consensus(invocation(ModelId::A), invocation(ModelId::B));
    let err = ledger.store_signal(run.run_id, &result).await.unwrap_err();
    assert!(matches!(err, LedgerError::Rejected { .. }), "got {err:?}");
    assert!(sentra_db::list_report_signals(&pool, run.run_id)
        .await
        .unwrap()
        .is_empty());
}
