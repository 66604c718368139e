//! Live integration tests for sentra-db using `#[sqlx::test]`.
//!
//! Each test gets a fresh, fully-migrated Postgres database spun up by the
//! sqlx test harness. The `migrations` path is relative to the crate root
//! (`crates/sentra-db/`), so `"../../migrations"` resolves to the workspace
//! migration directory.

use chrono::{Duration, NaiveDate, Utc};
use sentra_core::{ReportType, RunStatus, Stage, TriggerSource};
use sentra_db::{
    advance_job_run_stage, create_job_run, delete_cache_entry, finish_job_run,
    get_job_date_summary, get_job_run, get_live_cache_entry, list_job_runs, list_report_signals,
    list_stage_log, list_stale_job_runs, purge_expired_cache_entries, put_cache_entry,
    insert_report_signal, DbError, NewJobRun, NewReportSignal,
};

fn march_second() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

fn new_run(trigger_source: TriggerSource) -> NewJobRun {
    NewJobRun {
        scheduled_date: march_second(),
        report_type: ReportType::Premarket,
        trigger_source,
        symbol_count: 2,
    }
}

#[sqlx::test(migrations = "../../migrations")]
async fn create_job_run_opens_init_stage_and_summary(pool: sqlx::PgPool) {
    let run = create_job_run(&pool, new_run(TriggerSource::Scheduler))
        .await
        .expect("create_job_run failed");

    assert_eq!(run.status, "running");
    assert_eq!(run.current_stage, "init");

    let log = list_stage_log(&pool, run.run_id).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].stage, "init");
    assert!(log[0].ended_at.is_none());

    let summary = get_job_date_summary(&pool, march_second(), ReportType::Premarket)
        .await
        .unwrap()
        .expect("summary should exist");
    assert_eq!(summary.latest_run_id, run.run_id);
    assert_eq!(summary.status, "running");
    assert_eq!(summary.run_count, 1);
}

#[sqlx::test(migrations = "../../migrations")]
async fn full_lifecycle_records_every_stage_once(pool: sqlx::PgPool) {
    let run = create_job_run(&pool, new_run(TriggerSource::Cli)).await.unwrap();

    let mut current = Stage::Init;
    while let Some(next) = current.next() {
        advance_job_run_stage(&pool, run.run_id, current, next, &[])
            .await
            .unwrap_or_else(|e| panic!("advance {current} -> {next} failed: {e}"));
        current = next;
    }
    let done = finish_job_run(&pool, run.run_id, RunStatus::Success, &[], &[])
        .await
        .unwrap();
    assert_eq!(done.status, "success");
    assert!(done.executed_at.is_some());

    let stages: Vec<String> = list_stage_log(&pool, run.run_id)
        .await
        .unwrap()
        .into_iter()
        .map(|row| row.stage)
        .collect();
    assert_eq!(
        stages,
        vec!["init", "data_fetch", "ai_analysis", "storage", "finalize"]
    );

    let summary = get_job_date_summary(&pool, march_second(), ReportType::Premarket)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.status, "success");
    assert_eq!(summary.current_stage, "finalize");
}

#[sqlx::test(migrations = "../../migrations")]
async fn advance_rejects_skipped_or_repeated_stage(pool: sqlx::PgPool) {
    let run = create_job_run(&pool, new_run(TriggerSource::Cli)).await.unwrap();

    let skipped = advance_job_run_stage(&pool, run.run_id, Stage::Init, Stage::Storage, &[]).await;
    assert!(matches!(
        skipped,
        Err(DbError::InvalidJobRunTransition { .. })
    ));

    advance_job_run_stage(&pool, run.run_id, Stage::Init, Stage::DataFetch, &[])
        .await
        .unwrap();
    let repeated =
        advance_job_run_stage(&pool, run.run_id, Stage::Init, Stage::DataFetch, &[]).await;
    assert!(matches!(
        repeated,
        Err(DbError::InvalidJobRunTransition { .. })
    ));
}

#[sqlx::test(migrations = "../../migrations")]
async fn terminal_run_cannot_be_finished_again(pool: sqlx::PgPool) {
    let run = create_job_run(&pool, new_run(TriggerSource::Cli)).await.unwrap();
    finish_job_run(
        &pool,
        run.run_id,
        RunStatus::Failed,
        &["stage timeout".to_string()],
        &[],
    )
    .await
    .unwrap();

    let again = finish_job_run(&pool, run.run_id, RunStatus::Success, &[], &[]).await;
    assert!(matches!(again, Err(DbError::InvalidJobRunTransition { .. })));

    let stored = get_job_run(&pool, run.run_id).await.unwrap();
    assert_eq!(stored.status, "failed");
    assert_eq!(stored.errors.0, vec!["stage timeout".to_string()]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn summary_follows_latest_started_run(pool: sqlx::PgPool) {
    let first = create_job_run(&pool, new_run(TriggerSource::Scheduler))
        .await
        .unwrap();
    finish_job_run(&pool, first.run_id, RunStatus::Failed, &["boom".to_string()], &[])
        .await
        .unwrap();

    let retry = create_job_run(&pool, new_run(TriggerSource::Retry)).await.unwrap();

    let summary = get_job_date_summary(&pool, march_second(), ReportType::Premarket)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.latest_run_id, retry.run_id);
    assert_eq!(summary.status, "running");
    assert_eq!(summary.run_count, 2);

    let runs = list_job_runs(&pool, march_second(), ReportType::Premarket)
        .await
        .unwrap();
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().any(|r| r.run_id == first.run_id && r.status == "failed"));
}

#[sqlx::test(migrations = "../../migrations")]
async fn stale_runs_are_listed_by_stage_age(pool: sqlx::PgPool) {
    let run = create_job_run(&pool, new_run(TriggerSource::Scheduler))
        .await
        .unwrap();
    sqlx::query(
        "UPDATE job_runs SET stage_started_at = NOW() - INTERVAL '20 minutes' WHERE run_id = $1",
    )
    .bind(run.run_id)
    .execute(&pool)
    .await
    .unwrap();

    let now = Utc::now();
    let stale = list_stale_job_runs(&pool, now - Duration::minutes(10), now - Duration::minutes(30))
        .await
        .unwrap();
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].run_id, run.run_id);
}

async fn run_at_storage(pool: &sqlx::PgPool) -> uuid::Uuid {
    let run = create_job_run(pool, new_run(TriggerSource::Cli)).await.unwrap();
    let mut current = Stage::Init;
    while current != Stage::Storage {
        let next = current.next().unwrap();
        advance_job_run_stage(pool, run.run_id, current, next, &[])
            .await
            .unwrap();
        current = next;
    }
    run.run_id
}

fn aapl_signal(run_id: uuid::Uuid, action: &'static str) -> NewReportSignal<'static> {
    NewReportSignal {
        run_id,
        symbol: "AAPL",
        agreement: "AGREE",
        final_direction: "bullish",
        final_confidence: 0.85,
        action,
        payload: serde_json::json!({ "symbol": "AAPL" }),
    }
}

#[sqlx::test(migrations = "../../migrations")]
async fn report_signal_is_written_once_per_symbol(pool: sqlx::PgPool) {
    let run_id = run_at_storage(&pool).await;
    insert_report_signal(&pool, &aapl_signal(run_id, "STRONG_BUY"))
        .await
        .unwrap();
    insert_report_signal(&pool, &aapl_signal(run_id, "BUY"))
        .await
        .unwrap();

    let rows = list_report_signals(&pool, run_id).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].action, "STRONG_BUY");
}

#[sqlx::test(migrations = "../../migrations")]
async fn report_signal_rejected_outside_storage_stage(pool: sqlx::PgPool) {
    let run = create_job_run(&pool, new_run(TriggerSource::Cli)).await.unwrap();
    let early = insert_report_signal(&pool, &aapl_signal(run.run_id, "BUY")).await;
    assert!(matches!(early, Err(DbError::InvalidJobRunTransition { .. })));
    assert!(list_report_signals(&pool, run.run_id).await.unwrap().is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn report_signal_rejected_after_run_terminates(pool: sqlx::PgPool) {
    let run_id = run_at_storage(&pool).await;
    finish_job_run(&pool, run_id, RunStatus::Failed, &["watchdog".to_string()], &[])
        .await
        .unwrap();

    let late = insert_report_signal(&pool, &aapl_signal(run_id, "BUY")).await;
    assert!(matches!(late, Err(DbError::InvalidJobRunTransition { .. })));
    assert!(list_report_signals(&pool, run_id).await.unwrap().is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
async fn cache_entry_respects_ttl_boundary(pool: sqlx::PgPool) {
    let written_at = Utc::now();
    put_cache_entry(&pool, "news:AAPL:20260302T1415", "news", "[]", written_at, 60)
        .await
        .unwrap();

    let before = get_live_cache_entry(
        &pool,
        "news:AAPL:20260302T1415",
        written_at + Duration::seconds(59),
    )
    .await
    .unwrap();
    assert!(before.is_some());

    let after = get_live_cache_entry(
        &pool,
        "news:AAPL:20260302T1415",
        written_at + Duration::seconds(61),
    )
    .await
    .unwrap();
    assert!(after.is_none());

    let purged = purge_expired_cache_entries(&pool, written_at + Duration::seconds(61))
        .await
        .unwrap();
    assert_eq!(purged, 1);
    assert!(!delete_cache_entry(&pool, "news:AAPL:20260302T1415")
        .await
        .unwrap());
}

#[sqlx::test(migrations = "../../migrations")]
async fn cache_entry_with_unbounded_ttl_is_stored(pool: sqlx::PgPool) {
    let written_at = Utc::now();
    put_cache_entry(&pool, "analysis:AAPL:pinned", "analysis", "{}", written_at, i64::MAX)
        .await
        .unwrap();

    let live = get_live_cache_entry(&pool, "analysis:AAPL:pinned", written_at + Duration::days(3650))
        .await
        .unwrap();
    assert!(live.is_some());
}
