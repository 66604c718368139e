//! Background job scheduler.
//!
//! Registers one cron job per report type plus the housekeeping jobs: the
//! stuck-run watchdog and the durable cache purge.

use std::sync::Arc;

use chrono::Utc;
use sentra_core::{AppConfig, ReportType, TriggerSource};
use sentra_pipeline::{sweep_stale_runs, PipelineError, ReportController, WatchdogLimits};
use sqlx::PgPool;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};

/// Every minute, at second zero.
const WATCHDOG_CRON: &str = "0 * * * * *";
/// Hourly, at minute 17.
const CACHE_PURGE_CRON: &str = "0 17 * * * *";

/// Builds and starts the background job scheduler.
///
/// Returns the running [`JobScheduler`] handle, which must be kept alive
/// for the lifetime of the process. Dropping it shuts down all jobs.
///
/// # Errors
///
/// Returns [`JobSchedulerError`] if the scheduler cannot be initialised,
/// a cron expression is rejected, or the scheduler fails to start.
pub async fn build_scheduler(
    pool: PgPool,
    controller: Arc<ReportController>,
    config: Arc<AppConfig>,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;

    for report_type in ReportType::ALL {
        register_report_job(
            &scheduler,
            Arc::clone(&controller),
            report_type,
            config.schedules.cron_for(report_type),
        )
        .await?;
    }
    register_watchdog_job(&scheduler, Arc::clone(&controller), &config).await?;
    register_cache_purge_job(&scheduler, pool).await?;

    scheduler.start().await?;
    Ok(scheduler)
}

async fn register_report_job(
    scheduler: &JobScheduler,
    controller: Arc<ReportController>,
    report_type: ReportType,
    cron: &str,
) -> Result<(), JobSchedulerError> {
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let controller = Arc::clone(&controller);

        Box::pin(async move {
            run_scheduled_report(&controller, report_type).await;
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(report_type = %report_type, cron, "scheduler: report job registered");
    Ok(())
}

async fn run_scheduled_report(controller: &ReportController, report_type: ReportType) {
    let scheduled_date = Utc::now().date_naive();
    tracing::info!(
        report_type = %report_type,
        scheduled_date = %scheduled_date,
        "scheduler: starting report run"
    );

    match controller
        .execute(report_type, scheduled_date, TriggerSource::Scheduler)
        .await
    {
        Ok(payload) => tracing::info!(
            run_id = %payload.run.run_id,
            status = %payload.run.status,
            symbols = payload.results.len(),
            "scheduler: report run complete"
        ),
        Err(PipelineError::Discarded { run_id }) => {
            tracing::warn!(run_id = %run_id, "scheduler: report run discarded");
        }
        Err(e) => tracing::error!(
            report_type = %report_type,
            error = %e,
            "scheduler: report run failed"
        ),
    }
}

async fn register_watchdog_job(
    scheduler: &JobScheduler,
    controller: Arc<ReportController>,
    config: &AppConfig,
) -> Result<(), JobSchedulerError> {
    let limits = WatchdogLimits::from_app_config(config);

    let job = Job::new_async(WATCHDOG_CRON, move |_uuid, _lock| {
        let controller = Arc::clone(&controller);

        Box::pin(async move {
            match sweep_stale_runs(controller.ledger().as_ref(), limits, Utc::now()).await {
                Ok(failed) if !failed.is_empty() => {
                    tracing::warn!(count = failed.len(), "scheduler: watchdog failed stuck runs");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "scheduler: watchdog sweep failed"),
            }
        })
    })?;

    scheduler.add(job).await?;
    Ok(())
}

async fn register_cache_purge_job(
    scheduler: &JobScheduler,
    pool: PgPool,
) -> Result<(), JobSchedulerError> {
    let pool = Arc::new(pool);

    let job = Job::new_async(CACHE_PURGE_CRON, move |_uuid, _lock| {
        let pool = Arc::clone(&pool);

        Box::pin(async move {
            match sentra_db::purge_expired_cache_entries(&pool, Utc::now()).await {
                Ok(removed) => {
                    tracing::debug!(removed, "scheduler: expired cache entries purged");
                }
                Err(e) => tracing::error!(error = %e, "scheduler: cache purge failed"),
            }
        })
    })?;

    scheduler.add(job).await?;
    Ok(())
}
