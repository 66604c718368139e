//! Report run and ledger query handlers for the CLI.

use chrono::{NaiveDate, Utc};
use sentra_core::{AppConfig, ReportType, TriggerSource};
use sentra_pipeline::{
    sweep_stale_runs, JobRun, Ledger, PipelineError, ReportController, WatchdogLimits,
};
use uuid::Uuid;

pub(crate) fn resolve_date(date: Option<NaiveDate>) -> NaiveDate {
    date.unwrap_or_else(|| Utc::now().date_naive())
}

fn print_messages(label: &str, messages: &[String]) {
    for message in messages {
        println!("  {label}: {message}");
    }
}

/// Execute a run with `trigger_source = cli` and print the per-symbol results.
///
/// # Errors
///
/// Returns an error if the run could not be recorded, was discarded, or
/// exceeded its deadline.
pub(crate) async fn run_report(
    controller: &ReportController,
    report_type: ReportType,
    scheduled_date: NaiveDate,
) -> anyhow::Result<()> {
    let payload = match controller
        .execute(report_type, scheduled_date, TriggerSource::Cli)
        .await
    {
        Ok(payload) => payload,
        Err(PipelineError::Discarded { run_id }) => {
            anyhow::bail!("run {run_id} was terminated by the watchdog before it finished");
        }
        Err(e) => return Err(e.into()),
    };

    println!(
        "run {} {} {} -> {}",
        payload.run.run_id, report_type, scheduled_date, payload.run.status
    );
    println!(
        "{:<10}{:<12}{:<10}{:<12}CONFIDENCE",
        "SYMBOL", "ACTION", "DIRECTION", "AGREEMENT"
    );
    for result in &payload.results {
        println!(
            "{:<10}{:<12}{:<10}{:<12}{:.2}",
            result.symbol(),
            result.action(),
            result.final_direction(),
            result.agreement(),
            result.final_confidence()
        );
    }
    print_messages("warning", &payload.run.warnings);
    print_messages("error", &payload.run.errors);
    Ok(())
}

/// Print the date summary for one report key.
///
/// # Errors
///
/// Returns an error if the ledger query fails.
pub(crate) async fn show_status(
    ledger: &dyn Ledger,
    report_type: ReportType,
    scheduled_date: NaiveDate,
) -> anyhow::Result<()> {
    let Some(summary) = ledger.date_summary(scheduled_date, report_type).await? else {
        println!("no {report_type} runs recorded for {scheduled_date}");
        return Ok(());
    };

    println!("report:       {} {}", summary.report_type, summary.scheduled_date);
    println!("latest run:   {}", summary.latest_run_id);
    println!("status:       {}", summary.status);
    println!("stage:        {}", summary.current_stage);
    println!("trigger:      {}", summary.trigger_source);
    println!("runs so far:  {}", summary.run_count);
    if let Some(executed_at) = summary.executed_at {
        println!("executed at:  {}", executed_at.format("%Y-%m-%d %H:%M:%S"));
    }
    print_messages("warning", &summary.warnings);
    print_messages("error", &summary.errors);
    Ok(())
}

fn print_run_row(run: &JobRun) {
    println!(
        "{:<38}{:<12}{:<12}{:<10}{:<13}{:<11}{}",
        run.run_id.to_string(),
        run.scheduled_date.to_string(),
        run.report_type,
        run.status,
        run.current_stage,
        run.trigger_source,
        run.started_at.format("%Y-%m-%d %H:%M")
    );
}

/// List the most recent runs, newest first.
///
/// # Errors
///
/// Returns an error if the ledger query fails.
pub(crate) async fn list_recent(ledger: &dyn Ledger, limit: usize) -> anyhow::Result<()> {
    let runs = ledger.list_recent_runs(limit).await?;
    if runs.is_empty() {
        println!("no runs recorded yet");
        return Ok(());
    }

    println!(
        "{:<38}{:<12}{:<12}{:<10}{:<13}{:<11}STARTED",
        "RUN", "DATE", "REPORT", "STATUS", "STAGE", "TRIGGER"
    );
    for run in &runs {
        print_run_row(run);
    }
    Ok(())
}

/// Print the stage log of one run.
///
/// # Errors
///
/// Returns an error if the run does not exist or the ledger query fails.
pub(crate) async fn show_stages(ledger: &dyn Ledger, run_id: Uuid) -> anyhow::Result<()> {
    if ledger.get_run(run_id).await?.is_none() {
        anyhow::bail!("job run {run_id} not found");
    }

    println!("{:<13}{:<22}DURATION", "STAGE", "STARTED");
    for entry in ledger.stage_log(run_id).await? {
        let duration = entry
            .duration_ms()
            .map_or_else(|| "running".to_string(), |ms| format!("{ms}ms"));
        println!(
            "{:<13}{:<22}{}",
            entry.stage,
            entry.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            duration
        );
    }
    Ok(())
}

/// Run one watchdog sweep now.
///
/// # Errors
///
/// Returns an error if the stale-run scan fails.
pub(crate) async fn sweep(ledger: &dyn Ledger, config: &AppConfig) -> anyhow::Result<()> {
    let failed = sweep_stale_runs(ledger, WatchdogLimits::from_app_config(config), Utc::now()).await?;
    if failed.is_empty() {
        println!("no stuck runs");
    } else {
        for run_id in &failed {
            println!("failed stuck run {run_id}");
        }
    }
    Ok(())
}
