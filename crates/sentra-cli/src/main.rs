mod report;

use std::sync::Arc;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use sentra_cache::{PgDurableStore, TwoTierCache};
use sentra_core::{AppConfig, ReportType};
use sentra_news::GoogleNewsRss;
use sentra_pipeline::{ControllerSettings, PgLedger, ReportController};
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "sentra-cli")]
#[command(about = "Sentra report command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Execute one report run now
    Run {
        /// premarket, midday or end_of_day
        #[arg(long)]
        report_type: ReportType,

        /// Scheduled date (YYYY-MM-DD); defaults to today in UTC
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Show the latest run summary for one report
    Status {
        #[arg(long)]
        report_type: ReportType,

        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// List the most recent runs across all reports
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show the stage log of one run
    Stages { run_id: Uuid },
    /// Fail running runs that exceeded their stage or run deadline
    Sweep,
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommands {
    Ping,
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        println!("sentra-cli: no command given; see --help");
        return Ok(());
    };

    let config = sentra_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = sentra_db::PoolConfig::from_app_config(&config);
    let pool = sentra_db::connect_pool(&config.database_url, pool_config).await?;

    match command {
        Commands::Db {
            command: DbCommands::Ping,
        } => {
            sentra_db::health_check(&pool).await?;
            println!("database ok");
        }
        Commands::Db {
            command: DbCommands::Migrate,
        } => {
            let applied = sentra_db::run_migrations(&pool).await?;
            println!("applied {applied} migration(s)");
        }
        Commands::Run { report_type, date } => {
            let controller = build_controller(&config, pool)?;
            report::run_report(&controller, report_type, report::resolve_date(date)).await?;
        }
        Commands::Status { report_type, date } => {
            let ledger = PgLedger::new(pool);
            report::show_status(&ledger, report_type, report::resolve_date(date)).await?;
        }
        Commands::Runs { limit } => {
            report::list_recent(&PgLedger::new(pool), limit).await?;
        }
        Commands::Stages { run_id } => {
            report::show_stages(&PgLedger::new(pool), run_id).await?;
        }
        Commands::Sweep => {
            report::sweep(&PgLedger::new(pool), &config).await?;
        }
    }

    Ok(())
}

fn build_controller(config: &AppConfig, pool: PgPool) -> anyhow::Result<ReportController> {
    let cache = TwoTierCache::new(
        config.fast_cache_capacity,
        Arc::new(PgDurableStore::new(pool.clone())),
    );
    Ok(ReportController::new(
        Arc::new(PgLedger::new(pool)),
        Arc::new(GoogleNewsRss::new()?),
        sentra_inference::gateways_from_config(config)?,
        Arc::new(cache),
        ControllerSettings::from_app_config(config),
    ))
}

#[cfg(test)]
mod tests;
