mod api;
mod middleware;
mod scheduler;

use std::sync::Arc;

use sentra_cache::{PgDurableStore, TwoTierCache};
use sentra_news::GoogleNewsRss;
use sentra_pipeline::{ControllerSettings, PgLedger, ReportController};
use tracing_subscriber::EnvFilter;

use crate::{
    api::{build_app, AppState},
    middleware::AuthState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Arc::new(sentra_core::load_app_config()?);
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let pool_config = sentra_db::PoolConfig::from_app_config(&config);
    let pool = sentra_db::connect_pool(&config.database_url, pool_config).await?;
    sentra_db::run_migrations(&pool).await?;

    let ledger = Arc::new(PgLedger::new(pool.clone()));
    let cache = Arc::new(TwoTierCache::new(
        config.fast_cache_capacity,
        Arc::new(PgDurableStore::new(pool.clone())),
    ));
    let controller = Arc::new(ReportController::new(
        ledger.clone(),
        Arc::new(GoogleNewsRss::new()?),
        sentra_inference::gateways_from_config(&config)?,
        cache,
        ControllerSettings::from_app_config(&config),
    ));

    let _scheduler =
        scheduler::build_scheduler(pool, Arc::clone(&controller), Arc::clone(&config)).await?;

    let auth = AuthState::from_env();
    let app = build_app(AppState { ledger }, auth);

    tracing::info!(
        bind_addr = %config.bind_addr,
        env = %config.env,
        symbols = config.symbols.len(),
        "sentra-server listening"
    );
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("received shutdown signal, starting graceful shutdown");
}
