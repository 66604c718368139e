//! Job Run Controller: drives one report run through its five stages.
//!
//! `init` creates the run, `data_fetch` pulls articles per symbol through the
//! `news` cache namespace, `ai_analysis` calls both models per symbol through
//! the `analysis` namespace and reconciles them, `storage` persists one
//! signal per symbol and `finalize` classifies the run. Every transition is a
//! ledger write; a failed ledger write fails the run.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use sentra_cache::{CacheKey, Namespace, TwoTierCache};
use sentra_core::{
    consensus_with, AppConfig, Article, ConsensusConfig, ConsensusResult, ReportType, RunStatus,
    Stage, TriggerSource,
};
use sentra_inference::{AnalysisRequest, Gateways};
use sentra_news::{NewsProvider, NewsWindow};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{LedgerError, PipelineError};
use crate::ledger::Ledger;
use crate::run::{JobRun, NewRun};

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub symbols: Vec<String>,
    pub max_concurrent_symbols: usize,
    pub run_deadline: Duration,
    pub news_window_hours: u32,
    pub news_cache_ttl_secs: u64,
    pub analysis_cache_ttl_secs: u64,
    pub consensus: ConsensusConfig,
}

impl ControllerSettings {
    #[must_use]
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            symbols: config.symbols.clone(),
            max_concurrent_symbols: config.max_concurrent_symbols.max(1),
            run_deadline: Duration::from_secs(config.run_deadline_secs),
            news_window_hours: config.news_window_hours,
            news_cache_ttl_secs: config.news_cache_ttl_secs,
            analysis_cache_ttl_secs: config.analysis_cache_ttl_secs,
            consensus: ConsensusConfig::default(),
        }
    }
}

/// The outcome of a run, as handed to report rendering.
#[derive(Debug, Clone, Serialize)]
pub struct ReportPayload {
    pub run: JobRun,
    /// One result per configured symbol, in configuration order.
    pub results: Vec<ConsensusResult>,
}

/// Articles gathered for one symbol during `data_fetch`.
#[derive(Debug, Clone)]
struct SymbolNews {
    symbol: String,
    articles: Vec<Article>,
    warning: Option<String>,
}

/// Terminal status for a run that reached `finalize`, plus the warning that
/// explains a `partial` outcome.
///
/// A run is `partial` when it had no symbols or every symbol came back
/// `INCOMPLETE`; anything else is `success` with the incomplete symbols left
/// visible in the results.
#[must_use]
pub fn classify_run(results: &[ConsensusResult]) -> (RunStatus, Option<String>) {
    if results.is_empty() {
        return (
            RunStatus::Partial,
            Some("no symbols configured for this report".to_string()),
        );
    }
    if results.iter().all(ConsensusResult::is_incomplete) {
        return (
            RunStatus::Partial,
            Some(format!(
                "all {} symbols are missing model analysis",
                results.len()
            )),
        );
    }
    (RunStatus::Success, None)
}

pub struct ReportController {
    ledger: Arc<dyn Ledger>,
    news: Arc<dyn NewsProvider>,
    gateways: Gateways,
    cache: Arc<TwoTierCache>,
    settings: ControllerSettings,
}

impl std::fmt::Debug for ReportController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReportController")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ReportController {
    #[must_use]
    pub fn new(
        ledger: Arc<dyn Ledger>,
        news: Arc<dyn NewsProvider>,
        gateways: Gateways,
        cache: Arc<TwoTierCache>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            ledger,
            news,
            gateways,
            cache,
            settings,
        }
    }

    #[must_use]
    pub fn ledger(&self) -> &Arc<dyn Ledger> {
        &self.ledger
    }

    #[must_use]
    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Execute one run of `report_type` for `scheduled_date`.
    ///
    /// Per-symbol failures never abort the run; they surface as warnings and
    /// `INCOMPLETE` results.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Ledger`] if a ledger write fails. The run is marked
    ///   `failed` when the ledger still accepts that write.
    /// - [`PipelineError::Discarded`] if the run was terminated by someone
    ///   else (normally the watchdog) while in flight.
    /// - [`PipelineError::DeadlineExceeded`] if the whole run outlives the
    ///   run deadline. The run is marked `failed`.
    pub async fn execute(
        &self,
        report_type: ReportType,
        scheduled_date: NaiveDate,
        trigger_source: TriggerSource,
    ) -> Result<ReportPayload, PipelineError> {
        let symbol_count = u32::try_from(self.settings.symbols.len()).unwrap_or(u32::MAX);
        let run = self
            .ledger
            .create_run(NewRun {
                scheduled_date,
                report_type,
                trigger_source,
                symbol_count,
            })
            .await?;
        let run_id = run.run_id;

        tracing::info!(
            run_id = %run_id,
            report_type = %report_type,
            scheduled_date = %scheduled_date,
            trigger_source = %trigger_source,
            symbols = symbol_count,
            "report run started"
        );

        let deadline = self.settings.run_deadline;
        match tokio::time::timeout(deadline, self.drive(run_id)).await {
            Ok(Ok(payload)) => {
                tracing::info!(
                    run_id = %run_id,
                    status = %payload.run.status,
                    warnings = payload.run.warnings.len(),
                    "report run finished"
                );
                Ok(payload)
            }
            Ok(Err(LedgerError::Rejected { reason, .. })) => {
                tracing::warn!(
                    run_id = %run_id,
                    reason = %reason,
                    "run terminated externally, discarding in-flight results"
                );
                Err(PipelineError::Discarded { run_id })
            }
            Ok(Err(e)) => {
                self.fail_run_best_effort(run_id, format!("ledger write failed: {e}"))
                    .await;
                Err(PipelineError::Ledger(e))
            }
            Err(_elapsed) => {
                let after_secs = deadline.as_secs();
                self.fail_run_best_effort(run_id, format!("run deadline of {after_secs}s exceeded"))
                    .await;
                Err(PipelineError::DeadlineExceeded { run_id, after_secs })
            }
        }
    }

    async fn drive(&self, run_id: Uuid) -> Result<ReportPayload, LedgerError> {
        let now = Utc::now();

        self.enter(run_id, Stage::Init, Stage::DataFetch, &[]).await?;
        let news = self.fetch_all(now).await;
        let news_warnings: Vec<String> = news.iter().filter_map(|n| n.warning.clone()).collect();

        self.enter(run_id, Stage::DataFetch, Stage::AiAnalysis, &news_warnings)
            .await?;
        let results = self.analyze_all(news, now).await;
        let incomplete: Vec<String> = results
            .iter()
            .filter(|r| r.is_incomplete())
            .map(|r| format!("{}: consensus incomplete, both models failed", r.symbol()))
            .collect();

        self.enter(run_id, Stage::AiAnalysis, Stage::Storage, &incomplete)
            .await?;
        for result in &results {
            self.ledger.store_signal(run_id, result).await?;
        }

        self.enter(run_id, Stage::Storage, Stage::Finalize, &[]).await?;
        let (status, warning) = classify_run(&results);
        let warnings: Vec<String> = warning.into_iter().collect();
        let run = self
            .ledger
            .finish_run(run_id, status, &[], &warnings)
            .await?;

        Ok(ReportPayload { run, results })
    }

    async fn enter(
        &self,
        run_id: Uuid,
        from: Stage,
        to: Stage,
        warnings: &[String],
    ) -> Result<JobRun, LedgerError> {
        let run = self.ledger.advance_stage(run_id, from, to, warnings).await?;
        tracing::info!(run_id = %run_id, stage = %to, "stage entered");
        Ok(run)
    }

    async fn fail_run_best_effort(&self, run_id: Uuid, message: String) {
        tracing::error!(run_id = %run_id, error = %message, "report run failed");
        if let Err(e) = self
            .ledger
            .finish_run(run_id, RunStatus::Failed, &[message], &[])
            .await
        {
            tracing::error!(run_id = %run_id, error = %e, "failed to mark report run as failed");
        }
    }

    async fn fetch_all(&self, now: DateTime<Utc>) -> Vec<SymbolNews> {
        let mut indexed: Vec<(usize, SymbolNews)> = stream::iter(self.settings.symbols.iter().cloned().enumerate())
            .map(|(idx, symbol)| async move { (idx, self.fetch_news(&symbol, now).await) })
            .buffer_unordered(self.settings.max_concurrent_symbols.max(1))
            .collect()
            .await;
        indexed.sort_by_key(|(idx, _)| *idx);
        indexed.into_iter().map(|(_, news)| news).collect()
    }

    async fn fetch_news(&self, symbol: &str, now: DateTime<Utc>) -> SymbolNews {
        let key = CacheKey::new(Namespace::News, symbol, now);
        if let Some(articles) = self.cache.get_json::<Vec<Article>>(&key).await {
            tracing::debug!(symbol, count = articles.len(), "news cache hit");
            return SymbolNews {
                symbol: symbol.to_string(),
                articles,
                warning: None,
            };
        }

        let window = NewsWindow::trailing_hours(self.settings.news_window_hours, now);
        match self.news.fetch_articles(symbol, window).await {
            Ok(articles) => {
                if let Err(e) = self
                    .cache
                    .set_json(&key, &articles, self.settings.news_cache_ttl_secs)
                    .await
                {
                    tracing::warn!(symbol, error = %e, "failed to cache news articles");
                }
                SymbolNews {
                    symbol: symbol.to_string(),
                    articles,
                    warning: None,
                }
            }
            Err(e) => {
                tracing::warn!(symbol, error = %e, "news fetch failed, continuing with no articles");
                SymbolNews {
                    symbol: symbol.to_string(),
                    articles: Vec::new(),
                    warning: Some(format!("{symbol}: news fetch failed: {e}")),
                }
            }
        }
    }

    async fn analyze_all(&self, news: Vec<SymbolNews>, now: DateTime<Utc>) -> Vec<ConsensusResult> {
        let mut indexed: Vec<(usize, ConsensusResult)> = stream::iter(news.into_iter().enumerate())
            .map(|(idx, item)| async move { (idx, self.analyze(item, now).await) })
            .buffer_unordered(self.settings.max_concurrent_symbols.max(1))
            .collect()
            .await;
        indexed.sort_by_key(|(idx, _)| *idx);
        indexed.into_iter().map(|(_, result)| result).collect()
    }

    async fn analyze(&self, news: SymbolNews, now: DateTime<Utc>) -> ConsensusResult {
        let key = CacheKey::new(Namespace::Analysis, &news.symbol, now);
        if let Some(cached) = self.cache.get_json::<ConsensusResult>(&key).await {
            tracing::debug!(symbol = %news.symbol, "analysis cache hit");
            return cached;
        }

        let request = AnalysisRequest::new(&news.symbol, news.articles);
        let (model_a, model_b) = self.gateways.invoke_both(&request).await;
        let both_succeeded = model_a.signal().is_some() && model_b.signal().is_some();
        let result = consensus_with(&self.settings.consensus, model_a, model_b);

        // Degraded results are not cached so a retry run asks the models again.
        if both_succeeded {
            if let Err(e) = self
                .cache
                .set_json(&key, &result, self.settings.analysis_cache_ttl_secs)
                .await
            {
                tracing::warn!(symbol = %news.symbol, error = %e, "failed to cache analysis");
            }
        }
        result
    }
}

#[cfg(test)]
#[path = "controller_test.rs"]
mod tests;
