use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use sentra_cache::MemoryStore;
use sentra_core::{Action, Agreement, Direction, ModelId};
use sentra_inference::{
    CircuitBreaker, InferenceBackend, InferenceError, ModelGateway, ModelSignal, RetryPolicy,
};
use sentra_news::NewsError;

use super::*;
use crate::ledger::MemoryLedger;
use crate::run::{JobDateSummary, StageLogEntry};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Answers per symbol; symbols without a script fail with HTTP 500.
struct SymbolBackend {
    signals: HashMap<&'static str, (Direction, f64)>,
    calls: AtomicU32,
}

impl SymbolBackend {
    fn new(signals: &[(&'static str, Direction, f64)]) -> Arc<Self> {
        Arc::new(Self {
            signals: signals.iter().map(|(s, d, c)| (*s, (*d, *c))).collect(),
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceBackend for SymbolBackend {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<ModelSignal, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.signals.get(request.symbol.as_str()) {
            Some((direction, confidence)) => Ok(ModelSignal {
                direction: *direction,
                confidence: *confidence,
                raw_text: None,
            }),
            None => Err(InferenceError::Status {
                status: 500,
                body: "model unavailable".to_string(),
            }),
        }
    }
}

#[derive(Default)]
struct StaticNews {
    failing: Vec<&'static str>,
}

#[async_trait]
impl NewsProvider for StaticNews {
    async fn fetch_articles(
        &self,
        symbol: &str,
        _window: NewsWindow,
    ) -> Result<Vec<Article>, NewsError> {
        if self.failing.contains(&symbol) {
            return Err(NewsError::Status(503));
        }
        Ok(vec![Article {
            title: format!("{symbol} rallies"),
            url: format!("https://example.com/{symbol}"),
            summary: String::new(),
            published_at: None,
            source: "Example Wire".to_string(),
        }])
    }
}

/// Fails every running run the moment news is requested, the way the
/// watchdog would.
struct TerminatingNews {
    ledger: Arc<MemoryLedger>,
}

#[async_trait]
impl NewsProvider for TerminatingNews {
    async fn fetch_articles(
        &self,
        _symbol: &str,
        _window: NewsWindow,
    ) -> Result<Vec<Article>, NewsError> {
        for run in self.ledger.list_recent_runs(10).await.unwrap() {
            if run.status == RunStatus::Running {
                let _ = self
                    .ledger
                    .finish_run(run.run_id, RunStatus::Failed, &["stuck".to_string()], &[])
                    .await;
            }
        }
        Ok(Vec::new())
    }
}

struct HangingNews;

#[async_trait]
impl NewsProvider for HangingNews {
    async fn fetch_articles(
        &self,
        _symbol: &str,
        _window: NewsWindow,
    ) -> Result<Vec<Article>, NewsError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(Vec::new())
    }
}

#[derive(Clone, Copy)]
enum OnSignal {
    /// Every signal write fails with a database error.
    Refuse,
    /// The first write lands, then the run is failed before the next one.
    TerminateAfterFirst,
}

/// Delegates to a [`MemoryLedger`] but interferes with signal writes.
struct SignalHookLedger {
    inner: Arc<MemoryLedger>,
    on_signal: OnSignal,
    stored: AtomicU32,
}

impl SignalHookLedger {
    fn new(inner: Arc<MemoryLedger>, on_signal: OnSignal) -> Arc<Self> {
        Arc::new(Self {
            inner,
            on_signal,
            stored: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl Ledger for SignalHookLedger {
    async fn create_run(&self, new_run: NewRun) -> Result<JobRun, LedgerError> {
        self.inner.create_run(new_run).await
    }

    async fn advance_stage(
        &self,
        run_id: Uuid,
        from: Stage,
        to: Stage,
        warnings: &[String],
    ) -> Result<JobRun, LedgerError> {
        self.inner.advance_stage(run_id, from, to, warnings).await
    }

    async fn finish_run(
        &self,
        run_id: Uuid,
        status: RunStatus,
        errors: &[String],
        warnings: &[String],
    ) -> Result<JobRun, LedgerError> {
        self.inner.finish_run(run_id, status, errors, warnings).await
    }

    async fn store_signal(
        &self,
        run_id: Uuid,
        result: &ConsensusResult,
    ) -> Result<(), LedgerError> {
        match self.on_signal {
            OnSignal::Refuse => Err(LedgerError::Db(sentra_db::DbError::NotFound)),
            OnSignal::TerminateAfterFirst => {
                self.inner.store_signal(run_id, result).await?;
                if self.stored.fetch_add(1, Ordering::SeqCst) == 0 {
                    self.inner
                        .finish_run(run_id, RunStatus::Failed, &["stuck".to_string()], &[])
                        .await?;
                }
                Ok(())
            }
        }
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<JobRun>, LedgerError> {
        self.inner.get_run(run_id).await
    }

    async fn list_runs(
        &self,
        scheduled_date: NaiveDate,
        report_type: ReportType,
    ) -> Result<Vec<JobRun>, LedgerError> {
        self.inner.list_runs(scheduled_date, report_type).await
    }

    async fn list_recent_runs(&self, limit: usize) -> Result<Vec<JobRun>, LedgerError> {
        self.inner.list_recent_runs(limit).await
    }

    async fn date_summary(
        &self,
        scheduled_date: NaiveDate,
        report_type: ReportType,
    ) -> Result<Option<JobDateSummary>, LedgerError> {
        self.inner.date_summary(scheduled_date, report_type).await
    }

    async fn stage_log(&self, run_id: Uuid) -> Result<Vec<StageLogEntry>, LedgerError> {
        self.inner.stage_log(run_id).await
    }

    async fn stale_runs(
        &self,
        stage_cutoff: DateTime<Utc>,
        run_cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobRun>, LedgerError> {
        self.inner.stale_runs(stage_cutoff, run_cutoff).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

fn gateway(model_id: ModelId, backend: Arc<SymbolBackend>) -> ModelGateway {
    ModelGateway::new(
        model_id,
        backend,
        Arc::new(CircuitBreaker::new(model_id, 100, Duration::from_secs(60))),
        RetryPolicy::new(1, 0, 0),
        Duration::from_secs(1),
    )
}

fn settings(symbols: &[&str]) -> ControllerSettings {
    ControllerSettings {
        symbols: symbols.iter().map(ToString::to_string).collect(),
        max_concurrent_symbols: 2,
        run_deadline: Duration::from_secs(30),
        news_window_hours: 24,
        news_cache_ttl_secs: 900,
        analysis_cache_ttl_secs: 900,
        consensus: ConsensusConfig::default(),
    }
}

struct Harness {
    ledger: Arc<MemoryLedger>,
    model_a: Arc<SymbolBackend>,
    model_b: Arc<SymbolBackend>,
    controller: ReportController,
}

fn harness_with(
    symbols: &[&str],
    model_a: Arc<SymbolBackend>,
    model_b: Arc<SymbolBackend>,
    news: Arc<dyn NewsProvider>,
    ledger: Arc<MemoryLedger>,
    run_ledger: Arc<dyn Ledger>,
) -> Harness {
    let gateways = Gateways::new(
        gateway(ModelId::A, Arc::clone(&model_a)),
        gateway(ModelId::B, Arc::clone(&model_b)),
    );
    let cache = Arc::new(TwoTierCache::new(64, Arc::new(MemoryStore::new())));
    let controller = ReportController::new(run_ledger, news, gateways, cache, settings(symbols));
    Harness {
        ledger,
        model_a,
        model_b,
        controller,
    }
}

fn harness(
    symbols: &[&str],
    model_a: Arc<SymbolBackend>,
    model_b: Arc<SymbolBackend>,
    news: Arc<dyn NewsProvider>,
) -> Harness {
    let ledger = Arc::new(MemoryLedger::new());
    harness_with(symbols, model_a, model_b, news, ledger.clone(), ledger)
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mixed_run_succeeds_with_incomplete_symbol_flagged() {
    let h = harness(
        &["AAPL", "MSFT"],
        SymbolBackend::new(&[("AAPL", Direction::Bullish, 0.9)]),
        SymbolBackend::new(&[("AAPL", Direction::Bullish, 0.8)]),
        Arc::new(StaticNews::default()),
    );

    let payload = h
        .controller
        .execute(ReportType::Premarket, date(), TriggerSource::Scheduler)
        .await
        .unwrap();

    assert_eq!(payload.run.status, RunStatus::Success);
    assert_eq!(payload.run.current_stage, Stage::Finalize);
    assert!(payload.run.executed_at.is_some());

    let symbols: Vec<&str> = payload.results.iter().map(ConsensusResult::symbol).collect();
    assert_eq!(symbols, vec!["AAPL", "MSFT"]);
    assert_eq!(payload.results[0].agreement(), Agreement::Agree);
    assert_eq!(payload.results[0].action(), Action::StrongBuy);
    assert!(payload.results[1].is_incomplete());
    assert!(payload
        .run
        .warnings
        .iter()
        .any(|w| w.starts_with("MSFT: consensus incomplete")));

    assert_eq!(h.ledger.signals(payload.run.run_id).len(), 2);
}

#[tokio::test]
async fn stages_are_a_strict_prefix_in_order() {
    let h = harness(
        &["SPY"],
        SymbolBackend::new(&[("SPY", Direction::Neutral, 0.5)]),
        SymbolBackend::new(&[("SPY", Direction::Neutral, 0.6)]),
        Arc::new(StaticNews::default()),
    );
    let payload = h
        .controller
        .execute(ReportType::Midday, date(), TriggerSource::Cli)
        .await
        .unwrap();

    let log = h.ledger.stage_log(payload.run.run_id).await.unwrap();
    let stages: Vec<Stage> = log.iter().map(|e| e.stage).collect();
    assert_eq!(stages, Stage::ALL.to_vec());
    assert!(log.iter().all(|e| e.ended_at.is_some()));
    assert!(log.windows(2).all(|w| w[0].started_at <= w[1].started_at));
}

#[tokio::test]
async fn only_symbol_incomplete_finalizes_partial() {
    let h = harness(
        &["NVDA"],
        SymbolBackend::new(&[]),
        SymbolBackend::new(&[]),
        Arc::new(StaticNews::default()),
    );
    let payload = h
        .controller
        .execute(ReportType::EndOfDay, date(), TriggerSource::Scheduler)
        .await
        .unwrap();

    assert_eq!(payload.run.status, RunStatus::Partial);
    assert_eq!(payload.run.current_stage, Stage::Finalize);
    let result = &payload.results[0];
    assert_eq!(result.agreement(), Agreement::Incomplete);
    assert_eq!(result.action(), Action::Hold);
    assert_eq!(result.final_direction(), Direction::Neutral);
}

#[tokio::test]
async fn empty_symbol_list_finalizes_partial_with_warning() {
    let h = harness(
        &[],
        SymbolBackend::new(&[]),
        SymbolBackend::new(&[]),
        Arc::new(StaticNews::default()),
    );
    let payload = h
        .controller
        .execute(ReportType::Premarket, date(), TriggerSource::Cli)
        .await
        .unwrap();
    assert_eq!(payload.run.status, RunStatus::Partial);
    assert!(payload.results.is_empty());
    assert!(payload
        .run
        .warnings
        .contains(&"no symbols configured for this report".to_string()));
}

#[tokio::test]
async fn news_failure_is_a_warning_and_symbol_proceeds_without_articles() {
    let h = harness(
        &["QQQ"],
        SymbolBackend::new(&[("QQQ", Direction::Bearish, 0.7)]),
        SymbolBackend::new(&[("QQQ", Direction::Bearish, 0.7)]),
        Arc::new(StaticNews {
            failing: vec!["QQQ"],
        }),
    );
    let payload = h
        .controller
        .execute(ReportType::Midday, date(), TriggerSource::Scheduler)
        .await
        .unwrap();

    assert_eq!(payload.run.status, RunStatus::Success);
    assert!(payload.run.warnings[0].starts_with("QQQ: news fetch failed"));
    let [model_a, _] = payload.results[0].contributing();
    assert_eq!(model_a.articles_analyzed(), 0);
}

#[tokio::test]
async fn complete_analysis_is_served_from_cache_on_rerun() {
    let h = harness(
        &["AAPL"],
        SymbolBackend::new(&[("AAPL", Direction::Bullish, 0.9)]),
        SymbolBackend::new(&[("AAPL", Direction::Bullish, 0.9)]),
        Arc::new(StaticNews::default()),
    );
    let first = h
        .controller
        .execute(ReportType::Midday, date(), TriggerSource::Scheduler)
        .await
        .unwrap();
    let second = h
        .controller
        .execute(ReportType::Midday, date(), TriggerSource::Retry)
        .await
        .unwrap();

    assert_eq!(h.model_a.calls(), 1);
    assert_eq!(h.model_b.calls(), 1);
    assert_eq!(first.results, second.results);

    let summary = h
        .ledger
        .date_summary(date(), ReportType::Midday)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.latest_run_id, second.run.run_id);
    assert_eq!(summary.run_count, 2);
}

#[tokio::test]
async fn degraded_analysis_is_not_cached() {
    let h = harness(
        &["MSFT"],
        SymbolBackend::new(&[("MSFT", Direction::Bullish, 0.7)]),
        SymbolBackend::new(&[]),
        Arc::new(StaticNews::default()),
    );
    for trigger in [TriggerSource::Scheduler, TriggerSource::Retry] {
        let payload = h
            .controller
            .execute(ReportType::Midday, date(), trigger)
            .await
            .unwrap();
        assert_eq!(payload.results[0].agreement(), Agreement::PartialAgree);
    }
    assert_eq!(h.model_a.calls(), 2);
    assert_eq!(h.model_b.calls(), 2);
}

#[tokio::test]
async fn externally_terminated_run_discards_results() {
    let ledger = Arc::new(MemoryLedger::new());
    let h = harness_with(
        &["AAPL"],
        SymbolBackend::new(&[("AAPL", Direction::Bullish, 0.9)]),
        SymbolBackend::new(&[("AAPL", Direction::Bullish, 0.9)]),
        Arc::new(TerminatingNews {
            ledger: Arc::clone(&ledger),
        }),
        ledger.clone(),
        ledger.clone(),
    );

    let err = h
        .controller
        .execute(ReportType::Premarket, date(), TriggerSource::Scheduler)
        .await
        .unwrap_err();
    let PipelineError::Discarded { run_id } = err else {
        panic!("expected Discarded, got {err:?}");
    };

    let run = ledger.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.current_stage, Stage::DataFetch);
    assert_eq!(run.errors, vec!["stuck".to_string()]);
    assert!(ledger.signals(run_id).is_empty());
}

#[tokio::test]
async fn run_terminated_during_storage_stops_signal_writes() {
    let ledger = Arc::new(MemoryLedger::new());
    let hooked = SignalHookLedger::new(Arc::clone(&ledger), OnSignal::TerminateAfterFirst);
    let h = harness_with(
        &["AAPL", "MSFT", "NVDA"],
        SymbolBackend::new(&[("AAPL", Direction::Bullish, 0.9)]),
        SymbolBackend::new(&[("AAPL", Direction::Bullish, 0.9)]),
        Arc::new(StaticNews::default()),
        ledger.clone(),
        hooked,
    );

    let err = h
        .controller
        .execute(ReportType::Midday, date(), TriggerSource::Scheduler)
        .await
        .unwrap_err();
    let PipelineError::Discarded { run_id } = err else {
        panic!("expected Discarded, got {err:?}");
    };

    let run = ledger.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.current_stage, Stage::Storage);
    assert_eq!(run.errors, vec!["stuck".to_string()]);
    let stored = ledger.signals(run_id);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].symbol(), "AAPL");
}

#[tokio::test]
async fn ledger_write_failure_fails_the_run() {
    let ledger = Arc::new(MemoryLedger::new());
    let broken = SignalHookLedger::new(Arc::clone(&ledger), OnSignal::Refuse);
    let h = harness_with(
        &["AAPL"],
        SymbolBackend::new(&[("AAPL", Direction::Bullish, 0.9)]),
        SymbolBackend::new(&[("AAPL", Direction::Bullish, 0.9)]),
        Arc::new(StaticNews::default()),
        ledger.clone(),
        broken,
    );

    let err = h
        .controller
        .execute(ReportType::EndOfDay, date(), TriggerSource::Cli)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Ledger(LedgerError::Db(_))), "got {err:?}");

    let runs = ledger.list_runs(date(), ReportType::EndOfDay).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert_eq!(runs[0].current_stage, Stage::Storage);
    assert!(runs[0].errors[0].starts_with("ledger write failed"));
}

#[tokio::test]
async fn run_deadline_fails_the_run() {
    let ledger = Arc::new(MemoryLedger::new());
    let mut h = harness_with(
        &["AAPL"],
        SymbolBackend::new(&[]),
        SymbolBackend::new(&[]),
        Arc::new(HangingNews),
        ledger.clone(),
        ledger.clone(),
    );
    h.controller.settings.run_deadline = Duration::from_millis(50);

    let err = h
        .controller
        .execute(ReportType::Midday, date(), TriggerSource::Scheduler)
        .await
        .unwrap_err();
    let PipelineError::DeadlineExceeded { run_id, .. } = err else {
        panic!("expected DeadlineExceeded, got {err:?}");
    };
    let run = ledger.get_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(h.model_a.calls(), 0);
}

#[test]
fn classify_run_partial_only_when_nothing_complete() {
    assert_eq!(classify_run(&[]).0, RunStatus::Partial);
}
