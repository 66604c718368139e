//! Domain types shared by every sentra crate.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Implements `as_str`, `Display` and `FromStr` for a unit-only enum whose
/// wire form is a fixed lowercase string.
macro_rules! string_enum {
    ($ty:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(CoreError::UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Models
// ---------------------------------------------------------------------------

/// One of the two independent inference models consulted per symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelId {
    A,
    B,
}

string_enum!(ModelId, "model_id", { A => "a", B => "b" });

/// Broad class of an inference model. Generative models get a longer
/// per-call timeout than classifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Classifier,
    Generative,
}

string_enum!(ModelKind, "model_kind", {
    Classifier => "classifier",
    Generative => "generative",
});

impl ModelKind {
    #[must_use]
    pub fn default_timeout_secs(self) -> u64 {
        match self {
            ModelKind::Classifier => 15,
            ModelKind::Generative => 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Bullish,
    Bearish,
    Neutral,
}

string_enum!(Direction, "direction", {
    Bullish => "bullish",
    Bearish => "bearish",
    Neutral => "neutral",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Pending,
    Success,
    Failed,
    Timeout,
    Skipped,
}

string_enum!(InvocationStatus, "invocation_status", {
    Pending => "pending",
    Success => "success",
    Failed => "failed",
    Timeout => "timeout",
    Skipped => "skipped",
});

/// Terminal outcome of one model invocation, as reported by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationOutcome {
    Success { direction: Direction, confidence: f64 },
    Failed { message: String },
    TimedOut { message: String },
    Skipped { reason: String },
}

/// An invocation that has been prepared but not yet finalized.
///
/// Consuming it through [`PendingInvocation::finish`] is the only way to
/// obtain a terminal [`ModelInvocation`], so each invocation is finalized
/// exactly once.
#[derive(Debug, Clone)]
pub struct PendingInvocation {
    model_id: ModelId,
    symbol: String,
    articles_analyzed: u32,
}

impl PendingInvocation {
    #[must_use]
    pub fn new(model_id: ModelId, symbol: &str, articles_analyzed: u32) -> Self {
        Self {
            model_id,
            symbol: symbol.to_string(),
            articles_analyzed,
        }
    }

    #[must_use]
    pub fn model_id(&self) -> ModelId {
        self.model_id
    }

    #[must_use]
    pub fn status(&self) -> InvocationStatus {
        InvocationStatus::Pending
    }

    /// Finalize the invocation.
    ///
    /// Confidence is clamped into `[0, 1]`; a non-finite confidence is
    /// recorded as a failure since it cannot satisfy the success invariant.
    #[must_use]
    pub fn finish(
        self,
        outcome: InvocationOutcome,
        response_time_ms: u64,
        attempts: u32,
    ) -> ModelInvocation {
        let (status, direction, confidence, error) = match outcome {
            InvocationOutcome::Success {
                direction,
                confidence,
            } if confidence.is_finite() => (
                InvocationStatus::Success,
                Some(direction),
                Some(confidence.clamp(0.0, 1.0)),
                None,
            ),
            InvocationOutcome::Success { confidence, .. } => (
                InvocationStatus::Failed,
                None,
                None,
                Some(format!("invalid_response: non-finite confidence {confidence}")),
            ),
            InvocationOutcome::Failed { message } => {
                (InvocationStatus::Failed, None, None, Some(message))
            }
            InvocationOutcome::TimedOut { message } => {
                (InvocationStatus::Timeout, None, None, Some(message))
            }
            InvocationOutcome::Skipped { reason } => {
                (InvocationStatus::Skipped, None, None, Some(reason))
            }
        };

        ModelInvocation {
            model_id: self.model_id,
            symbol: self.symbol,
            status,
            direction,
            confidence,
            error,
            response_time_ms,
            articles_analyzed: self.articles_analyzed,
            attempts,
        }
    }
}

/// One finalized attempt to call one model for one symbol.
///
/// `status == Success` exactly when `direction` and `confidence` are set;
/// `Failed`, `Timeout` and `Skipped` always carry an `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "InvocationRecord")]
pub struct ModelInvocation {
    model_id: ModelId,
    symbol: String,
    status: InvocationStatus,
    direction: Option<Direction>,
    confidence: Option<f64>,
    error: Option<String>,
    response_time_ms: u64,
    articles_analyzed: u32,
    attempts: u32,
}

impl ModelInvocation {
    #[must_use]
    pub fn model_id(&self) -> ModelId {
        self.model_id
    }

    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    #[must_use]
    pub fn status(&self) -> InvocationStatus {
        self.status
    }

    #[must_use]
    pub fn direction(&self) -> Option<Direction> {
        self.direction
    }

    #[must_use]
    pub fn confidence(&self) -> Option<f64> {
        self.confidence
    }

    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[must_use]
    pub fn response_time_ms(&self) -> u64 {
        self.response_time_ms
    }

    #[must_use]
    pub fn articles_analyzed(&self) -> u32 {
        self.articles_analyzed
    }

    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The `(direction, confidence)` pair of a successful invocation.
    #[must_use]
    pub fn signal(&self) -> Option<(Direction, f64)> {
        match (self.status, self.direction, self.confidence) {
            (InvocationStatus::Success, Some(direction), Some(confidence)) => {
                Some((direction, confidence))
            }
            _ => None,
        }
    }
}

/// Wire shape of [`ModelInvocation`], checked before it becomes one.
#[derive(Deserialize)]
struct InvocationRecord {
    model_id: ModelId,
    symbol: String,
    status: InvocationStatus,
    direction: Option<Direction>,
    confidence: Option<f64>,
    error: Option<String>,
    response_time_ms: u64,
    articles_analyzed: u32,
    attempts: u32,
}

impl TryFrom<InvocationRecord> for ModelInvocation {
    type Error = InvalidRecord;

    fn try_from(record: InvocationRecord) -> Result<Self, Self::Error> {
        match record.status {
            InvocationStatus::Pending => {
                return Err(InvalidRecord("invocation is still pending"));
            }
            InvocationStatus::Success => {
                if record.direction.is_none() || record.error.is_some() {
                    return Err(InvalidRecord(
                        "successful invocation needs a direction and no error",
                    ));
                }
                match record.confidence {
                    Some(c) if c.is_finite() && (0.0..=1.0).contains(&c) => {}
                    _ => {
                        return Err(InvalidRecord(
                            "successful invocation needs a confidence in [0, 1]",
                        ))
                    }
                }
            }
            InvocationStatus::Failed | InvocationStatus::Timeout | InvocationStatus::Skipped => {
                if record.direction.is_some() || record.confidence.is_some() {
                    return Err(InvalidRecord("unsuccessful invocation carries a signal"));
                }
                if record.error.is_none() {
                    return Err(InvalidRecord("unsuccessful invocation has no error"));
                }
            }
        }

        Ok(Self {
            model_id: record.model_id,
            symbol: record.symbol,
            status: record.status,
            direction: record.direction,
            confidence: record.confidence,
            error: record.error,
            response_time_ms: record.response_time_ms,
            articles_analyzed: record.articles_analyzed,
            attempts: record.attempts,
        })
    }
}

/// A serialized invocation or consensus result that breaks an invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid record: {0}")]
pub struct InvalidRecord(&'static str);

// ---------------------------------------------------------------------------
// Consensus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Agreement {
    Agree,
    PartialAgree,
    Disagree,
    Incomplete,
}

string_enum!(Agreement, "agreement", {
    Agree => "AGREE",
    PartialAgree => "PARTIAL_AGREE",
    Disagree => "DISAGREE",
    Incomplete => "INCOMPLETE",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
    Avoid,
}

string_enum!(Action, "action", {
    StrongBuy => "STRONG_BUY",
    Buy => "BUY",
    Hold => "HOLD",
    Sell => "SELL",
    StrongSell => "STRONG_SELL",
    Avoid => "AVOID",
});

/// The reconciled signal for one symbol in one run.
///
/// Only [`crate::consensus::consensus`] builds these; fields are read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ConsensusRecord")]
pub struct ConsensusResult {
    pub(crate) symbol: String,
    pub(crate) agreement: Agreement,
    pub(crate) final_direction: Direction,
    pub(crate) final_confidence: f64,
    pub(crate) action: Action,
    pub(crate) contributing: [ModelInvocation; 2],
}

impl ConsensusResult {
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    #[must_use]
    pub fn agreement(&self) -> Agreement {
        self.agreement
    }

    #[must_use]
    pub fn final_direction(&self) -> Direction {
        self.final_direction
    }

    #[must_use]
    pub fn final_confidence(&self) -> f64 {
        self.final_confidence
    }

    #[must_use]
    pub fn action(&self) -> Action {
        self.action
    }

    /// The Model A and Model B invocations, in that order.
    #[must_use]
    pub fn contributing(&self) -> &[ModelInvocation; 2] {
        &self.contributing
    }

    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        self.agreement == Agreement::Incomplete
    }
}

/// Wire shape of [`ConsensusResult`], checked before it becomes one.
#[derive(Deserialize)]
struct ConsensusRecord {
    symbol: String,
    agreement: Agreement,
    final_direction: Direction,
    final_confidence: f64,
    action: Action,
    contributing: [ModelInvocation; 2],
}

impl TryFrom<ConsensusRecord> for ConsensusResult {
    type Error = InvalidRecord;

    fn try_from(record: ConsensusRecord) -> Result<Self, Self::Error> {
        let [model_a, model_b] = &record.contributing;
        if model_a.model_id != ModelId::A || model_b.model_id != ModelId::B {
            return Err(InvalidRecord("contributing invocations must be Model A then Model B"));
        }
        if model_a.symbol != record.symbol || model_b.symbol != record.symbol {
            return Err(InvalidRecord("contributing invocations are for another symbol"));
        }
        if !record.final_confidence.is_finite() || !(0.0..=1.0).contains(&record.final_confidence)
        {
            return Err(InvalidRecord("final confidence must be in [0, 1]"));
        }

        let consistent = match (record.agreement, model_a.signal(), model_b.signal()) {
            (Agreement::Incomplete, None, None) => {
                record.final_direction == Direction::Neutral
                    && record.final_confidence <= f64::EPSILON
                    && record.action == Action::Hold
            }
            (Agreement::Agree, Some((a, _)), Some((b, _))) => {
                a == b && record.final_direction == a
            }
            (Agreement::Disagree, Some((a, _)), Some((b, _))) => {
                a != b && record.action == Action::Avoid
            }
            (Agreement::PartialAgree, Some((a, _)), Some((b, _))) => {
                a != b && (record.final_direction == a || record.final_direction == b)
            }
            (Agreement::PartialAgree, Some((direction, _)), None)
            | (Agreement::PartialAgree, None, Some((direction, _))) => {
                record.final_direction == direction
            }
            _ => false,
        };
        if !consistent {
            return Err(InvalidRecord("agreement does not match the contributing invocations"));
        }

        let action_fits_direction = match record.action {
            Action::Avoid => record.agreement == Agreement::Disagree,
            Action::Hold => true,
            Action::StrongBuy | Action::Buy => record.final_direction == Direction::Bullish,
            Action::StrongSell | Action::Sell => record.final_direction == Direction::Bearish,
        };
        if !action_fits_direction {
            return Err(InvalidRecord("action contradicts the final direction"));
        }

        Ok(Self {
            symbol: record.symbol,
            agreement: record.agreement,
            final_direction: record.final_direction,
            final_confidence: record.final_confidence,
            action: record.action,
            contributing: record.contributing,
        })
    }
}

// ---------------------------------------------------------------------------
// Job runs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    Premarket,
    Midday,
    EndOfDay,
}

string_enum!(ReportType, "report_type", {
    Premarket => "premarket",
    Midday => "midday",
    EndOfDay => "end_of_day",
});

impl ReportType {
    pub const ALL: [ReportType; 3] = [
        ReportType::Premarket,
        ReportType::Midday,
        ReportType::EndOfDay,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Partial,
    Failed,
}

string_enum!(RunStatus, "run_status", {
    Running => "running",
    Success => "success",
    Partial => "partial",
    Failed => "failed",
});

impl RunStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// The five fixed phases of a report run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    DataFetch,
    AiAnalysis,
    Storage,
    Finalize,
}

string_enum!(Stage, "stage", {
    Init => "init",
    DataFetch => "data_fetch",
    AiAnalysis => "ai_analysis",
    Storage => "storage",
    Finalize => "finalize",
});

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Init,
        Stage::DataFetch,
        Stage::AiAnalysis,
        Stage::Storage,
        Stage::Finalize,
    ];

    /// The stage that follows this one, or `None` after `Finalize`.
    #[must_use]
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Init => Some(Stage::DataFetch),
            Stage::DataFetch => Some(Stage::AiAnalysis),
            Stage::AiAnalysis => Some(Stage::Storage),
            Stage::Storage => Some(Stage::Finalize),
            Stage::Finalize => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Scheduler,
    Cli,
    Retry,
}

string_enum!(TriggerSource, "trigger_source", {
    Scheduler => "scheduler",
    Cli => "cli",
    Retry => "retry",
});

// ---------------------------------------------------------------------------
// News
// ---------------------------------------------------------------------------

/// A news article returned by the news provider collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub title: String,
    pub url: String,
    pub summary: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source: String,
}
