//! Two-model consensus engine.
//!
//! [`consensus`] reconciles the Model A and Model B invocations for one
//! symbol into a single [`ConsensusResult`]. It is a pure function of its
//! inputs: no I/O, no clock, no randomness, so replaying a run or serving a
//! cached analysis always yields the same signal.
//!
//! | A        | B        | Agreement                                    |
//! |----------|----------|----------------------------------------------|
//! | ok, dir  | ok, dir  | `AGREE`                                      |
//! | ok, dir1 | ok, dir2 | `DISAGREE` if both significant, else `PARTIAL_AGREE` |
//! | ok       | failed   | `PARTIAL_AGREE` (penalized)                  |
//! | failed   | ok       | `PARTIAL_AGREE` (penalized)                  |
//! | failed   | failed   | `INCOMPLETE`                                 |
//!
//! Skipped, timed-out and pending invocations all count as failed here.

use crate::types::{Action, Agreement, ConsensusResult, Direction, ModelInvocation};

/// Tunables for [`consensus_with`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsensusConfig {
    /// Base weight of Model A in the agreement average.
    pub weight_a: f64,
    /// Base weight of Model B in the agreement average.
    pub weight_b: f64,
    /// Both confidences must exceed this for a split to count as `DISAGREE`.
    pub significance_threshold: f64,
    /// Multiplier applied when only one model produced a signal.
    pub single_model_penalty: f64,
    /// Confidence at or above which `STRONG_BUY` / `STRONG_SELL` is issued.
    pub strong_threshold: f64,
    /// Confidence at or above which `BUY` / `SELL` is issued.
    pub moderate_threshold: f64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            weight_a: 0.5,
            weight_b: 0.5,
            significance_threshold: 0.6,
            single_model_penalty: 0.85,
            strong_threshold: 0.85,
            moderate_threshold: 0.65,
        }
    }
}

/// Reconcile two invocations with the default [`ConsensusConfig`].
#[must_use]
pub fn consensus(model_a: ModelInvocation, model_b: ModelInvocation) -> ConsensusResult {
    consensus_with(&ConsensusConfig::default(), model_a, model_b)
}

/// Reconcile two invocations for the same symbol.
///
/// `model_a` and `model_b` are stored in that order in
/// [`ConsensusResult::contributing`]. The symbol is taken from `model_a`.
#[must_use]
pub fn consensus_with(
    config: &ConsensusConfig,
    model_a: ModelInvocation,
    model_b: ModelInvocation,
) -> ConsensusResult {
    let (agreement, final_direction, final_confidence, action) =
        match (model_a.signal(), model_b.signal()) {
            (Some((dir_a, conf_a)), Some((dir_b, conf_b))) if dir_a == dir_b => {
                let confidence = weighted_confidence(config, conf_a, conf_b);
                (
                    Agreement::Agree,
                    dir_a,
                    confidence,
                    action_for(config, dir_a, confidence, true),
                )
            }
            (Some(signal_a), Some(signal_b)) => {
                // Ties go to Model A so the outcome never depends on argument order
                // within a model pair.
                let (high, low) = if signal_a.1 >= signal_b.1 {
                    (signal_a, signal_b)
                } else {
                    (signal_b, signal_a)
                };
                let net = (high.1 - low.1).max(0.0);
                let both_significant = signal_a.1 > config.significance_threshold
                    && signal_b.1 > config.significance_threshold;

                if both_significant {
                    (Agreement::Disagree, high.0, net, Action::Avoid)
                } else {
                    // A split is never corroboration, so it caps at BUY/SELL.
                    (
                        Agreement::PartialAgree,
                        high.0,
                        net,
                        action_for(config, high.0, net, false),
                    )
                }
            }
            (Some((direction, confidence)), None) | (None, Some((direction, confidence))) => (
                Agreement::PartialAgree,
                direction,
                confidence * config.single_model_penalty,
                // The band comes from the surviving model's own confidence, but a
                // single uncorroborated model never earns a STRONG_* action.
                action_for(config, direction, confidence, false),
            ),
            (None, None) => (Agreement::Incomplete, Direction::Neutral, 0.0, Action::Hold),
        };

    ConsensusResult {
        symbol: model_a.symbol().to_string(),
        agreement,
        final_direction,
        final_confidence: final_confidence.clamp(0.0, 1.0),
        action,
        contributing: [model_a, model_b],
    }
}

/// Weighted average where each model's effective weight is scaled by its own
/// confidence, which biases the result toward the more confident model.
fn weighted_confidence(config: &ConsensusConfig, conf_a: f64, conf_b: f64) -> f64 {
    let effective_a = config.weight_a * conf_a;
    let effective_b = config.weight_b * conf_b;
    let total = effective_a + effective_b;
    if total <= f64::EPSILON {
        return 0.0;
    }
    (effective_a * conf_a + effective_b * conf_b) / total
}

fn action_for(
    config: &ConsensusConfig,
    direction: Direction,
    confidence: f64,
    allow_strong: bool,
) -> Action {
    let strong = allow_strong && confidence >= config.strong_threshold;
    let moderate = confidence >= config.moderate_threshold;
    match direction {
        Direction::Bullish if strong => Action::StrongBuy,
        Direction::Bullish if moderate => Action::Buy,
        Direction::Bearish if strong => Action::StrongSell,
        Direction::Bearish if moderate => Action::Sell,
        _ => Action::Hold,
    }
}
