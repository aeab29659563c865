//! Confidence normalization by recent accuracy
//!
//! Each agent keeps a rolling window of its last 20 decisions; closed trades
//! resolve back into the window via outcome feedback. Raw confidence scales
//! by `0.5 + accuracy`, so a coin-flip agent passes confidence through
//! unchanged and a consistently wrong one is cut in half.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

use crate::regime::RegimeReport;

const HISTORY_WINDOW: usize = 20;

#[derive(Debug, Clone)]
struct DecisionRecord {
    decision_id: Uuid,
    outcome: Option<bool>,
}

/// Per-agent rolling accuracy tracker.
pub struct ConfidenceNormalizer {
    history: HashMap<String, VecDeque<DecisionRecord>>,
}

impl ConfidenceNormalizer {
    pub fn new() -> Self {
        Self {
            history: HashMap::new(),
        }
    }

    /// Scale raw confidence by accuracy and the regime delta, clipped to [0, 1].
    pub fn normalize(
        &self,
        agent_id: &str,
        raw_confidence: Decimal,
        regime: Option<&RegimeReport>,
    ) -> Decimal {
        let multiplier = match self.accuracy(agent_id) {
            Some(accuracy) => dec!(0.5) + accuracy,
            None => Decimal::ONE,
        };
        let mut normalized = raw_confidence * multiplier;
        if let Some(report) = regime {
            normalized += report.confidence_delta;
        }
        normalized.clamp(Decimal::ZERO, Decimal::ONE)
    }

    /// Fraction of resolved decisions that were correct; None with no
    /// resolved history.
    pub fn accuracy(&self, agent_id: &str) -> Option<Decimal> {
        let history = self.history.get(agent_id)?;
        let resolved: Vec<bool> = history.iter().filter_map(|r| r.outcome).collect();
        if resolved.is_empty() {
            return None;
        }
        let correct = resolved.iter().filter(|&&v| v).count();
        Some(Decimal::from(correct as i64) / Decimal::from(resolved.len() as i64))
    }

    /// Record a decision before its outcome is known.
    pub fn record_decision(&mut self, agent_id: &str, decision_id: Uuid) {
        let history = self.history.entry(agent_id.to_string()).or_default();
        if history.len() == HISTORY_WINDOW {
            history.pop_front();
        }
        history.push_back(DecisionRecord {
            decision_id,
            outcome: None,
        });
    }

    /// Resolve a past decision once its trade closes. Unknown ids are
    /// ignored; the window may have already rolled past them.
    pub fn record_outcome(&mut self, agent_id: &str, decision_id: Uuid, was_correct: bool) {
        if let Some(history) = self.history.get_mut(agent_id) {
            if let Some(record) = history
                .iter_mut()
                .rev()
                .find(|r| r.decision_id == decision_id)
            {
                record.outcome = Some(was_correct);
            }
        }
    }

    pub fn decision_count(&self, agent_id: &str) -> usize {
        self.history.get(agent_id).map(|h| h.len()).unwrap_or(0)
    }
}

impl Default for ConfidenceNormalizer {
    fn default() -> Self {
        Self::new()
    }
}
