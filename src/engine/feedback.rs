//! Outcome feedback
//!
//! Binds closed trades back to the decisions that opened them. The link
//! feeds the confidence normalizer's rolling accuracy window and the
//! learning journal; an agent that keeps being wrong sizes itself down
//! through arbitration.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Decision, Signal, TradeOutcome};
use crate::persistence::csv_log::{CsvJournal, LearningRow};
use crate::signal::ConfidenceNormalizer;

#[derive(Debug, Clone)]
struct DecisionMeta {
    agent_id: String,
    symbol: String,
    signal: Signal,
    confidence: Decimal,
}

pub struct OutcomeFeedback {
    /// Issued decisions awaiting resolution, by decision id.
    index: HashMap<Uuid, DecisionMeta>,
}

impl OutcomeFeedback {
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
        }
    }

    /// Register a decision the moment it is made.
    pub fn record_decision(&mut self, decision: &Decision) {
        self.index.insert(
            decision.id,
            DecisionMeta {
                agent_id: decision.agent_id.clone(),
                symbol: decision.symbol.clone(),
                signal: decision.signal,
                confidence: decision.normalized_confidence,
            },
        );
    }

    /// Resolve a closed trade against its originating decision. Updates the
    /// normalizer's accuracy window and appends a learning record.
    pub fn resolve(
        &mut self,
        outcome: &TradeOutcome,
        normalizer: &mut ConfidenceNormalizer,
        journal: &CsvJournal,
    ) {
        let Some(decision_ref) = outcome.decision_ref else {
            debug!(symbol = %outcome.symbol, "close without decision ref, nothing to resolve");
            return;
        };
        let Some(meta) = self.index.remove(&decision_ref) else {
            debug!(
                symbol = %outcome.symbol,
                decision = %decision_ref,
                "decision ref not in index"
            );
            return;
        };

        let was_correct = outcome.realized_pnl > Decimal::ZERO;
        normalizer.record_outcome(&meta.agent_id, decision_ref, was_correct);
        journal.log_learning(LearningRow {
            ts: Utc::now(),
            agent_id: meta.agent_id,
            symbol: meta.symbol,
            decision_id: decision_ref.to_string(),
            signal: meta.signal.to_string(),
            confidence: meta.confidence,
            realized_pnl: outcome.realized_pnl,
            was_correct,
        });
    }

    /// Drop resolutions that can never arrive (e.g. entry never confirmed).
    pub fn forget(&mut self, decision_id: Uuid) {
        self.index.remove(&decision_id);
    }

    pub fn pending(&self) -> usize {
        self.index.len()
    }
}

impl Default for OutcomeFeedback {
    fn default() -> Self {
        Self::new()
    }
}
