use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::market::MarketSnapshot;

/// Trade direction recommended by an agent. Always a tagged variant,
/// never a free string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Long,
    Short,
    Hold,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Long => "LONG",
            Signal::Short => "SHORT",
            Signal::Hold => "HOLD",
        }
    }

    pub fn is_actionable(&self) -> bool {
        !matches!(self, Signal::Hold)
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static per-agent profile loaded from the roster. One agent trades
/// exactly one symbol; weights are read-only for the lifetime of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub agent_id: String,
    pub symbol: String,
    /// Strategy style label, e.g. "trend_following", "mean_reversion"
    pub style_tag: String,
    pub base_weight: Decimal,
    #[serde(default = "default_multiplier")]
    pub performance_multiplier: Decimal,
    /// Opaque per-agent tuning blob passed through to the provider
    #[serde(default)]
    pub config: serde_json::Value,
}

fn default_multiplier() -> Decimal {
    Decimal::ONE
}

impl AgentProfile {
    /// Effective arbitration weight, clamped to the allowed band.
    pub fn final_weight(&self) -> Decimal {
        (self.base_weight * self.performance_multiplier).clamp(dec!(0.7), dec!(1.3))
    }
}

/// One agent's recommendation for one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub agent_id: String,
    pub symbol: String,
    pub signal: Signal,
    pub raw_confidence: Decimal,
    pub normalized_confidence: Decimal,
    pub strategy_tag: String,
    pub reasoning: String,
    pub snapshot: MarketSnapshot,
}

impl Decision {
    /// A HOLD with zero confidence, used when the provider times out.
    pub fn hold(agent_id: &str, symbol: &str, reason: &str, snapshot: MarketSnapshot) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            agent_id: agent_id.to_string(),
            symbol: symbol.to_string(),
            signal: Signal::Hold,
            raw_confidence: Decimal::ZERO,
            normalized_confidence: Decimal::ZERO,
            strategy_tag: "hold".to_string(),
            reasoning: reason.to_string(),
            snapshot,
        }
    }
}

/// The single per-symbol action chosen by the arbitrator for one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitratedIntent {
    pub symbol: String,
    pub side: Signal,
    /// Aggregate weighted score of the winning side; representative
    /// confidence downstream.
    pub score: Decimal,
    pub contributing_agents: Vec<String>,
    pub reason: String,
}

impl ArbitratedIntent {
    pub fn hold(symbol: &str, reason: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            side: Signal::Hold,
            score: Decimal::ZERO,
            contributing_agents: Vec::new(),
            reason: reason.to_string(),
        }
    }
}
