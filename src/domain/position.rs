use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Direction of an open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn opposite(&self) -> Self {
        match self {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }

    /// Sign of the venue `positionAmt` for this side.
    pub fn from_position_amt(amt: Decimal) -> Option<Self> {
        if amt > Decimal::ZERO {
            Some(PositionSide::Long)
        } else if amt < Decimal::ZERO {
            Some(PositionSide::Short)
        } else {
            None
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Position lifecycle: OPEN → MONITORING → CLOSING → CLOSED.
/// OPEN → CLOSING is the emergency close path. CLOSED is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionState {
    Open,
    Monitoring,
    Closing,
    Closed,
}

impl PositionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionState::Open => "OPEN",
            PositionState::Monitoring => "MONITORING",
            PositionState::Closing => "CLOSING",
            PositionState::Closed => "CLOSED",
        }
    }

    /// Legal forward transitions of the state machine.
    pub fn can_transition_to(&self, next: PositionState) -> bool {
        matches!(
            (self, next),
            (PositionState::Open, PositionState::Monitoring)
                | (PositionState::Open, PositionState::Closing)
                | (PositionState::Monitoring, PositionState::Closing)
                | (PositionState::Closing, PositionState::Closed)
        )
    }
}

impl std::fmt::Display for PositionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A live position, born from a venue-confirmed entry fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub leverage: u32,
    pub opened_at: DateTime<Utc>,
    pub state: PositionState,
    pub tp_order_id: Option<String>,
    pub sl_order_id: Option<String>,
    pub tpsl_hash: Option<String>,
    pub partial_close_done: bool,
    /// Originating decision, resolved by outcome feedback on close
    pub decision_ref: Option<Uuid>,
}

impl Position {
    pub fn new(
        symbol: &str,
        side: PositionSide,
        quantity: Decimal,
        entry_price: Decimal,
        leverage: u32,
        decision_ref: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            side,
            quantity,
            entry_price,
            leverage,
            opened_at: Utc::now(),
            state: PositionState::Open,
            tp_order_id: None,
            sl_order_id: None,
            tpsl_hash: None,
            partial_close_done: false,
            decision_ref,
        }
    }

    /// Both protective legs acknowledged on the venue.
    pub fn has_protection(&self) -> bool {
        self.tp_order_id.is_some() && self.sl_order_id.is_some()
    }

    /// Unrealized return on the position margin at the given mark price.
    pub fn roi(&self, mark_price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        let price_move = match self.side {
            PositionSide::Long => (mark_price - self.entry_price) / self.entry_price,
            PositionSide::Short => (self.entry_price - mark_price) / self.entry_price,
        };
        price_move * Decimal::from(self.leverage)
    }

    /// Realized PnL for a quantity closed at the given price, fees excluded.
    pub fn realized_pnl(&self, exit_price: Decimal, quantity: Decimal) -> Decimal {
        match self.side {
            PositionSide::Long => (exit_price - self.entry_price) * quantity,
            PositionSide::Short => (self.entry_price - exit_price) * quantity,
        }
    }
}

/// Why a position exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ExitReason {
    Tp,
    Sl,
    Manual,
    Partial,
    Forced,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Tp => "TP",
            ExitReason::Sl => "SL",
            ExitReason::Manual => "MANUAL",
            ExitReason::Partial => "PARTIAL",
            ExitReason::Forced => "FORCED",
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Journal record of a completed close, linked back to its decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub position_id: Uuid,
    pub symbol: String,
    pub side: PositionSide,
    pub exit_reason: ExitReason,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    pub realized_pnl: Decimal,
    pub hold_duration_secs: i64,
    pub closed_at: DateTime<Utc>,
    pub decision_ref: Option<Uuid>,
}

/// Appended each cycle; peak tracked across the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquitySnapshot {
    pub timestamp: DateTime<Utc>,
    pub realized_cum: Decimal,
    pub unrealized: Decimal,
    pub total_equity: Decimal,
    pub peak_equity: Decimal,
    pub drawdown_from_peak: Decimal,
}
