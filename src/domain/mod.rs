pub mod decision;
pub mod market;
pub mod position;

pub use decision::{AgentProfile, ArbitratedIntent, Decision, Signal};
pub use market::{IndicatorSet, Kline, MarketSnapshot, SymbolFilters};
pub use position::{
    EquitySnapshot, ExitReason, Position, PositionSide, PositionState, TradeOutcome,
};
