pub mod binance;
pub mod codes;
pub mod filters;
pub mod latency;
pub mod traits;

pub use binance::BinanceFuturesClient;
pub use codes::{policy_for, ErrorPolicy};
pub use filters::{apply_trigger_safety_offset, round_step, round_tick, FilterStore};
pub use latency::LatencyTracker;
pub use traits::{
    AccountBalance, BookTicker, ExchangeApi, FundingSample, OpenOrder, OrderAck, OrderParams,
    OrderSide, OrderType, PositionInfo, WorkingType,
};
