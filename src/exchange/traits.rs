use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{Kline, PositionSide, SymbolFilters};
use crate::error::Result;

/// Venue order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }

    /// Order side that opens a position in the given direction.
    pub fn to_open(side: PositionSide) -> Self {
        match side {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        }
    }

    /// Order side that closes a position in the given direction. TP and SL
    /// legs both use this side.
    pub fn to_close(side: PositionSide) -> Self {
        match side {
            PositionSide::Long => OrderSide::Sell,
            PositionSide::Short => OrderSide::Buy,
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Venue order type. Only the types the engine actually places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    TakeProfitMarket,
    StopMarket,
}

impl OrderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
            OrderType::StopMarket => "STOP_MARKET",
        }
    }
}

/// Trigger price reference for conditional orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkingType {
    MarkPrice,
    ContractPrice,
}

impl WorkingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkingType::MarkPrice => "MARK_PRICE",
            WorkingType::ContractPrice => "CONTRACT_PRICE",
        }
    }
}

/// Parameters for `place_order`. Entry orders set `quantity`; protective
/// orders prefer `close_position` and fall back to `reduce_only` + quantity.
#[derive(Debug, Clone, Serialize)]
pub struct OrderParams {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub close_position: bool,
    pub reduce_only: bool,
    pub working_type: Option<WorkingType>,
}

impl OrderParams {
    pub fn market_entry(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity: Some(quantity),
            stop_price: None,
            close_position: false,
            reduce_only: false,
            working_type: None,
        }
    }

    /// Preferred protective-order mode: closePosition with mark-price trigger.
    pub fn close_position_trigger(
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        stop_price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type,
            quantity: None,
            stop_price: Some(stop_price),
            close_position: true,
            reduce_only: false,
            working_type: Some(WorkingType::MarkPrice),
        }
    }

    /// Fallback mode used after a -1106 rejection.
    pub fn reduce_only_trigger(
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        stop_price: Decimal,
        quantity: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type,
            quantity: Some(quantity),
            stop_price: Some(stop_price),
            close_position: false,
            reduce_only: true,
            working_type: Some(WorkingType::MarkPrice),
        }
    }

    /// Reduce-only market order used by the exit paths.
    pub fn market_close(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity: Some(quantity),
            stop_price: None,
            close_position: false,
            reduce_only: true,
            working_type: None,
        }
    }
}

/// Acknowledgement returned by `place_order`. An ack is not a fill; entries
/// are confirmed by polling position info.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub status: String,
}

/// An order resting on the venue.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub stop_price: Option<Decimal>,
    pub close_position: bool,
    pub reduce_only: bool,
    pub quantity: Option<Decimal>,
    pub status: String,
}

impl OpenOrder {
    /// Protective legs are conditional orders flagged to only shrink the
    /// position.
    pub fn is_protective(&self) -> bool {
        matches!(
            self.order_type,
            OrderType::TakeProfitMarket | OrderType::StopMarket
        ) && (self.close_position || self.reduce_only)
    }
}

/// Venue position snapshot. `position_amt` is signed: positive = long.
#[derive(Debug, Clone, Deserialize)]
pub struct PositionInfo {
    pub symbol: String,
    pub position_amt: Decimal,
    pub entry_price: Decimal,
    pub leverage: u32,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
}

impl PositionInfo {
    pub fn is_flat(&self) -> bool {
        self.position_amt.is_zero()
    }

    pub fn side(&self) -> Option<PositionSide> {
        PositionSide::from_position_amt(self.position_amt)
    }
}

/// Futures account balance for the quote asset.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountBalance {
    pub asset: String,
    pub balance: Decimal,
    pub available: Decimal,
}

/// Best bid/ask.
#[derive(Debug, Clone, Deserialize)]
pub struct BookTicker {
    pub bid: Decimal,
    pub ask: Decimal,
}

impl BookTicker {
    /// Spread as a fraction of the bid.
    pub fn spread_fraction(&self) -> Decimal {
        if self.bid.is_zero() {
            Decimal::ZERO
        } else {
            (self.ask - self.bid) / self.bid
        }
    }
}

/// One funding-rate observation.
#[derive(Debug, Clone, Deserialize)]
pub struct FundingSample {
    pub rate: Decimal,
    pub time: DateTime<Utc>,
}

/// The venue seam. One live implementation (`BinanceFuturesClient`) plus
/// in-memory mocks in tests. All methods are expected to apply the retry
/// and error-mapping policy before returning.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    async fn get_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Kline>>;

    async fn get_ticker_price(&self, symbol: &str) -> Result<Decimal>;

    async fn get_mark_price(&self, symbol: &str) -> Result<Decimal>;

    async fn get_book_ticker(&self, symbol: &str) -> Result<BookTicker>;

    /// Most recent funding samples, newest last.
    async fn get_funding_rates(&self, symbol: &str, limit: u32) -> Result<Vec<FundingSample>>;

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>>;

    /// None when the venue reports no position for the symbol.
    async fn get_position_info(&self, symbol: &str) -> Result<Option<PositionInfo>>;

    async fn get_balance(&self) -> Result<AccountBalance>;

    async fn place_order(&self, params: &OrderParams) -> Result<OrderAck>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()>;

    /// Idempotent on the venue.
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<()>;

    async fn get_filters(&self, symbol: &str) -> Result<SymbolFilters>;
}
