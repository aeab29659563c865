use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Venue trading rules for one symbol.
///
/// Fetched once at startup from exchange info and treated as immutable;
/// refreshed only when an order is rejected for a filter violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolFilters {
    pub symbol: String,
    /// Price increment (PRICE_FILTER.tickSize)
    pub tick_size: Decimal,
    /// Quantity increment (LOT_SIZE.stepSize)
    pub step_size: Decimal,
    /// Minimum order quantity (LOT_SIZE.minQty)
    pub min_qty: Decimal,
    /// Minimum order notional in quote currency (MIN_NOTIONAL)
    pub min_notional: Decimal,
}

impl SymbolFilters {
    /// Permissive filters for symbols the venue did not report. Callers
    /// should treat this as a stopgap until a refresh succeeds.
    pub fn permissive(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            tick_size: Decimal::new(1, 2),
            step_size: Decimal::new(1, 3),
            min_qty: Decimal::new(1, 3),
            min_notional: Decimal::from(10),
        }
    }
}

/// A single OHLCV candle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: DateTime<Utc>,
}

impl Kline {
    /// High-low spread of the candle
    pub fn spread(&self) -> Decimal {
        self.high - self.low
    }

    /// True range against the previous close
    pub fn true_range(&self, prev_close: Decimal) -> Decimal {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }
}

/// Canonical indicator set recomputed each cycle from the kline window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorSet {
    pub atr_fast: Decimal,
    pub atr_slow: Decimal,
    pub ema_20: Decimal,
    pub rsi: Decimal,
    pub macd: Decimal,
    pub macd_signal: Decimal,
    pub macd_histogram: Decimal,
    pub bollinger_upper: Decimal,
    pub bollinger_mid: Decimal,
    pub bollinger_lower: Decimal,
}

impl IndicatorSet {
    /// Volatility ratio: fast ATR over slow ATR
    pub fn volatility_ratio(&self) -> Decimal {
        if self.atr_slow.is_zero() {
            Decimal::ONE
        } else {
            self.atr_fast / self.atr_slow
        }
    }
}

/// Point-in-time view of one symbol handed to the decision pipeline and
/// journaled with every decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub price: Decimal,
    pub indicators: IndicatorSet,
    pub timestamp: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Slow ATR as a fraction of price, used by the regime classifier.
    pub fn atr_pct(&self) -> Decimal {
        if self.price.is_zero() {
            Decimal::ZERO
        } else {
            self.indicators.atr_slow / self.price
        }
    }
}
