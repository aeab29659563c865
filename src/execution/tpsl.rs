//! TP/SL price computation, geometry validation, and dedup hashing
//!
//! The direction rule is the central correctness invariant of the engine:
//! LONG requires tp > entry > sl, SHORT requires tp < entry < sl. Every
//! computed pair is validated after rounding; a pair that fails is never
//! sent to the venue.

use rust_decimal::Decimal;
use sha2::{Digest, Sha256};

use crate::domain::{PositionSide, SymbolFilters};
use crate::exchange::filters::round_tick;
use crate::regime::RegimeReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpslPrices {
    pub tp: Decimal,
    pub sl: Decimal,
}

/// Sign-correct TP/SL prices from entry and fractional distances.
pub fn compute_tpsl(
    side: PositionSide,
    entry: Decimal,
    tp_fraction: Decimal,
    sl_fraction: Decimal,
) -> TpslPrices {
    match side {
        PositionSide::Long => TpslPrices {
            tp: entry * (Decimal::ONE + tp_fraction),
            sl: entry * (Decimal::ONE - sl_fraction),
        },
        PositionSide::Short => TpslPrices {
            tp: entry * (Decimal::ONE - tp_fraction),
            sl: entry * (Decimal::ONE + sl_fraction),
        },
    }
}

/// The direction rule. Checked on computed prices and re-checked after
/// rounding.
pub fn validate_geometry(side: PositionSide, entry: Decimal, tp: Decimal, sl: Decimal) -> bool {
    match side {
        PositionSide::Long => tp > entry && entry > sl,
        PositionSide::Short => tp < entry && entry < sl,
    }
}

/// TP/SL distances as fractions of price. ATR-scaled via the regime's
/// multipliers when ATR is usable, otherwise the configured base fractions.
pub fn tpsl_fractions(
    regime: Option<&RegimeReport>,
    atr: Decimal,
    price: Decimal,
    base_tp_fraction: Decimal,
    base_sl_fraction: Decimal,
) -> (Decimal, Decimal) {
    if let Some(report) = regime {
        if atr > Decimal::ZERO && price > Decimal::ZERO {
            let atr_fraction = atr / price;
            return (
                atr_fraction * report.tp_atr_multiplier,
                atr_fraction * report.sl_atr_multiplier,
            );
        }
    }
    (base_tp_fraction, base_sl_fraction)
}

/// Round both legs to the venue tick.
pub fn round_tpsl(prices: TpslPrices, filters: &SymbolFilters) -> TpslPrices {
    TpslPrices {
        tp: round_tick(prices.tp, filters.tick_size),
        sl: round_tick(prices.sl, filters.tick_size),
    }
}

/// Dedup digest over (symbol, side, rounded tp, rounded sl). Two attach
/// attempts computing the same protective pair collide here and the second
/// is suppressed.
pub fn tpsl_hash(symbol: &str, side: PositionSide, tp: Decimal, sl: Decimal) -> String {
    let mut hasher = Sha256::new();
    hasher.update(symbol.as_bytes());
    hasher.update(side.as_str().as_bytes());
    hasher.update(tp.normalize().to_string().as_bytes());
    hasher.update(sl.normalize().to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}
