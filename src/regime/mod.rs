//! Dual-ATR volatility regime classifier
//!
//! `VR = ATR_fast / ATR_slow` places each symbol in a band that scales
//! position size, shifts the confidence applied to decisions, and selects
//! the ATR multipliers used for TP/SL pricing.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::MarketSnapshot;

const VR_EXTREME: Decimal = dec!(1.8);
const VR_HIGH: Decimal = dec!(1.2);
const VR_LOW: Decimal = dec!(0.5);
/// ATR as a fraction of price below which LOW volatility blocks entries.
const LOW_ATR_PCT: Decimal = dec!(0.002);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VolatilityRegime {
    Extreme,
    High,
    Normal,
    Low,
}

impl VolatilityRegime {
    pub fn as_str(&self) -> &'static str {
        match self {
            VolatilityRegime::Extreme => "EXTREME",
            VolatilityRegime::High => "HIGH",
            VolatilityRegime::Normal => "NORMAL",
            VolatilityRegime::Low => "LOW",
        }
    }
}

impl std::fmt::Display for VolatilityRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classifier output consumed by sizing, confidence and TP/SL pricing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeReport {
    pub regime: VolatilityRegime,
    pub volatility_ratio: Decimal,
    pub atr_pct: Decimal,
    pub size_multiplier: Decimal,
    pub confidence_delta: Decimal,
    pub tp_atr_multiplier: Decimal,
    pub sl_atr_multiplier: Decimal,
}

impl RegimeReport {
    pub fn skip_entry(&self) -> bool {
        self.size_multiplier.is_zero()
    }
}

/// Classify a snapshot into its volatility band.
pub fn classify(snapshot: &MarketSnapshot) -> RegimeReport {
    let vr = snapshot.indicators.volatility_ratio();
    let atr_pct = snapshot.atr_pct();

    let regime = if vr >= VR_EXTREME {
        VolatilityRegime::Extreme
    } else if vr >= VR_HIGH {
        VolatilityRegime::High
    } else if vr < VR_LOW && atr_pct < LOW_ATR_PCT {
        VolatilityRegime::Low
    } else {
        VolatilityRegime::Normal
    };

    let report = match regime {
        VolatilityRegime::Extreme => RegimeReport {
            regime,
            volatility_ratio: vr,
            atr_pct,
            size_multiplier: Decimal::ZERO,
            confidence_delta: Decimal::ZERO,
            tp_atr_multiplier: dec!(2.5),
            sl_atr_multiplier: dec!(1.25),
        },
        VolatilityRegime::High => RegimeReport {
            regime,
            volatility_ratio: vr,
            atr_pct,
            size_multiplier: dec!(0.75),
            confidence_delta: dec!(-0.03),
            tp_atr_multiplier: dec!(2.5),
            sl_atr_multiplier: dec!(1.25),
        },
        VolatilityRegime::Normal => RegimeReport {
            regime,
            volatility_ratio: vr,
            atr_pct,
            size_multiplier: Decimal::ONE,
            confidence_delta: Decimal::ZERO,
            tp_atr_multiplier: dec!(2.2),
            sl_atr_multiplier: dec!(1.1),
        },
        VolatilityRegime::Low => RegimeReport {
            regime,
            volatility_ratio: vr,
            atr_pct,
            size_multiplier: Decimal::ZERO,
            confidence_delta: Decimal::ZERO,
            tp_atr_multiplier: dec!(2.2),
            sl_atr_multiplier: dec!(1.1),
        },
    };

    debug!(
        symbol = %snapshot.symbol,
        regime = %report.regime,
        vr = %report.volatility_ratio,
        atr_pct = %report.atr_pct,
        "regime classified"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::IndicatorSet;
    use chrono::Utc;

    fn snapshot(atr_fast: Decimal, atr_slow: Decimal, price: Decimal) -> MarketSnapshot {
        MarketSnapshot {
            symbol: "BTCUSDT".to_string(),
            price,
            indicators: IndicatorSet {
                atr_fast,
                atr_slow,
                ema_20: price,
                rsi: dec!(50),
                macd: Decimal::ZERO,
                macd_signal: Decimal::ZERO,
                macd_histogram: Decimal::ZERO,
                bollinger_upper: price,
                bollinger_mid: price,
                bollinger_lower: price,
            },
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn extreme_band_blocks_entries() {
        let report = classify(&snapshot(dec!(18), dec!(10), dec!(60000)));
        assert_eq!(report.regime, VolatilityRegime::Extreme);
        assert!(report.skip_entry());
        assert_eq!(report.tp_atr_multiplier, dec!(2.5));
    }

    #[test]
    fn high_band_scales_size_and_confidence() {
        let report = classify(&snapshot(dec!(13), dec!(10), dec!(60000)));
        assert_eq!(report.regime, VolatilityRegime::High);
        assert_eq!(report.size_multiplier, dec!(0.75));
        assert_eq!(report.confidence_delta, dec!(-0.03));
    }

    #[test]
    fn low_band_requires_both_conditions() {
        // VR < 0.5 and ATR% < 0.2%: LOW
        let low = classify(&snapshot(dec!(4), dec!(10), dec!(60000)));
        assert_eq!(low.regime, VolatilityRegime::Low);
        assert!(low.skip_entry());

        // VR < 0.5 but ATR% comfortably above 0.2%: NORMAL
        let normal = classify(&snapshot(dec!(4), dec!(10), dec!(1000)));
        assert_eq!(normal.regime, VolatilityRegime::Normal);
        assert!(!normal.skip_entry());
    }

    #[test]
    fn normal_band_at_boundary() {
        let report = classify(&snapshot(dec!(11.9), dec!(10), dec!(60000)));
        assert_eq!(report.regime, VolatilityRegime::Normal);
        assert_eq!(report.size_multiplier, Decimal::ONE);
        assert_eq!(report.tp_atr_multiplier, dec!(2.2));
        assert_eq!(report.sl_atr_multiplier, dec!(1.1));
    }

    #[test]
    fn band_edges_are_inclusive_lower() {
        assert_eq!(
            classify(&snapshot(dec!(18), dec!(10), dec!(60000))).regime,
            VolatilityRegime::Extreme
        );
        assert_eq!(
            classify(&snapshot(dec!(12), dec!(10), dec!(60000))).regime,
            VolatilityRegime::High
        );
    }
}
