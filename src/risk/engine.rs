//! Position sizing and leverage governance
//!
//! Sizing is margin-first: the risk budget becomes a margin amount, the
//! margin is clamped to the configured band, and quantity follows from
//! margin times leverage. Rounding to venue filters happens last.

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::config::RiskConfig;
use crate::domain::SymbolFilters;
use crate::exchange::filters::round_step;
use crate::regime::VolatilityRegime;

/// Result of a successful sizing pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizedPosition {
    pub quantity: Decimal,
    pub margin: Decimal,
    pub notional: Decimal,
}

pub struct RiskEngine {
    config: RiskConfig,
}

impl RiskEngine {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    /// Size an entry. Returns None when the rounded quantity falls below
    /// venue minimums, which callers report as `BelowMinimum`.
    ///
    /// `stop_distance_fraction` is the SL distance as a fraction of entry
    /// price; it converts the risk budget into notional exposure.
    pub fn size_position(
        &self,
        equity: Decimal,
        price: Decimal,
        stop_distance_fraction: Decimal,
        regime_size_multiplier: Decimal,
        correlation_adjustment: Decimal,
        leverage: u32,
        filters: &SymbolFilters,
    ) -> Option<SizedPosition> {
        if price <= Decimal::ZERO
            || stop_distance_fraction <= Decimal::ZERO
            || regime_size_multiplier.is_zero()
        {
            return None;
        }

        let risk_fraction = self
            .config
            .risk_fraction
            .min(self.config.risk_fraction_ceiling);
        let risk_amount =
            equity * risk_fraction * regime_size_multiplier * correlation_adjustment;
        if risk_amount <= Decimal::ZERO {
            return None;
        }

        let notional = risk_amount / stop_distance_fraction;
        let leverage_dec = Decimal::from(leverage.max(1));

        // Margin clamps apply before leverage re-expansion.
        let raw_margin = notional / leverage_dec;
        let margin = raw_margin.clamp(
            self.config.min_margin_per_trade,
            self.config.max_margin_per_trade,
        );
        let clamped_notional = margin * leverage_dec;

        let quantity = round_step(clamped_notional / price, filters.step_size);
        if quantity < filters.min_qty {
            warn!(
                symbol = %filters.symbol,
                quantity = %quantity,
                min_qty = %filters.min_qty,
                "sized quantity below venue minimum"
            );
            return None;
        }
        if quantity * price < filters.min_notional {
            warn!(
                symbol = %filters.symbol,
                notional = %(quantity * price),
                min_notional = %filters.min_notional,
                "sized notional below venue minimum"
            );
            return None;
        }

        debug!(
            symbol = %filters.symbol,
            margin = %margin,
            quantity = %quantity,
            leverage = leverage,
            "position sized"
        );
        Some(SizedPosition {
            quantity,
            margin,
            notional: quantity * price,
        })
    }
}

/// Leverage governor: the configured ceiling adjusted by regime and by the
/// global loss streak. Two consecutive losses shave one turn of leverage
/// until the next win restores it.
pub struct LeverageGovernor {
    base_leverage: u32,
    reduction: u32,
    consecutive_losses: u32,
}

impl LeverageGovernor {
    pub fn new(base_leverage: u32) -> Self {
        Self {
            base_leverage: base_leverage.max(1),
            reduction: 0,
            consecutive_losses: 0,
        }
    }

    pub fn record_trade_outcome(&mut self, is_win: bool) {
        if is_win {
            self.consecutive_losses = 0;
            self.reduction = 0;
        } else {
            self.consecutive_losses += 1;
            self.reduction = self.consecutive_losses / 2;
        }
    }

    /// Effective leverage for the next entry under the given regime.
    pub fn effective(&self, regime: VolatilityRegime) -> u32 {
        let regime_cap = match regime {
            VolatilityRegime::High => 3,
            VolatilityRegime::Low => 1,
            VolatilityRegime::Normal | VolatilityRegime::Extreme => self.base_leverage,
        };
        regime_cap.saturating_sub(self.reduction).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn filters() -> SymbolFilters {
        SymbolFilters {
            symbol: "ETHUSDT".to_string(),
            tick_size: dec!(0.01),
            step_size: dec!(0.001),
            min_qty: dec!(0.001),
            min_notional: dec!(10),
        }
    }

    fn engine() -> RiskEngine {
        RiskEngine::new(RiskConfig::default())
    }

    #[test]
    fn sizing_clamps_margin_to_band() {
        // equity 10000, risk 2.5% = 250, stop 1% -> notional 25000,
        // margin at 2x = 12500 -> clamped to 600 -> notional 1200
        let sized = engine()
            .size_position(
                dec!(10000),
                dec!(2000),
                dec!(0.01),
                Decimal::ONE,
                Decimal::ONE,
                2,
                &filters(),
            )
            .expect("should size");
        assert_eq!(sized.margin, dec!(600));
        assert_eq!(sized.quantity, dec!(0.6));
    }

    #[test]
    fn min_margin_floors_small_risk_budgets() {
        // tiny equity still sizes at the min margin floor
        let sized = engine()
            .size_position(
                dec!(100),
                dec!(2000),
                dec!(0.01),
                Decimal::ONE,
                Decimal::ONE,
                2,
                &filters(),
            )
            .expect("should size");
        assert_eq!(sized.margin, dec!(600));
    }

    #[test]
    fn zero_size_multiplier_skips() {
        let sized = engine().size_position(
            dec!(10000),
            dec!(2000),
            dec!(0.01),
            Decimal::ZERO,
            Decimal::ONE,
            2,
            &filters(),
        );
        assert!(sized.is_none());
    }

    #[test]
    fn below_min_qty_skips() {
        let coarse = SymbolFilters {
            symbol: "BTCUSDT".to_string(),
            tick_size: dec!(0.1),
            step_size: dec!(1),
            min_qty: dec!(1),
            min_notional: dec!(10),
        };
        // 600 margin * 2 / 60000 = 0.02, rounds to 0 at step 1
        let sized = engine().size_position(
            dec!(10000),
            dec!(60000),
            dec!(0.01),
            Decimal::ONE,
            Decimal::ONE,
            2,
            &coarse,
        );
        assert!(sized.is_none());
    }

    #[test]
    fn correlation_halves_risk_before_clamp() {
        // widen the margin band so the clamp does not mask the adjustment
        let config = RiskConfig {
            min_margin_per_trade: dec!(10),
            max_margin_per_trade: dec!(100000),
            ..RiskConfig::default()
        };
        let engine = RiskEngine::new(config);
        let full = engine
            .size_position(
                dec!(10000),
                dec!(2000),
                dec!(0.05),
                Decimal::ONE,
                Decimal::ONE,
                1,
                &filters(),
            )
            .unwrap();
        let halved = engine
            .size_position(
                dec!(10000),
                dec!(2000),
                dec!(0.05),
                Decimal::ONE,
                dec!(0.5),
                1,
                &filters(),
            )
            .unwrap();
        // risk 250 -> notional 5000 vs 2500
        assert_eq!(full.notional, dec!(5000));
        assert_eq!(halved.notional, dec!(2500));
    }

    #[test]
    fn governor_regime_caps() {
        let governor = LeverageGovernor::new(2);
        assert_eq!(governor.effective(VolatilityRegime::Normal), 2);
        assert_eq!(governor.effective(VolatilityRegime::High), 3);
        assert_eq!(governor.effective(VolatilityRegime::Low), 1);
    }

    #[test]
    fn governor_sheds_leverage_on_loss_pairs() {
        let mut governor = LeverageGovernor::new(3);
        governor.record_trade_outcome(false);
        assert_eq!(governor.effective(VolatilityRegime::Normal), 3);
        governor.record_trade_outcome(false);
        assert_eq!(governor.effective(VolatilityRegime::Normal), 2);
        governor.record_trade_outcome(false);
        governor.record_trade_outcome(false);
        assert_eq!(governor.effective(VolatilityRegime::Normal), 1);
        // win restores the base on the next cycle
        governor.record_trade_outcome(true);
        assert_eq!(governor.effective(VolatilityRegime::Normal), 3);
    }

    #[test]
    fn governor_never_drops_below_one() {
        let mut governor = LeverageGovernor::new(1);
        for _ in 0..10 {
            governor.record_trade_outcome(false);
        }
        assert_eq!(governor.effective(VolatilityRegime::Normal), 1);
    }
}
