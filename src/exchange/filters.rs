//! Symbol filter rounding and trigger-price safety
//!
//! Quantities round down to the venue step; prices round to the tick.
//! Trigger prices additionally keep a 2-tick offset from the current mark so
//! a just-placed protective order cannot fire on submission.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

use crate::domain::SymbolFilters;
use crate::error::Result;
use crate::exchange::traits::ExchangeApi;

/// Number of ticks a trigger price must stay away from mark.
const TRIGGER_SAFETY_TICKS: u32 = 2;

/// Round a price to the symbol tick, toward the nearest tick.
pub fn round_tick(price: Decimal, tick_size: Decimal) -> Decimal {
    if tick_size.is_zero() {
        return price;
    }
    let ticks = (price / tick_size).round();
    (ticks * tick_size).normalize()
}

/// Round a quantity down to the symbol step. Never rounds up: an oversize
/// order is a venue rejection, an undersize one is caught by min checks.
pub fn round_step(quantity: Decimal, step_size: Decimal) -> Decimal {
    if step_size.is_zero() {
        return quantity;
    }
    let steps = (quantity / step_size).floor();
    (steps * step_size).normalize()
}

/// Push a trigger price at least `TRIGGER_SAFETY_TICKS` away from mark,
/// preserving which side of mark it sits on.
pub fn apply_trigger_safety_offset(
    trigger: Decimal,
    mark_price: Decimal,
    tick_size: Decimal,
) -> Decimal {
    let offset = tick_size * Decimal::from(TRIGGER_SAFETY_TICKS);
    if (trigger - mark_price).abs() >= offset {
        return trigger;
    }
    if trigger >= mark_price {
        round_tick(mark_price + offset, tick_size)
    } else {
        round_tick(mark_price - offset, tick_size)
    }
}

/// Cached symbol filters, fetched once and refreshed on demand.
pub struct FilterStore {
    exchange: Arc<dyn ExchangeApi>,
    filters: RwLock<HashMap<String, SymbolFilters>>,
}

impl FilterStore {
    pub fn new(exchange: Arc<dyn ExchangeApi>) -> Self {
        Self {
            exchange,
            filters: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch filters for all configured symbols up front.
    pub async fn warm_up(&self, symbols: &[String]) -> Result<()> {
        for symbol in symbols {
            match self.exchange.get_filters(symbol).await {
                Ok(filters) => {
                    self.filters.write().await.insert(symbol.clone(), filters);
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "filter fetch failed, using permissive defaults");
                    self.filters
                        .write()
                        .await
                        .insert(symbol.clone(), SymbolFilters::permissive(symbol));
                }
            }
        }
        Ok(())
    }

    pub async fn get(&self, symbol: &str) -> SymbolFilters {
        if let Some(filters) = self.filters.read().await.get(symbol) {
            return filters.clone();
        }
        SymbolFilters::permissive(symbol)
    }

    /// Re-fetch after a filter-violation rejection.
    pub async fn refresh(&self, symbol: &str) -> Result<SymbolFilters> {
        let filters = self.exchange.get_filters(symbol).await?;
        self.filters
            .write()
            .await
            .insert(symbol.to_string(), filters.clone());
        Ok(filters)
    }

    /// Round a quantity for the symbol and check venue minimums. Returns
    /// None when the rounded order would be rejected as too small.
    pub async fn normalize_quantity(
        &self,
        symbol: &str,
        quantity: Decimal,
        price: Decimal,
    ) -> Option<Decimal> {
        let filters = self.get(symbol).await;
        let rounded = round_step(quantity, filters.step_size);
        if rounded < filters.min_qty {
            return None;
        }
        if rounded * price < filters.min_notional {
            return None;
        }
        Some(rounded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn tick_rounding() {
        assert_eq!(round_tick(dec!(2040.004), dec!(0.01)), dec!(2040));
        assert_eq!(round_tick(dec!(2040.006), dec!(0.01)), dec!(2040.01));
        assert_eq!(round_tick(dec!(60000.37), dec!(0.1)), dec!(60000.4));
    }

    #[test]
    fn step_rounding_never_rounds_up() {
        assert_eq!(round_step(dec!(0.0199), dec!(0.001)), dec!(0.019));
        assert_eq!(round_step(dec!(1.2345), dec!(0.01)), dec!(1.23));
        assert_eq!(round_step(dec!(0.5), dec!(0.1)), dec!(0.5));
    }

    #[test]
    fn safety_offset_moves_trigger_off_mark() {
        // trigger within 2 ticks of mark gets pushed out
        let adjusted = apply_trigger_safety_offset(dec!(2000.01), dec!(2000.00), dec!(0.01));
        assert_eq!(adjusted, dec!(2000.02));

        // trigger already clear of mark is untouched
        let untouched = apply_trigger_safety_offset(dec!(2040.00), dec!(2000.00), dec!(0.01));
        assert_eq!(untouched, dec!(2040.00));

        // below-mark trigger pushed down, not up
        let below = apply_trigger_safety_offset(dec!(1999.99), dec!(2000.00), dec!(0.01));
        assert_eq!(below, dec!(1999.98));
    }
}
