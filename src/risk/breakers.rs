//! Market-microstructure circuit breakers
//!
//! Three independent breakers pause entries for ten minutes when tripped:
//! candle-spread spikes, funding-rate jumps, and wide quote spreads. Exits
//! are never paused. State is process-wide, keyed by breaker name.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::warn;

use crate::config::BreakerConfig;
use crate::domain::Kline;
use crate::exchange::traits::{BookTicker, FundingSample};

pub const BREAKER_VOLATILITY: &str = "volatility_spike";
pub const BREAKER_FUNDING: &str = "funding_spike";
pub const BREAKER_QUOTE_SPREAD: &str = "quote_spread";

/// A breaker firing this cycle.
#[derive(Debug, Clone)]
pub struct BreakerTrip {
    pub breaker: &'static str,
    pub symbol: String,
    pub reason: String,
    pub paused_until: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct ActivePause {
    active_until: DateTime<Utc>,
    trigger_reason: String,
}

pub struct CircuitBreakers {
    config: BreakerConfig,
    pauses: HashMap<&'static str, ActivePause>,
}

impl CircuitBreakers {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            pauses: HashMap::new(),
        }
    }

    /// Any breaker currently pausing entries?
    pub fn entries_paused(&self) -> bool {
        let now = Utc::now();
        self.pauses.values().any(|p| p.active_until > now)
    }

    pub fn active_pauses(&self) -> Vec<(String, DateTime<Utc>, String)> {
        let now = Utc::now();
        self.pauses
            .iter()
            .filter(|(_, p)| p.active_until > now)
            .map(|(name, p)| {
                (
                    name.to_string(),
                    p.active_until,
                    p.trigger_reason.clone(),
                )
            })
            .collect()
    }

    /// Evaluate all breakers against fresh market data, recording any trips.
    pub fn evaluate(
        &mut self,
        symbol: &str,
        klines: &[Kline],
        funding: &[FundingSample],
        book: &BookTicker,
    ) -> Vec<BreakerTrip> {
        let mut trips = Vec::new();

        if let Some(reason) = self.check_volatility_spike(klines) {
            trips.push(self.trip(BREAKER_VOLATILITY, symbol, reason));
        }
        if let Some(reason) = self.check_funding_spike(funding) {
            trips.push(self.trip(BREAKER_FUNDING, symbol, reason));
        }
        if let Some(reason) = self.check_quote_spread(book) {
            trips.push(self.trip(BREAKER_QUOTE_SPREAD, symbol, reason));
        }

        trips
    }

    fn trip(&mut self, breaker: &'static str, symbol: &str, reason: String) -> BreakerTrip {
        let paused_until = Utc::now() + ChronoDuration::seconds(self.config.pause_secs as i64);
        warn!(breaker = breaker, symbol = symbol, reason = %reason, "circuit breaker tripped");
        self.pauses.insert(
            breaker,
            ActivePause {
                active_until: paused_until,
                trigger_reason: reason.clone(),
            },
        );
        BreakerTrip {
            breaker,
            symbol: symbol.to_string(),
            reason,
            paused_until,
        }
    }

    /// Current candle spread above the configured multiple of the rolling
    /// median spread.
    fn check_volatility_spike(&self, klines: &[Kline]) -> Option<String> {
        if klines.len() < self.config.spread_window + 1 {
            return None;
        }
        let current = klines.last()?;
        let window = &klines[klines.len() - 1 - self.config.spread_window..klines.len() - 1];
        let mut spreads: Vec<Decimal> = window.iter().map(|k| k.spread()).collect();
        spreads.sort();
        let median = spreads[spreads.len() / 2];
        if median.is_zero() {
            return None;
        }
        let limit = median * self.config.spread_spike_factor;
        if current.spread() > limit {
            Some(format!(
                "candle spread {} > {} (median {} x {})",
                current.spread(),
                limit,
                median,
                self.config.spread_spike_factor
            ))
        } else {
            None
        }
    }

    /// Funding rate moved more than the configured percentage points within
    /// the last hour.
    fn check_funding_spike(&self, funding: &[FundingSample]) -> Option<String> {
        let latest = funding.last()?;
        let hour_ago = Utc::now() - ChronoDuration::hours(1);
        let reference = funding
            .iter()
            .rev()
            .skip(1)
            .find(|s| s.time >= hour_ago)
            .or_else(|| {
                // fall back to the newest sample older than an hour
                funding.iter().rev().find(|s| s.time < hour_ago)
            })?;
        // funding rates are fractions; convert the delta to percentage points
        let delta_pp = (latest.rate - reference.rate).abs() * Decimal::from(100);
        if delta_pp > self.config.funding_jump_pp {
            Some(format!(
                "funding moved {}pp in the last hour (limit {}pp)",
                delta_pp, self.config.funding_jump_pp
            ))
        } else {
            None
        }
    }

    /// Best bid/ask spread above the configured fraction.
    fn check_quote_spread(&self, book: &BookTicker) -> Option<String> {
        let spread = book.spread_fraction();
        if spread > self.config.quote_spread_limit {
            Some(format!(
                "quote spread {} > {}",
                spread, self.config.quote_spread_limit
            ))
        } else {
            None
        }
    }
}
