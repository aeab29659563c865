//! Market data engine with TTL caching
//!
//! Venue fetches are cached per symbol for `cache_ttl_secs`; consumers that
//! pass `require_fresh` force a refetch once the hard threshold is exceeded.
//! A successful kline refresh invalidates the derived indicator set so ATR
//! consumers (TP/SL pricing, regime) always see matching values.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::DataConfig;
use crate::data::indicators::compute_indicators;
use crate::domain::{IndicatorSet, Kline, MarketSnapshot};
use crate::error::{PeregrineError, Result};
use crate::exchange::traits::ExchangeApi;

/// Cached market state for one symbol.
#[derive(Debug, Clone)]
pub struct SymbolData {
    pub klines: Vec<Kline>,
    pub indicators: IndicatorSet,
    pub price: Decimal,
    pub fetched_at: DateTime<Utc>,
}

impl SymbolData {
    pub fn snapshot(&self, symbol: &str) -> MarketSnapshot {
        MarketSnapshot {
            symbol: symbol.to_string(),
            price: self.price,
            indicators: self.indicators.clone(),
            timestamp: self.fetched_at,
        }
    }
}

pub struct MarketDataEngine {
    exchange: Arc<dyn ExchangeApi>,
    interval: String,
    kline_limit: u32,
    cache_ttl_secs: i64,
    hard_refresh_secs: i64,
    cache: RwLock<HashMap<String, SymbolData>>,
}

impl MarketDataEngine {
    pub fn new(exchange: Arc<dyn ExchangeApi>, interval: &str, config: &DataConfig) -> Self {
        Self {
            exchange,
            interval: interval.to_string(),
            kline_limit: config.kline_limit,
            cache_ttl_secs: config.cache_ttl_secs as i64,
            hard_refresh_secs: config.hard_refresh_secs as i64,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn age_secs(data: &SymbolData) -> i64 {
        (Utc::now() - data.fetched_at).num_seconds()
    }

    /// Current data for a symbol, refreshing the cache as needed.
    ///
    /// `require_fresh` bypasses the TTL once the hard threshold has passed.
    /// If a forced refresh fails but stale data inside the TTL exists, the
    /// stale copy is returned with a warning; past the TTL the failure is
    /// surfaced as `StaleData` so the caller can skip the symbol's cycle.
    pub async fn get(&self, symbol: &str, require_fresh: bool) -> Result<SymbolData> {
        let cached = self.cache.read().await.get(symbol).cloned();
        if let Some(data) = &cached {
            let age = Self::age_secs(data);
            let fresh_enough = if require_fresh {
                age < self.hard_refresh_secs
            } else {
                age < self.cache_ttl_secs
            };
            if fresh_enough {
                return Ok(data.clone());
            }
        }

        match self.refresh(symbol).await {
            Ok(data) => Ok(data),
            Err(e) => match cached {
                Some(data) if Self::age_secs(&data) < self.cache_ttl_secs => {
                    warn!(symbol = symbol, error = %e, "refresh failed, serving cached data");
                    Ok(data)
                }
                _ => Err(PeregrineError::StaleData(format!(
                    "{}: refresh failed and cache exhausted: {}",
                    symbol, e
                ))),
            },
        }
    }

    /// Fetch klines and price, recompute indicators, replace the cache entry.
    pub async fn refresh(&self, symbol: &str) -> Result<SymbolData> {
        let klines = self
            .exchange
            .get_klines(symbol, &self.interval, self.kline_limit)
            .await?;
        let price = match klines.last() {
            Some(last) => last.close,
            None => {
                return Err(PeregrineError::MarketDataUnavailable(format!(
                    "{}: venue returned no klines",
                    symbol
                )))
            }
        };
        let indicators = compute_indicators(symbol, &klines)?;
        let data = SymbolData {
            klines,
            indicators,
            price,
            fetched_at: Utc::now(),
        };
        debug!(symbol = symbol, price = %price, "market data refreshed");
        self.cache
            .write()
            .await
            .insert(symbol.to_string(), data.clone());
        Ok(data)
    }

    /// Close-to-close returns over the last `bars` cached klines, for the
    /// correlation adjustment. Empty when the cache is cold.
    pub async fn recent_returns(&self, symbol: &str, bars: usize) -> Vec<f64> {
        let cache = self.cache.read().await;
        let Some(data) = cache.get(symbol) else {
            return Vec::new();
        };
        let closes: Vec<Decimal> = data.klines.iter().map(|k| k.close).collect();
        if closes.len() < 2 {
            return Vec::new();
        }
        let start = closes.len().saturating_sub(bars + 1);
        closes[start..]
            .windows(2)
            .filter_map(|w| {
                if w[0].is_zero() {
                    None
                } else {
                    use rust_decimal::prelude::ToPrimitive;
                    ((w[1] - w[0]) / w[0]).to_f64()
                }
            })
            .collect()
    }

    /// Drop a symbol's cache entry so the next consumer refetches.
    pub async fn invalidate(&self, symbol: &str) {
        self.cache.write().await.remove(symbol);
    }
}
