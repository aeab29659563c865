//! Indicator computation over kline windows
//!
//! All indicators are recomputed from scratch each cycle; the window is
//! small enough that incremental state is not worth the bookkeeping.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::domain::{IndicatorSet, Kline};
use crate::error::{PeregrineError, Result};

pub const ATR_FAST_PERIOD: usize = 7;
pub const ATR_SLOW_PERIOD: usize = 21;
pub const EMA_PERIOD: usize = 20;
pub const RSI_PERIOD: usize = 14;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;
pub const BOLLINGER_PERIOD: usize = 20;

/// Minimum bars needed for the full set (MACD slow EMA plus signal warm-up).
pub const MIN_BARS: usize = MACD_SLOW + MACD_SIGNAL;

/// True ranges for consecutive bars; one element shorter than the input.
fn true_ranges(klines: &[Kline]) -> Vec<Decimal> {
    klines
        .windows(2)
        .map(|w| w[1].true_range(w[0].close))
        .collect()
}

/// Simple average of the last `period` true ranges.
pub fn atr(klines: &[Kline], period: usize) -> Option<Decimal> {
    let trs = true_ranges(klines);
    if trs.len() < period {
        return None;
    }
    let sum: Decimal = trs[trs.len() - period..].iter().copied().sum();
    Some(sum / Decimal::from(period as i64))
}

/// EMA series over closes, seeded with the SMA of the first `period` values.
fn ema_series(values: &[Decimal], period: usize) -> Vec<Decimal> {
    if values.len() < period {
        return Vec::new();
    }
    let k = Decimal::from(2) / Decimal::from((period + 1) as i64);
    let seed: Decimal =
        values[..period].iter().copied().sum::<Decimal>() / Decimal::from(period as i64);
    let mut out = Vec::with_capacity(values.len() - period + 1);
    out.push(seed);
    let mut prev = seed;
    for value in &values[period..] {
        prev = (*value - prev) * k + prev;
        out.push(prev);
    }
    out
}

pub fn ema(klines: &[Kline], period: usize) -> Option<Decimal> {
    let closes: Vec<Decimal> = klines.iter().map(|k| k.close).collect();
    ema_series(&closes, period).last().copied()
}

/// RSI with Wilder smoothing.
pub fn rsi(klines: &[Kline], period: usize) -> Option<Decimal> {
    if klines.len() < period + 1 {
        return None;
    }
    let closes: Vec<Decimal> = klines.iter().map(|k| k.close).collect();
    let mut gain = Decimal::ZERO;
    let mut loss = Decimal::ZERO;
    for w in closes[..period + 1].windows(2) {
        let change = w[1] - w[0];
        if change > Decimal::ZERO {
            gain += change;
        } else {
            loss -= change;
        }
    }
    let period_dec = Decimal::from(period as i64);
    let mut avg_gain = gain / period_dec;
    let mut avg_loss = loss / period_dec;

    for w in closes[period..].windows(2) {
        let change = w[1] - w[0];
        let (g, l) = if change > Decimal::ZERO {
            (change, Decimal::ZERO)
        } else {
            (Decimal::ZERO, -change)
        };
        avg_gain = (avg_gain * (period_dec - Decimal::ONE) + g) / period_dec;
        avg_loss = (avg_loss * (period_dec - Decimal::ONE) + l) / period_dec;
    }

    if avg_loss.is_zero() {
        return Some(Decimal::from(100));
    }
    let rs = avg_gain / avg_loss;
    Some(Decimal::from(100) - Decimal::from(100) / (Decimal::ONE + rs))
}

/// (macd, signal, histogram) from the standard 12/26/9 configuration.
pub fn macd(klines: &[Kline]) -> Option<(Decimal, Decimal, Decimal)> {
    let closes: Vec<Decimal> = klines.iter().map(|k| k.close).collect();
    if closes.len() < MACD_SLOW + MACD_SIGNAL {
        return None;
    }
    let fast = ema_series(&closes, MACD_FAST);
    let slow = ema_series(&closes, MACD_SLOW);
    // Align: the slow series starts (MACD_SLOW - MACD_FAST) elements later.
    let offset = MACD_SLOW - MACD_FAST;
    let macd_line: Vec<Decimal> = slow
        .iter()
        .enumerate()
        .map(|(i, s)| fast[i + offset] - *s)
        .collect();
    let signal_series = ema_series(&macd_line, MACD_SIGNAL);
    let macd_value = *macd_line.last()?;
    let signal_value = *signal_series.last()?;
    Some((macd_value, signal_value, macd_value - signal_value))
}

/// (upper, mid, lower) Bollinger bands at 2 standard deviations.
pub fn bollinger(klines: &[Kline], period: usize) -> Option<(Decimal, Decimal, Decimal)> {
    if klines.len() < period {
        return None;
    }
    let closes: Vec<Decimal> = klines[klines.len() - period..]
        .iter()
        .map(|k| k.close)
        .collect();
    let n = Decimal::from(period as i64);
    let mean: Decimal = closes.iter().copied().sum::<Decimal>() / n;
    let variance: Decimal = closes
        .iter()
        .map(|c| {
            let d = *c - mean;
            d * d
        })
        .sum::<Decimal>()
        / n;
    let std_dev =
        Decimal::try_from(variance.to_f64().unwrap_or(0.0).sqrt()).unwrap_or(Decimal::ZERO);
    let band = std_dev * Decimal::from(2);
    Some((mean + band, mean, mean - band))
}

/// Compute the full canonical set, failing on insufficient history.
pub fn compute_indicators(symbol: &str, klines: &[Kline]) -> Result<IndicatorSet> {
    if klines.len() < MIN_BARS {
        return Err(PeregrineError::InsufficientHistory {
            symbol: symbol.to_string(),
            have: klines.len(),
            need: MIN_BARS,
        });
    }
    let atr_fast = atr(klines, ATR_FAST_PERIOD).ok_or_else(|| {
        PeregrineError::MarketDataUnavailable(format!("{}: ATR fast window", symbol))
    })?;
    let atr_slow = atr(klines, ATR_SLOW_PERIOD).ok_or_else(|| {
        PeregrineError::MarketDataUnavailable(format!("{}: ATR slow window", symbol))
    })?;
    let ema_20 = ema(klines, EMA_PERIOD)
        .ok_or_else(|| PeregrineError::MarketDataUnavailable(format!("{}: EMA window", symbol)))?;
    let rsi_value = rsi(klines, RSI_PERIOD)
        .ok_or_else(|| PeregrineError::MarketDataUnavailable(format!("{}: RSI window", symbol)))?;
    let (macd_value, macd_signal, macd_histogram) = macd(klines)
        .ok_or_else(|| PeregrineError::MarketDataUnavailable(format!("{}: MACD window", symbol)))?;
    let (bollinger_upper, bollinger_mid, bollinger_lower) = bollinger(klines, BOLLINGER_PERIOD)
        .ok_or_else(|| {
            PeregrineError::MarketDataUnavailable(format!("{}: Bollinger window", symbol))
        })?;

    Ok(IndicatorSet {
        atr_fast,
        atr_slow,
        ema_20,
        rsi: rsi_value,
        macd: macd_value,
        macd_signal,
        macd_histogram,
        bollinger_upper,
        bollinger_mid,
        bollinger_lower,
    })
}
