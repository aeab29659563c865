//! Built-in indicator-rule decision provider
//!
//! The default oracle when no external decision source is wired in. Each
//! agent style reads a different slice of the indicator set; confidence is
//! proportional to how far the triggering indicator sits from neutral.

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::agents::provider::{DecisionProvider, ProviderDecision};
use crate::domain::{AgentProfile, MarketSnapshot, Signal};
use crate::error::Result;

const MIN_CONFIDENCE: Decimal = dec!(0.5);
const MAX_CONFIDENCE: Decimal = dec!(0.9);

pub struct IndicatorRuleProvider;

impl IndicatorRuleProvider {
    pub fn new() -> Self {
        Self
    }

    fn trend_following(snapshot: &MarketSnapshot) -> (Signal, Decimal, String) {
        let ind = &snapshot.indicators;
        let above_ema = snapshot.price > ind.ema_20;
        let macd_up = ind.macd > ind.macd_signal;
        match (above_ema, macd_up) {
            (true, true) => {
                let conf = confidence_from_distance(snapshot.price, ind.ema_20);
                (
                    Signal::Long,
                    conf,
                    format!("price {} above EMA20 {} with MACD rising", snapshot.price, ind.ema_20),
                )
            }
            (false, false) => {
                let conf = confidence_from_distance(ind.ema_20, snapshot.price);
                (
                    Signal::Short,
                    conf,
                    format!("price {} below EMA20 {} with MACD falling", snapshot.price, ind.ema_20),
                )
            }
            _ => (Signal::Hold, dec!(0.5), "trend and momentum disagree".to_string()),
        }
    }

    fn momentum(snapshot: &MarketSnapshot) -> (Signal, Decimal, String) {
        let ind = &snapshot.indicators;
        if ind.rsi > dec!(55) && ind.macd_histogram > Decimal::ZERO {
            let conf = (dec!(0.5) + (ind.rsi - dec!(55)) / dec!(100)).min(MAX_CONFIDENCE);
            (Signal::Long, conf, format!("RSI {} with positive MACD histogram", ind.rsi))
        } else if ind.rsi < dec!(45) && ind.macd_histogram < Decimal::ZERO {
            let conf = (dec!(0.5) + (dec!(45) - ind.rsi) / dec!(100)).min(MAX_CONFIDENCE);
            (Signal::Short, conf, format!("RSI {} with negative MACD histogram", ind.rsi))
        } else {
            (Signal::Hold, dec!(0.5), "momentum is neutral".to_string())
        }
    }

    fn mean_reversion(snapshot: &MarketSnapshot) -> (Signal, Decimal, String) {
        let ind = &snapshot.indicators;
        if snapshot.price <= ind.bollinger_lower && ind.rsi < dec!(30) {
            (
                Signal::Long,
                dec!(0.75),
                format!("price {} at lower band with RSI {}", snapshot.price, ind.rsi),
            )
        } else if snapshot.price >= ind.bollinger_upper && ind.rsi > dec!(70) {
            (
                Signal::Short,
                dec!(0.75),
                format!("price {} at upper band with RSI {}", snapshot.price, ind.rsi),
            )
        } else {
            (Signal::Hold, dec!(0.5), "price inside the bands".to_string())
        }
    }

    fn breakout(snapshot: &MarketSnapshot) -> (Signal, Decimal, String) {
        let ind = &snapshot.indicators;
        if snapshot.price > ind.bollinger_upper {
            (
                Signal::Long,
                dec!(0.7),
                format!("breakout above upper band {}", ind.bollinger_upper),
            )
        } else if snapshot.price < ind.bollinger_lower {
            (
                Signal::Short,
                dec!(0.7),
                format!("breakdown below lower band {}", ind.bollinger_lower),
            )
        } else {
            (Signal::Hold, dec!(0.5), "no band breach".to_string())
        }
    }
}

fn confidence_from_distance(value: Decimal, reference: Decimal) -> Decimal {
    if reference.is_zero() {
        return MIN_CONFIDENCE;
    }
    let distance = ((value - reference) / reference).abs();
    // 1% away from the reference saturates confidence
    (MIN_CONFIDENCE + distance * dec!(40)).clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
}

impl Default for IndicatorRuleProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DecisionProvider for IndicatorRuleProvider {
    async fn decide(
        &self,
        agent: &AgentProfile,
        snapshot: &MarketSnapshot,
        _recent_accuracy: Option<Decimal>,
    ) -> Result<ProviderDecision> {
        let (signal, confidence, reasoning) = match agent.style_tag.as_str() {
            "trend_following" | "multi_timeframe" => Self::trend_following(snapshot),
            "momentum" | "macd_momentum" | "scalping" => Self::momentum(snapshot),
            "mean_reversion" => Self::mean_reversion(snapshot),
            "breakout" => Self::breakout(snapshot),
            other => (
                Signal::Hold,
                dec!(0.5),
                format!("unknown style '{}', holding", other),
            ),
        };
        Ok(ProviderDecision {
            signal,
            confidence,
            reasoning,
            strategy_tag: agent.style_tag.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::IndicatorSet;
    use chrono::Utc;

    fn agent(style: &str) -> AgentProfile {
        AgentProfile {
            agent_id: "a1".to_string(),
            symbol: "BTCUSDT".to_string(),
            style_tag: style.to_string(),
            base_weight: Decimal::ONE,
            performance_multiplier: Decimal::ONE,
            config: serde_json::Value::Null,
        }
    }

    fn snapshot(price: Decimal, ema: Decimal, rsi: Decimal, macd_hist: Decimal) -> MarketSnapshot {
        MarketSnapshot {
            symbol: "BTCUSDT".to_string(),
            price,
            indicators: IndicatorSet {
                atr_fast: dec!(100),
                atr_slow: dec!(100),
                ema_20: ema,
                rsi,
                macd: macd_hist,
                macd_signal: Decimal::ZERO,
                macd_histogram: macd_hist,
                bollinger_upper: price + dec!(500),
                bollinger_mid: price,
                bollinger_lower: price - dec!(500),
            },
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn trend_follower_goes_long_above_ema() {
        let provider = IndicatorRuleProvider::new();
        let decision = provider
            .decide(
                &agent("trend_following"),
                &snapshot(dec!(61000), dec!(60000), dec!(60), dec!(10)),
                None,
            )
            .await
            .unwrap();
        assert_eq!(decision.signal, Signal::Long);
        assert!(decision.confidence >= dec!(0.5));
        assert_eq!(decision.strategy_tag, "trend_following");
    }

    #[tokio::test]
    async fn momentum_shorts_weak_rsi() {
        let provider = IndicatorRuleProvider::new();
        let decision = provider
            .decide(
                &agent("momentum"),
                &snapshot(dec!(60000), dec!(60000), dec!(30), dec!(-5)),
                None,
            )
            .await
            .unwrap();
        assert_eq!(decision.signal, Signal::Short);
    }

    #[tokio::test]
    async fn unknown_style_holds() {
        let provider = IndicatorRuleProvider::new();
        let decision = provider
            .decide(
                &agent("astrology"),
                &snapshot(dec!(60000), dec!(60000), dec!(50), Decimal::ZERO),
                None,
            )
            .await
            .unwrap();
        assert_eq!(decision.signal, Signal::Hold);
    }
}
