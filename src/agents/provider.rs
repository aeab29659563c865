//! Decision provider seam
//!
//! The oracle behind `DecisionProvider` is opaque: an LLM, a rule engine, a
//! remote service. The harness owns the two behaviors every provider gets
//! for free: a hard decision deadline (a slow oracle degrades to HOLD
//! upstream) and reuse of recent high-confidence decisions.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::domain::{AgentProfile, MarketSnapshot, Signal};
use crate::error::{PeregrineError, Result};

/// What an oracle returns for one agent and one snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDecision {
    pub signal: Signal,
    pub confidence: Decimal,
    pub reasoning: String,
    pub strategy_tag: String,
}

/// The opaque decision source.
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    /// `recent_accuracy` is the agent's rolling accuracy, when known.
    async fn decide(
        &self,
        agent: &AgentProfile,
        snapshot: &MarketSnapshot,
        recent_accuracy: Option<Decimal>,
    ) -> Result<ProviderDecision>;
}

#[derive(Clone)]
struct CachedDecision {
    decision: ProviderDecision,
    issued_cycle: u64,
}

/// Timeout and cache wrapper around any provider.
pub struct ProviderHarness {
    inner: Arc<dyn DecisionProvider>,
    timeout: Duration,
    cache_min_confidence: Decimal,
    cache_max_age_cycles: u64,
    cache: RwLock<HashMap<String, CachedDecision>>,
}

impl ProviderHarness {
    pub fn new(inner: Arc<dyn DecisionProvider>, config: &ProviderConfig) -> Self {
        Self {
            inner,
            timeout: Duration::from_secs(config.decision_timeout_secs),
            cache_min_confidence: config.cache_min_confidence,
            cache_max_age_cycles: config.cache_max_age_cycles,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Decide for an agent, reusing a cached high-confidence decision when
    /// it is recent enough. A provider that misses the deadline surfaces as
    /// `DecisionUnavailable`; the orchestrator treats that as HOLD.
    pub async fn decide(
        &self,
        agent: &AgentProfile,
        snapshot: &MarketSnapshot,
        recent_accuracy: Option<Decimal>,
        cycle: u64,
    ) -> Result<ProviderDecision> {
        if let Some(cached) = self.cache.read().await.get(&agent.agent_id) {
            let age = cycle.saturating_sub(cached.issued_cycle);
            if cached.decision.confidence >= self.cache_min_confidence
                && age < self.cache_max_age_cycles
            {
                debug!(
                    agent_id = %agent.agent_id,
                    age_cycles = age,
                    "reusing cached high-confidence decision"
                );
                return Ok(cached.decision.clone());
            }
        }

        let decision =
            match tokio::time::timeout(self.timeout, self.inner.decide(agent, snapshot, recent_accuracy))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(PeregrineError::DecisionUnavailable {
                        agent_id: agent.agent_id.clone(),
                        reason: format!("oracle exceeded {}ms deadline", self.timeout.as_millis()),
                    })
                }
            };

        self.cache.write().await.insert(
            agent.agent_id.clone(),
            CachedDecision {
                decision: decision.clone(),
                issued_cycle: cycle,
            },
        );
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::IndicatorSet;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn snapshot() -> MarketSnapshot {
        MarketSnapshot {
            symbol: "BTCUSDT".to_string(),
            price: dec!(60000),
            indicators: IndicatorSet {
                atr_fast: dec!(100),
                atr_slow: dec!(100),
                ema_20: dec!(60000),
                rsi: dec!(50),
                macd: Decimal::ZERO,
                macd_signal: Decimal::ZERO,
                macd_histogram: Decimal::ZERO,
                bollinger_upper: dec!(60500),
                bollinger_mid: dec!(60000),
                bollinger_lower: dec!(59500),
            },
            timestamp: Utc::now(),
        }
    }

    fn agent() -> AgentProfile {
        AgentProfile {
            agent_id: "a1".to_string(),
            symbol: "BTCUSDT".to_string(),
            style_tag: "trend_following".to_string(),
            base_weight: Decimal::ONE,
            performance_multiplier: Decimal::ONE,
            config: serde_json::Value::Null,
        }
    }

    struct FixedProvider {
        confidence: Decimal,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DecisionProvider for FixedProvider {
        async fn decide(
            &self,
            _agent: &AgentProfile,
            _snapshot: &MarketSnapshot,
            _recent_accuracy: Option<Decimal>,
        ) -> Result<ProviderDecision> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ProviderDecision {
                signal: Signal::Long,
                confidence: self.confidence,
                reasoning: "fixed".to_string(),
                strategy_tag: "fixed".to_string(),
            })
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl DecisionProvider for SlowProvider {
        async fn decide(
            &self,
            _agent: &AgentProfile,
            _snapshot: &MarketSnapshot,
            _recent_accuracy: Option<Decimal>,
        ) -> Result<ProviderDecision> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            unreachable!("the harness deadline fires first")
        }
    }

    #[tokio::test]
    async fn high_confidence_decisions_are_reused() {
        let inner = Arc::new(FixedProvider {
            confidence: dec!(0.9),
            calls: AtomicUsize::new(0),
        });
        let harness = ProviderHarness::new(inner.clone(), &ProviderConfig::default());

        harness.decide(&agent(), &snapshot(), None, 1).await.unwrap();
        harness.decide(&agent(), &snapshot(), None, 2).await.unwrap();
        harness.decide(&agent(), &snapshot(), None, 4).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        // cycle 5 is 4 cycles after issue: cache expired
        harness.decide(&agent(), &snapshot(), None, 5).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn low_confidence_decisions_are_not_cached() {
        let inner = Arc::new(FixedProvider {
            confidence: dec!(0.6),
            calls: AtomicUsize::new(0),
        });
        let harness = ProviderHarness::new(inner.clone(), &ProviderConfig::default());

        harness.decide(&agent(), &snapshot(), None, 1).await.unwrap();
        harness.decide(&agent(), &snapshot(), None, 2).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_oracle_maps_to_decision_unavailable() {
        let harness = ProviderHarness::new(Arc::new(SlowProvider), &ProviderConfig::default());
        let err = harness
            .decide(&agent(), &snapshot(), None, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, PeregrineError::DecisionUnavailable { .. }));
    }
}
