//! Full-cycle orchestrator tests: decision pipeline through entry,
//! external close reconciliation, and the drawdown kill-switch.

mod common;

use async_trait::async_trait;
use common::MockExchange;
use peregrine::agents::{DecisionProvider, ProviderDecision};
use peregrine::config::{
    AppConfig, BreakerConfig, DataConfig, ExchangeConfig, MonitorConfig, ProviderConfig,
    RiskConfig, TradingConfig,
};
use peregrine::domain::{AgentProfile, MarketSnapshot, PositionState, Signal};
use peregrine::engine::Orchestrator;
use peregrine::error::Result;
use peregrine::events::EventBus;
use peregrine::exchange::LatencyTracker;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};

struct ScriptedProvider {
    signal: Mutex<Signal>,
}

impl ScriptedProvider {
    fn new(signal: Signal) -> Self {
        Self {
            signal: Mutex::new(signal),
        }
    }

    fn set_signal(&self, signal: Signal) {
        *self.signal.lock().unwrap() = signal;
    }
}

#[async_trait]
impl DecisionProvider for ScriptedProvider {
    async fn decide(
        &self,
        agent: &AgentProfile,
        _snapshot: &MarketSnapshot,
        _recent_accuracy: Option<Decimal>,
    ) -> Result<ProviderDecision> {
        Ok(ProviderDecision {
            signal: *self.signal.lock().unwrap(),
            // below the cache threshold so every cycle re-queries
            confidence: dec!(0.75),
            reasoning: "scripted".to_string(),
            strategy_tag: agent.style_tag.clone(),
        })
    }
}

fn test_config(dirs: &tempfile::TempDir) -> AppConfig {
    AppConfig {
        exchange: ExchangeConfig {
            base_url: "http://localhost".to_string(),
            api_key: "k".to_string(),
            api_secret: "s".to_string(),
            request_timeout_secs: 5,
            recv_window_ms: 5000,
            retry_max_attempts: 1,
            retry_base_ms: 10,
        },
        trading: TradingConfig {
            symbols: vec!["ETHUSDT".to_string()],
            interval: "3m".to_string(),
            cycle_secs: 60,
            cycle_timeout_secs: 90,
            max_positions_per_symbol: 3,
            // cooldowns off so the kill-switch is what blocks re-entry
            entry_cooldown_secs: 0,
            reversal_cooldown_secs: 0,
            duplicate_guard_debounce_ms: 2500,
            tp_fraction: dec!(0.02),
            sl_fraction: dec!(0.01),
            reconcile_every_cycles: 10,
            flush_every_cycles: 7,
        },
        risk: RiskConfig::default(),
        breakers: BreakerConfig::default(),
        provider: ProviderConfig::default(),
        monitor: MonitorConfig::default(),
        data: DataConfig {
            cache_ttl_secs: 0,
            hard_refresh_secs: 0,
            kline_limit: 60,
            log_dir: dirs.path().join("logs").to_string_lossy().into_owned(),
            data_dir: dirs.path().join("data").to_string_lossy().into_owned(),
            agents_dir: dirs.path().join("agents").to_string_lossy().into_owned(),
        },
    }
}

async fn build_engine(
    mock: Arc<MockExchange>,
    provider: Arc<ScriptedProvider>,
    dirs: &tempfile::TempDir,
) -> (
    Orchestrator,
    Arc<peregrine::supervisor::LiveMonitor>,
    Arc<peregrine::supervisor::Sentinel>,
) {
    let config = test_config(dirs);
    let events = EventBus::new(256);
    let latency = Arc::new(LatencyTracker::new(20));
    Orchestrator::init(config, mock, provider, events, latency)
        .await
        .expect("engine init")
}

#[tokio::test]
async fn cycle_opens_protected_position_from_agent_consensus() {
    let dirs = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockExchange::new());
    mock.set_mark("ETHUSDT", dec!(2000));
    mock.seed_klines("ETHUSDT", dec!(2000), 60);
    let provider = Arc::new(ScriptedProvider::new(Signal::Long));

    let (mut engine, _monitor, _sentinel) = build_engine(mock.clone(), provider, &dirs).await;
    engine.run_cycle().await.unwrap();

    let positions = engine.state_machine().live_positions();
    assert_eq!(positions.len(), 1);
    let position = &positions[0];
    assert_eq!(position.symbol, "ETHUSDT");
    assert_eq!(position.state, PositionState::Monitoring);
    assert!(position.has_protection());
    assert!(position.decision_ref.is_some());
    assert_eq!(mock.protective_orders("ETHUSDT").len(), 2);

    // audit rows buffered for the periodic flush
    assert!(engine.journal().buffered_rows() > 0);
}

#[tokio::test]
async fn external_tp_fill_reconciles_into_outcome() {
    let dirs = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockExchange::new());
    mock.set_mark("ETHUSDT", dec!(2000));
    mock.seed_klines("ETHUSDT", dec!(2000), 60);
    let provider = Arc::new(ScriptedProvider::new(Signal::Long));

    let (mut engine, monitor, _sentinel) =
        build_engine(mock.clone(), provider.clone(), &dirs).await;
    engine.run_cycle().await.unwrap();
    assert_eq!(engine.state_machine().live_positions().len(), 1);

    // venue fills the TP; the monitor reports; the next cycle reconciles
    mock.fill_take_profit("ETHUSDT");
    monitor.run_once().await.unwrap();
    provider.set_signal(Signal::Hold);
    engine.run_cycle().await.unwrap();

    assert!(engine.state_machine().live_positions().is_empty());
    engine.journal().flush_all().unwrap();
    let trades = std::fs::read_to_string(dirs.path().join("logs/trades_log.csv")).unwrap();
    assert!(trades.contains("ETHUSDT"));
    assert!(trades.contains("TP"));
}

#[tokio::test]
async fn s6_drawdown_kill_switch_blocks_new_entries() {
    let dirs = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockExchange::new());
    mock.set_mark("ETHUSDT", dec!(2000));
    mock.seed_klines("ETHUSDT", dec!(2000), 60);
    let provider = Arc::new(ScriptedProvider::new(Signal::Hold));

    let (mut engine, _monitor, _sentinel) =
        build_engine(mock.clone(), provider.clone(), &dirs).await;
    // establish the 10000 peak with no trading
    engine.run_cycle().await.unwrap();

    // equity collapses to 0.74x peak; drawdown switch latches
    mock.set_balance(dec!(7400));
    provider.set_signal(Signal::Long);
    engine.run_cycle().await.unwrap();
    assert!(engine.state_machine().live_positions().is_empty());

    // recovery does not unlatch it within the run
    mock.set_balance(dec!(9900));
    engine.run_cycle().await.unwrap();
    assert!(engine.state_machine().live_positions().is_empty());
}

#[tokio::test]
async fn orphan_venue_position_is_adopted_for_repair() {
    let dirs = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockExchange::new());
    mock.set_mark("ETHUSDT", dec!(2000));
    mock.seed_klines("ETHUSDT", dec!(2000), 60);
    // the venue knows a position this process never opened
    mock.seed_position("ETHUSDT", dec!(0.8), dec!(1950), 3);
    let provider = Arc::new(ScriptedProvider::new(Signal::Hold));

    let (mut engine, _monitor, _sentinel) = build_engine(mock.clone(), provider, &dirs).await;
    engine.run_cycle().await.unwrap();

    let positions = engine.state_machine().live_positions();
    assert_eq!(positions.len(), 1);
    let adopted = &positions[0];
    assert_eq!(adopted.state, PositionState::Monitoring);
    assert_eq!(adopted.entry_price, dec!(1950));
    assert_eq!(adopted.leverage, 3);
    assert!(adopted.decision_ref.is_none());
}

#[tokio::test]
async fn daily_loss_blocks_entries_but_not_monitoring() {
    let dirs = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockExchange::new());
    mock.set_mark("ETHUSDT", dec!(2000));
    mock.seed_klines("ETHUSDT", dec!(2000), 60);
    let provider = Arc::new(ScriptedProvider::new(Signal::Hold));

    let (mut engine, _monitor, _sentinel) =
        build_engine(mock.clone(), provider.clone(), &dirs).await;
    engine.run_cycle().await.unwrap();

    // 6% down on the day trips the 5% daily loss switch (not drawdown 25%)
    mock.set_balance(dec!(9400));
    provider.set_signal(Signal::Long);
    engine.run_cycle().await.unwrap();
    assert!(engine.state_machine().live_positions().is_empty());
}
