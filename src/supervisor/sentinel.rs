//! Sentinel: authoritative TP/SL repair
//!
//! The only component allowed to re-attach protective orders once a
//! position is in MONITORING. Slow cadence, dual-layer debounce per symbol
//! (wall clock and sentinel cycles), and the entry leverage is never
//! touched mid-position.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::{MonitorConfig, TradingConfig};
use crate::data::MarketDataEngine;
use crate::domain::{Position, PositionState};
use crate::error::{PeregrineError, Result};
use crate::events::{EngineEvent, EventBus};
use crate::exchange::codes::CODE_MARGIN_INSUFFICIENT;
use crate::exchange::traits::{ExchangeApi, OrderType};
use crate::execution::locks::SymbolGuards;
use crate::execution::order_manager::OrderManager;
use crate::execution::state::TradeStateMachine;
use crate::execution::tpsl;
use crate::regime;

pub struct Sentinel {
    exchange: Arc<dyn ExchangeApi>,
    state: Arc<TradeStateMachine>,
    orders: Arc<OrderManager>,
    guards: Arc<SymbolGuards>,
    data: Arc<MarketDataEngine>,
    events: EventBus,
    interval_secs: u64,
    base_tp_fraction: rust_decimal::Decimal,
    base_sl_fraction: rust_decimal::Decimal,
    running: Arc<AtomicBool>,
}

impl Sentinel {
    pub fn new(
        exchange: Arc<dyn ExchangeApi>,
        state: Arc<TradeStateMachine>,
        orders: Arc<OrderManager>,
        guards: Arc<SymbolGuards>,
        data: Arc<MarketDataEngine>,
        events: EventBus,
        monitor_config: &MonitorConfig,
        trading_config: &TradingConfig,
    ) -> Self {
        Self {
            exchange,
            state,
            orders,
            guards,
            data,
            events,
            interval_secs: monitor_config.sentinel_interval_secs,
            base_tp_fraction: trading_config.tp_fraction,
            base_sl_fraction: trading_config.sl_fraction,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("sentinel already running");
            return;
        }
        info!("starting sentinel ({}s interval)", self.interval_secs);
        let sentinel = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(sentinel.interval_secs));
            while sentinel.running.load(Ordering::SeqCst) {
                interval.tick().await;
                if let Err(e) = sentinel.run_once().await {
                    error!("sentinel cycle failed: {}", e);
                }
            }
            info!("sentinel stopped");
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// One repair pass over every MONITORING position.
    pub async fn run_once(&self) -> Result<()> {
        for position in self.state.live_positions() {
            if position.state != PositionState::Monitoring {
                continue;
            }
            self.guards.tick_reattach_cycle(&position.symbol);
            if let Err(e) = self.check_and_repair(&position).await {
                warn!(symbol = %position.symbol, error = %e, "sentinel repair failed");
            }
        }
        Ok(())
    }

    async fn check_and_repair(&self, position: &Position) -> Result<()> {
        let orders = self.exchange.get_open_orders(&position.symbol).await?;
        let venue_tp = orders
            .iter()
            .find(|o| o.is_protective() && o.order_type == OrderType::TakeProfitMarket);
        let venue_sl = orders
            .iter()
            .find(|o| o.is_protective() && o.order_type == OrderType::StopMarket);

        if let (Some(tp), Some(sl)) = (venue_tp, venue_sl) {
            // Both legs alive; adopt venue ids if local state lost them.
            if !position.has_protection() {
                self.state.set_protection(
                    position.id,
                    Some(tp.order_id.clone()),
                    Some(sl.order_id.clone()),
                    None,
                )?;
            }
            return Ok(());
        }

        // Dual-layer debounce: 60s wall clock AND 3 sentinel cycles.
        if !self.guards.reattach_allowed(&position.symbol) {
            return Ok(());
        }
        self.guards.record_reattach_attempt(&position.symbol);

        // Release stale local protection so the repair attach is not
        // suppressed by its own hash.
        self.state
            .clear_protection(position.id, venue_tp.is_none(), venue_sl.is_none());

        let (tp_fraction, sl_fraction) = self.repair_fractions(&position.symbol).await;
        let prices = tpsl::compute_tpsl(
            position.side,
            position.entry_price,
            tp_fraction,
            sl_fraction,
        );

        // Entry leverage is reused as-is; re-setting leverage mid-position
        // would change the margin basis of the open quantity.
        match self.orders.attach_tpsl(position, prices.tp, prices.sl).await {
            Ok((Some(tp_id), Some(sl_id))) => {
                info!(symbol = %position.symbol, "sentinel reattached TP/SL");
                self.events.publish(EngineEvent::Reattached {
                    symbol: position.symbol.clone(),
                    tp_order_id: tp_id,
                    sl_order_id: sl_id,
                });
            }
            Ok((tp_id, sl_id)) => {
                self.events.publish(EngineEvent::TpslIncomplete {
                    symbol: position.symbol.clone(),
                    has_tp: tp_id.is_some(),
                    has_sl: sl_id.is_some(),
                });
            }
            Err(PeregrineError::Exchange { code, .. }) if code == CODE_MARGIN_INSUFFICIENT => {
                warn!(symbol = %position.symbol, "reattach skipped: margin insufficient");
                self.events.publish(EngineEvent::ReattachSkippedMargin {
                    symbol: position.symbol.clone(),
                });
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Repair prices follow the current regime's ATR multipliers when
    /// market data is available, else the configured base fractions.
    async fn repair_fractions(
        &self,
        symbol: &str,
    ) -> (rust_decimal::Decimal, rust_decimal::Decimal) {
        match self.data.get(symbol, false).await {
            Ok(data) => {
                let snapshot = data.snapshot(symbol);
                let report = regime::classify(&snapshot);
                tpsl::tpsl_fractions(
                    Some(&report),
                    snapshot.indicators.atr_slow,
                    snapshot.price,
                    self.base_tp_fraction,
                    self.base_sl_fraction,
                )
            }
            Err(_) => (self.base_tp_fraction, self.base_sl_fraction),
        }
    }
}
