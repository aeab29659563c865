//! Live position monitor
//!
//! Fast observational loop over all live positions. It detects positions
//! that vanished on the venue (TP/SL fill, liquidation, manual close) and
//! hands them to the orchestrator for reconciliation, reports missing
//! protective legs without repairing them (the Sentinel's job), and fires
//! the one-shot partial close when ROI crosses the trigger.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::MonitorConfig;
use crate::domain::PositionState;
use crate::error::Result;
use crate::events::{EngineEvent, EventBus};
use crate::exchange::traits::{ExchangeApi, OrderType};
use crate::execution::order_manager::OrderManager;
use crate::execution::state::TradeStateMachine;

pub struct LiveMonitor {
    exchange: Arc<dyn ExchangeApi>,
    state: Arc<TradeStateMachine>,
    orders: Arc<OrderManager>,
    events: EventBus,
    config: MonitorConfig,
    /// Positions confirmed gone on the venue, for orchestrator pickup.
    closed_tx: mpsc::UnboundedSender<Uuid>,
    running: Arc<AtomicBool>,
    last_activity_log: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl LiveMonitor {
    pub fn new(
        exchange: Arc<dyn ExchangeApi>,
        state: Arc<TradeStateMachine>,
        orders: Arc<OrderManager>,
        events: EventBus,
        config: MonitorConfig,
    ) -> (Self, mpsc::UnboundedReceiver<Uuid>) {
        let (closed_tx, closed_rx) = mpsc::unbounded_channel();
        (
            Self {
                exchange,
                state,
                orders,
                events,
                config,
                closed_tx,
                running: Arc::new(AtomicBool::new(false)),
                last_activity_log: Mutex::new(HashMap::new()),
            },
            closed_rx,
        )
    }

    /// Spawn the polling loop.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("live monitor already running");
            return;
        }
        info!(
            "starting live monitor ({}s interval)",
            self.config.live_interval_secs
        );
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(
                monitor.config.live_interval_secs,
            ));
            while monitor.running.load(Ordering::SeqCst) {
                interval.tick().await;
                if let Err(e) = monitor.run_once().await {
                    error!("live monitor cycle failed: {}", e);
                }
            }
            info!("live monitor stopped");
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// One observation pass over every live position.
    pub async fn run_once(&self) -> Result<()> {
        for position in self.state.live_positions() {
            if let Err(e) = self.check_position(&position.id).await {
                warn!(position = %position.id, error = %e, "position check failed");
            }
        }
        Ok(())
    }

    async fn check_position(&self, id: &Uuid) -> Result<()> {
        let Some(position) = self.state.get_by_id(*id) else {
            return Ok(());
        };

        let info = self.exchange.get_position_info(&position.symbol).await?;
        let venue_flat = match &info {
            None => true,
            Some(i) => i.is_flat() || i.side() != Some(position.side),
        };

        if venue_flat {
            // The venue closed it (TP/SL fill, liquidation, manual action).
            self.events.publish(EngineEvent::PositionClosedExternally {
                symbol: position.symbol.clone(),
                side: position.side,
            });
            // Reconciliation belongs to the orchestrator; we only report.
            let _ = self.closed_tx.send(position.id);
            return Ok(());
        }

        let orders = self.exchange.get_open_orders(&position.symbol).await?;
        let has_tp = orders
            .iter()
            .any(|o| o.is_protective() && o.order_type == OrderType::TakeProfitMarket);
        let has_sl = orders
            .iter()
            .any(|o| o.is_protective() && o.order_type == OrderType::StopMarket);

        if position.state == PositionState::Monitoring && (!has_tp || !has_sl) {
            // Observe-only: record the gap for the Sentinel, never repair.
            if self.should_log_activity(&position.symbol).await {
                warn!(
                    symbol = %position.symbol,
                    has_tp = has_tp,
                    has_sl = has_sl,
                    "protective leg missing, deferring to sentinel"
                );
                self.events.publish(EngineEvent::TpslIncomplete {
                    symbol: position.symbol.clone(),
                    has_tp,
                    has_sl,
                });
            }
        }

        // Partial-close trigger
        if position.state == PositionState::Monitoring && !position.partial_close_done {
            if let Some(venue) = &info {
                let roi = position.roi(venue.mark_price);
                if roi >= self.config.partial_close_roi {
                    info!(
                        symbol = %position.symbol,
                        roi = %roi,
                        "partial close trigger hit"
                    );
                    self.orders
                        .schedule_partial_close(position.id, self.config.partial_close_fraction)
                        .await?;
                }
            }
        }

        if self.should_log_activity(&position.symbol).await {
            debug!(
                symbol = %position.symbol,
                state = %position.state,
                has_tp = has_tp,
                has_sl = has_sl,
                "position healthy"
            );
        }
        Ok(())
    }

    /// Per-symbol activity log debounce to avoid log spam at 5s cadence.
    async fn should_log_activity(&self, symbol: &str) -> bool {
        let mut log_times = self.last_activity_log.lock().await;
        let now = Utc::now();
        let debounce = ChronoDuration::seconds(self.config.log_debounce_secs as i64);
        match log_times.get(symbol) {
            Some(last) if now - *last < debounce => false,
            _ => {
                log_times.insert(symbol.to_string(), now);
                true
            }
        }
    }
}
