//! Cycle orchestrator
//!
//! The single authoritative task that drives the trading loop: refresh
//! equity, classify regimes, evaluate breakers and kill-switches, run the
//! agent decision pipeline, arbitrate, size, and hand entries to the order
//! manager. Cycles never overlap; a slow cycle is reported, not preempted.
//!
//! Position records are mutated here (entries, confirmed closes) and by the
//! Sentinel (protective order ids); everything else reads snapshots.

use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::agents::{DecisionProvider, ProviderHarness};
use crate::config::AppConfig;
use crate::data::MarketDataEngine;
use crate::domain::{
    AgentProfile, ArbitratedIntent, Decision, ExitReason, Position, PositionSide, PositionState,
    Signal, TradeOutcome,
};
use crate::engine::control::ControlState;
use crate::engine::equity::EquityReconciler;
use crate::engine::feedback::OutcomeFeedback;
use crate::error::{PeregrineError, Result};
use crate::events::{EngineEvent, EventBus};
use crate::exchange::filters::FilterStore;
use crate::exchange::latency::LatencyTracker;
use crate::exchange::traits::{ExchangeApi, OrderType, PositionInfo};
use crate::execution::locks::SymbolGuards;
use crate::execution::order_manager::{EntryRequest, EntryResult, OrderManager};
use crate::execution::state::TradeStateMachine;
use crate::execution::tpsl;
use crate::persistence::csv_log::{CsvJournal, DecisionRow, EquityRow, ErrorRow, TradeRow};
use crate::persistence::state_store::{PersistedState, StateStore};
use crate::regime;
use crate::risk::{correlation, RiskEngine};
use crate::signal::{arbitrate, ConfidenceNormalizer};
use crate::supervisor::{LiveMonitor, Sentinel};

pub struct Orchestrator {
    config: AppConfig,
    exchange: Arc<dyn ExchangeApi>,
    data: Arc<MarketDataEngine>,
    filters: Arc<FilterStore>,
    state: Arc<TradeStateMachine>,
    guards: Arc<SymbolGuards>,
    orders: Arc<OrderManager>,
    provider: ProviderHarness,
    profiles: HashMap<String, AgentProfile>,
    profiles_by_symbol: HashMap<String, Vec<AgentProfile>>,
    normalizer: ConfidenceNormalizer,
    risk: RiskEngine,
    control: ControlState,
    recon: EquityReconciler,
    feedback: OutcomeFeedback,
    journal: Arc<CsvJournal>,
    state_store: StateStore,
    events: EventBus,
    latency: Arc<LatencyTracker>,
    closed_rx: mpsc::UnboundedReceiver<Uuid>,
    cycle: u64,
}

impl Orchestrator {
    /// Wire the full engine. Fails fast on configuration problems and an
    /// unreachable venue; nothing trades until this returns.
    #[allow(clippy::type_complexity)]
    pub async fn init(
        config: AppConfig,
        exchange: Arc<dyn ExchangeApi>,
        oracle: Arc<dyn DecisionProvider>,
        events: EventBus,
        latency: Arc<LatencyTracker>,
    ) -> Result<(Self, Arc<LiveMonitor>, Arc<Sentinel>)> {
        let filters = Arc::new(FilterStore::new(exchange.clone()));
        filters.warm_up(&config.trading.symbols).await?;

        let data = Arc::new(MarketDataEngine::new(
            exchange.clone(),
            &config.trading.interval,
            &config.data,
        ));
        let state = Arc::new(TradeStateMachine::new(
            config.monitor.exit_debounce_secs,
            config.trading.max_positions_per_symbol,
        ));
        let guards = Arc::new(SymbolGuards::new(
            &config.trading.symbols,
            config.trading.entry_cooldown_secs,
            config.trading.reversal_cooldown_secs,
            config.trading.duplicate_guard_debounce_ms,
            config.monitor.reattach_cooldown_secs,
            config.monitor.reattach_cycle_debounce,
        ));
        let orders = Arc::new(OrderManager::new(
            exchange.clone(),
            filters.clone(),
            state.clone(),
            guards.clone(),
            events.clone(),
        ));

        let (live_monitor, closed_rx) = LiveMonitor::new(
            exchange.clone(),
            state.clone(),
            orders.clone(),
            events.clone(),
            config.monitor.clone(),
        );
        let live_monitor = Arc::new(live_monitor);
        let sentinel = Arc::new(Sentinel::new(
            exchange.clone(),
            state.clone(),
            orders.clone(),
            guards.clone(),
            data.clone(),
            events.clone(),
            &config.monitor,
            &config.trading,
        ));

        let journal = Arc::new(CsvJournal::new(&config.data.log_dir)?);
        let state_store = StateStore::new(&config.data.data_dir)?;
        let persisted = state_store.load();

        let balance = exchange.get_balance().await?;
        let starting_equity = balance.balance;
        info!(
            starting_equity = %starting_equity,
            restored_peak = %persisted.peak_equity,
            "engine initialized"
        );

        let mut roster = crate::persistence::agent_store::load_roster(
            std::path::Path::new(&config.data.agents_dir),
            &config.trading.symbols,
        )?;
        crate::persistence::agent_store::sanitize_weights(&mut roster);
        let profiles: HashMap<String, AgentProfile> = roster
            .iter()
            .map(|p| (p.agent_id.clone(), p.clone()))
            .collect();
        let mut profiles_by_symbol: HashMap<String, Vec<AgentProfile>> = HashMap::new();
        for profile in roster {
            profiles_by_symbol
                .entry(profile.symbol.clone())
                .or_default()
                .push(profile);
        }

        let control = ControlState::new(
            &config.risk,
            &config.breakers,
            starting_equity,
            persisted.peak_equity,
            persisted.realized_cum,
        );
        let recon = EquityReconciler::new(starting_equity);
        let provider = ProviderHarness::new(oracle, &config.provider);
        let risk = RiskEngine::new(config.risk.clone());

        Ok((
            Self {
                config,
                exchange,
                data,
                filters,
                state,
                guards,
                orders,
                provider,
                profiles,
                profiles_by_symbol,
                normalizer: ConfidenceNormalizer::new(),
                risk,
                control,
                recon,
                feedback: OutcomeFeedback::new(),
                journal,
                state_store,
                events,
                latency,
                closed_rx,
                cycle: 0,
            },
            live_monitor,
            sentinel,
        ))
    }

    pub fn journal(&self) -> Arc<CsvJournal> {
        self.journal.clone()
    }

    pub fn state_machine(&self) -> Arc<TradeStateMachine> {
        self.state.clone()
    }

    /// Drive cycles until shutdown. The in-flight cycle always completes;
    /// buffered journals are force-flushed; open venue orders stay in place
    /// by operator policy.
    pub async fn run_loop(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(self.config.trading.cycle_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!("cycle failed: {}", e);
                        self.journal.log_error(ErrorRow {
                            ts: Utc::now(),
                            component: "orchestrator".to_string(),
                            symbol: String::new(),
                            kind: "cycle_failure".to_string(),
                            detail: e.to_string(),
                        });
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("orchestrator draining: flushing journals");
        self.journal.flush_all()?;
        self.persist_control_state();
        Ok(())
    }

    /// One full cycle. Public so tests can drive the engine tick by tick.
    pub async fn run_cycle(&mut self) -> Result<()> {
        self.cycle += 1;
        let started = Instant::now();
        self.events.publish(EngineEvent::CycleStarted {
            cycle: self.cycle,
            at: Utc::now(),
        });

        // Closes observed by the live monitor since the last cycle.
        self.drain_external_closes().await;

        // Equity snapshot.
        let balance = self.exchange.get_balance().await?;
        let venue_positions = self.collect_venue_positions().await;
        self.adopt_orphans(&venue_positions).await;
        let unrealized: Decimal = venue_positions
            .values()
            .flatten()
            .map(|p| p.unrealized_pnl)
            .sum();
        let total_equity = balance.balance + unrealized;
        self.control.observe_equity(total_equity);
        let drawdown = self.control.drawdown_from_peak(total_equity);
        self.journal.log_equity(EquityRow {
            ts: Utc::now(),
            realized: self.control.realized_cum,
            unrealized,
            total: total_equity,
            peak: self.control.peak_equity,
            drawdown,
        });
        self.events.publish(EngineEvent::EquitySnapshotTaken {
            total_equity,
            drawdown,
        });
        self.persist_control_state();

        // Kill-switches: entries halt, exits continue.
        let kill = self.control.kill_switch.check(
            total_equity,
            self.control.peak_equity,
            self.latency.average_secs(),
        );
        if let Some(reason) = &kill {
            self.events.publish(EngineEvent::KillSwitchTripped {
                switch: "global".to_string(),
                detail: reason.to_string(),
            });
        }

        for symbol in self.config.trading.symbols.clone() {
            if let Err(e) = self
                .process_symbol(&symbol, total_equity, kill.is_some())
                .await
            {
                // Data staleness skips the symbol for this cycle; state is kept.
                warn!(symbol = %symbol, error = %e, "symbol cycle skipped");
                self.journal.log_error(ErrorRow {
                    ts: Utc::now(),
                    component: "orchestrator".to_string(),
                    symbol: symbol.clone(),
                    kind: "symbol_skip".to_string(),
                    detail: e.to_string(),
                });
            }
        }

        if self.cycle % self.config.trading.reconcile_every_cycles == 0 {
            self.reconcile_equity(balance.balance, unrealized);
        }
        if self.cycle % self.config.trading.flush_every_cycles == 0 {
            self.journal.flush_all()?;
        }

        let elapsed_secs = started.elapsed().as_secs();
        if elapsed_secs > self.config.trading.cycle_timeout_secs {
            warn!(cycle = self.cycle, elapsed_secs, "cycle exceeded timeout");
            self.events.publish(EngineEvent::CycleTimeout {
                cycle: self.cycle,
                elapsed_secs,
            });
        }
        Ok(())
    }

    /// The per-symbol pipeline: data, regime, breakers, decisions,
    /// arbitration, risk gate, entry.
    async fn process_symbol(
        &mut self,
        symbol: &str,
        total_equity: Decimal,
        entries_killed: bool,
    ) -> Result<()> {
        let data = self.data.get(symbol, false).await?;
        let snapshot = data.snapshot(symbol);
        let report = regime::classify(&snapshot);

        // Breakers read microstructure directly from the venue.
        let funding = self
            .exchange
            .get_funding_rates(symbol, 10)
            .await
            .unwrap_or_default();
        let book = self.exchange.get_book_ticker(symbol).await?;
        for trip in self
            .control
            .breakers
            .evaluate(symbol, &data.klines, &funding, &book)
        {
            self.events.publish(EngineEvent::BreakerTripped {
                breaker: trip.breaker.to_string(),
                symbol: trip.symbol,
                reason: trip.reason,
                paused_until: trip.paused_until,
            });
        }

        // Decision pipeline.
        let profiles = self
            .profiles_by_symbol
            .get(symbol)
            .cloned()
            .unwrap_or_default();
        let mut decisions = Vec::with_capacity(profiles.len());
        for profile in &profiles {
            let decision = self.decide_for_agent(profile, &snapshot, &report).await;
            self.normalizer
                .record_decision(&profile.agent_id, decision.id);
            self.feedback.record_decision(&decision);
            self.journal.log_decision(DecisionRow {
                ts: decision.timestamp,
                agent_id: decision.agent_id.clone(),
                symbol: symbol.to_string(),
                signal: decision.signal.to_string(),
                raw_confidence: decision.raw_confidence,
                normalized_confidence: decision.normalized_confidence,
                strategy_tag: decision.strategy_tag.clone(),
                price: snapshot.price,
                regime: report.regime.to_string(),
                reasoning: decision.reasoning.clone(),
            });
            self.events.publish(EngineEvent::DecisionMade {
                agent_id: decision.agent_id.clone(),
                symbol: symbol.to_string(),
                signal: decision.signal,
                confidence: decision.normalized_confidence,
            });
            decisions.push(decision);
        }

        let intent = arbitrate(symbol, &decisions, &self.profiles);
        self.events.publish(EngineEvent::IntentArbitrated {
            symbol: symbol.to_string(),
            side: intent.side,
            score: intent.score,
            reason: intent.reason.clone(),
        });

        if !intent.side.is_actionable() {
            return Ok(());
        }
        if entries_killed {
            self.skip_entry(symbol, "kill-switch active");
            return Ok(());
        }
        if self.control.breakers.entries_paused() {
            self.skip_entry(symbol, "circuit breaker pause");
            return Ok(());
        }
        if report.skip_entry() {
            self.skip_entry(symbol, &format!("regime {} blocks entries", report.regime));
            return Ok(());
        }

        self.try_enter(symbol, &snapshot.price, &report, &intent, &decisions, total_equity)
            .await
    }

    async fn decide_for_agent(
        &mut self,
        profile: &AgentProfile,
        snapshot: &crate::domain::MarketSnapshot,
        report: &regime::RegimeReport,
    ) -> Decision {
        let accuracy = self.normalizer.accuracy(&profile.agent_id);
        match self
            .provider
            .decide(profile, snapshot, accuracy, self.cycle)
            .await
        {
            Ok(pd) => {
                let normalized =
                    self.normalizer
                        .normalize(&profile.agent_id, pd.confidence, Some(report));
                Decision {
                    id: Uuid::new_v4(),
                    timestamp: Utc::now(),
                    agent_id: profile.agent_id.clone(),
                    symbol: profile.symbol.clone(),
                    signal: pd.signal,
                    raw_confidence: pd.confidence,
                    normalized_confidence: normalized,
                    strategy_tag: pd.strategy_tag,
                    reasoning: pd.reasoning,
                    snapshot: snapshot.clone(),
                }
            }
            Err(PeregrineError::DecisionUnavailable { agent_id, reason }) => {
                warn!(agent_id = %agent_id, "decision unavailable, holding");
                Decision::hold(&agent_id, &profile.symbol, &reason, snapshot.clone())
            }
            Err(e) => {
                warn!(agent_id = %profile.agent_id, error = %e, "provider error, holding");
                Decision::hold(
                    &profile.agent_id,
                    &profile.symbol,
                    &e.to_string(),
                    snapshot.clone(),
                )
            }
        }
    }

    async fn try_enter(
        &mut self,
        symbol: &str,
        price: &Decimal,
        report: &regime::RegimeReport,
        intent: &ArbitratedIntent,
        decisions: &[Decision],
        total_equity: Decimal,
    ) -> Result<()> {
        let side = match intent.side {
            Signal::Long => PositionSide::Long,
            Signal::Short => PositionSide::Short,
            Signal::Hold => return Ok(()),
        };

        let (tp_fraction, sl_fraction) = tpsl::tpsl_fractions(
            Some(report),
            decisions
                .first()
                .map(|d| d.snapshot.indicators.atr_slow)
                .unwrap_or(Decimal::ZERO),
            *price,
            self.config.trading.tp_fraction,
            self.config.trading.sl_fraction,
        );

        let leverage = self.control.governor.effective(report.regime);
        let correlation_adj = self.correlation_adjustment(symbol, side).await;
        let filters = self.filters.get(symbol).await;
        let Some(sized) = self.risk.size_position(
            total_equity,
            *price,
            sl_fraction,
            report.size_multiplier,
            correlation_adj,
            leverage,
            &filters,
        ) else {
            self.skip_entry(symbol, "BelowMinimum");
            return Ok(());
        };

        // The strongest same-side decision is the one the outcome resolves.
        let decision_ref = decisions
            .iter()
            .filter(|d| d.signal == intent.side)
            .max_by(|a, b| a.normalized_confidence.cmp(&b.normalized_confidence))
            .map(|d| d.id);

        let request = EntryRequest {
            symbol: symbol.to_string(),
            side,
            quantity: sized.quantity,
            leverage,
            tp_fraction,
            sl_fraction,
            decision_ref,
        };
        match self.orders.submit_entry(request).await? {
            EntryResult::Entered(position) => {
                info!(
                    symbol = symbol,
                    side = %position.side,
                    quantity = %position.quantity,
                    entry = %position.entry_price,
                    "entry complete"
                );
            }
            EntryResult::Skipped(reason) => {
                debug!(symbol = symbol, reason = %reason, "entry skipped");
            }
            EntryResult::Failed(reason) => {
                warn!(symbol = symbol, reason = %reason, "entry failed");
                self.journal.log_error(ErrorRow {
                    ts: Utc::now(),
                    component: "order_manager".to_string(),
                    symbol: symbol.to_string(),
                    kind: "entry_failure".to_string(),
                    detail: reason,
                });
            }
        }
        Ok(())
    }

    fn skip_entry(&self, symbol: &str, reason: &str) {
        debug!(symbol = symbol, reason = reason, "entry suppressed");
        self.events.publish(EngineEvent::EntrySkipped {
            symbol: symbol.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Size multiplier from cross-symbol return correlation against other
    /// open same-direction positions.
    async fn correlation_adjustment(&self, symbol: &str, side: PositionSide) -> Decimal {
        let bars = self.config.risk.correlation_bars;
        let candidate = self.data.recent_returns(symbol, bars).await;
        if candidate.is_empty() {
            return Decimal::ONE;
        }
        let mut peers: Vec<(Vec<f64>, bool)> = Vec::new();
        for other in &self.config.trading.symbols {
            if other == symbol {
                continue;
            }
            let open_same_direction = self.state.get(other, side).is_some();
            if !open_same_direction {
                continue;
            }
            let returns = self.data.recent_returns(other, bars).await;
            if !returns.is_empty() {
                peers.push((returns, true));
            }
        }
        let peer_refs: Vec<(&[f64], bool)> = peers
            .iter()
            .map(|(r, open)| (r.as_slice(), *open))
            .collect();
        correlation::correlation_adjustment(
            &candidate,
            &peer_refs,
            self.config.risk.correlation_threshold,
            self.config.risk.correlation_size_factor,
        )
    }

    async fn collect_venue_positions(&self) -> HashMap<String, Option<PositionInfo>> {
        let mut map = HashMap::new();
        for symbol in &self.config.trading.symbols {
            match self.exchange.get_position_info(symbol).await {
                Ok(info) => {
                    map.insert(symbol.clone(), info);
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "position info fetch failed");
                    map.insert(symbol.clone(), None);
                }
            }
        }
        map
    }

    /// Adopt venue positions absent from local state into MONITORING; the
    /// Sentinel re-attaches their protection.
    async fn adopt_orphans(&mut self, venue_positions: &HashMap<String, Option<PositionInfo>>) {
        for (symbol, info) in venue_positions {
            let Some(info) = info else { continue };
            let Some(side) = info.side() else { continue };
            if self.state.get(symbol, side).is_some() {
                continue;
            }
            let position = Position::new(
                symbol,
                side,
                info.position_amt.abs(),
                info.entry_price,
                info.leverage,
                None,
            );
            let id = position.id;
            let quantity = position.quantity;
            if let Err(e) = self.state.insert_position(position) {
                warn!(symbol = %symbol, error = %e, "orphan adoption rejected");
                continue;
            }
            if let Err(e) = self.state.transition(id, PositionState::Monitoring) {
                warn!(symbol = %symbol, error = %e, "orphan promotion failed");
                continue;
            }
            info!(symbol = %symbol, side = %side, "adopted orphan venue position");
            self.events.publish(EngineEvent::OrphanAdopted {
                symbol: symbol.clone(),
                side,
                quantity,
            });
        }
    }

    async fn drain_external_closes(&mut self) {
        let mut ids = Vec::new();
        while let Ok(id) = self.closed_rx.try_recv() {
            ids.push(id);
        }
        for id in ids {
            if let Err(e) = self.reconcile_external_close(id).await {
                warn!(position = %id, error = %e, "external close reconciliation failed");
            }
        }
    }

    /// The venue closed a position behind our back (TP/SL fill, manual
    /// action, liquidation). Infer the exit reason from the surviving
    /// protective leg, journal the outcome, feed back into learning.
    async fn reconcile_external_close(&mut self, id: Uuid) -> Result<()> {
        let Some(position) = self.state.get_by_id(id) else {
            return Ok(());
        };

        let open_orders = self
            .exchange
            .get_open_orders(&position.symbol)
            .await
            .unwrap_or_default();
        let tp_open = open_orders
            .iter()
            .any(|o| o.is_protective() && o.order_type == OrderType::TakeProfitMarket);
        let sl_open = open_orders
            .iter()
            .any(|o| o.is_protective() && o.order_type == OrderType::StopMarket);
        let exit_reason = match (tp_open, sl_open) {
            (false, true) => ExitReason::Tp,
            (true, false) => ExitReason::Sl,
            _ => ExitReason::Manual,
        };

        let exit_price = self
            .exchange
            .get_mark_price(&position.symbol)
            .await
            .unwrap_or(position.entry_price);

        // Walk the machine through CLOSING before the terminal state.
        if position.state != PositionState::Closing {
            let _ = self.state.transition(id, PositionState::Closing);
        }
        let Some(closed) = self.state.finalize_close(id) else {
            return Ok(());
        };

        // Surviving protective leg is stale now.
        for (present, order_id) in [
            (tp_open, &closed.tp_order_id),
            (sl_open, &closed.sl_order_id),
        ] {
            if present {
                if let Some(order_id) = order_id {
                    let _ = self.exchange.cancel_order(&closed.symbol, order_id).await;
                }
            }
        }

        let realized_pnl = closed.realized_pnl(exit_price, closed.quantity);
        let outcome = TradeOutcome {
            position_id: closed.id,
            symbol: closed.symbol.clone(),
            side: closed.side,
            exit_reason,
            exit_price,
            quantity: closed.quantity,
            realized_pnl,
            hold_duration_secs: (Utc::now() - closed.opened_at).num_seconds(),
            closed_at: Utc::now(),
            decision_ref: closed.decision_ref,
        };

        self.control.record_trade_outcome(realized_pnl);
        self.guards
            .record_exit(&closed.symbol, realized_pnl < Decimal::ZERO);
        self.feedback
            .resolve(&outcome, &mut self.normalizer, &self.journal);
        self.journal.log_trade(TradeRow {
            ts: outcome.closed_at,
            symbol: outcome.symbol.clone(),
            side: outcome.side.to_string(),
            quantity: outcome.quantity,
            entry_price: closed.entry_price,
            exit_price: outcome.exit_price,
            realized_pnl: outcome.realized_pnl,
            exit_reason: outcome.exit_reason.to_string(),
            hold_duration_secs: outcome.hold_duration_secs,
            leverage: closed.leverage,
        });
        self.events.publish(EngineEvent::PositionClosed {
            symbol: outcome.symbol.clone(),
            side: outcome.side,
            reason: outcome.exit_reason,
            realized_pnl: outcome.realized_pnl,
        });
        info!(
            symbol = %outcome.symbol,
            reason = %outcome.exit_reason,
            pnl = %outcome.realized_pnl,
            "external close reconciled"
        );
        Ok(())
    }

    fn reconcile_equity(&mut self, balance: Decimal, unrealized: Decimal) {
        let outcome = self.recon.reconcile(
            balance,
            unrealized,
            self.control.realized_cum,
            self.control.peak_equity,
        );
        if let Some((expected, observed, diff)) = outcome.drift {
            self.events.publish(EngineEvent::EquityDrift {
                expected,
                observed,
                diff_pct: diff,
            });
        }
    }

    fn persist_control_state(&self) {
        let state = PersistedState {
            peak_equity: self.control.peak_equity,
            realized_cum: self.control.realized_cum,
        };
        if let Err(e) = self.state_store.save(&state) {
            warn!("state persistence failed: {}", e);
        }
    }

    /// Close every live position (CLI flatten command).
    pub async fn flatten_all(&mut self) -> Result<()> {
        for position in self.state.live_positions() {
            match self.orders.close(position.id, ExitReason::Manual).await? {
                crate::execution::order_manager::CloseResult::Closed { exit_price, quantity } => {
                    info!(
                        symbol = %position.symbol,
                        exit_price = %exit_price,
                        quantity = %quantity,
                        "position flattened"
                    );
                }
                other => {
                    warn!(symbol = %position.symbol, outcome = ?other, "flatten incomplete");
                }
            }
        }
        self.journal.flush_all()?;
        Ok(())
    }
}
