//! Order lifecycle management
//!
//! Entries are a protocol, not a call: cooldown gate, venue leverage,
//! market order, position confirmation by polling, TP/SL computation under
//! the direction rule, hash-deduplicated protective attach, and leg
//! verification. Every public operation returns a tagged result so callers
//! distinguish "did nothing" from "failed".

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{ExitReason, Position, PositionSide, PositionState};
use crate::error::{PeregrineError, Result};
use crate::events::{EngineEvent, EventBus};
use crate::exchange::codes::{self, ErrorPolicy};
use crate::exchange::filters::{apply_trigger_safety_offset, FilterStore};
use crate::exchange::traits::{ExchangeApi, OrderParams, OrderSide, OrderType};
use crate::execution::locks::SymbolGuards;
use crate::execution::state::TradeStateMachine;
use crate::execution::tpsl::{self, TpslPrices};

/// Order id recorded when the venue reports the protection already exists
/// (-2011 / -4164) without telling us which order it is.
const EXISTING_ORDER_ID: &str = "existing";

/// SL moves to breakeven plus this fraction after a partial close.
const BREAKEVEN_BUFFER: Decimal = dec!(0.001);

#[derive(Debug, Clone)]
pub struct EntryRequest {
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: Decimal,
    pub leverage: u32,
    pub tp_fraction: Decimal,
    pub sl_fraction: Decimal,
    pub decision_ref: Option<Uuid>,
}

#[derive(Debug)]
pub enum EntryResult {
    Entered(Position),
    Skipped(String),
    Failed(String),
}

#[derive(Debug)]
pub enum CloseResult {
    Closed {
        exit_price: Decimal,
        quantity: Decimal,
    },
    Skipped(String),
    Failed(String),
}

pub struct OrderManager {
    exchange: Arc<dyn ExchangeApi>,
    filters: Arc<FilterStore>,
    state: Arc<TradeStateMachine>,
    guards: Arc<SymbolGuards>,
    events: EventBus,
    confirm_timeout: Duration,
    confirm_poll: Duration,
}

impl OrderManager {
    pub fn new(
        exchange: Arc<dyn ExchangeApi>,
        filters: Arc<FilterStore>,
        state: Arc<TradeStateMachine>,
        guards: Arc<SymbolGuards>,
        events: EventBus,
    ) -> Self {
        Self {
            exchange,
            filters,
            state,
            guards,
            events,
            confirm_timeout: Duration::from_secs(2),
            confirm_poll: Duration::from_millis(200),
        }
    }

    /// Shrink confirmation timings (tests).
    pub fn with_confirm_timings(mut self, timeout: Duration, poll: Duration) -> Self {
        self.confirm_timeout = timeout;
        self.confirm_poll = poll;
        self
    }

    pub fn state(&self) -> &Arc<TradeStateMachine> {
        &self.state
    }

    /// The full entry protocol. Holds the symbol's entry mutex throughout.
    pub async fn submit_entry(&self, request: EntryRequest) -> Result<EntryResult> {
        let _entry_guard = self.guards.lock_entry(&request.symbol).await;

        // 1. Cooldown gate
        if let Some(block) = self
            .guards
            .check_entry_allowed(&request.symbol, request.side)
        {
            self.events.publish(EngineEvent::EntrySkipped {
                symbol: request.symbol.clone(),
                reason: block.to_string(),
            });
            return Ok(EntryResult::Skipped(block.to_string()));
        }

        // 2. Duplicate position guard, log-debounced
        if self.state.get(&request.symbol, request.side).is_some() {
            let reason = format!(
                "{} already holds an open {} position",
                request.symbol, request.side
            );
            if self.guards.should_log_conflict(&request.symbol) {
                warn!("{}", reason);
                self.events.publish(EngineEvent::EntrySkipped {
                    symbol: request.symbol.clone(),
                    reason: reason.clone(),
                });
            }
            return Ok(EntryResult::Skipped(reason));
        }

        // 3. Venue leverage (idempotent)
        self.exchange
            .set_leverage(&request.symbol, request.leverage)
            .await?;

        // 4. Market entry
        let entry_side = OrderSide::to_open(request.side);
        let params = OrderParams::market_entry(&request.symbol, entry_side, request.quantity);
        self.exchange.place_order(&params).await?;
        self.events.publish(EngineEvent::EntrySubmitted {
            symbol: request.symbol.clone(),
            side: request.side,
            quantity: request.quantity,
            leverage: request.leverage,
        });

        // 5. Fill confirmation by polling position info, never by the ack
        let Some(info) = self
            .wait_for_position_confirmation(&request.symbol, request.side)
            .await?
        else {
            self.events.publish(EngineEvent::EntryUnconfirmed {
                symbol: request.symbol.clone(),
                side: request.side,
            });
            return Ok(EntryResult::Failed(format!(
                "entry unconfirmed for {} {}",
                request.symbol, request.side
            )));
        };

        let mut position = Position::new(
            &request.symbol,
            request.side,
            info.position_amt.abs(),
            info.entry_price,
            request.leverage,
            request.decision_ref,
        );
        self.state.insert_position(position.clone())?;
        self.guards.record_entry(&request.symbol, request.side);
        self.events.publish(EngineEvent::PositionOpened {
            symbol: request.symbol.clone(),
            side: request.side,
            quantity: position.quantity,
            entry_price: position.entry_price,
        });

        // 6. Protective prices under the direction rule
        let prices = tpsl::compute_tpsl(
            request.side,
            position.entry_price,
            request.tp_fraction,
            request.sl_fraction,
        );

        // 7-9. Attach, verify, promote
        match self.attach_tpsl(&position, prices.tp, prices.sl).await {
            Ok((tp_id, sl_id)) => {
                let complete = tp_id.is_some() && sl_id.is_some();
                if complete {
                    self.events.publish(EngineEvent::TpslAttached {
                        symbol: request.symbol.clone(),
                        tp_order_id: tp_id.clone().unwrap_or_default(),
                        sl_order_id: sl_id.clone().unwrap_or_default(),
                    });
                } else {
                    self.events.publish(EngineEvent::TpslIncomplete {
                        symbol: request.symbol.clone(),
                        has_tp: tp_id.is_some(),
                        has_sl: sl_id.is_some(),
                    });
                }
                // Incomplete protection still promotes to MONITORING; the
                // Sentinel owns the repair from here.
                self.state
                    .transition(position.id, PositionState::Monitoring)?;
                position = self
                    .state
                    .get_by_id(position.id)
                    .unwrap_or(position);
                Ok(EntryResult::Entered(position))
            }
            Err(PeregrineError::InvalidTpslGeometry { symbol, entry, tp, sl }) => {
                // Safety action: an unprotectable position is closed now.
                self.events.publish(EngineEvent::InvalidTpslGeometry {
                    symbol: symbol.clone(),
                    entry,
                    tp,
                    sl,
                });
                error!(
                    symbol = %symbol,
                    "invalid TP/SL geometry, closing entry as safety action"
                );
                match self.close(position.id, ExitReason::Forced).await? {
                    CloseResult::Closed { .. } => Ok(EntryResult::Failed(
                        "invalid TP/SL geometry, position closed".to_string(),
                    )),
                    other => {
                        error!(symbol = %symbol, outcome = ?other, "safety close did not complete");
                        Ok(EntryResult::Failed(
                            "invalid TP/SL geometry, safety close pending".to_string(),
                        ))
                    }
                }
            }
            Err(e) => {
                // Attach failed outright (margin, throttle): the position
                // exists, so promote and let the Sentinel repair.
                warn!(symbol = %request.symbol, error = %e, "TP/SL attach failed after entry");
                self.events.publish(EngineEvent::TpslIncomplete {
                    symbol: request.symbol.clone(),
                    has_tp: false,
                    has_sl: false,
                });
                self.state
                    .transition(position.id, PositionState::Monitoring)?;
                Ok(EntryResult::Entered(
                    self.state.get_by_id(position.id).unwrap_or(position),
                ))
            }
        }
    }

    /// Attach TP and SL as two separate orders, verify both legs, and
    /// register them in the state machine. Duplicate pairs (by hash) are
    /// suppressed without touching the venue.
    pub async fn attach_tpsl(
        &self,
        position: &Position,
        tp_price: Decimal,
        sl_price: Decimal,
    ) -> Result<(Option<String>, Option<String>)> {
        let filters = self.filters.get(&position.symbol).await;
        let mark = self.exchange.get_mark_price(&position.symbol).await?;

        let rounded = tpsl::round_tpsl(
            TpslPrices {
                tp: tp_price,
                sl: sl_price,
            },
            &filters,
        );
        let tp = apply_trigger_safety_offset(rounded.tp, mark, filters.tick_size);
        let sl = apply_trigger_safety_offset(rounded.sl, mark, filters.tick_size);

        if !tpsl::validate_geometry(position.side, position.entry_price, tp, sl) {
            return Err(PeregrineError::InvalidTpslGeometry {
                symbol: position.symbol.clone(),
                entry: position.entry_price,
                tp,
                sl,
            });
        }

        let hash = tpsl::tpsl_hash(&position.symbol, position.side, tp, sl);
        if self.state.is_tpsl_duplicate(&hash) {
            info!(
                symbol = %position.symbol,
                "identical TP/SL pair already active, attach suppressed"
            );
            return Ok((position.tp_order_id.clone(), position.sl_order_id.clone()));
        }

        let close_side = OrderSide::to_close(position.side);
        let fallback_qty = crate::exchange::filters::round_step(position.quantity, filters.step_size);

        let tp_id = self
            .place_protective_leg(
                &position.symbol,
                close_side,
                OrderType::TakeProfitMarket,
                tp,
                fallback_qty,
            )
            .await?;
        let sl_id = self
            .place_protective_leg(
                &position.symbol,
                close_side,
                OrderType::StopMarket,
                sl,
                fallback_qty,
            )
            .await?;

        // Trust a fresh venue read over our own acks.
        let (tp_id, sl_id) = self
            .verify_and_repair_legs(position, close_side, tp, sl, fallback_qty, tp_id, sl_id)
            .await?;

        self.state.set_protection(
            position.id,
            tp_id.clone(),
            sl_id.clone(),
            Some(hash),
        )?;
        Ok((tp_id, sl_id))
    }

    /// Exit through the state machine: state gate plus a 5-second debounce,
    /// quantity rounding, reduce-only market close, flat confirmation.
    pub async fn close(&self, position_id: Uuid, reason: ExitReason) -> Result<CloseResult> {
        let Some(position) = self.state.get_by_id(position_id) else {
            return Ok(CloseResult::Skipped("position not found".to_string()));
        };

        if !self.state.try_begin_close(position_id) {
            return Ok(CloseResult::Skipped(format!(
                "exit not allowed for {} (state {} or debounce)",
                position.symbol, position.state
            )));
        }

        let Some(quantity) = self
            .filters
            .normalize_quantity(&position.symbol, position.quantity, position.entry_price)
            .await
        else {
            // Unclosable dust: return the record to monitoring.
            self.state.reopen_after_failed_close(position_id);
            return Ok(CloseResult::Skipped("BelowMinimum".to_string()));
        };

        let close_side = OrderSide::to_close(position.side);
        let params = OrderParams::market_close(&position.symbol, close_side, quantity);
        if let Err(e) = self.exchange.place_order(&params).await {
            error!(symbol = %position.symbol, error = %e, "close order failed");
            self.events.publish(EngineEvent::ExitFailureManual {
                symbol: position.symbol.clone(),
                detail: e.to_string(),
            });
            return Ok(CloseResult::Failed(e.to_string()));
        }

        let exit_price = self
            .exchange
            .get_mark_price(&position.symbol)
            .await
            .unwrap_or(position.entry_price);

        if self.wait_for_flat(&position.symbol).await? {
            self.cleanup_protective_orders(&position).await;
            if let Some(closed) = self.state.finalize_close(position_id) {
                let pnl = closed.realized_pnl(exit_price, quantity);
                self.guards
                    .record_exit(&closed.symbol, pnl < Decimal::ZERO);
                self.events.publish(EngineEvent::PositionClosed {
                    symbol: closed.symbol.clone(),
                    side: closed.side,
                    reason,
                    realized_pnl: pnl,
                });
            }
            Ok(CloseResult::Closed {
                exit_price,
                quantity,
            })
        } else {
            // Order accepted but the venue still shows size; leave the
            // position in CLOSING for reconciliation.
            warn!(symbol = %position.symbol, "close submitted but venue not yet flat");
            Ok(CloseResult::Failed(
                "close unconfirmed, pending reconciliation".to_string(),
            ))
        }
    }

    /// One-shot partial close at the configured ROI trigger: close the
    /// fraction, then walk the SL to breakeven.
    pub async fn schedule_partial_close(
        &self,
        position_id: Uuid,
        fraction: Decimal,
    ) -> Result<CloseResult> {
        let Some(position) = self.state.get_by_id(position_id) else {
            return Ok(CloseResult::Skipped("position not found".to_string()));
        };
        if position.state != PositionState::Monitoring {
            return Ok(CloseResult::Skipped(format!(
                "partial close requires MONITORING, state is {}",
                position.state
            )));
        }
        if position.partial_close_done {
            return Ok(CloseResult::Skipped(
                "partial close already done".to_string(),
            ));
        }
        if !self.state.try_record_exit_attempt(position_id) {
            return Ok(CloseResult::Skipped("exit debounce active".to_string()));
        }

        let target = position.quantity * fraction;
        let Some(quantity) = self
            .filters
            .normalize_quantity(&position.symbol, target, position.entry_price)
            .await
        else {
            return Ok(CloseResult::Skipped("BelowMinimum".to_string()));
        };

        let close_side = OrderSide::to_close(position.side);
        let params = OrderParams::market_close(&position.symbol, close_side, quantity);
        if let Err(e) = self.exchange.place_order(&params).await {
            warn!(symbol = %position.symbol, error = %e, "partial close failed");
            return Ok(CloseResult::Failed(e.to_string()));
        }

        if !self.state.try_mark_partial_done(position_id) {
            // Latch already set by a racing caller; the venue close stands.
            warn!(symbol = %position.symbol, "partial latch already set");
        }
        self.state.reduce_quantity(position_id, quantity);

        let mark = self
            .exchange
            .get_mark_price(&position.symbol)
            .await
            .unwrap_or(position.entry_price);
        self.events.publish(EngineEvent::PartialClose {
            symbol: position.symbol.clone(),
            closed_quantity: quantity,
            roi: position.roi(mark),
        });

        if let Err(e) = self.move_sl_to_breakeven(position_id).await {
            warn!(symbol = %position.symbol, error = %e, "breakeven SL move failed");
        }

        Ok(CloseResult::Closed {
            exit_price: mark,
            quantity,
        })
    }

    /// Replace the SL with one at entry plus a small buffer in the
    /// position's favor.
    async fn move_sl_to_breakeven(&self, position_id: Uuid) -> Result<()> {
        let Some(position) = self.state.get_by_id(position_id) else {
            return Ok(());
        };
        let filters = self.filters.get(&position.symbol).await;
        let new_sl = match position.side {
            PositionSide::Long => position.entry_price * (Decimal::ONE + BREAKEVEN_BUFFER),
            PositionSide::Short => position.entry_price * (Decimal::ONE - BREAKEVEN_BUFFER),
        };
        let new_sl = crate::exchange::filters::round_tick(new_sl, filters.tick_size);

        if let Some(old_sl) = &position.sl_order_id {
            if old_sl.as_str() != EXISTING_ORDER_ID {
                match self.exchange.cancel_order(&position.symbol, old_sl).await {
                    Ok(()) => {}
                    Err(e) => match e.exchange_code().map(codes::policy_for) {
                        Some(ErrorPolicy::TreatAsSuccess) => {}
                        _ => return Err(e),
                    },
                }
            }
        }

        let close_side = OrderSide::to_close(position.side);
        let quantity =
            crate::exchange::filters::round_step(position.quantity, filters.step_size);
        let sl_id = self
            .place_protective_leg(
                &position.symbol,
                close_side,
                OrderType::StopMarket,
                new_sl,
                quantity,
            )
            .await?;

        if let Some(sl) = sl_id {
            self.state.set_protection(position_id, None, Some(sl), None)?;
        }
        info!(symbol = %position.symbol, new_sl = %new_sl, "SL moved to breakeven");
        Ok(())
    }

    /// Place one protective leg: closePosition mode first, reduce-only
    /// fallback on -1106, one delayed retry on -2021, venue-held state
    /// treated as success.
    async fn place_protective_leg(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        trigger: Decimal,
        fallback_qty: Decimal,
    ) -> Result<Option<String>> {
        let preferred = OrderParams::close_position_trigger(symbol, side, order_type, trigger);
        let mut retried_timing = false;
        let mut fell_back = false;

        let mut params = preferred;
        loop {
            match self.exchange.place_order(&params).await {
                Ok(ack) => return Ok(Some(ack.order_id)),
                Err(e) => {
                    let Some(code) = e.exchange_code() else {
                        return Err(e);
                    };
                    match codes::policy_for(code) {
                        ErrorPolicy::Fallback if !fell_back => {
                            fell_back = true;
                            info!(
                                symbol = symbol,
                                order_type = order_type.as_str(),
                                "closePosition rejected, retrying in reduceOnly mode"
                            );
                            params = OrderParams::reduce_only_trigger(
                                symbol,
                                side,
                                order_type,
                                trigger,
                                fallback_qty,
                            );
                        }
                        ErrorPolicy::RetryOnce { delay } if !retried_timing => {
                            retried_timing = true;
                            tokio::time::sleep(delay).await;
                        }
                        ErrorPolicy::TreatAsSuccess => {
                            return Ok(Some(EXISTING_ORDER_ID.to_string()));
                        }
                        ErrorPolicy::Throttle { pause } => {
                            self.guards.throttle(symbol, pause);
                            return Err(e);
                        }
                        _ => return Err(e),
                    }
                }
            }
        }
    }

    /// Verify both legs against a fresh open-orders read; retry a missing
    /// leg once, then report what actually exists.
    #[allow(clippy::too_many_arguments)]
    async fn verify_and_repair_legs(
        &self,
        position: &Position,
        close_side: OrderSide,
        tp: Decimal,
        sl: Decimal,
        fallback_qty: Decimal,
        tp_id: Option<String>,
        sl_id: Option<String>,
    ) -> Result<(Option<String>, Option<String>)> {
        let orders = self.exchange.get_open_orders(&position.symbol).await?;
        let tp_present = orders
            .iter()
            .any(|o| o.is_protective() && o.order_type == OrderType::TakeProfitMarket);
        let sl_present = orders
            .iter()
            .any(|o| o.is_protective() && o.order_type == OrderType::StopMarket);

        let mut tp_id = if tp_present { tp_id } else { None };
        let mut sl_id = if sl_present { sl_id } else { None };

        if tp_id.is_none() {
            warn!(symbol = %position.symbol, "TP leg missing on verify, retrying once");
            tp_id = self
                .place_protective_leg(
                    &position.symbol,
                    close_side,
                    OrderType::TakeProfitMarket,
                    tp,
                    fallback_qty,
                )
                .await
                .unwrap_or(None);
        }
        if sl_id.is_none() {
            warn!(symbol = %position.symbol, "SL leg missing on verify, retrying once");
            sl_id = self
                .place_protective_leg(
                    &position.symbol,
                    close_side,
                    OrderType::StopMarket,
                    sl,
                    fallback_qty,
                )
                .await
                .unwrap_or(None);
        }
        Ok((tp_id, sl_id))
    }

    /// Cancel surviving protective legs after a confirmed close. Unknown
    /// orders are fine; the fill consumed them.
    async fn cleanup_protective_orders(&self, position: &Position) {
        for order_id in [&position.tp_order_id, &position.sl_order_id]
            .into_iter()
            .flatten()
        {
            if order_id.as_str() == EXISTING_ORDER_ID {
                continue;
            }
            if let Err(e) = self.exchange.cancel_order(&position.symbol, order_id).await {
                match e.exchange_code().map(codes::policy_for) {
                    Some(ErrorPolicy::TreatAsSuccess) => {}
                    _ => warn!(symbol = %position.symbol, error = %e, "protective cleanup failed"),
                }
            }
        }
    }

    async fn wait_for_position_confirmation(
        &self,
        symbol: &str,
        expected_side: PositionSide,
    ) -> Result<Option<crate::exchange::traits::PositionInfo>> {
        let deadline = tokio::time::Instant::now() + self.confirm_timeout;
        loop {
            if let Some(info) = self.exchange.get_position_info(symbol).await? {
                if info.side() == Some(expected_side) {
                    return Ok(Some(info));
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.confirm_poll).await;
        }
    }

    async fn wait_for_flat(&self, symbol: &str) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + self.confirm_timeout;
        loop {
            match self.exchange.get_position_info(symbol).await? {
                None => return Ok(true),
                Some(info) if info.is_flat() => return Ok(true),
                Some(_) => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(self.confirm_poll).await;
        }
    }
}
