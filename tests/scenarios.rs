//! End-to-end scenarios against the mock venue
//!
//! Exercises the order manager, state machine, live monitor, and sentinel
//! through the same `ExchangeApi` seam the live gateway implements.

mod common;

use common::MockExchange;
use peregrine::config::MonitorConfig;
use peregrine::domain::{ExitReason, PositionSide, PositionState};
use peregrine::events::{EngineEvent, EventBus};
use peregrine::exchange::filters::FilterStore;
use peregrine::exchange::traits::{OrderSide, OrderType};
use peregrine::execution::order_manager::{CloseResult, EntryRequest, EntryResult, OrderManager};
use peregrine::execution::state::TradeStateMachine;
use peregrine::execution::SymbolGuards;
use peregrine::supervisor::{LiveMonitor, Sentinel};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

struct Stack {
    mock: Arc<MockExchange>,
    orders: Arc<OrderManager>,
    state: Arc<TradeStateMachine>,
    guards: Arc<SymbolGuards>,
    filters: Arc<FilterStore>,
    events: EventBus,
}

async fn build_stack() -> Stack {
    let mock = Arc::new(MockExchange::new());
    let symbols = vec!["ETHUSDT".to_string(), "BTCUSDT".to_string()];
    let filters = Arc::new(FilterStore::new(mock.clone()));
    filters.warm_up(&symbols).await.unwrap();
    let state = Arc::new(TradeStateMachine::new(5, 3));
    let guards = Arc::new(SymbolGuards::new(&symbols, 900, 600, 2500, 60, 3));
    let events = EventBus::new(64);
    let orders = Arc::new(
        OrderManager::new(
            mock.clone(),
            filters.clone(),
            state.clone(),
            guards.clone(),
            events.clone(),
        )
        .with_confirm_timings(Duration::from_millis(100), Duration::from_millis(10)),
    );
    Stack {
        mock,
        orders,
        state,
        guards,
        filters,
        events,
    }
}

fn long_entry(quantity: Decimal) -> EntryRequest {
    EntryRequest {
        symbol: "ETHUSDT".to_string(),
        side: PositionSide::Long,
        quantity,
        leverage: 2,
        tp_fraction: dec!(0.02),
        sl_fraction: dec!(0.01),
        decision_ref: None,
    }
}

#[tokio::test]
async fn s1_happy_long_attaches_protection_and_closes_on_tp_fill() {
    let stack = build_stack().await;
    stack.mock.set_mark("ETHUSDT", dec!(2000));

    let result = stack.orders.submit_entry(long_entry(dec!(1.0))).await.unwrap();
    let position = match result {
        EntryResult::Entered(p) => p,
        other => panic!("expected entry, got {:?}", other),
    };
    assert_eq!(position.state, PositionState::Monitoring);
    assert!(position.has_protection());
    assert_eq!(position.entry_price, dec!(2000));

    let protective = stack.mock.protective_orders("ETHUSDT");
    assert_eq!(protective.len(), 2);
    let tp = protective
        .iter()
        .find(|o| o.order_type == OrderType::TakeProfitMarket)
        .expect("TP resting");
    let sl = protective
        .iter()
        .find(|o| o.order_type == OrderType::StopMarket)
        .expect("SL resting");
    assert_eq!(tp.stop_price, Some(dec!(2040)));
    assert_eq!(sl.stop_price, Some(dec!(1980)));
    // both legs close a LONG, so both sell
    assert_eq!(tp.side, OrderSide::Sell);
    assert_eq!(sl.side, OrderSide::Sell);

    // TP fills on the venue; the live monitor observes and reports.
    let (monitor, mut closed_rx) = LiveMonitor::new(
        stack.mock.clone(),
        stack.state.clone(),
        stack.orders.clone(),
        stack.events.clone(),
        MonitorConfig::default(),
    );
    let mut event_rx = stack.events.subscribe();
    stack.mock.fill_take_profit("ETHUSDT");
    monitor.run_once().await.unwrap();

    let reported = closed_rx.try_recv().expect("close should be reported");
    assert_eq!(reported, position.id);
    let mut saw_external_close = false;
    while let Ok(event) = event_rx.try_recv() {
        if matches!(event, EngineEvent::PositionClosedExternally { .. }) {
            saw_external_close = true;
        }
    }
    assert!(saw_external_close);

    // realized PnL at the recorded TP is positive
    assert_eq!(position.realized_pnl(dec!(2040), dec!(1.0)), dec!(40));
}

#[tokio::test]
async fn s2_short_entry_uses_buy_side_protection() {
    let stack = build_stack().await;
    stack.mock.set_mark("BTCUSDT", dec!(60000));

    let request = EntryRequest {
        symbol: "BTCUSDT".to_string(),
        side: PositionSide::Short,
        quantity: dec!(0.01),
        leverage: 2,
        tp_fraction: dec!(0.02),
        sl_fraction: dec!(0.01),
        decision_ref: None,
    };
    let result = stack.orders.submit_entry(request).await.unwrap();
    assert!(matches!(result, EntryResult::Entered(_)));

    let protective = stack.mock.protective_orders("BTCUSDT");
    let tp = protective
        .iter()
        .find(|o| o.order_type == OrderType::TakeProfitMarket)
        .unwrap();
    let sl = protective
        .iter()
        .find(|o| o.order_type == OrderType::StopMarket)
        .unwrap();
    // SHORT: tp below entry, sl above, both legs buy to close
    assert_eq!(tp.stop_price, Some(dec!(58800)));
    assert_eq!(sl.stop_price, Some(dec!(60600)));
    assert_eq!(tp.side, OrderSide::Buy);
    assert_eq!(sl.side, OrderSide::Buy);
}

#[tokio::test]
async fn s3_duplicate_tpsl_pair_is_suppressed() {
    let stack = build_stack().await;
    stack.mock.set_mark("ETHUSDT", dec!(2000));

    let result = stack.orders.submit_entry(long_entry(dec!(1.0))).await.unwrap();
    let position = match result {
        EntryResult::Entered(p) => p,
        other => panic!("expected entry, got {:?}", other),
    };
    assert_eq!(stack.mock.protective_orders("ETHUSDT").len(), 2);

    // identical prices produce the same hash and are suppressed
    let (tp_id, sl_id) = stack
        .orders
        .attach_tpsl(&position, dec!(2040), dec!(1980))
        .await
        .unwrap();
    assert_eq!(tp_id, position.tp_order_id);
    assert_eq!(sl_id, position.sl_order_id);
    assert_eq!(stack.mock.protective_orders("ETHUSDT").len(), 2);
}

#[tokio::test]
async fn s4_sentinel_skips_on_margin_error_and_debounces() {
    let stack = build_stack().await;
    stack.mock.set_mark("ETHUSDT", dec!(2000));
    stack.mock.seed_position("ETHUSDT", dec!(1), dec!(2000), 2);

    // a MONITORING position with no protection anywhere
    let position =
        peregrine::domain::Position::new("ETHUSDT", PositionSide::Long, dec!(1), dec!(2000), 2, None);
    let id = position.id;
    stack.state.insert_position(position).unwrap();
    stack.state.transition(id, PositionState::Monitoring).unwrap();

    let data = Arc::new(peregrine::data::MarketDataEngine::new(
        stack.mock.clone(),
        "3m",
        &peregrine::config::DataConfig::default(),
    ));
    let trading = peregrine::config::TradingConfig {
        symbols: vec!["ETHUSDT".to_string()],
        interval: "3m".to_string(),
        cycle_secs: 60,
        cycle_timeout_secs: 90,
        max_positions_per_symbol: 3,
        entry_cooldown_secs: 900,
        reversal_cooldown_secs: 600,
        duplicate_guard_debounce_ms: 2500,
        tp_fraction: dec!(0.02),
        sl_fraction: dec!(0.01),
        reconcile_every_cycles: 10,
        flush_every_cycles: 7,
    };
    let sentinel = Sentinel::new(
        stack.mock.clone(),
        stack.state.clone(),
        stack.orders.clone(),
        stack.guards.clone(),
        data,
        stack.events.clone(),
        &MonitorConfig::default(),
        &trading,
    );

    let mut event_rx = stack.events.subscribe();
    stack.mock.fail_next_order(-2019);
    sentinel.run_once().await.unwrap();

    let mut margin_skips = 0;
    while let Ok(event) = event_rx.try_recv() {
        if matches!(event, EngineEvent::ReattachSkippedMargin { .. }) {
            margin_skips += 1;
        }
    }
    assert_eq!(margin_skips, 1);
    assert!(!stack.guards.reattach_allowed("ETHUSDT"));

    // within the 60s cooldown no further venue attempts are made
    let placed_before = stack.mock.placed_orders().len();
    sentinel.run_once().await.unwrap();
    assert_eq!(stack.mock.placed_orders().len(), placed_before);
}

#[tokio::test]
async fn sentinel_repairs_missing_protection() {
    let stack = build_stack().await;
    stack.mock.set_mark("ETHUSDT", dec!(2000));
    stack.mock.seed_position("ETHUSDT", dec!(1), dec!(2000), 2);

    let position =
        peregrine::domain::Position::new("ETHUSDT", PositionSide::Long, dec!(1), dec!(2000), 2, None);
    let id = position.id;
    stack.state.insert_position(position).unwrap();
    stack.state.transition(id, PositionState::Monitoring).unwrap();

    let data = Arc::new(peregrine::data::MarketDataEngine::new(
        stack.mock.clone(),
        "3m",
        &peregrine::config::DataConfig::default(),
    ));
    let trading = peregrine::config::TradingConfig {
        symbols: vec!["ETHUSDT".to_string()],
        interval: "3m".to_string(),
        cycle_secs: 60,
        cycle_timeout_secs: 90,
        max_positions_per_symbol: 3,
        entry_cooldown_secs: 900,
        reversal_cooldown_secs: 600,
        duplicate_guard_debounce_ms: 2500,
        tp_fraction: dec!(0.02),
        sl_fraction: dec!(0.01),
        reconcile_every_cycles: 10,
        flush_every_cycles: 7,
    };
    let sentinel = Sentinel::new(
        stack.mock.clone(),
        stack.state.clone(),
        stack.orders.clone(),
        stack.guards.clone(),
        data,
        stack.events.clone(),
        &MonitorConfig::default(),
        &trading,
    );

    sentinel.run_once().await.unwrap();

    // both legs back on the venue and recorded locally
    assert_eq!(stack.mock.protective_orders("ETHUSDT").len(), 2);
    let repaired = stack.state.get_by_id(id).unwrap();
    assert!(repaired.has_protection());
}

#[tokio::test]
async fn concurrent_exits_reach_the_venue_once() {
    let stack = build_stack().await;
    stack.mock.set_mark("ETHUSDT", dec!(2000));

    let result = stack.orders.submit_entry(long_entry(dec!(1.0))).await.unwrap();
    let position = match result {
        EntryResult::Entered(p) => p,
        other => panic!("expected entry, got {:?}", other),
    };

    let orders_a = stack.orders.clone();
    let orders_b = stack.orders.clone();
    let id = position.id;
    let (a, b) = tokio::join!(
        orders_a.close(id, ExitReason::Manual),
        orders_b.close(id, ExitReason::Manual),
    );

    let results = [a.unwrap(), b.unwrap()];
    let closed = results
        .iter()
        .filter(|r| matches!(r, CloseResult::Closed { .. }))
        .count();
    let skipped = results
        .iter()
        .filter(|r| matches!(r, CloseResult::Skipped(_)))
        .count();
    assert_eq!(closed, 1);
    assert_eq!(skipped, 1);
    assert_eq!(stack.mock.reduce_only_market_count("ETHUSDT"), 1);
    assert_eq!(stack.mock.position_amt("ETHUSDT"), Decimal::ZERO);
}

#[tokio::test]
async fn same_direction_reentry_is_blocked_by_cooldown() {
    let stack = build_stack().await;
    stack.mock.set_mark("ETHUSDT", dec!(2000));

    let first = stack.orders.submit_entry(long_entry(dec!(1.0))).await.unwrap();
    assert!(matches!(first, EntryResult::Entered(_)));

    let second = stack.orders.submit_entry(long_entry(dec!(1.0))).await.unwrap();
    match second {
        EntryResult::Skipped(reason) => {
            assert!(reason.contains("cooldown"), "unexpected reason: {}", reason)
        }
        other => panic!("expected skip, got {:?}", other),
    }
}

#[tokio::test]
async fn unconfirmed_entry_never_attaches_protection() {
    let stack = build_stack().await;
    stack.mock.set_mark("ETHUSDT", dec!(2000));
    stack.mock.set_confirm_positions(false);

    let mut event_rx = stack.events.subscribe();
    let result = stack.orders.submit_entry(long_entry(dec!(1.0))).await.unwrap();
    assert!(matches!(result, EntryResult::Failed(_)));

    assert!(stack.mock.protective_orders("ETHUSDT").is_empty());
    assert!(stack.state.live_positions().is_empty());
    let mut saw_unconfirmed = false;
    while let Ok(event) = event_rx.try_recv() {
        if matches!(event, EngineEvent::EntryUnconfirmed { .. }) {
            saw_unconfirmed = true;
        }
    }
    assert!(saw_unconfirmed);
}

#[tokio::test]
async fn dust_positions_skip_exit_as_below_minimum() {
    let stack = build_stack().await;
    stack.mock.set_mark("ETHUSDT", dec!(2000));

    // 0.0001 ETH rounds below minQty 0.001
    let position = peregrine::domain::Position::new(
        "ETHUSDT",
        PositionSide::Long,
        dec!(0.0001),
        dec!(2000),
        2,
        None,
    );
    let id = position.id;
    stack.state.insert_position(position).unwrap();
    stack.state.transition(id, PositionState::Monitoring).unwrap();

    let result = stack.orders.close(id, ExitReason::Manual).await.unwrap();
    match result {
        CloseResult::Skipped(reason) => assert_eq!(reason, "BelowMinimum"),
        other => panic!("expected BelowMinimum skip, got {:?}", other),
    }
    // the record returns to monitoring, not lost
    assert_eq!(
        stack.state.get_by_id(id).unwrap().state,
        PositionState::Monitoring
    );
    assert_eq!(stack.mock.reduce_only_market_count("ETHUSDT"), 0);
}

#[tokio::test]
async fn partial_close_fires_once_and_moves_sl() {
    let stack = build_stack().await;
    stack.mock.set_mark("ETHUSDT", dec!(2000));

    let result = stack.orders.submit_entry(long_entry(dec!(1.0))).await.unwrap();
    let position = match result {
        EntryResult::Entered(p) => p,
        other => panic!("expected entry, got {:?}", other),
    };

    // +0.5% price move at 2x leverage = +1% ROI, above the 0.3% trigger
    stack.mock.set_mark("ETHUSDT", dec!(2010));
    let (monitor, _closed_rx) = LiveMonitor::new(
        stack.mock.clone(),
        stack.state.clone(),
        stack.orders.clone(),
        stack.events.clone(),
        MonitorConfig::default(),
    );
    monitor.run_once().await.unwrap();

    let after = stack.state.get_by_id(position.id).unwrap();
    assert!(after.partial_close_done);
    assert_eq!(after.quantity, dec!(0.5));
    assert_eq!(stack.mock.reduce_only_market_count("ETHUSDT"), 1);

    // SL now sits at breakeven plus buffer, above the original 1980
    let protective = stack.mock.protective_orders("ETHUSDT");
    let sl = protective
        .iter()
        .find(|o| o.order_type == OrderType::StopMarket)
        .unwrap();
    assert_eq!(sl.stop_price, Some(dec!(2002)));

    // a second pass must not close again
    monitor.run_once().await.unwrap();
    let later = stack.state.get_by_id(position.id).unwrap();
    assert_eq!(later.quantity, dec!(0.5));
    assert_eq!(stack.mock.reduce_only_market_count("ETHUSDT"), 1);
}

#[tokio::test]
async fn filters_reject_undersized_entries() {
    let stack = build_stack().await;
    stack.mock.set_mark("ETHUSDT", dec!(2000));
    // below min notional: 0.004 * 2000 = 8 < 10
    assert!(stack
        .filters
        .normalize_quantity("ETHUSDT", dec!(0.004), dec!(2000))
        .await
        .is_none());
}
