//! In-memory venue mock for end-to-end scenarios
//!
//! Implements `ExchangeApi` over a scripted book: positions open and close
//! against mark prices you control, protective orders rest until you fill
//! them, and error codes can be injected per call.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use peregrine::domain::{Kline, SymbolFilters};
use peregrine::error::{PeregrineError, Result};
use peregrine::exchange::traits::{
    AccountBalance, BookTicker, ExchangeApi, FundingSample, OpenOrder, OrderAck, OrderParams,
    OrderSide, OrderType, PositionInfo,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct MockPosition {
    amt: Decimal,
    entry_price: Decimal,
    leverage: u32,
}

#[derive(Default)]
struct MockState {
    balance: Decimal,
    marks: HashMap<String, Decimal>,
    positions: HashMap<String, MockPosition>,
    open_orders: HashMap<String, Vec<OpenOrder>>,
    klines: HashMap<String, Vec<Kline>>,
    next_order_id: u64,
    /// Error codes popped on successive place_order calls.
    fail_order_codes: VecDeque<i64>,
    /// When false, market entries never show up as positions.
    confirm_positions: bool,
    placed: Vec<OrderParams>,
}

pub struct MockExchange {
    state: Mutex<MockState>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                balance: dec!(10000),
                confirm_positions: true,
                next_order_id: 1,
                ..Default::default()
            }),
        }
    }

    pub fn set_balance(&self, balance: Decimal) {
        self.state.lock().unwrap().balance = balance;
    }

    pub fn set_mark(&self, symbol: &str, price: Decimal) {
        self.state
            .lock()
            .unwrap()
            .marks
            .insert(symbol.to_string(), price);
    }

    pub fn set_confirm_positions(&self, confirm: bool) {
        self.state.lock().unwrap().confirm_positions = confirm;
    }

    pub fn fail_next_order(&self, code: i64) {
        self.state.lock().unwrap().fail_order_codes.push_back(code);
    }

    /// Seed a flat kline series so indicators compute.
    pub fn seed_klines(&self, symbol: &str, price: Decimal, count: usize) {
        let klines = (0..count)
            .map(|i| Kline {
                open_time: Utc::now(),
                open: price,
                high: price + Decimal::ONE,
                low: price - Decimal::ONE,
                close: price + Decimal::from((i % 3) as i64) * dec!(0.1),
                volume: dec!(100),
                close_time: Utc::now(),
            })
            .collect();
        self.state
            .lock()
            .unwrap()
            .klines
            .insert(symbol.to_string(), klines);
    }

    /// Seed an existing venue position (orphan scenarios).
    pub fn seed_position(&self, symbol: &str, amt: Decimal, entry_price: Decimal, leverage: u32) {
        self.state.lock().unwrap().positions.insert(
            symbol.to_string(),
            MockPosition {
                amt,
                entry_price,
                leverage,
            },
        );
    }

    pub fn position_amt(&self, symbol: &str) -> Decimal {
        self.state
            .lock()
            .unwrap()
            .positions
            .get(symbol)
            .map(|p| p.amt)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn protective_orders(&self, symbol: &str) -> Vec<OpenOrder> {
        self.state
            .lock()
            .unwrap()
            .open_orders
            .get(symbol)
            .map(|orders| {
                orders
                    .iter()
                    .filter(|o| o.is_protective())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All orders placed so far, for call-count assertions.
    pub fn placed_orders(&self) -> Vec<OrderParams> {
        self.state.lock().unwrap().placed.clone()
    }

    pub fn reduce_only_market_count(&self, symbol: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .placed
            .iter()
            .filter(|p| {
                p.symbol == symbol && p.order_type == OrderType::Market && p.reduce_only
            })
            .count()
    }

    /// Simulate the TP leg filling at its stop price: position closes, the
    /// TP order is consumed, the SL keeps resting.
    pub fn fill_take_profit(&self, symbol: &str) {
        let mut state = self.state.lock().unwrap();
        let tp_price = state.open_orders.get(symbol).and_then(|orders| {
            orders
                .iter()
                .find(|o| o.order_type == OrderType::TakeProfitMarket)
                .and_then(|o| o.stop_price)
        });
        if let Some(price) = tp_price {
            state.marks.insert(symbol.to_string(), price);
        }
        state.positions.remove(symbol);
        if let Some(orders) = state.open_orders.get_mut(symbol) {
            orders.retain(|o| o.order_type != OrderType::TakeProfitMarket);
        }
    }
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeApi for MockExchange {
    async fn get_klines(&self, symbol: &str, _interval: &str, limit: u32) -> Result<Vec<Kline>> {
        let state = self.state.lock().unwrap();
        let klines = state.klines.get(symbol).cloned().unwrap_or_default();
        if klines.is_empty() {
            return Err(PeregrineError::MarketDataUnavailable(format!(
                "no klines seeded for {}",
                symbol
            )));
        }
        Ok(klines.into_iter().take(limit as usize).collect())
    }

    async fn get_ticker_price(&self, symbol: &str) -> Result<Decimal> {
        self.get_mark_price(symbol).await
    }

    async fn get_mark_price(&self, symbol: &str) -> Result<Decimal> {
        self.state
            .lock()
            .unwrap()
            .marks
            .get(symbol)
            .copied()
            .ok_or_else(|| {
                PeregrineError::MarketDataUnavailable(format!("no mark for {}", symbol))
            })
    }

    async fn get_book_ticker(&self, symbol: &str) -> Result<BookTicker> {
        let mark = self.get_mark_price(symbol).await?;
        Ok(BookTicker {
            bid: mark - dec!(0.01),
            ask: mark + dec!(0.01),
        })
    }

    async fn get_funding_rates(&self, _symbol: &str, _limit: u32) -> Result<Vec<FundingSample>> {
        Ok(Vec::new())
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .open_orders
            .get(symbol)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_position_info(&self, symbol: &str) -> Result<Option<PositionInfo>> {
        let state = self.state.lock().unwrap();
        let mark = state.marks.get(symbol).copied().unwrap_or(Decimal::ZERO);
        Ok(state.positions.get(symbol).map(|p| PositionInfo {
            symbol: symbol.to_string(),
            position_amt: p.amt,
            entry_price: p.entry_price,
            leverage: p.leverage,
            mark_price: mark,
            unrealized_pnl: (mark - p.entry_price) * p.amt,
        }))
    }

    async fn get_balance(&self) -> Result<AccountBalance> {
        let state = self.state.lock().unwrap();
        Ok(AccountBalance {
            asset: "USDT".to_string(),
            balance: state.balance,
            available: state.balance,
        })
    }

    async fn place_order(&self, params: &OrderParams) -> Result<OrderAck> {
        let mut state = self.state.lock().unwrap();
        if let Some(code) = state.fail_order_codes.pop_front() {
            return Err(PeregrineError::Exchange {
                code,
                message: format!("injected failure {}", code),
            });
        }
        state.placed.push(params.clone());
        let order_id = state.next_order_id;
        state.next_order_id += 1;

        match params.order_type {
            OrderType::Market => {
                let mark = state
                    .marks
                    .get(&params.symbol)
                    .copied()
                    .unwrap_or(Decimal::ZERO);
                let quantity = params.quantity.unwrap_or(Decimal::ZERO);
                let signed = match params.side {
                    OrderSide::Buy => quantity,
                    OrderSide::Sell => -quantity,
                };
                if params.reduce_only {
                    let mut flat = false;
                    if let Some(position) = state.positions.get_mut(&params.symbol) {
                        position.amt += signed;
                        flat = position.amt.abs() < dec!(0.0000001);
                    }
                    if flat {
                        state.positions.remove(&params.symbol);
                    }
                } else if state.confirm_positions {
                    let entry = mark;
                    let position = state
                        .positions
                        .entry(params.symbol.clone())
                        .or_insert(MockPosition {
                            amt: Decimal::ZERO,
                            entry_price: entry,
                            leverage: 1,
                        });
                    position.amt += signed;
                    position.entry_price = entry;
                }
            }
            OrderType::TakeProfitMarket | OrderType::StopMarket => {
                state
                    .open_orders
                    .entry(params.symbol.clone())
                    .or_default()
                    .push(OpenOrder {
                        order_id: order_id.to_string(),
                        symbol: params.symbol.clone(),
                        side: params.side,
                        order_type: params.order_type,
                        stop_price: params.stop_price,
                        close_position: params.close_position,
                        reduce_only: params.reduce_only,
                        quantity: params.quantity,
                        status: "NEW".to_string(),
                    });
            }
        }

        Ok(OrderAck {
            order_id: order_id.to_string(),
            status: "NEW".to_string(),
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let Some(orders) = state.open_orders.get_mut(symbol) else {
            return Err(PeregrineError::Exchange {
                code: -2011,
                message: "Unknown order sent.".to_string(),
            });
        };
        let before = orders.len();
        orders.retain(|o| o.order_id != order_id);
        if orders.len() == before {
            return Err(PeregrineError::Exchange {
                code: -2011,
                message: "Unknown order sent.".to_string(),
            });
        }
        Ok(())
    }

    async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> Result<()> {
        Ok(())
    }

    async fn get_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        Ok(SymbolFilters {
            symbol: symbol.to_string(),
            tick_size: dec!(0.01),
            step_size: dec!(0.001),
            min_qty: dec!(0.001),
            min_notional: dec!(10),
        })
    }
}
