//! Trade state machine and position book
//!
//! Single source of truth for local position state. Transitions follow
//! OPEN → MONITORING → CLOSING → CLOSED with the emergency OPEN → CLOSING
//! path; exit attempts are debounced per position and protective-order
//! attach calls are deduplicated by hash. All methods take the inner mutex
//! briefly and never await while holding it.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{Position, PositionSide, PositionState};
use crate::error::{PeregrineError, Result};

struct Inner {
    /// Keyed by (symbol, side): at most one live position per direction.
    positions: HashMap<(String, PositionSide), Position>,
    /// Active protective-order hashes.
    tpsl_hashes: HashSet<String>,
    last_exit_attempt: HashMap<Uuid, DateTime<Utc>>,
}

pub struct TradeStateMachine {
    inner: Mutex<Inner>,
    exit_debounce: ChronoDuration,
    max_positions_per_symbol: usize,
}

impl TradeStateMachine {
    pub fn new(exit_debounce_secs: u64, max_positions_per_symbol: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                positions: HashMap::new(),
                tpsl_hashes: HashSet::new(),
                last_exit_attempt: HashMap::new(),
            }),
            exit_debounce: ChronoDuration::seconds(exit_debounce_secs as i64),
            max_positions_per_symbol: max_positions_per_symbol.max(1),
        }
    }

    /// Register a venue-confirmed position. Rejects a second position in
    /// the same direction or a symbol at its position cap.
    pub fn insert_position(&self, position: Position) -> Result<()> {
        let mut inner = self.inner.lock().expect("state machine poisoned");
        let key = (position.symbol.clone(), position.side);
        if inner.positions.contains_key(&key) {
            return Err(PeregrineError::Validation(format!(
                "{} already holds a {} position",
                position.symbol, position.side
            )));
        }
        let open_for_symbol = inner
            .positions
            .keys()
            .filter(|(s, _)| *s == position.symbol)
            .count();
        if open_for_symbol >= self.max_positions_per_symbol {
            return Err(PeregrineError::Validation(format!(
                "{} at position cap {}",
                position.symbol, self.max_positions_per_symbol
            )));
        }
        debug!(
            symbol = %position.symbol,
            side = %position.side,
            quantity = %position.quantity,
            "position registered"
        );
        inner.positions.insert(key, position);
        Ok(())
    }

    pub fn get(&self, symbol: &str, side: PositionSide) -> Option<Position> {
        self.inner
            .lock()
            .expect("state machine poisoned")
            .positions
            .get(&(symbol.to_string(), side))
            .cloned()
    }

    pub fn get_by_id(&self, id: Uuid) -> Option<Position> {
        self.inner
            .lock()
            .expect("state machine poisoned")
            .positions
            .values()
            .find(|p| p.id == id)
            .cloned()
    }

    /// Snapshot of all live (non-CLOSED) positions.
    pub fn live_positions(&self) -> Vec<Position> {
        self.inner
            .lock()
            .expect("state machine poisoned")
            .positions
            .values()
            .filter(|p| p.state != PositionState::Closed)
            .cloned()
            .collect()
    }

    /// Positions in MONITORING that lost a protective leg; the Sentinel's
    /// work queue.
    pub fn positions_missing_protection(&self) -> Vec<Position> {
        self.inner
            .lock()
            .expect("state machine poisoned")
            .positions
            .values()
            .filter(|p| p.state == PositionState::Monitoring && !p.has_protection())
            .cloned()
            .collect()
    }

    /// Validated state transition.
    pub fn transition(&self, id: Uuid, next: PositionState) -> Result<()> {
        let mut inner = self.inner.lock().expect("state machine poisoned");
        let position = inner
            .positions
            .values_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| PeregrineError::PositionNotFound(id.to_string()))?;
        if !position.state.can_transition_to(next) {
            return Err(PeregrineError::InvalidStateTransition {
                from: position.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!(symbol = %position.symbol, from = %position.state, to = %next, "state transition");
        position.state = next;
        Ok(())
    }

    /// Atomic exit gate: checks state and debounce, stamps the attempt, and
    /// moves the position to CLOSING. Exactly one of two concurrent callers
    /// wins.
    pub fn try_begin_close(&self, id: Uuid) -> bool {
        let mut inner = self.inner.lock().expect("state machine poisoned");
        let now = Utc::now();
        if let Some(last) = inner.last_exit_attempt.get(&id) {
            if now - *last < self.exit_debounce {
                return false;
            }
        }
        let Some(position) = inner.positions.values_mut().find(|p| p.id == id) else {
            return false;
        };
        if !matches!(
            position.state,
            PositionState::Open | PositionState::Monitoring
        ) {
            return false;
        }
        position.state = PositionState::Closing;
        inner.last_exit_attempt.insert(id, now);
        true
    }

    /// Stamp an exit attempt without changing state (partial closes).
    /// Returns false while the debounce window is active.
    pub fn try_record_exit_attempt(&self, id: Uuid) -> bool {
        let mut inner = self.inner.lock().expect("state machine poisoned");
        let now = Utc::now();
        if let Some(last) = inner.last_exit_attempt.get(&id) {
            if now - *last < self.exit_debounce {
                return false;
            }
        }
        inner.last_exit_attempt.insert(id, now);
        true
    }

    /// A failed close leaves the position back under monitoring so the
    /// supervisors keep watching it.
    pub fn reopen_after_failed_close(&self, id: Uuid) {
        let mut inner = self.inner.lock().expect("state machine poisoned");
        if let Some(position) = inner.positions.values_mut().find(|p| p.id == id) {
            if position.state == PositionState::Closing {
                warn!(symbol = %position.symbol, "close failed, returning to MONITORING");
                position.state = PositionState::Monitoring;
            }
        }
    }

    /// Finalize a close confirmed flat on the venue: CLOSED, hash released,
    /// record removed from the live book and returned for journaling.
    pub fn finalize_close(&self, id: Uuid) -> Option<Position> {
        let mut inner = self.inner.lock().expect("state machine poisoned");
        let key = inner
            .positions
            .iter()
            .find(|(_, p)| p.id == id)
            .map(|(k, _)| k.clone())?;
        let mut position = inner.positions.remove(&key)?;
        position.state = PositionState::Closed;
        if let Some(hash) = &position.tpsl_hash {
            inner.tpsl_hashes.remove(hash);
        }
        inner.last_exit_attempt.remove(&id);
        Some(position)
    }

    /// Record protective order ids and the active hash. The Sentinel is the
    /// only caller once a position is in MONITORING.
    pub fn set_protection(
        &self,
        id: Uuid,
        tp_order_id: Option<String>,
        sl_order_id: Option<String>,
        hash: Option<String>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().expect("state machine poisoned");
        if let Some(h) = &hash {
            inner.tpsl_hashes.insert(h.clone());
        }
        let position = inner
            .positions
            .values_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| PeregrineError::PositionNotFound(id.to_string()))?;
        if tp_order_id.is_some() {
            position.tp_order_id = tp_order_id;
        }
        if sl_order_id.is_some() {
            position.sl_order_id = sl_order_id;
        }
        if hash.is_some() {
            position.tpsl_hash = hash;
        }
        Ok(())
    }

    /// Drop recorded protective ids after the monitor observed them gone.
    /// The active hash is released with them so the Sentinel's repair
    /// attach is not suppressed as a duplicate.
    pub fn clear_protection(&self, id: Uuid, clear_tp: bool, clear_sl: bool) {
        let mut inner = self.inner.lock().expect("state machine poisoned");
        let mut stale_hash = None;
        if let Some(position) = inner.positions.values_mut().find(|p| p.id == id) {
            if clear_tp {
                position.tp_order_id = None;
            }
            if clear_sl {
                position.sl_order_id = None;
            }
            if clear_tp || clear_sl {
                stale_hash = position.tpsl_hash.take();
            }
        }
        if let Some(hash) = stale_hash {
            inner.tpsl_hashes.remove(&hash);
        }
    }

    /// One-shot partial-close latch: false→true exactly once.
    pub fn try_mark_partial_done(&self, id: Uuid) -> bool {
        let mut inner = self.inner.lock().expect("state machine poisoned");
        if let Some(position) = inner.positions.values_mut().find(|p| p.id == id) {
            if !position.partial_close_done {
                position.partial_close_done = true;
                return true;
            }
        }
        false
    }

    pub fn reduce_quantity(&self, id: Uuid, closed: rust_decimal::Decimal) {
        let mut inner = self.inner.lock().expect("state machine poisoned");
        if let Some(position) = inner.positions.values_mut().find(|p| p.id == id) {
            position.quantity = (position.quantity - closed).max(rust_decimal::Decimal::ZERO);
        }
    }

    pub fn is_tpsl_duplicate(&self, hash: &str) -> bool {
        self.inner
            .lock()
            .expect("state machine poisoned")
            .tpsl_hashes
            .contains(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn machine() -> TradeStateMachine {
        TradeStateMachine::new(5, 3)
    }

    fn position(symbol: &str, side: PositionSide) -> Position {
        Position::new(symbol, side, dec!(1), dec!(2000), 2, None)
    }

    #[test]
    fn one_position_per_direction() {
        let sm = machine();
        sm.insert_position(position("ETHUSDT", PositionSide::Long))
            .unwrap();
        assert!(sm
            .insert_position(position("ETHUSDT", PositionSide::Long))
            .is_err());
        // opposite direction is allowed
        sm.insert_position(position("ETHUSDT", PositionSide::Short))
            .unwrap();
    }

    #[test]
    fn concurrent_close_attempts_yield_one_winner() {
        let sm = machine();
        let p = position("ETHUSDT", PositionSide::Long);
        let id = p.id;
        sm.insert_position(p).unwrap();
        sm.transition(id, PositionState::Monitoring).unwrap();

        assert!(sm.try_begin_close(id));
        // second attempt sees CLOSING and the fresh debounce stamp
        assert!(!sm.try_begin_close(id));
    }

    #[test]
    fn closed_is_terminal() {
        let sm = machine();
        let p = position("ETHUSDT", PositionSide::Long);
        let id = p.id;
        sm.insert_position(p).unwrap();
        sm.transition(id, PositionState::Monitoring).unwrap();
        assert!(sm.try_begin_close(id));
        let closed = sm.finalize_close(id).unwrap();
        assert_eq!(closed.state, PositionState::Closed);
        // gone from the live book
        assert!(sm.get_by_id(id).is_none());
    }

    #[test]
    fn emergency_path_open_to_closing() {
        let sm = machine();
        let p = position("BTCUSDT", PositionSide::Short);
        let id = p.id;
        sm.insert_position(p).unwrap();
        assert!(sm.try_begin_close(id));
        assert_eq!(
            sm.get_by_id(id).unwrap().state,
            PositionState::Closing
        );
    }

    #[test]
    fn hash_registry_clears_on_close() {
        let sm = machine();
        let p = position("ETHUSDT", PositionSide::Long);
        let id = p.id;
        sm.insert_position(p).unwrap();
        sm.set_protection(
            id,
            Some("tp1".to_string()),
            Some("sl1".to_string()),
            Some("hash1".to_string()),
        )
        .unwrap();
        assert!(sm.is_tpsl_duplicate("hash1"));

        sm.transition(id, PositionState::Monitoring).unwrap();
        assert!(sm.try_begin_close(id));
        sm.finalize_close(id).unwrap();
        assert!(!sm.is_tpsl_duplicate("hash1"));
    }

    #[test]
    fn partial_latch_fires_once() {
        let sm = machine();
        let p = position("ETHUSDT", PositionSide::Long);
        let id = p.id;
        sm.insert_position(p).unwrap();
        assert!(sm.try_mark_partial_done(id));
        assert!(!sm.try_mark_partial_done(id));
    }

    #[test]
    fn missing_protection_queue() {
        let sm = machine();
        let p = position("ETHUSDT", PositionSide::Long);
        let id = p.id;
        sm.insert_position(p).unwrap();
        // OPEN positions are not the sentinel's problem
        assert!(sm.positions_missing_protection().is_empty());

        sm.transition(id, PositionState::Monitoring).unwrap();
        assert_eq!(sm.positions_missing_protection().len(), 1);

        sm.set_protection(id, Some("tp".into()), Some("sl".into()), None)
            .unwrap();
        assert!(sm.positions_missing_protection().is_empty());
    }

    #[test]
    fn failed_close_reopens_to_monitoring() {
        let sm = machine();
        let p = position("ETHUSDT", PositionSide::Long);
        let id = p.id;
        sm.insert_position(p).unwrap();
        sm.transition(id, PositionState::Monitoring).unwrap();
        assert!(sm.try_begin_close(id));
        sm.reopen_after_failed_close(id);
        assert_eq!(
            sm.get_by_id(id).unwrap().state,
            PositionState::Monitoring
        );
    }
}
