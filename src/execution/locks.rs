//! Per-symbol entry serialization and cooldown state
//!
//! Each symbol carries an async mutex held for the whole entry protocol so
//! entry, confirmation, and protective attach are totally ordered per
//! symbol, plus the mutable per-symbol bookkeeping: entry/exit stamps,
//! loss counts, reattach throttling, and the duplicate-conflict log
//! debounce.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::domain::PositionSide;

/// Why an entry was refused by the cooldown gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CooldownBlock {
    SameDirection { remaining_secs: i64 },
    Reversal { remaining_secs: i64 },
    Throttled { remaining_secs: i64 },
}

impl std::fmt::Display for CooldownBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CooldownBlock::SameDirection { remaining_secs } => {
                write!(f, "same-direction cooldown, {}s remaining", remaining_secs)
            }
            CooldownBlock::Reversal { remaining_secs } => {
                write!(f, "reversal cooldown, {}s remaining", remaining_secs)
            }
            CooldownBlock::Throttled { remaining_secs } => {
                write!(f, "order throttle, {}s remaining", remaining_secs)
            }
        }
    }
}

#[derive(Debug, Default, Clone)]
struct SymbolState {
    last_entry_time: Option<DateTime<Utc>>,
    last_entry_side: Option<PositionSide>,
    last_exit_time: Option<DateTime<Utc>>,
    consecutive_losses: u32,
    reattach_last_attempt: Option<DateTime<Utc>>,
    reattach_cycles_since_attempt: u64,
    last_conflict_log: Option<DateTime<Utc>>,
    throttled_until: Option<DateTime<Utc>>,
}

pub struct SymbolGuards {
    entry_locks: HashMap<String, Arc<AsyncMutex<()>>>,
    state: Mutex<HashMap<String, SymbolState>>,
    entry_cooldown: ChronoDuration,
    reversal_cooldown: ChronoDuration,
    conflict_log_debounce: ChronoDuration,
    reattach_cooldown: ChronoDuration,
    reattach_cycle_debounce: u64,
}

impl SymbolGuards {
    pub fn new(
        symbols: &[String],
        entry_cooldown_secs: u64,
        reversal_cooldown_secs: u64,
        conflict_log_debounce_ms: u64,
        reattach_cooldown_secs: u64,
        reattach_cycle_debounce: u64,
    ) -> Self {
        let entry_locks = symbols
            .iter()
            .map(|s| (s.clone(), Arc::new(AsyncMutex::new(()))))
            .collect();
        Self {
            entry_locks,
            state: Mutex::new(HashMap::new()),
            entry_cooldown: ChronoDuration::seconds(entry_cooldown_secs as i64),
            reversal_cooldown: ChronoDuration::seconds(reversal_cooldown_secs as i64),
            conflict_log_debounce: ChronoDuration::milliseconds(conflict_log_debounce_ms as i64),
            reattach_cooldown: ChronoDuration::seconds(reattach_cooldown_secs as i64),
            reattach_cycle_debounce,
        }
    }

    /// Acquire the per-symbol entry mutex, held through the full entry
    /// protocol. Unknown symbols get a lock on first use.
    pub async fn lock_entry(&self, symbol: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .entry_locks
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| Arc::new(AsyncMutex::new(())));
        lock.lock_owned().await
    }

    fn with_state<R>(&self, symbol: &str, f: impl FnOnce(&mut SymbolState) -> R) -> R {
        let mut map = self.state.lock().expect("symbol guards poisoned");
        f(map.entry(symbol.to_string()).or_default())
    }

    /// The entry cooldown gate: same-direction 15 minutes, reversal 10
    /// minutes, plus any venue throttle.
    pub fn check_entry_allowed(&self, symbol: &str, side: PositionSide) -> Option<CooldownBlock> {
        let now = Utc::now();
        self.with_state(symbol, |state| {
            if let Some(until) = state.throttled_until {
                if until > now {
                    return Some(CooldownBlock::Throttled {
                        remaining_secs: (until - now).num_seconds(),
                    });
                }
                state.throttled_until = None;
            }
            let (Some(last_time), Some(last_side)) =
                (state.last_entry_time, state.last_entry_side)
            else {
                return None;
            };
            let elapsed = now - last_time;
            if last_side == side && elapsed < self.entry_cooldown {
                return Some(CooldownBlock::SameDirection {
                    remaining_secs: (self.entry_cooldown - elapsed).num_seconds(),
                });
            }
            if last_side != side && elapsed < self.reversal_cooldown {
                return Some(CooldownBlock::Reversal {
                    remaining_secs: (self.reversal_cooldown - elapsed).num_seconds(),
                });
            }
            None
        })
    }

    pub fn record_entry(&self, symbol: &str, side: PositionSide) {
        self.with_state(symbol, |state| {
            state.last_entry_time = Some(Utc::now());
            state.last_entry_side = Some(side);
        });
    }

    pub fn record_exit(&self, symbol: &str, was_loss: bool) {
        self.with_state(symbol, |state| {
            state.last_exit_time = Some(Utc::now());
            if was_loss {
                state.consecutive_losses += 1;
            } else {
                state.consecutive_losses = 0;
            }
        });
    }

    pub fn consecutive_losses(&self, symbol: &str) -> u32 {
        self.with_state(symbol, |state| state.consecutive_losses)
    }

    /// Debounced logging gate for duplicate-entry conflicts: true when the
    /// caller should emit the conflict log line.
    pub fn should_log_conflict(&self, symbol: &str) -> bool {
        let now = Utc::now();
        self.with_state(symbol, |state| {
            if let Some(last) = state.last_conflict_log {
                if now - last < self.conflict_log_debounce {
                    return false;
                }
            }
            state.last_conflict_log = Some(now);
            true
        })
    }

    /// Venue-imposed pause (max-open-orders throttle).
    pub fn throttle(&self, symbol: &str, duration: std::time::Duration) {
        self.with_state(symbol, |state| {
            state.throttled_until = Some(
                Utc::now()
                    + ChronoDuration::from_std(duration).unwrap_or_else(|_| ChronoDuration::zero()),
            );
        });
    }

    /// The Sentinel's dual-layer reattach debounce: at least the cooldown
    /// since the last attempt AND at least N sentinel cycles.
    pub fn reattach_allowed(&self, symbol: &str) -> bool {
        let now = Utc::now();
        self.with_state(symbol, |state| {
            if let Some(last) = state.reattach_last_attempt {
                if now - last < self.reattach_cooldown {
                    return false;
                }
                if state.reattach_cycles_since_attempt < self.reattach_cycle_debounce {
                    return false;
                }
            }
            true
        })
    }

    pub fn record_reattach_attempt(&self, symbol: &str) {
        self.with_state(symbol, |state| {
            state.reattach_last_attempt = Some(Utc::now());
            state.reattach_cycles_since_attempt = 0;
        });
    }

    /// Called once per sentinel cycle for every symbol it watches.
    pub fn tick_reattach_cycle(&self, symbol: &str) {
        self.with_state(symbol, |state| {
            state.reattach_cycles_since_attempt =
                state.reattach_cycles_since_attempt.saturating_add(1);
        });
    }
}
