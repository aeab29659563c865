//! Process-wide control state
//!
//! The mutable trading-control surface: kill-switches, the leverage
//! governor, circuit breakers, and the equity anchors. Owned and mutated
//! exclusively by the orchestrator; other tasks read via snapshots.

use rust_decimal::Decimal;

use crate::config::{BreakerConfig, RiskConfig};
use crate::risk::{CircuitBreakers, KillSwitch, LeverageGovernor};

pub struct ControlState {
    pub kill_switch: KillSwitch,
    pub governor: LeverageGovernor,
    pub breakers: CircuitBreakers,
    pub starting_equity: Decimal,
    pub peak_equity: Decimal,
    pub realized_cum: Decimal,
}

/// Read-only view for background tasks and the status command.
#[derive(Debug, Clone)]
pub struct ControlSnapshot {
    pub peak_equity: Decimal,
    pub realized_cum: Decimal,
    pub consecutive_losses: u32,
    pub entries_paused_by_breaker: bool,
}

impl ControlState {
    pub fn new(
        risk_config: &RiskConfig,
        breaker_config: &BreakerConfig,
        starting_equity: Decimal,
        peak_equity: Decimal,
        realized_cum: Decimal,
    ) -> Self {
        Self {
            kill_switch: KillSwitch::new(risk_config),
            governor: LeverageGovernor::new(risk_config.max_leverage),
            breakers: CircuitBreakers::new(breaker_config.clone()),
            starting_equity,
            peak_equity: peak_equity.max(starting_equity),
            realized_cum,
        }
    }

    /// Track the equity peak across the process lifetime.
    pub fn observe_equity(&mut self, total_equity: Decimal) {
        if total_equity > self.peak_equity {
            self.peak_equity = total_equity;
        }
    }

    /// Fold a finalized trade into every outcome-sensitive control.
    pub fn record_trade_outcome(&mut self, realized_pnl: Decimal) {
        let is_win = realized_pnl > Decimal::ZERO;
        self.realized_cum += realized_pnl;
        self.kill_switch.record_trade_outcome(is_win);
        self.governor.record_trade_outcome(is_win);
    }

    pub fn drawdown_from_peak(&self, total_equity: Decimal) -> Decimal {
        if self.peak_equity.is_zero() {
            Decimal::ZERO
        } else {
            ((self.peak_equity - total_equity) / self.peak_equity).max(Decimal::ZERO)
        }
    }

    pub fn snapshot(&self) -> ControlSnapshot {
        ControlSnapshot {
            peak_equity: self.peak_equity,
            realized_cum: self.realized_cum,
            consecutive_losses: self.kill_switch.consecutive_losses(),
            entries_paused_by_breaker: self.breakers.entries_paused(),
        }
    }
}
