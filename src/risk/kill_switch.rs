//! Global kill-switches
//!
//! Pre-entry checks evaluated in a fixed order; the first that fires halts
//! all new entries. Exits are never blocked. The drawdown trip is latched
//! for the remainder of the run; the daily-loss trip resets at UTC day
//! rollover; the loss-streak trip clears on the next winning trade.

use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use tracing::{error, info};

use crate::config::RiskConfig;

/// Why entries are halted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KillReason {
    DailyLoss { loss_pct: Decimal },
    Drawdown { drawdown: Decimal },
    ConsecutiveLosses { count: u32 },
    ApiLatency { avg_secs: Decimal },
}

impl std::fmt::Display for KillReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KillReason::DailyLoss { loss_pct } => write!(f, "daily loss {}", loss_pct),
            KillReason::Drawdown { drawdown } => write!(f, "drawdown {}", drawdown),
            KillReason::ConsecutiveLosses { count } => {
                write!(f, "{} consecutive losses", count)
            }
            KillReason::ApiLatency { avg_secs } => write!(f, "api latency {}s", avg_secs),
        }
    }
}

pub struct KillSwitch {
    max_daily_loss_pct: Decimal,
    max_drawdown: Decimal,
    max_consecutive_losses: u32,
    max_api_latency_secs: Decimal,

    daily_starting_equity: Option<Decimal>,
    daily_anchor_ordinal: i32,
    consecutive_losses: u32,
    drawdown_latched: bool,
}

impl KillSwitch {
    pub fn new(config: &RiskConfig) -> Self {
        Self {
            max_daily_loss_pct: config.max_daily_loss_pct,
            max_drawdown: config.max_drawdown,
            max_consecutive_losses: config.max_consecutive_losses,
            max_api_latency_secs: config.max_api_latency_secs,
            daily_starting_equity: None,
            daily_anchor_ordinal: Utc::now().num_days_from_ce(),
            consecutive_losses: 0,
            drawdown_latched: false,
        }
    }

    /// Re-anchor the daily tracker at UTC day rollover.
    fn reset_if_new_day(&mut self, current_equity: Decimal) {
        let today = Utc::now().num_days_from_ce();
        if today != self.daily_anchor_ordinal {
            self.daily_anchor_ordinal = today;
            self.daily_starting_equity = Some(current_equity);
            info!("new trading day, daily loss anchor reset to {}", current_equity);
        }
    }

    /// Evaluate all switches in order. `None` means entries may proceed.
    pub fn check(
        &mut self,
        current_equity: Decimal,
        peak_equity: Decimal,
        avg_latency_secs: Decimal,
    ) -> Option<KillReason> {
        self.reset_if_new_day(current_equity);
        let starting = *self
            .daily_starting_equity
            .get_or_insert(current_equity);

        // The drawdown latch engages whenever the threshold is crossed,
        // independent of which switch gets reported this pass.
        if peak_equity > Decimal::ZERO {
            let drawdown = (peak_equity - current_equity) / peak_equity;
            if drawdown >= self.max_drawdown {
                self.drawdown_latched = true;
            }
        }

        // 1. Daily realized loss
        if starting > Decimal::ZERO {
            let loss_pct = (starting - current_equity) / starting;
            if loss_pct >= self.max_daily_loss_pct {
                error!("kill-switch: daily loss {} >= {}", loss_pct, self.max_daily_loss_pct);
                return Some(KillReason::DailyLoss { loss_pct });
            }
        }

        // 2. Drawdown from peak, latched for the run once tripped
        if self.drawdown_latched {
            let drawdown = if peak_equity > Decimal::ZERO {
                (peak_equity - current_equity) / peak_equity
            } else {
                Decimal::ZERO
            };
            error!("kill-switch: drawdown latched at {}", drawdown);
            return Some(KillReason::Drawdown { drawdown });
        }

        // 3. Global loss streak
        if self.consecutive_losses >= self.max_consecutive_losses {
            return Some(KillReason::ConsecutiveLosses {
                count: self.consecutive_losses,
            });
        }

        // 4. Venue latency
        if avg_latency_secs > self.max_api_latency_secs {
            return Some(KillReason::ApiLatency {
                avg_secs: avg_latency_secs,
            });
        }

        None
    }

    pub fn record_trade_outcome(&mut self, is_win: bool) {
        if is_win {
            self.consecutive_losses = 0;
        } else {
            self.consecutive_losses += 1;
        }
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    /// Operator-only reset of the drawdown latch.
    pub fn manual_reset(&mut self) {
        self.drawdown_latched = false;
        self.consecutive_losses = 0;
        info!("kill-switch manually reset");
    }
}
