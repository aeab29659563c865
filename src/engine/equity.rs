//! Equity reconciliation
//!
//! Rolls up realized PnL from the journaled closes with venue-marked
//! unrealized PnL and compares the expectation against the venue balance.
//! A divergence above one percent is reported for human attention; it never
//! stops trading on its own.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{info, warn};

use crate::domain::EquitySnapshot;

const DRIFT_THRESHOLD: Decimal = dec!(0.01);

#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub snapshot: EquitySnapshot,
    pub diff_vs_last: Decimal,
    /// Present when expectation and venue balance diverge past the
    /// threshold: (expected, observed, diff fraction).
    pub drift: Option<(Decimal, Decimal, Decimal)>,
}

pub struct EquityReconciler {
    starting_equity: Decimal,
    last_total: Option<Decimal>,
}

impl EquityReconciler {
    pub fn new(starting_equity: Decimal) -> Self {
        Self {
            starting_equity,
            last_total: None,
        }
    }

    /// Reconcile one pass. `balance` is the venue wallet balance,
    /// `unrealized` the sum of venue-marked open PnL, `realized_cum` the
    /// engine's own journaled total, `peak` the lifetime equity peak.
    pub fn reconcile(
        &mut self,
        balance: Decimal,
        unrealized: Decimal,
        realized_cum: Decimal,
        peak: Decimal,
    ) -> ReconcileOutcome {
        let observed_total = balance + unrealized;
        let expected_total = self.starting_equity + realized_cum + unrealized;

        let drift = if observed_total.is_zero() {
            None
        } else {
            let diff = ((expected_total - observed_total) / observed_total).abs();
            if diff > DRIFT_THRESHOLD {
                warn!(
                    expected = %expected_total,
                    observed = %observed_total,
                    diff = %diff,
                    "equity drift beyond threshold"
                );
                Some((expected_total, observed_total, diff))
            } else {
                None
            }
        };

        let diff_vs_last = self
            .last_total
            .map(|last| observed_total - last)
            .unwrap_or(Decimal::ZERO);
        self.last_total = Some(observed_total);

        let drawdown = if peak > Decimal::ZERO {
            ((peak - observed_total) / peak).max(Decimal::ZERO)
        } else {
            Decimal::ZERO
        };

        info!(
            total = %observed_total,
            realized = %realized_cum,
            unrealized = %unrealized,
            diff_vs_last = %diff_vs_last,
            "equity reconciled"
        );

        ReconcileOutcome {
            snapshot: EquitySnapshot {
                timestamp: Utc::now(),
                realized_cum,
                unrealized,
                total_equity: observed_total,
                peak_equity: peak.max(observed_total),
                drawdown_from_peak: drawdown,
            },
            diff_vs_last,
            drift,
        }
    }
}
