//! Signal arbitration
//!
//! Collapses the per-agent decisions for one symbol into a single intent.
//! Each side's score is the sum of normalized confidence times the agent's
//! final weight; close LONG/SHORT scores are a conflict and resolve to HOLD
//! rather than letting two agents cancel each other on the venue.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use tracing::info;

use crate::domain::{AgentProfile, ArbitratedIntent, Decision, Signal};

/// Scores closer than this are a tie.
const TIE_EPSILON: Decimal = dec!(0.000000001);
/// LONG and SHORT scores within this fraction of the stronger side conflict.
const CONFLICT_FRACTION: Decimal = dec!(0.15);

/// Arbitrate one symbol's decisions for the current cycle.
pub fn arbitrate(
    symbol: &str,
    decisions: &[Decision],
    profiles: &HashMap<String, AgentProfile>,
) -> ArbitratedIntent {
    if decisions.is_empty() {
        return ArbitratedIntent::hold(symbol, "no decisions received");
    }

    let mut score_long = Decimal::ZERO;
    let mut score_short = Decimal::ZERO;
    let mut score_hold = Decimal::ZERO;
    let mut agents_long: Vec<String> = Vec::new();
    let mut agents_short: Vec<String> = Vec::new();

    for decision in decisions {
        let weight = profiles
            .get(&decision.agent_id)
            .map(|p| p.final_weight())
            .unwrap_or(Decimal::ONE);
        let contribution = decision.normalized_confidence * weight;
        match decision.signal {
            Signal::Long => {
                score_long += contribution;
                agents_long.push(decision.agent_id.clone());
            }
            Signal::Short => {
                score_short += contribution;
                agents_short.push(decision.agent_id.clone());
            }
            Signal::Hold => score_hold += contribution,
        }
    }

    // Both directions with real weight behind them cancel out.
    if score_long > Decimal::ZERO && score_short > Decimal::ZERO {
        let max_side = score_long.max(score_short);
        if (score_long - score_short).abs() < CONFLICT_FRACTION * max_side {
            let reason = format!(
                "conflict: LONG {} vs SHORT {} within {} of max",
                score_long,
                score_short,
                CONFLICT_FRACTION * max_side
            );
            info!(symbol = symbol, "{}", reason);
            return ArbitratedIntent {
                symbol: symbol.to_string(),
                side: Signal::Hold,
                score: max_side,
                contributing_agents: Vec::new(),
                reason,
            };
        }
    }

    let (side, score, contributing) = pick_winner(
        score_long,
        score_short,
        score_hold,
        agents_long,
        agents_short,
    );

    let reason = format!(
        "scores LONG={} SHORT={} HOLD={} -> {}",
        score_long, score_short, score_hold, side
    );
    info!(symbol = symbol, "{}", reason);

    ArbitratedIntent {
        symbol: symbol.to_string(),
        side,
        score,
        contributing_agents: contributing,
        reason,
    }
}

fn pick_winner(
    long: Decimal,
    short: Decimal,
    hold: Decimal,
    agents_long: Vec<String>,
    agents_short: Vec<String>,
) -> (Signal, Decimal, Vec<String>) {
    let max = long.max(short).max(hold);

    let long_at_max = (max - long).abs() < TIE_EPSILON;
    let short_at_max = (max - short).abs() < TIE_EPSILON;
    let hold_at_max = (max - hold).abs() < TIE_EPSILON;
    let contenders = [long_at_max, short_at_max, hold_at_max]
        .iter()
        .filter(|&&v| v)
        .count();

    if contenders > 1 {
        // Exactly equal scores resolve to HOLD; near-ties within epsilon
        // fall through in LONG > SHORT > HOLD priority.
        if (long_at_max && short_at_max && long == short)
            || (long_at_max && hold_at_max && long == hold)
            || (short_at_max && hold_at_max && short == hold)
        {
            return (Signal::Hold, max, Vec::new());
        }
        if long_at_max {
            return (Signal::Long, long, agents_long);
        }
        if short_at_max {
            return (Signal::Short, short, agents_short);
        }
        return (Signal::Hold, hold, Vec::new());
    }

    if long_at_max {
        (Signal::Long, long, agents_long)
    } else if short_at_max {
        (Signal::Short, short, agents_short)
    } else {
        (Signal::Hold, hold, Vec::new())
    }
}
