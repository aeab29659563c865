//! Cross-symbol correlation adjustment
//!
//! When a candidate entry is highly correlated with an already-open
//! same-direction position on another symbol, its size is halved so the
//! book does not double the same exposure.

use rust_decimal::Decimal;

use crate::domain::PositionSide;

/// Pearson correlation of two equally-long return series. None for
/// mismatched or degenerate inputs.
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b.iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    if var_a == 0.0 || var_b == 0.0 {
        return None;
    }
    Some(cov / (var_a.sqrt() * var_b.sqrt()))
}

/// Size multiplier for a candidate entry given the other symbols' open
/// same-direction positions and their return series.
///
/// `peers` pairs each other symbol's return series with whether it holds an
/// open position in the candidate's direction.
pub fn correlation_adjustment(
    candidate_returns: &[f64],
    peers: &[(&[f64], bool)],
    threshold: f64,
    size_factor: Decimal,
) -> Decimal {
    for (peer_returns, same_direction_open) in peers {
        if !same_direction_open {
            continue;
        }
        if let Some(corr) = pearson(candidate_returns, peer_returns) {
            if corr.abs() > threshold {
                return size_factor;
            }
        }
    }
    Decimal::ONE
}

/// Convenience: does the side of an open position match the candidate side?
pub fn same_direction(open_side: PositionSide, candidate_side: PositionSide) -> bool {
    open_side == candidate_side
}
