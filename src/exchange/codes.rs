//! Venue error-code policy table
//!
//! The single decision point for mapped exchange errors. Call sites never
//! branch on raw codes; they ask this table what to do.

use std::time::Duration;

/// What a caller should do with a mapped venue error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Give up on this operation, emit an event, do not retry.
    Skip,
    /// Retry exactly once after the delay (timing races).
    RetryOnce { delay: Duration },
    /// Re-send in reduce-only fallback mode (protective orders).
    Fallback,
    /// The venue already holds the desired state; report success.
    TreatAsSuccess,
    /// Back off for the given window before any further orders on the symbol.
    Throttle { pause: Duration },
    /// Unmapped: propagate as a failure.
    Fail,
}

/// Margin insufficient.
pub const CODE_MARGIN_INSUFFICIENT: i64 = -2019;
/// Order would immediately trigger (timing race against mark price).
pub const CODE_WOULD_TRIGGER: i64 = -2021;
/// `reduceOnly` sent when not required.
pub const CODE_REDUCE_ONLY_REJECTED: i64 = -1106;
/// Unknown order (already filled or cancelled).
pub const CODE_UNKNOWN_ORDER: i64 = -2011;
/// Max open orders reached.
pub const CODE_MAX_OPEN_ORDERS: i64 = -2010;
/// Duplicate reduce-only order.
pub const CODE_DUPLICATE_REDUCE_ONLY: i64 = -4164;

/// Resolve the handling policy for a raw venue error code.
pub fn policy_for(code: i64) -> ErrorPolicy {
    match code {
        CODE_MARGIN_INSUFFICIENT => ErrorPolicy::Skip,
        CODE_WOULD_TRIGGER => ErrorPolicy::RetryOnce {
            delay: Duration::from_millis(350),
        },
        CODE_REDUCE_ONLY_REJECTED => ErrorPolicy::Fallback,
        CODE_UNKNOWN_ORDER => ErrorPolicy::TreatAsSuccess,
        CODE_DUPLICATE_REDUCE_ONLY => ErrorPolicy::TreatAsSuccess,
        CODE_MAX_OPEN_ORDERS => ErrorPolicy::Throttle {
            pause: Duration::from_secs(60),
        },
        _ => ErrorPolicy::Fail,
    }
}

/// Codes the gateway must never blind-retry with backoff.
pub fn is_mapped(code: i64) -> bool {
    !matches!(policy_for(code), ErrorPolicy::Fail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn margin_insufficient_skips() {
        assert_eq!(policy_for(CODE_MARGIN_INSUFFICIENT), ErrorPolicy::Skip);
    }

    #[test]
    fn timing_race_retries_once_within_window() {
        match policy_for(CODE_WOULD_TRIGGER) {
            ErrorPolicy::RetryOnce { delay } => {
                assert!(delay >= Duration::from_millis(300));
                assert!(delay <= Duration::from_millis(400));
            }
            other => panic!("expected RetryOnce, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_and_unknown_orders_are_success() {
        assert_eq!(policy_for(CODE_UNKNOWN_ORDER), ErrorPolicy::TreatAsSuccess);
        assert_eq!(
            policy_for(CODE_DUPLICATE_REDUCE_ONLY),
            ErrorPolicy::TreatAsSuccess
        );
    }

    #[test]
    fn unmapped_codes_fail() {
        assert_eq!(policy_for(-9999), ErrorPolicy::Fail);
        assert!(!is_mapped(-9999));
        assert!(is_mapped(CODE_REDUCE_ONLY_REJECTED));
    }
}
