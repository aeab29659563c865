use thiserror::Error;

/// Main error type for the trading engine
#[derive(Error, Debug)]
pub enum PeregrineError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    // Venue errors carry the raw exchange code so the policy table in
    // `exchange::codes` stays the single decision point.
    #[error("Exchange error {code}: {message}")]
    Exchange { code: i64, message: String },

    // Market data errors
    #[error("Market data unavailable: {0}")]
    MarketDataUnavailable(String),

    #[error("Stale data: {0}")]
    StaleData(String),

    #[error("Insufficient history: {symbol} has {have} bars, need {need}")]
    InsufficientHistory {
        symbol: String,
        have: usize,
        need: usize,
    },

    // Decision pipeline errors
    #[error("Decision unavailable for agent {agent_id}: {reason}")]
    DecisionUnavailable { agent_id: String, reason: String },

    // Order execution errors
    #[error("Order submission failed: {0}")]
    OrderSubmission(String),

    #[error("Entry unconfirmed: {symbol} {side} not visible on venue within {waited_ms}ms")]
    EntryUnconfirmed {
        symbol: String,
        side: String,
        waited_ms: u64,
    },

    #[error("Invalid TP/SL geometry for {symbol}: entry={entry} tp={tp} sl={sl}")]
    InvalidTpslGeometry {
        symbol: String,
        entry: rust_decimal::Decimal,
        tp: rust_decimal::Decimal,
        sl: rust_decimal::Decimal,
    },

    // State machine errors
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Position not found: {0}")]
    PositionNotFound(String),

    // Risk management errors
    #[error("Risk limit exceeded: {0}")]
    RiskLimitExceeded(String),

    #[error("Trading halted: {0}")]
    TradingHalted(String),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for PeregrineError
pub type Result<T> = std::result::Result<T, PeregrineError>;

impl PeregrineError {
    /// Raw exchange error code, if this is a mapped venue error.
    pub fn exchange_code(&self) -> Option<i64> {
        match self {
            PeregrineError::Exchange { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// Transport-level failures that the gateway may retry with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PeregrineError::Http(_)
                | PeregrineError::Timeout { .. }
                | PeregrineError::RateLimited { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn exchange_code_extraction() {
        let err = PeregrineError::Exchange {
            code: -2019,
            message: "Margin is insufficient.".to_string(),
        };
        assert_eq!(err.exchange_code(), Some(-2019));
        assert!(!err.is_transient());
    }

    #[test]
    fn transient_classification() {
        assert!(PeregrineError::Timeout { elapsed_ms: 5000 }.is_transient());
        assert!(PeregrineError::RateLimited { retry_after_secs: 3 }.is_transient());
        assert!(!PeregrineError::Validation("bad".into()).is_transient());
    }

    #[test]
    fn geometry_error_formats_prices() {
        let err = PeregrineError::InvalidTpslGeometry {
            symbol: "BTCUSDT".to_string(),
            entry: dec!(60000),
            tp: dec!(61200),
            sl: dec!(59400),
        };
        let msg = err.to_string();
        assert!(msg.contains("BTCUSDT"));
        assert!(msg.contains("61200"));
    }
}
