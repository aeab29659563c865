use config::{Config, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::path::Path;

use crate::error::{PeregrineError, Result};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub exchange: ExchangeConfig,
    pub trading: TradingConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub breakers: BreakerConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub data: DataConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    /// REST base URL; testnet by default so a bare config never trades live
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    /// Per-request timeout; exceeding it counts toward the latency kill-switch
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_recv_window_ms")]
    pub recv_window_ms: u64,
    /// Retry schedule for transient transport failures
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// Exchange-native symbols, e.g. ["BTCUSDT", "ETHUSDT"]
    pub symbols: Vec<String>,
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default = "default_cycle_secs")]
    pub cycle_secs: u64,
    #[serde(default = "default_cycle_timeout_secs")]
    pub cycle_timeout_secs: u64,
    #[serde(default = "default_max_positions_per_symbol")]
    pub max_positions_per_symbol: usize,
    /// Same-direction re-entry cooldown
    #[serde(default = "default_entry_cooldown_secs")]
    pub entry_cooldown_secs: u64,
    /// Opposite-direction re-entry cooldown
    #[serde(default = "default_reversal_cooldown_secs")]
    pub reversal_cooldown_secs: u64,
    /// Window between duplicate-entry conflict logs
    #[serde(default = "default_duplicate_guard_debounce_ms")]
    pub duplicate_guard_debounce_ms: u64,
    /// Base TP/SL fractions applied when ATR-scaled pricing is unavailable
    #[serde(default = "default_tp_fraction")]
    pub tp_fraction: Decimal,
    #[serde(default = "default_sl_fraction")]
    pub sl_fraction: Decimal,
    /// Cycles between equity reconciliation runs
    #[serde(default = "default_reconcile_every_cycles")]
    pub reconcile_every_cycles: u64,
    /// Cycles between CSV buffer flushes
    #[serde(default = "default_flush_every_cycles")]
    pub flush_every_cycles: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_risk_fraction")]
    pub risk_fraction: Decimal,
    #[serde(default = "default_risk_fraction_ceiling")]
    pub risk_fraction_ceiling: Decimal,
    #[serde(default = "default_max_margin_per_trade")]
    pub max_margin_per_trade: Decimal,
    #[serde(default = "default_min_margin_per_trade")]
    pub min_margin_per_trade: Decimal,
    #[serde(default = "default_max_leverage")]
    pub max_leverage: u32,
    #[serde(default = "default_max_daily_loss_pct")]
    pub max_daily_loss_pct: Decimal,
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: Decimal,
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,
    /// Average venue latency (seconds) over the window that halts entries
    #[serde(default = "default_max_api_latency_secs")]
    pub max_api_latency_secs: Decimal,
    #[serde(default = "default_latency_window")]
    pub latency_window: usize,
    #[serde(default = "default_correlation_threshold")]
    pub correlation_threshold: f64,
    #[serde(default = "default_correlation_size_factor")]
    pub correlation_size_factor: Decimal,
    #[serde(default = "default_correlation_bars")]
    pub correlation_bars: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BreakerConfig {
    /// Entry pause after any breaker trips
    #[serde(default = "default_breaker_pause_secs")]
    pub pause_secs: u64,
    /// Candle spread must exceed this multiple of the rolling median to trip
    #[serde(default = "default_spread_spike_factor")]
    pub spread_spike_factor: Decimal,
    #[serde(default = "default_spread_window")]
    pub spread_window: usize,
    /// Funding rate change (percentage points per hour) that trips
    #[serde(default = "default_funding_jump_pp")]
    pub funding_jump_pp: Decimal,
    /// Best bid/ask spread fraction that trips
    #[serde(default = "default_quote_spread_limit")]
    pub quote_spread_limit: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Oracle deadline before the decision degrades to HOLD
    #[serde(default = "default_decision_timeout_secs")]
    pub decision_timeout_secs: u64,
    /// Cached decisions need at least this confidence to be reused
    #[serde(default = "default_cache_min_confidence")]
    pub cache_min_confidence: Decimal,
    #[serde(default = "default_cache_max_age_cycles")]
    pub cache_max_age_cycles: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_live_interval_secs")]
    pub live_interval_secs: u64,
    #[serde(default = "default_sentinel_interval_secs")]
    pub sentinel_interval_secs: u64,
    /// ROI threshold that arms the one-shot partial close
    #[serde(default = "default_partial_close_roi")]
    pub partial_close_roi: Decimal,
    #[serde(default = "default_partial_close_fraction")]
    pub partial_close_fraction: Decimal,
    /// Per-symbol activity log debounce
    #[serde(default = "default_log_debounce_secs")]
    pub log_debounce_secs: u64,
    #[serde(default = "default_reattach_cooldown_secs")]
    pub reattach_cooldown_secs: u64,
    #[serde(default = "default_reattach_cycle_debounce")]
    pub reattach_cycle_debounce: u64,
    /// Exit attempt debounce per position
    #[serde(default = "default_exit_debounce_secs")]
    pub exit_debounce_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Hard refresh threshold for `require_fresh` consumers
    #[serde(default = "default_hard_refresh_secs")]
    pub hard_refresh_secs: u64,
    #[serde(default = "default_kline_limit")]
    pub kline_limit: u32,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_agents_dir")]
    pub agents_dir: String,
}

impl AppConfig {
    /// Load from `Peregrine.toml` (optional) layered with `PEREGRINE_*` env vars.
    pub fn load_from(path: &str) -> Result<Self> {
        let mut builder = Config::builder();
        if Path::new(path).exists() {
            builder = builder.add_source(File::with_name(path));
        }
        let settings = builder
            .add_source(Environment::with_prefix("PEREGRINE").separator("__"))
            .build()?;
        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Fail fast before the loop starts on configuration problems.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        if self.trading.symbols.is_empty() {
            errors.push("trading.symbols must not be empty".to_string());
        }
        if self.risk.risk_fraction > self.risk.risk_fraction_ceiling {
            errors.push(format!(
                "risk.risk_fraction {} exceeds ceiling {}",
                self.risk.risk_fraction, self.risk.risk_fraction_ceiling
            ));
        }
        if self.risk.max_leverage == 0 {
            errors.push("risk.max_leverage must be >= 1".to_string());
        }
        if self.trading.tp_fraction <= self.trading.sl_fraction {
            errors.push(format!(
                "trading.tp_fraction {} must exceed sl_fraction {}",
                self.trading.tp_fraction, self.trading.sl_fraction
            ));
        }
        if self.risk.min_margin_per_trade > self.risk.max_margin_per_trade {
            errors.push("risk.min_margin_per_trade exceeds max_margin_per_trade".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(PeregrineError::Validation(errors.join("; ")))
        }
    }

    /// Credentials are only mandatory for live runs; check at startup.
    pub fn require_credentials(&self) -> Result<()> {
        if self.exchange.api_key.trim().is_empty() || self.exchange.api_secret.trim().is_empty() {
            return Err(PeregrineError::MissingCredentials(
                "exchange.api_key and exchange.api_secret are required for live trading".into(),
            ));
        }
        Ok(())
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            risk_fraction: default_risk_fraction(),
            risk_fraction_ceiling: default_risk_fraction_ceiling(),
            max_margin_per_trade: default_max_margin_per_trade(),
            min_margin_per_trade: default_min_margin_per_trade(),
            max_leverage: default_max_leverage(),
            max_daily_loss_pct: default_max_daily_loss_pct(),
            max_drawdown: default_max_drawdown(),
            max_consecutive_losses: default_max_consecutive_losses(),
            max_api_latency_secs: default_max_api_latency_secs(),
            latency_window: default_latency_window(),
            correlation_threshold: default_correlation_threshold(),
            correlation_size_factor: default_correlation_size_factor(),
            correlation_bars: default_correlation_bars(),
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            pause_secs: default_breaker_pause_secs(),
            spread_spike_factor: default_spread_spike_factor(),
            spread_window: default_spread_window(),
            funding_jump_pp: default_funding_jump_pp(),
            quote_spread_limit: default_quote_spread_limit(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            decision_timeout_secs: default_decision_timeout_secs(),
            cache_min_confidence: default_cache_min_confidence(),
            cache_max_age_cycles: default_cache_max_age_cycles(),
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            live_interval_secs: default_live_interval_secs(),
            sentinel_interval_secs: default_sentinel_interval_secs(),
            partial_close_roi: default_partial_close_roi(),
            partial_close_fraction: default_partial_close_fraction(),
            log_debounce_secs: default_log_debounce_secs(),
            reattach_cooldown_secs: default_reattach_cooldown_secs(),
            reattach_cycle_debounce: default_reattach_cycle_debounce(),
            exit_debounce_secs: default_exit_debounce_secs(),
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            hard_refresh_secs: default_hard_refresh_secs(),
            kline_limit: default_kline_limit(),
            log_dir: default_log_dir(),
            data_dir: default_data_dir(),
            agents_dir: default_agents_dir(),
        }
    }
}

fn default_base_url() -> String {
    "https://testnet.binancefuture.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    5
}

fn default_recv_window_ms() -> u64 {
    5000
}

fn default_retry_max_attempts() -> u32 {
    5
}

fn default_retry_base_ms() -> u64 {
    200
}

fn default_interval() -> String {
    "3m".to_string()
}

fn default_cycle_secs() -> u64 {
    60
}

fn default_cycle_timeout_secs() -> u64 {
    90
}

fn default_max_positions_per_symbol() -> usize {
    3
}

fn default_entry_cooldown_secs() -> u64 {
    900
}

fn default_reversal_cooldown_secs() -> u64 {
    600
}

fn default_duplicate_guard_debounce_ms() -> u64 {
    2500
}

fn default_tp_fraction() -> Decimal {
    dec!(0.02)
}

fn default_sl_fraction() -> Decimal {
    dec!(0.01)
}

fn default_reconcile_every_cycles() -> u64 {
    10
}

fn default_flush_every_cycles() -> u64 {
    7
}

fn default_risk_fraction() -> Decimal {
    dec!(0.025)
}

fn default_risk_fraction_ceiling() -> Decimal {
    dec!(0.03)
}

fn default_max_margin_per_trade() -> Decimal {
    dec!(600)
}

fn default_min_margin_per_trade() -> Decimal {
    dec!(600)
}

fn default_max_leverage() -> u32 {
    2
}

fn default_max_daily_loss_pct() -> Decimal {
    dec!(0.05)
}

fn default_max_drawdown() -> Decimal {
    dec!(0.25)
}

fn default_max_consecutive_losses() -> u32 {
    3
}

fn default_max_api_latency_secs() -> Decimal {
    dec!(5.0)
}

fn default_latency_window() -> usize {
    20
}

fn default_correlation_threshold() -> f64 {
    0.8
}

fn default_correlation_size_factor() -> Decimal {
    dec!(0.5)
}

fn default_correlation_bars() -> usize {
    50
}

fn default_breaker_pause_secs() -> u64 {
    600
}

fn default_spread_spike_factor() -> Decimal {
    dec!(1.2)
}

fn default_spread_window() -> usize {
    20
}

fn default_funding_jump_pp() -> Decimal {
    dec!(0.1)
}

fn default_quote_spread_limit() -> Decimal {
    dec!(0.0015)
}

fn default_decision_timeout_secs() -> u64 {
    2
}

fn default_cache_min_confidence() -> Decimal {
    dec!(0.8)
}

fn default_cache_max_age_cycles() -> u64 {
    4
}

fn default_live_interval_secs() -> u64 {
    5
}

fn default_sentinel_interval_secs() -> u64 {
    60
}

fn default_partial_close_roi() -> Decimal {
    dec!(0.003)
}

fn default_partial_close_fraction() -> Decimal {
    dec!(0.5)
}

fn default_log_debounce_secs() -> u64 {
    60
}

fn default_reattach_cooldown_secs() -> u64 {
    60
}

fn default_reattach_cycle_debounce() -> u64 {
    3
}

fn default_exit_debounce_secs() -> u64 {
    5
}

fn default_cache_ttl_secs() -> u64 {
    30
}

fn default_hard_refresh_secs() -> u64 {
    10
}

fn default_kline_limit() -> u32 {
    100
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_agents_dir() -> String {
    "agents".to_string()
}
