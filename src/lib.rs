pub mod agents;
pub mod config;
pub mod data;
pub mod domain;
pub mod engine;
pub mod error;
pub mod events;
pub mod exchange;
pub mod execution;
pub mod persistence;
pub mod regime;
pub mod risk;
pub mod signal;
pub mod supervisor;

pub use agents::{DecisionProvider, IndicatorRuleProvider, ProviderDecision, ProviderHarness};
pub use config::AppConfig;
pub use engine::Orchestrator;
pub use error::{PeregrineError, Result};
pub use events::{EngineEvent, EventBus, LogNotifier, Notifier};
pub use exchange::{BinanceFuturesClient, ExchangeApi, LatencyTracker};
