pub mod engine;
pub mod indicators;

pub use engine::{MarketDataEngine, SymbolData};
pub use indicators::compute_indicators;
