pub mod locks;
pub mod order_manager;
pub mod state;
pub mod tpsl;

pub use locks::{CooldownBlock, SymbolGuards};
pub use order_manager::{CloseResult, EntryRequest, EntryResult, OrderManager};
pub use state::TradeStateMachine;
pub use tpsl::{compute_tpsl, tpsl_fractions, tpsl_hash, validate_geometry, TpslPrices};
