pub mod breakers;
pub mod correlation;
pub mod engine;
pub mod kill_switch;

pub use breakers::{BreakerTrip, CircuitBreakers};
pub use correlation::{correlation_adjustment, pearson};
pub use engine::{LeverageGovernor, RiskEngine, SizedPosition};
pub use kill_switch::{KillReason, KillSwitch};
