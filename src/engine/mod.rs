pub mod control;
pub mod equity;
pub mod feedback;
pub mod orchestrator;

pub use control::ControlState;
pub use equity::EquityReconciler;
pub use feedback::OutcomeFeedback;
pub use orchestrator::Orchestrator;
