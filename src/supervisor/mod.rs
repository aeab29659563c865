pub mod live_monitor;
pub mod sentinel;

pub use live_monitor::LiveMonitor;
pub use sentinel::Sentinel;
