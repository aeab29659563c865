pub mod agent_store;
pub mod csv_log;
pub mod state_store;

pub use agent_store::load_roster;
pub use csv_log::CsvJournal;
pub use state_store::StateStore;
