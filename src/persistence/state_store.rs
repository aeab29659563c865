//! Durable engine state
//!
//! A small JSON file holding the values that must survive a restart:
//! the equity peak (drawdown kill-switch anchor) and cumulative realized
//! PnL. Written atomically via a temp file rename.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::Result;

const STATE_FILE: &str = "engine_state.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedState {
    pub peak_equity: Decimal,
    pub realized_cum: Decimal,
}

pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self {
            path: data_dir.join(STATE_FILE),
        })
    }

    pub fn load(&self) -> PersistedState {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(path = %self.path.display(), error = %e, "corrupt state file, starting fresh");
                PersistedState::default()
            }),
            Err(_) => PersistedState::default(),
        }
    }

    pub fn save(&self, state: &PersistedState) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(state)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn round_trips_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path()).unwrap();
        assert_eq!(store.load().peak_equity, Decimal::ZERO);

        store
            .save(&PersistedState {
                peak_equity: dec!(13200),
                realized_cum: dec!(450.25),
            })
            .unwrap();

        let loaded = store.load();
        assert_eq!(loaded.peak_equity, dec!(13200));
        assert_eq!(loaded.realized_cum, dec!(450.25));
    }

    #[test]
    fn corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path()).unwrap();
        std::fs::write(store.path(), "not json").unwrap();
        assert_eq!(store.load().peak_equity, Decimal::ZERO);
    }
}
