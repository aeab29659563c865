//! Buffered CSV journals
//!
//! Append-only audit trails: equity curve, trades, decisions, errors, and
//! the learning log binding decisions to outcomes. Rows buffer in memory
//! and flush every few cycles and on shutdown; a crash loses at most one
//! flush window of audit rows, never trading state.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;

const EQUITY_CURVE_FILE: &str = "equity_curve.csv";
const TRADES_FILE: &str = "trades_log.csv";
const DECISIONS_FILE: &str = "decisions_log.csv";
const ERRORS_FILE: &str = "errors_log.csv";
const LEARNING_FILE: &str = "learning_log.csv";

#[derive(Debug, Clone, Serialize)]
pub struct EquityRow {
    pub ts: DateTime<Utc>,
    pub realized: Decimal,
    pub unrealized: Decimal,
    pub total: Decimal,
    pub peak: Decimal,
    pub drawdown: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeRow {
    pub ts: DateTime<Utc>,
    pub symbol: String,
    pub side: String,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub realized_pnl: Decimal,
    pub exit_reason: String,
    pub hold_duration_secs: i64,
    pub leverage: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionRow {
    pub ts: DateTime<Utc>,
    pub agent_id: String,
    pub symbol: String,
    pub signal: String,
    pub raw_confidence: Decimal,
    pub normalized_confidence: Decimal,
    pub strategy_tag: String,
    pub price: Decimal,
    pub regime: String,
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorRow {
    pub ts: DateTime<Utc>,
    pub component: String,
    pub symbol: String,
    pub kind: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LearningRow {
    pub ts: DateTime<Utc>,
    pub agent_id: String,
    pub symbol: String,
    pub decision_id: String,
    pub signal: String,
    pub confidence: Decimal,
    pub realized_pnl: Decimal,
    pub was_correct: bool,
}

struct Buffers {
    equity: Vec<EquityRow>,
    trades: Vec<TradeRow>,
    decisions: Vec<DecisionRow>,
    errors: Vec<ErrorRow>,
    learning: Vec<LearningRow>,
}

pub struct CsvJournal {
    log_dir: PathBuf,
    buffers: Mutex<Buffers>,
}

impl CsvJournal {
    pub fn new(log_dir: impl Into<PathBuf>) -> Result<Self> {
        let log_dir = log_dir.into();
        std::fs::create_dir_all(&log_dir)?;
        Ok(Self {
            log_dir,
            buffers: Mutex::new(Buffers {
                equity: Vec::new(),
                trades: Vec::new(),
                decisions: Vec::new(),
                errors: Vec::new(),
                learning: Vec::new(),
            }),
        })
    }

    pub fn log_equity(&self, row: EquityRow) {
        self.buffers.lock().expect("journal poisoned").equity.push(row);
    }

    pub fn log_trade(&self, row: TradeRow) {
        self.buffers.lock().expect("journal poisoned").trades.push(row);
    }

    pub fn log_decision(&self, row: DecisionRow) {
        self.buffers
            .lock()
            .expect("journal poisoned")
            .decisions
            .push(row);
    }

    pub fn log_error(&self, row: ErrorRow) {
        self.buffers.lock().expect("journal poisoned").errors.push(row);
    }

    pub fn log_learning(&self, row: LearningRow) {
        self.buffers
            .lock()
            .expect("journal poisoned")
            .learning
            .push(row);
    }

    /// Flush all buffers to their CSV files. Called every few cycles and
    /// once on shutdown.
    pub fn flush_all(&self) -> Result<()> {
        let drained = {
            let mut buffers = self.buffers.lock().expect("journal poisoned");
            Buffers {
                equity: std::mem::take(&mut buffers.equity),
                trades: std::mem::take(&mut buffers.trades),
                decisions: std::mem::take(&mut buffers.decisions),
                errors: std::mem::take(&mut buffers.errors),
                learning: std::mem::take(&mut buffers.learning),
            }
        };

        append_rows(&self.log_dir.join(EQUITY_CURVE_FILE), &drained.equity)?;
        append_rows(&self.log_dir.join(TRADES_FILE), &drained.trades)?;
        append_rows(&self.log_dir.join(DECISIONS_FILE), &drained.decisions)?;
        append_rows(&self.log_dir.join(ERRORS_FILE), &drained.errors)?;
        append_rows(&self.log_dir.join(LEARNING_FILE), &drained.learning)?;
        debug!("journal buffers flushed");
        Ok(())
    }

    pub fn buffered_rows(&self) -> usize {
        let buffers = self.buffers.lock().expect("journal poisoned");
        buffers.equity.len()
            + buffers.trades.len()
            + buffers.decisions.len()
            + buffers.errors.len()
            + buffers.learning.len()
    }
}

impl Drop for CsvJournal {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all() {
            warn!("journal flush on drop failed: {}", e);
        }
    }
}

fn append_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let write_header = !path.exists();
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(write_header)
        .from_writer(file);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}
