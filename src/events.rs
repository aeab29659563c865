//! Structured engine events
//!
//! Every component reports noteworthy state changes as `EngineEvent`s on a
//! broadcast bus. Loggers and notifiers subscribe; no component blocks on a
//! slow consumer.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::domain::{ExitReason, PositionSide, Signal};

/// Engine-wide structured event stream.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    CycleStarted {
        cycle: u64,
        at: DateTime<Utc>,
    },
    CycleTimeout {
        cycle: u64,
        elapsed_secs: u64,
    },
    DecisionMade {
        agent_id: String,
        symbol: String,
        signal: Signal,
        confidence: Decimal,
    },
    IntentArbitrated {
        symbol: String,
        side: Signal,
        score: Decimal,
        reason: String,
    },
    EntrySubmitted {
        symbol: String,
        side: PositionSide,
        quantity: Decimal,
        leverage: u32,
    },
    EntryUnconfirmed {
        symbol: String,
        side: PositionSide,
    },
    EntrySkipped {
        symbol: String,
        reason: String,
    },
    TpslAttached {
        symbol: String,
        tp_order_id: String,
        sl_order_id: String,
    },
    TpslIncomplete {
        symbol: String,
        has_tp: bool,
        has_sl: bool,
    },
    InvalidTpslGeometry {
        symbol: String,
        entry: Decimal,
        tp: Decimal,
        sl: Decimal,
    },
    PositionOpened {
        symbol: String,
        side: PositionSide,
        quantity: Decimal,
        entry_price: Decimal,
    },
    PositionClosed {
        symbol: String,
        side: PositionSide,
        reason: ExitReason,
        realized_pnl: Decimal,
    },
    PositionClosedExternally {
        symbol: String,
        side: PositionSide,
    },
    OrphanAdopted {
        symbol: String,
        side: PositionSide,
        quantity: Decimal,
    },
    PartialClose {
        symbol: String,
        closed_quantity: Decimal,
        roi: Decimal,
    },
    ExitFailureManual {
        symbol: String,
        detail: String,
    },
    BreakerTripped {
        breaker: String,
        symbol: String,
        reason: String,
        paused_until: DateTime<Utc>,
    },
    KillSwitchTripped {
        switch: String,
        detail: String,
    },
    ReattachSkippedMargin {
        symbol: String,
    },
    Reattached {
        symbol: String,
        tp_order_id: String,
        sl_order_id: String,
    },
    EquityDrift {
        expected: Decimal,
        observed: Decimal,
        diff_pct: Decimal,
    },
    EquitySnapshotTaken {
        total_equity: Decimal,
        drawdown: Decimal,
    },
}

impl EngineEvent {
    /// Short machine-readable label for log sinks.
    pub fn label(&self) -> &'static str {
        match self {
            EngineEvent::CycleStarted { .. } => "CycleStarted",
            EngineEvent::CycleTimeout { .. } => "CycleTimeout",
            EngineEvent::DecisionMade { .. } => "DecisionMade",
            EngineEvent::IntentArbitrated { .. } => "IntentArbitrated",
            EngineEvent::EntrySubmitted { .. } => "EntrySubmitted",
            EngineEvent::EntryUnconfirmed { .. } => "EntryUnconfirmed",
            EngineEvent::EntrySkipped { .. } => "EntrySkipped",
            EngineEvent::TpslAttached { .. } => "TpslAttached",
            EngineEvent::TpslIncomplete { .. } => "TpslIncomplete",
            EngineEvent::InvalidTpslGeometry { .. } => "InvalidTpslGeometry",
            EngineEvent::PositionOpened { .. } => "PositionOpened",
            EngineEvent::PositionClosed { .. } => "PositionClosed",
            EngineEvent::PositionClosedExternally { .. } => "PositionClosedExternally",
            EngineEvent::OrphanAdopted { .. } => "OrphanAdopted",
            EngineEvent::PartialClose { .. } => "PartialClose",
            EngineEvent::ExitFailureManual { .. } => "ExitFailure-Manual",
            EngineEvent::BreakerTripped { .. } => "BreakerTripped",
            EngineEvent::KillSwitchTripped { .. } => "KillSwitchTripped",
            EngineEvent::ReattachSkippedMargin { .. } => "ReattachSkipped-Margin",
            EngineEvent::Reattached { .. } => "Reattached",
            EngineEvent::EquityDrift { .. } => "EquityDrift",
            EngineEvent::EquitySnapshotTaken { .. } => "EquitySnapshot",
        }
    }

    /// Events that warrant operator attention via the notifier channel.
    pub fn is_alert(&self) -> bool {
        matches!(
            self,
            EngineEvent::EntryUnconfirmed { .. }
                | EngineEvent::TpslIncomplete { .. }
                | EngineEvent::InvalidTpslGeometry { .. }
                | EngineEvent::ExitFailureManual { .. }
                | EngineEvent::KillSwitchTripped { .. }
                | EngineEvent::ReattachSkippedMargin { .. }
                | EngineEvent::EquityDrift { .. }
        )
    }
}

/// Broadcast bus for engine events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Lagging or absent subscribers are not an error.
    pub fn publish(&self, event: EngineEvent) {
        debug!(event = event.label(), "engine event");
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Outbound push channel for high-severity events. Implementations must not
/// block the engine; failures are logged and dropped.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str);
}

/// Default notifier that writes alerts to the log stream.
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str) {
        warn!(target: "peregrine::alerts", "{}", message);
    }
}

/// Forward alert-grade events from the bus to a notifier until the bus closes.
pub async fn run_alert_forwarder(bus: EventBus, notifier: std::sync::Arc<dyn Notifier>) {
    let mut rx = bus.subscribe();
    info!("alert forwarder started");
    loop {
        match rx.recv().await {
            Ok(event) if event.is_alert() => {
                notifier.notify(&format!("{}: {:?}", event.label(), event)).await;
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                error!("alert forwarder lagged, missed {} events", missed);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
