//! Economy events: what happened to the player's economy, and why.
//!
//! Routine accrual and clicks are not logged (they happen every frame);
//! lifecycle transitions, anomalies and remote outcomes are.

use crate::types::{Millis, PlayerId, UpgradeId};
use serde::{Deserialize, Serialize};

/// Variants are appended, never removed or reordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EconomyEvent {
    Initialized {
        player_id: PlayerId,
        balance: String,
    },
    /// Device clock moved backwards; accrual clamped to zero.
    ClockAnomaly {
        previous: Millis,
        now: Millis,
    },
    Reconciled {
        balance: String,
        discarded_delta: String,
    },
    SyncDispatched {
        score: String,
    },
    SyncFailed {
        reason: String,
    },
    PurchaseConfirmed {
        upgrade_id: UpgradeId,
        level: u32,
    },
    PurchaseRejected {
        upgrade_id: UpgradeId,
        reason: String,
    },
    /// Refused locally before contacting the authority.
    PurchaseRefused {
        upgrade_id: UpgradeId,
        cost: String,
        balance: String,
    },
    TransferCompleted {
        receiver_username: String,
        amount: String,
    },
    TransferFailed {
        receiver_username: String,
        reason: String,
    },
    RemoteFailed {
        request: String,
        reason: String,
    },
}

impl EconomyEvent {
    /// Stable name, used for the event_type column.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Initialized { .. } => "initialized",
            Self::ClockAnomaly { .. } => "clock_anomaly",
            Self::Reconciled { .. } => "reconciled",
            Self::SyncDispatched { .. } => "sync_dispatched",
            Self::SyncFailed { .. } => "sync_failed",
            Self::PurchaseConfirmed { .. } => "purchase_confirmed",
            Self::PurchaseRejected { .. } => "purchase_rejected",
            Self::PurchaseRefused { .. } => "purchase_refused",
            Self::TransferCompleted { .. } => "transfer_completed",
            Self::TransferFailed { .. } => "transfer_failed",
            Self::RemoteFailed { .. } => "remote_failed",
        }
    }

    /// Fired on every sync timer tick. Kept in the session buffer only,
    /// never written to the event log.
    pub fn is_routine(&self) -> bool {
        matches!(self, Self::SyncDispatched { .. })
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub player_id: PlayerId,
    pub at: Millis,
    pub event_type: String,
    pub payload: String, // JSON-serialized EconomyEvent
}
