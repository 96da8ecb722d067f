//! Settlement event publication
//!
//! Settled events are published only after the unit of work has durably
//! committed; failure events are published as soon as the Failed state
//! is recorded, since callers need prompt visibility. The orchestrator
//! owns that ordering; this module only supplies the event types and
//! the publisher seam.

use chrono::{DateTime, Utc};
use ledger_core::{Money, TransactionId, TransferId, TransferStatus, TransferType};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Observable settlement outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SettlementEvent {
    /// A transfer settled: both postings exist and balances moved
    TransferSettled {
        /// Aggregate id
        transfer_id: TransferId,
        /// Debit posting on the source account
        debit_transaction_id: TransactionId,
        /// Credit posting on the target account
        credit_transaction_id: TransactionId,
        /// Settled amount
        amount: Money,
        /// Transfer classification
        transfer_type: TransferType,
        /// Commit timestamp
        settled_at: DateTime<Utc>,
    },

    /// A transfer reached the terminal Failed state
    TransferFailed {
        /// Aggregate id
        transfer_id: TransferId,
        /// Terminal status (always Failed)
        status: TransferStatus,
        /// Recorded reason
        reason: String,
        /// Failure timestamp
        failed_at: DateTime<Utc>,
    },
}

/// Publisher seam consumed by the orchestrator
pub trait EventPublisher: Send + Sync {
    /// Publish one event to interested collaborators
    fn publish(&self, event: SettlementEvent);
}

/// Broadcast-channel publisher; every subscriber gets an owned clone
pub struct BroadcastPublisher {
    sender: broadcast::Sender<SettlementEvent>,
}

impl std::fmt::Debug for BroadcastPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastPublisher")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

impl BroadcastPublisher {
    /// Create with a bounded channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to the event stream
    pub fn subscribe(&self) -> broadcast::Receiver<SettlementEvent> {
        self.sender.subscribe()
    }
}

impl EventPublisher for BroadcastPublisher {
    fn publish(&self, event: SettlementEvent) {
        tracing::debug!(event = ?event, "Settlement event");
        // A send error only means no subscriber is currently listening
        let _ = self.sender.send(event);
    }
}

/// Publisher that drops events (tests, embedded use)
#[derive(Debug, Default)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _event: SettlementEvent) {}
}
