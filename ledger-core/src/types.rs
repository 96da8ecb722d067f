//! Core types for the transfer ledger
//!
//! All types are designed for:
//! - Deterministic serialization (bincode)
//! - Memory safety (no unsafe code)
//! - Exact arithmetic (integer minor units for money)

use crate::money::Money;
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Account identifier (IBAN, account number, etc.)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    /// Create new account ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transfer aggregate identifier (UUIDv7 for time-ordering)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferId(Uuid);

impl TransferId {
    /// Generate a new time-ordered id
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Rebuild from a stored UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Posted transaction identifier (UUIDv7 for time-ordering)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(Uuid);

impl TransactionId {
    /// Generate a new time-ordered id
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Rebuild from a stored UUID
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Auto-transfer schedule identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduleId(Uuid);

impl ScheduleId {
    /// Generate a new id
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Underlying UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque caller-supplied token identifying one logical transfer request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Create from a caller-supplied token
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Deterministic key for one scheduled run, so a crash-and-retry of the
    /// same occurrence replays instead of double-transferring
    pub fn for_scheduled_run(schedule_id: ScheduleId, run_date: NaiveDate) -> Self {
        Self(format!("auto:{}:{}", schedule_id, run_date))
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Posting type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum TransactionType {
    /// Debit side of an outgoing transfer
    TransferOut,
    /// Credit side of an incoming transfer
    TransferIn,
    /// Compensating posting for a voided transaction
    Reversal,
}

/// Posting direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Balance-decreasing side
    Debit,
    /// Balance-increasing side
    Credit,
}

impl Direction {
    /// Opposite direction (used by reversals)
    pub fn inverted(&self) -> Direction {
        match self {
            Direction::Debit => Direction::Credit,
            Direction::Credit => Direction::Debit,
        }
    }
}

/// Posting status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Durably posted, immutable apart from voiding
    Posted,
    /// Voided; a reversal posting compensates it
    Void,
}

/// Immutable-once-posted ledger entry
///
/// Once Posted, `amount`, `direction`, `account_id` and `value_date`
/// never change; the only permitted mutation is Posted → Void plus the
/// reversal back-reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction identifier
    pub transaction_id: TransactionId,

    /// Account the posting belongs to
    pub account_id: AccountId,

    /// Posting type
    pub transaction_type: TransactionType,

    /// Posting direction
    pub direction: Direction,

    /// Posted amount
    pub amount: Money,

    /// Accounting date
    pub value_date: NaiveDate,

    /// Wall-clock posting timestamp
    pub posted_at: DateTime<Utc>,

    /// Posting status
    pub status: TransactionStatus,

    /// Back-reference (reversal ↔ original)
    pub related_transaction_id: Option<TransactionId>,

    /// Free-form description
    pub description: String,
}

impl Transaction {
    /// Create a new Posted transaction with `posted_at = now`
    pub fn post(
        account_id: AccountId,
        transaction_type: TransactionType,
        direction: Direction,
        amount: Money,
        value_date: NaiveDate,
        description: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id: TransactionId::generate(),
            account_id,
            transaction_type,
            direction,
            amount,
            value_date,
            posted_at: Utc::now(),
            status: TransactionStatus::Posted,
            related_transaction_id: None,
            description: description.into(),
        }
    }

    /// Build the compensating reversal for this posting
    pub fn reversal(&self, reason: impl Into<String>) -> Self {
        let mut reversal = Transaction::post(
            self.account_id.clone(),
            TransactionType::Reversal,
            self.direction.inverted(),
            self.amount,
            self.value_date,
            reason,
        );
        reversal.related_transaction_id = Some(self.transaction_id);
        reversal
    }

    /// Transition Posted → Void, linking the reversal
    pub fn mark_void(&mut self, reversal_id: TransactionId) -> Result<()> {
        if self.status == TransactionStatus::Void {
            return Err(Error::AlreadyVoid(self.transaction_id.to_string()));
        }
        self.status = TransactionStatus::Void;
        self.related_transaction_id = Some(reversal_id);
        Ok(())
    }

    /// True while the posting still counts
    pub fn is_posted(&self) -> bool {
        self.status == TransactionStatus::Posted
    }
}

/// Transfer classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum TransferType {
    /// Both accounts live in this store
    Internal,
    /// Outbound leg of an external transfer
    ExternalOutbound,
}

/// Transfer aggregate status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    /// Created, outcome not yet decided
    Pending,
    /// Settled exactly once (terminal)
    Settled,
    /// Failed a business rule (terminal)
    Failed,
}

impl TransferStatus {
    /// Terminal states never transition again
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Settled | TransferStatus::Failed)
    }
}

/// Recorded reason for a Failed transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    /// Amount was zero
    InvalidAmount,
    /// Source and target were the same account
    SameAccount,
    /// One of the accounts does not exist
    AccountNotFound,
    /// Account status forbids transfers
    AccountNotTransferable,
    /// Source balance below the requested amount
    InsufficientBalance,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureReason::InvalidAmount => "invalid amount",
            FailureReason::SameAccount => "same source and target account",
            FailureReason::AccountNotFound => "account not found",
            FailureReason::AccountNotTransferable => "account not transferable",
            FailureReason::InsufficientBalance => "insufficient balance",
        };
        write!(f, "{}", s)
    }
}

/// Transfer aggregate: the two-sided (debit + credit) unit representing
/// one money movement, keyed by `(source_account_id, idempotency_key)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    /// Aggregate identifier
    pub transfer_id: TransferId,

    /// Caller-supplied request token
    pub idempotency_key: IdempotencyKey,

    /// Debited account
    pub source_account_id: AccountId,

    /// Credited account
    pub target_account_id: AccountId,

    /// Transfer amount
    pub amount: Money,

    /// Accounting date for both postings
    pub value_date: NaiveDate,

    /// Transfer classification
    pub transfer_type: TransferType,

    /// Aggregate status
    pub status: TransferStatus,

    /// When the first request arrived
    pub requested_at: DateTime<Utc>,

    /// When the terminal state was reached
    pub completed_at: Option<DateTime<Utc>>,

    /// Reason recorded on failure
    pub failure_reason: Option<FailureReason>,

    /// Debit posting id (set on settlement)
    pub debit_transaction_id: Option<TransactionId>,

    /// Credit posting id (set on settlement)
    pub credit_transaction_id: Option<TransactionId>,
}

impl Transfer {
    /// Create a new Pending aggregate for a first-time idempotency key
    pub fn pending(
        idempotency_key: IdempotencyKey,
        source_account_id: AccountId,
        target_account_id: AccountId,
        amount: Money,
        value_date: NaiveDate,
        transfer_type: TransferType,
    ) -> Self {
        Self {
            transfer_id: TransferId::generate(),
            idempotency_key,
            source_account_id,
            target_account_id,
            amount,
            value_date,
            transfer_type,
            status: TransferStatus::Pending,
            requested_at: Utc::now(),
            completed_at: None,
            failure_reason: None,
            debit_transaction_id: None,
            credit_transaction_id: None,
        }
    }

    /// Transition Pending → Settled, recording both posting ids
    pub fn settle(
        &mut self,
        debit_transaction_id: TransactionId,
        credit_transaction_id: TransactionId,
    ) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::InvalidTransition(format!(
                "transfer {} is already {:?}",
                self.transfer_id, self.status
            )));
        }
        self.status = TransferStatus::Settled;
        self.debit_transaction_id = Some(debit_transaction_id);
        self.credit_transaction_id = Some(credit_transaction_id);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Transition Pending → Failed with a recorded reason
    pub fn fail(&mut self, reason: FailureReason) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::InvalidTransition(format!(
                "transfer {} is already {:?}",
                self.transfer_id, self.status
            )));
        }
        self.status = TransferStatus::Failed;
        self.failure_reason = Some(reason);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// True once a terminal state was reached
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
