//! FundRail Ledger Core
//!
//! Durable transfer ledger with an idempotent settlement protocol.
//!
//! # Architecture
//!
//! - **Append-only postings**: every money movement leaves an immutable
//!   `Transaction` row; voids post compensating reversals, never deletes
//! - **Keyed pessimistic locks**: one lock per transfer key, account and
//!   schedule row serializes all writers of that row
//! - **Atomic units of work**: every settlement attempt commits exactly one
//!   RocksDB `WriteBatch`, so partial outcomes are never durably visible
//!
//! # Invariants
//!
//! - No overdraft: account balances are never negative
//! - Conservation: a settled transfer debits and credits the same amount
//! - Idempotency: at most one aggregate per `(source account, idempotency key)`
//! - Terminality: Settled and Failed transfers never transition again

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod account;
pub mod config;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod money;
pub mod schedule;
pub mod storage;
pub mod types;

// Re-exports
pub use account::{Account, AccountStatus};
pub use config::Config;
pub use error::{Error, Result};
pub use ledger::TransactionLedger;
pub use lock::{LockKey, LockManager};
pub use money::{BalanceImpact, Money};
pub use schedule::{AutoTransferSchedule, Recurrence};
pub use storage::Storage;
pub use types::{
    AccountId, Direction, FailureReason, IdempotencyKey, ScheduleId, Transaction, TransactionId,
    TransactionStatus, TransactionType, Transfer, TransferId, TransferStatus, TransferType,
};
