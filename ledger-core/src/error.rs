//! Error types for the ledger core

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Amount constructed from a negative input
    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    /// Amount arithmetic overflowed the minor-unit range
    #[error("Amount overflow")]
    AmountOverflow,

    /// Subtraction would produce a negative amount
    #[error("Negative result")]
    NegativeResult,

    /// Withdrawal exceeds the available balance
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        /// Minor units requested
        requested: u64,
        /// Minor units available
        available: u64,
    },

    /// Account not found
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    /// Another execution holds this idempotency key mid-flight
    #[error("Transfer in progress: {0}")]
    TransferInProgress(String),

    /// Same idempotency key re-submitted with a different target or amount
    #[error("Idempotency conflict: {0}")]
    IdempotencyConflict(String),

    /// Transaction not found
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// Transaction already voided
    #[error("Transaction already void: {0}")]
    AlreadyVoid(String),

    /// Transfer not found
    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    /// Schedule not found
    #[error("Schedule not found: {0}")]
    ScheduleNotFound(String),

    /// Lock wait exceeded the configured bound
    #[error("Lock wait timed out: {0}")]
    LockTimeout(String),

    /// Illegal aggregate state transition
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Transient errors are safe to retry; everything else is definitive.
    ///
    /// Callers use this to tell contention and infrastructure trouble apart
    /// from terminal business outcomes.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Storage(_)
                | Error::Serialization(_)
                | Error::TransferInProgress(_)
                | Error::LockTimeout(_)
                | Error::Io(_)
        )
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
