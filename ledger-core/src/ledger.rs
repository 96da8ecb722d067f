//! Transaction ledger service
//!
//! Post, void and list operations over the append-only posting log.
//! Every post and void is a durable write; this is the audit trail of
//! record, so nothing here mutates in memory only.
//!
//! Voiding does not itself touch balances: the account guard is the
//! only balance mutator, and compensation is an explicit caller action.

use crate::{
    lock::LockManager,
    money::Money,
    storage::Storage,
    types::{AccountId, Direction, Transaction, TransactionId, TransactionType},
    Result,
};
use chrono::NaiveDate;
use std::sync::Arc;

/// Default page size for listings
const DEFAULT_PAGE_SIZE: usize = 20;

/// Append-only transaction ledger
#[derive(Debug)]
pub struct TransactionLedger {
    storage: Arc<Storage>,
    locks: Arc<LockManager>,
}

impl TransactionLedger {
    /// Create a ledger over shared storage and locks
    pub fn new(storage: Arc<Storage>, locks: Arc<LockManager>) -> Self {
        Self { storage, locks }
    }

    /// Post a transaction: durable write, id assigned, `posted_at = now`
    pub async fn post(
        &self,
        account_id: AccountId,
        transaction_type: TransactionType,
        direction: Direction,
        amount: Money,
        value_date: NaiveDate,
        description: impl Into<String>,
    ) -> Result<Transaction> {
        let _account_lock = self.locks.lock_account(&account_id).await?;

        let transaction = Transaction::post(
            account_id,
            transaction_type,
            direction,
            amount,
            value_date,
            description,
        );
        self.storage.commit_posting(&transaction)?;

        tracing::debug!(
            transaction_id = %transaction.transaction_id,
            account_id = %transaction.account_id,
            amount = %transaction.amount,
            "Transaction posted"
        );

        Ok(transaction)
    }

    /// Void a posted transaction
    ///
    /// Marks the original Void, posts one compensating Reversal with the
    /// inverted direction and the same amount, and links both rows in one
    /// atomic batch. Returns the reversal. Fails with `TransactionNotFound`
    /// or `AlreadyVoid`; a repeat void never produces a second reversal.
    pub async fn void(
        &self,
        transaction_id: TransactionId,
        reason: impl Into<String>,
    ) -> Result<Transaction> {
        // A first read just to learn the account; the authoritative
        // re-read happens under the account lock.
        let peek = self.storage.get_transaction(transaction_id)?;
        let _account_lock = self.locks.lock_account(&peek.account_id).await?;

        let mut original = self.storage.get_transaction(transaction_id)?;
        let reversal = original.reversal(reason);
        original.mark_void(reversal.transaction_id)?;

        self.storage.commit_void(&original, &reversal)?;

        tracing::info!(
            original = %original.transaction_id,
            reversal = %reversal.transaction_id,
            "Transaction voided"
        );

        Ok(reversal)
    }

    /// List an account's transactions, most recent first
    ///
    /// Zero-indexed offset/limit pagination; defaults apply when omitted.
    pub fn list_by_account(
        &self,
        account_id: &AccountId,
        page: Option<usize>,
        size: Option<usize>,
    ) -> Result<Vec<Transaction>> {
        let page = page.unwrap_or(0);
        let size = size.unwrap_or(DEFAULT_PAGE_SIZE);
        self.storage.list_account_transactions(account_id, page, size)
    }
}
