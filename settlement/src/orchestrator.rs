//! Transfer orchestrator
//!
//! Coordinates one settlement attempt end to end: transfer-key lock,
//! idempotent replay, validation, balance mutation under account locks,
//! posting, single-batch commit, event publication.
//!
//! Business-rule violations resolve to a terminal Failed aggregate and
//! are returned as values. Contention (`TransferInProgress`,
//! `LockTimeout`) and storage trouble surface as transient errors with
//! no aggregate mutation, so callers know a retry is safe.

use crate::{
    events::{EventPublisher, SettlementEvent},
    metrics::Metrics,
    Error, Result,
};
use chrono::{NaiveDate, Utc};
use ledger_core::{
    Account, AccountId, Direction, FailureReason, IdempotencyKey, LockManager, Money, Storage,
    Transaction, TransactionId, TransactionType, Transfer, TransferId, TransferStatus,
    TransferType,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// One logical transfer request
///
/// The idempotency key is mandatory here; generating a default for
/// key-less callers is the facade's job, not the core's.
#[derive(Debug, Clone)]
pub struct TransferCommand {
    /// Debited account
    pub source_account_id: AccountId,
    /// Credited account
    pub target_account_id: AccountId,
    /// Amount to move
    pub amount: Money,
    /// Accounting date for both postings
    pub value_date: NaiveDate,
    /// Transfer classification
    pub transfer_type: TransferType,
    /// Optional posting description
    pub memo: Option<String>,
    /// Caller-supplied request token
    pub idempotency_key: IdempotencyKey,
}

/// Definitive answer for one logical transfer request
#[derive(Debug, Clone, PartialEq)]
pub struct TransferResult {
    /// Aggregate id
    pub transfer_id: TransferId,
    /// Request token the result is recorded under
    pub idempotency_key: IdempotencyKey,
    /// Terminal status
    pub status: TransferStatus,
    /// Debit posting (settled transfers only)
    pub debit_transaction_id: Option<TransactionId>,
    /// Credit posting (settled transfers only)
    pub credit_transaction_id: Option<TransactionId>,
    /// Recorded reason (failed transfers only)
    pub failure_reason: Option<FailureReason>,
}

impl TransferResult {
    fn from_transfer(transfer: &Transfer) -> Self {
        Self {
            transfer_id: transfer.transfer_id,
            idempotency_key: transfer.idempotency_key.clone(),
            status: transfer.status,
            debit_transaction_id: transfer.debit_transaction_id,
            credit_transaction_id: transfer.credit_transaction_id,
            failure_reason: transfer.failure_reason,
        }
    }
}

/// Main orchestrator for the settlement protocol
pub struct TransferOrchestrator {
    storage: Arc<Storage>,
    locks: Arc<LockManager>,
    publisher: Arc<dyn EventPublisher>,
    metrics: Arc<Metrics>,
}

impl std::fmt::Debug for TransferOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferOrchestrator").finish_non_exhaustive()
    }
}

impl TransferOrchestrator {
    /// Create an orchestrator over shared storage, locks and publisher
    pub fn new(
        storage: Arc<Storage>,
        locks: Arc<LockManager>,
        publisher: Arc<dyn EventPublisher>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            storage,
            locks,
            publisher,
            metrics,
        }
    }

    /// Execute one settlement attempt
    ///
    /// Invoking this any number of times with the same
    /// `(source account, idempotency key)` yields at most one settled
    /// (or failed) aggregate, exactly one debit and one credit posting,
    /// and the identical result on every call after the first.
    pub async fn transfer(&self, command: TransferCommand) -> Result<TransferResult> {
        let started = Instant::now();
        let result = self.transfer_inner(command).await;
        self.metrics
            .transfer_duration
            .observe(started.elapsed().as_secs_f64());
        result
    }

    async fn transfer_inner(&self, command: TransferCommand) -> Result<TransferResult> {
        // Step 1: transfer-key lock totally orders attempts on this
        // logical transfer
        let _key_lock = self
            .locks
            .lock_transfer(&command.source_account_id, &command.idempotency_key)
            .await?;

        if let Some(existing) = self.storage.find_transfer_by_idempotency(
            &command.source_account_id,
            &command.idempotency_key,
        )? {
            return self.replay(existing, &command);
        }

        // Step 2: new Pending aggregate, in memory only. Nothing is
        // committed until the outcome is known, so an infrastructure
        // failure leaves no durable trace.
        let transfer = Transfer::pending(
            command.idempotency_key.clone(),
            command.source_account_id.clone(),
            command.target_account_id.clone(),
            command.amount,
            command.value_date,
            command.transfer_type,
        );

        info!(
            transfer_id = %transfer.transfer_id,
            source = %transfer.source_account_id,
            target = %transfer.target_account_id,
            amount = %transfer.amount,
            "Transfer attempt started"
        );

        // Step 3: validation; violations are terminal business outcomes
        if !command.amount.is_positive() {
            return self.fail(transfer, FailureReason::InvalidAmount);
        }
        if command.source_account_id == command.target_account_id {
            return self.fail(transfer, FailureReason::SameAccount);
        }

        // Step 4: account-row locks in sorted order, then the balance guard
        let _account_locks = self
            .locks
            .lock_account_pair(&command.source_account_id, &command.target_account_id)
            .await?;

        let mut source = match self.storage.get_account(&command.source_account_id) {
            Ok(account) => account,
            Err(ledger_core::Error::AccountNotFound(_)) => {
                return self.fail(transfer, FailureReason::AccountNotFound);
            }
            Err(e) => return Err(e.into()),
        };
        let mut target = match self.storage.get_account(&command.target_account_id) {
            Ok(account) => account,
            Err(ledger_core::Error::AccountNotFound(_)) => {
                return self.fail(transfer, FailureReason::AccountNotFound);
            }
            Err(e) => return Err(e.into()),
        };

        if !source.can_transfer() || !target.can_transfer() {
            return self.fail(transfer, FailureReason::AccountNotTransferable);
        }

        match source.withdraw(command.amount) {
            Ok(()) => {}
            Err(ledger_core::Error::InsufficientBalance { .. }) => {
                return self.fail(transfer, FailureReason::InsufficientBalance);
            }
            Err(e) => return Err(e.into()),
        }
        target.deposit(command.amount)?;

        // Step 5: both postings with the transfer's value date
        let description = command
            .memo
            .clone()
            .unwrap_or_else(|| format!("transfer {}", transfer.transfer_id));
        let debit = Transaction::post(
            source.account_id.clone(),
            TransactionType::TransferOut,
            Direction::Debit,
            command.amount,
            command.value_date,
            description.clone(),
        );
        let credit = Transaction::post(
            target.account_id.clone(),
            TransactionType::TransferIn,
            Direction::Credit,
            command.amount,
            command.value_date,
            description,
        );

        // Step 6: terminal state and single-batch commit
        let mut transfer = transfer;
        transfer.settle(debit.transaction_id, credit.transaction_id)?;
        self.storage
            .commit_settlement(&transfer, &source, &target, &debit, &credit)?;

        self.metrics.transfers_settled.inc();
        self.metrics.transactions_posted.inc_by(2);

        info!(
            transfer_id = %transfer.transfer_id,
            debit = %debit.transaction_id,
            credit = %credit.transaction_id,
            "Transfer settled"
        );

        // Step 7: settled event strictly after the durable commit
        self.publisher.publish(SettlementEvent::TransferSettled {
            transfer_id: transfer.transfer_id,
            debit_transaction_id: debit.transaction_id,
            credit_transaction_id: credit.transaction_id,
            amount: transfer.amount,
            transfer_type: transfer.transfer_type,
            settled_at: transfer.completed_at.unwrap_or_else(Utc::now),
        });

        Ok(TransferResult::from_transfer(&transfer))
    }

    /// Resolve a request whose idempotency pair already has an aggregate
    fn replay(&self, existing: Transfer, command: &TransferCommand) -> Result<TransferResult> {
        // A re-submission must describe the same movement; silently
        // returning the original outcome would mask caller bugs
        if existing.target_account_id != command.target_account_id
            || existing.amount != command.amount
        {
            return Err(Error::Ledger(ledger_core::Error::IdempotencyConflict(
                format!(
                    "{}|{}",
                    command.source_account_id, command.idempotency_key
                ),
            )));
        }

        match existing.status {
            // A durable Pending row means another execution is mid-flight
            // (or a foreign writer died between claim and outcome)
            TransferStatus::Pending => Err(Error::Ledger(
                ledger_core::Error::TransferInProgress(existing.idempotency_key.to_string()),
            )),
            TransferStatus::Settled | TransferStatus::Failed => {
                info!(
                    transfer_id = %existing.transfer_id,
                    status = ?existing.status,
                    "Replaying recorded transfer outcome"
                );
                Ok(TransferResult::from_transfer(&existing))
            }
        }
    }

    /// Record a terminal business failure and answer with it
    ///
    /// Commits the aggregate (no balances, no postings) and publishes the
    /// failure event immediately, not deferred.
    fn fail(&self, mut transfer: Transfer, reason: FailureReason) -> Result<TransferResult> {
        transfer.fail(reason)?;
        self.storage.commit_failed_transfer(&transfer)?;

        self.metrics.transfers_failed.inc();

        warn!(
            transfer_id = %transfer.transfer_id,
            reason = %reason,
            "Transfer failed"
        );

        self.publisher.publish(SettlementEvent::TransferFailed {
            transfer_id: transfer.transfer_id,
            status: transfer.status,
            reason: reason.to_string(),
            failed_at: transfer.completed_at.unwrap_or_else(Utc::now),
        });

        Ok(TransferResult::from_transfer(&transfer))
    }

    /// Create an account if it does not exist yet (provisioning helper)
    pub async fn provision_account(&self, account: Account) -> Result<()> {
        let _lock = self.locks.lock_account(&account.account_id).await?;
        if self.storage.get_account(&account.account_id).is_ok() {
            return Ok(());
        }
        self.storage.put_account(&account)?;
        Ok(())
    }

    /// Shared storage handle
    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Shared lock manager handle
    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }
}
