//! Storage layer using RocksDB
//!
//! # Column Families
//!
//! - `accounts` - Account rows (key: account_id)
//! - `transfers` - Transfer aggregates (key: transfer_id)
//! - `transactions` - Append-only posting log (key: transaction_id)
//! - `schedules` - Auto-transfer schedules (key: schedule_id)
//! - `indices` - Secondary indices for idempotency, per-account listing
//!   and reversal lookups
//!
//! Every multi-row mutation goes through a single `WriteBatch`, so a
//! settlement attempt is durably all-or-nothing.

use crate::{
    account::Account,
    error::{Error, Result},
    schedule::AutoTransferSchedule,
    types::{AccountId, IdempotencyKey, ScheduleId, Transaction, TransactionId, Transfer, TransferId},
    Config,
};
use chrono::NaiveDate;
use rocksdb::{
    ColumnFamily, ColumnFamilyDescriptor, DBCompactionStyle, Direction as IterDirection,
    IteratorMode, Options, WriteBatch, DB,
};
use std::sync::Arc;
use uuid::Uuid;

/// Column family names
const CF_ACCOUNTS: &str = "accounts";
const CF_TRANSFERS: &str = "transfers";
const CF_TRANSACTIONS: &str = "transactions";
const CF_SCHEDULES: &str = "schedules";
const CF_INDICES: &str = "indices";

/// Index key prefixes
const IDX_IDEMPOTENCY: &[u8] = b"idem|";
const IDX_ACCOUNT_TXN: &[u8] = b"atxn|";
const IDX_RELATED: &[u8] = b"rel|";

/// Storage wrapper for RocksDB
pub struct Storage {
    db: Arc<DB>,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}

impl Storage {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        // Database options
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        // Universal compaction for write-heavy workload
        db_opts.set_compaction_style(DBCompactionStyle::Universal);

        // Column family descriptors
        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_ACCOUNTS, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_TRANSFERS, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_TRANSACTIONS, Self::cf_options_append_only()),
            ColumnFamilyDescriptor::new(CF_SCHEDULES, Self::cf_options_rows()),
            ColumnFamilyDescriptor::new(CF_INDICES, Self::cf_options_indices()),
        ];

        // Open database
        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!("Opened RocksDB at {:?}", path);

        Ok(Self { db: Arc::new(db) })
    }

    // Column family options

    fn cf_options_rows() -> Options {
        let mut opts = Options::default();
        // Frequently read rows, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_append_only() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts.set_bottommost_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_options_indices() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        // Indices benefit from bloom filters
        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false); // 10 bits per key
        opts.set_block_based_table_factory(&block_opts);
        opts
    }

    // Helper: get column family handle

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    // Account operations

    /// Put account (provisioning and post-settlement state)
    pub fn put_account(&self, account: &Account) -> Result<()> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        let value = bincode::serialize(account)?;
        self.db.put_cf(cf, account.account_id.as_str().as_bytes(), &value)?;
        Ok(())
    }

    /// Get account by ID
    pub fn get_account(&self, account_id: &AccountId) -> Result<Account> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;

        let value = self
            .db
            .get_cf(cf, account_id.as_str().as_bytes())?
            .ok_or_else(|| Error::AccountNotFound(account_id.to_string()))?;

        let account: Account = bincode::deserialize(&value)?;
        Ok(account)
    }

    // Transfer operations

    /// Get transfer aggregate by ID
    pub fn get_transfer(&self, transfer_id: TransferId) -> Result<Transfer> {
        let cf = self.cf_handle(CF_TRANSFERS)?;

        let value = self
            .db
            .get_cf(cf, transfer_id.as_uuid().as_bytes())?
            .ok_or_else(|| Error::TransferNotFound(transfer_id.to_string()))?;

        let transfer: Transfer = bincode::deserialize(&value)?;
        Ok(transfer)
    }

    /// Look up the transfer aggregate for an idempotency pair, if any
    pub fn find_transfer_by_idempotency(
        &self,
        source_account_id: &AccountId,
        idempotency_key: &IdempotencyKey,
    ) -> Result<Option<Transfer>> {
        let cf = self.cf_handle(CF_INDICES)?;
        let key = Self::index_key_idempotency(source_account_id, idempotency_key);

        match self.db.get_cf(cf, &key)? {
            Some(value) => {
                let id_bytes: [u8; 16] = value
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Storage("Corrupt idempotency index entry".to_string()))?;
                let transfer_id = TransferId::from_uuid(Uuid::from_bytes(id_bytes));
                Ok(Some(self.get_transfer(transfer_id)?))
            }
            None => Ok(None),
        }
    }

    // Transaction operations

    /// Get transaction by ID
    pub fn get_transaction(&self, transaction_id: TransactionId) -> Result<Transaction> {
        let cf = self.cf_handle(CF_TRANSACTIONS)?;

        let value = self
            .db
            .get_cf(cf, transaction_id.as_uuid().as_bytes())?
            .ok_or_else(|| Error::TransactionNotFound(transaction_id.to_string()))?;

        let transaction: Transaction = bincode::deserialize(&value)?;
        Ok(transaction)
    }

    /// List an account's transactions, most recent first
    ///
    /// Offset/limit pagination, zero-indexed pages. The per-account index
    /// stores an inverted posting timestamp so a forward scan yields
    /// `posted_at` descending.
    pub fn list_account_transactions(
        &self,
        account_id: &AccountId,
        page: usize,
        size: usize,
    ) -> Result<Vec<Transaction>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let prefix = Self::index_prefix_account_transactions(account_id);

        let iter = self.db.iterator_cf(
            cf_indices,
            IteratorMode::From(&prefix, IterDirection::Forward),
        );

        let mut transactions = Vec::with_capacity(size);
        let mut skipped = 0usize;

        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }

            if skipped < page * size {
                skipped += 1;
                continue;
            }

            // Transaction id occupies the trailing 16 bytes
            if let Some(tail) = key.len().checked_sub(16) {
                if let Ok(id_bytes) = <[u8; 16]>::try_from(&key[tail..]) {
                    let transaction_id = TransactionId::from_uuid(Uuid::from_bytes(id_bytes));
                    transactions.push(self.get_transaction(transaction_id)?);
                }
            }

            if transactions.len() >= size {
                break;
            }
        }

        Ok(transactions)
    }

    /// Transactions referencing `transaction_id` via `related_transaction_id`
    pub fn transactions_related_to(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<Transaction>> {
        let cf_indices = self.cf_handle(CF_INDICES)?;

        let mut prefix = IDX_RELATED.to_vec();
        prefix.extend_from_slice(transaction_id.as_uuid().as_bytes());

        let iter = self.db.iterator_cf(
            cf_indices,
            IteratorMode::From(&prefix, IterDirection::Forward),
        );

        let mut related = Vec::new();
        for item in iter {
            let (key, _) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            if let Some(tail) = key.len().checked_sub(16) {
                if let Ok(id_bytes) = <[u8; 16]>::try_from(&key[tail..]) {
                    related.push(self.get_transaction(TransactionId::from_uuid(
                        Uuid::from_bytes(id_bytes),
                    ))?);
                }
            }
        }

        Ok(related)
    }

    // Schedule operations

    /// Put schedule
    pub fn put_schedule(&self, schedule: &AutoTransferSchedule) -> Result<()> {
        let cf = self.cf_handle(CF_SCHEDULES)?;
        let value = bincode::serialize(schedule)?;
        self.db
            .put_cf(cf, schedule.schedule_id.as_uuid().as_bytes(), &value)?;
        Ok(())
    }

    /// Get schedule by ID
    pub fn get_schedule(&self, schedule_id: ScheduleId) -> Result<AutoTransferSchedule> {
        let cf = self.cf_handle(CF_SCHEDULES)?;

        let value = self
            .db
            .get_cf(cf, schedule_id.as_uuid().as_bytes())?
            .ok_or_else(|| Error::ScheduleNotFound(schedule_id.to_string()))?;

        let schedule: AutoTransferSchedule = bincode::deserialize(&value)?;
        Ok(schedule)
    }

    /// Scan all schedules (lock-free read)
    pub fn scan_schedules(&self) -> Result<Vec<AutoTransferSchedule>> {
        let cf = self.cf_handle(CF_SCHEDULES)?;

        let mut schedules = Vec::new();
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (_, value) = item?;
            schedules.push(bincode::deserialize(&value)?);
        }

        Ok(schedules)
    }

    /// Reset every enabled schedule's run date in one bulk write
    ///
    /// Clears `last_executed_at`. Returns the number of schedules touched.
    pub fn reset_enabled_schedules(&self, next_run_date: NaiveDate) -> Result<usize> {
        let cf = self.cf_handle(CF_SCHEDULES)?;

        let mut batch = WriteBatch::default();
        let mut touched = 0usize;

        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            let (key, value) = item?;
            let mut schedule: AutoTransferSchedule = bincode::deserialize(&value)?;
            if !schedule.enabled {
                continue;
            }
            schedule.next_run_date = next_run_date;
            schedule.last_executed_at = None;
            batch.put_cf(cf, key, bincode::serialize(&schedule)?);
            touched += 1;
        }

        self.db.write(batch)?;

        tracing::info!(count = touched, %next_run_date, "Schedules reset");

        Ok(touched)
    }

    // Atomic units of work

    /// Commit a settled transfer: aggregate, idempotency index, both
    /// account rows, both postings and their indices, in one batch
    pub fn commit_settlement(
        &self,
        transfer: &Transfer,
        source: &Account,
        target: &Account,
        debit: &Transaction,
        credit: &Transaction,
    ) -> Result<()> {
        let mut batch = WriteBatch::default();

        self.stage_transfer(&mut batch, transfer)?;
        self.stage_account(&mut batch, source)?;
        self.stage_account(&mut batch, target)?;
        self.stage_transaction(&mut batch, debit)?;
        self.stage_transaction(&mut batch, credit)?;

        // Atomic commit
        self.db.write(batch)?;

        tracing::debug!(
            transfer_id = %transfer.transfer_id,
            debit = %debit.transaction_id,
            credit = %credit.transaction_id,
            "Settlement committed"
        );

        Ok(())
    }

    /// Commit a failed transfer: aggregate and idempotency index only;
    /// no balances or postings are touched
    pub fn commit_failed_transfer(&self, transfer: &Transfer) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_transfer(&mut batch, transfer)?;
        self.db.write(batch)?;

        tracing::debug!(
            transfer_id = %transfer.transfer_id,
            reason = ?transfer.failure_reason,
            "Failed transfer recorded"
        );

        Ok(())
    }

    /// Commit a void: the updated original and its reversal, atomically
    pub fn commit_void(&self, original: &Transaction, reversal: &Transaction) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_transaction(&mut batch, original)?;
        self.stage_transaction(&mut batch, reversal)?;
        self.db.write(batch)?;

        tracing::debug!(
            original = %original.transaction_id,
            reversal = %reversal.transaction_id,
            "Void committed"
        );

        Ok(())
    }

    /// Commit a standalone posting
    pub fn commit_posting(&self, transaction: &Transaction) -> Result<()> {
        let mut batch = WriteBatch::default();
        self.stage_transaction(&mut batch, transaction)?;
        self.db.write(batch)?;
        Ok(())
    }

    // Batch staging helpers

    fn stage_transfer(&self, batch: &mut WriteBatch, transfer: &Transfer) -> Result<()> {
        let cf_transfers = self.cf_handle(CF_TRANSFERS)?;
        batch.put_cf(
            cf_transfers,
            transfer.transfer_id.as_uuid().as_bytes(),
            bincode::serialize(transfer)?,
        );

        // Index: idempotency pair -> transfer_id (the uniqueness constraint)
        let cf_indices = self.cf_handle(CF_INDICES)?;
        let idx = Self::index_key_idempotency(&transfer.source_account_id, &transfer.idempotency_key);
        batch.put_cf(cf_indices, &idx, transfer.transfer_id.as_uuid().as_bytes());

        Ok(())
    }

    fn stage_account(&self, batch: &mut WriteBatch, account: &Account) -> Result<()> {
        let cf = self.cf_handle(CF_ACCOUNTS)?;
        batch.put_cf(
            cf,
            account.account_id.as_str().as_bytes(),
            bincode::serialize(account)?,
        );
        Ok(())
    }

    fn stage_transaction(&self, batch: &mut WriteBatch, transaction: &Transaction) -> Result<()> {
        let cf_transactions = self.cf_handle(CF_TRANSACTIONS)?;
        batch.put_cf(
            cf_transactions,
            transaction.transaction_id.as_uuid().as_bytes(),
            bincode::serialize(transaction)?,
        );

        let cf_indices = self.cf_handle(CF_INDICES)?;

        // Index: account || inverted posted_at || transaction_id -> empty
        let idx_account =
            Self::index_key_account_transaction(&transaction.account_id, transaction);
        batch.put_cf(cf_indices, &idx_account, b"");

        // Index: related_transaction_id || transaction_id -> empty
        if let Some(related) = transaction.related_transaction_id {
            let idx_related =
                Self::index_key_related(related, transaction.transaction_id);
            batch.put_cf(cf_indices, &idx_related, b"");
        }

        Ok(())
    }

    // Index key helpers
    //
    // Account ids and idempotency keys are opaque caller strings, so
    // variable-length components are length-prefixed instead of joined
    // with a separator byte the ids themselves may contain: without the
    // prefix, ("A", "x|y") and ("A|x", "y") would encode to one key.

    fn push_component(key: &mut Vec<u8>, component: &str) {
        key.extend_from_slice(&(component.len() as u32).to_be_bytes());
        key.extend_from_slice(component.as_bytes());
    }

    fn index_key_idempotency(
        source_account_id: &AccountId,
        idempotency_key: &IdempotencyKey,
    ) -> Vec<u8> {
        let mut key = IDX_IDEMPOTENCY.to_vec();
        Self::push_component(&mut key, source_account_id.as_str());
        Self::push_component(&mut key, idempotency_key.as_str());
        key
    }

    fn index_prefix_account_transactions(account_id: &AccountId) -> Vec<u8> {
        let mut key = IDX_ACCOUNT_TXN.to_vec();
        Self::push_component(&mut key, account_id.as_str());
        key
    }

    fn index_key_account_transaction(
        account_id: &AccountId,
        transaction: &Transaction,
    ) -> Vec<u8> {
        let nanos = transaction
            .posted_at
            .timestamp_nanos_opt()
            .unwrap_or(0)
            .max(0) as u64;

        let mut key = Self::index_prefix_account_transactions(account_id);
        // Inverted timestamp: forward iteration yields newest first
        key.extend_from_slice(&(u64::MAX - nanos).to_be_bytes());
        key.extend_from_slice(transaction.transaction_id.as_uuid().as_bytes());
        key
    }

    fn index_key_related(related: TransactionId, transaction_id: TransactionId) -> Vec<u8> {
        let mut key = IDX_RELATED.to_vec();
        key.extend_from_slice(related.as_uuid().as_bytes());
        key.extend_from_slice(transaction_id.as_uuid().as_bytes());
        key
    }
}
