//! Auto-transfer schedule record
//!
//! Per-account recurring-transfer configuration. The settlement crate's
//! scheduler mutates the run bookkeeping (`next_run_date`,
//! `last_executed_at`); the core never creates or deletes schedules.

use crate::money::Money;
use crate::types::{AccountId, ScheduleId, TransferType};
use chrono::{DateTime, Days, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Recurrence rule for advancing `next_run_date`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recurrence {
    /// Every day
    Daily,
    /// Every 7 days
    Weekly,
    /// Same day next month, clamped to month end
    Monthly,
}

impl Recurrence {
    /// Next run date strictly after `date`
    pub fn next_after(&self, date: NaiveDate) -> NaiveDate {
        match self {
            Recurrence::Daily => date.checked_add_days(Days::new(1)),
            Recurrence::Weekly => date.checked_add_days(Days::new(7)),
            Recurrence::Monthly => date.checked_add_months(Months::new(1)),
        }
        // chrono's date range outlives any realistic schedule
        .unwrap_or(date)
    }
}

/// Recurring-transfer configuration for one account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoTransferSchedule {
    /// Schedule identifier
    pub schedule_id: ScheduleId,

    /// Debited account
    pub source_account_id: AccountId,

    /// Credited account
    pub target_account_id: AccountId,

    /// Amount per run
    pub amount: Money,

    /// Transfer classification for runs
    pub transfer_type: TransferType,

    /// Optional memo carried onto each run
    pub memo: Option<String>,

    /// Disabled schedules are never selected
    pub enabled: bool,

    /// Recurrence rule
    pub recurrence: Recurrence,

    /// Next date this schedule is due
    pub next_run_date: NaiveDate,

    /// When the scheduler last ran this schedule
    pub last_executed_at: Option<DateTime<Utc>>,
}

impl AutoTransferSchedule {
    /// Due when enabled and the run date has arrived
    pub fn is_due(&self, reference_date: NaiveDate) -> bool {
        self.enabled && self.next_run_date <= reference_date
    }

    /// Record one executed occurrence: advance the run date, stamp the run
    pub fn mark_executed(&mut self, now: DateTime<Utc>) {
        self.next_run_date = self.recurrence.next_after(self.next_run_date);
        self.last_executed_at = Some(now);
    }
}
