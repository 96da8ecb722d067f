//! Auto-transfer scheduler
//!
//! Periodically sweeps the schedule store for due entries and executes
//! each one through the transfer orchestrator. Each run uses a
//! deterministic idempotency key derived from the schedule id and the
//! occurrence date, so a crash between execution and bookkeeping replays
//! the recorded outcome on the next sweep instead of moving money twice.

use crate::{
    metrics::Metrics,
    orchestrator::{TransferCommand, TransferOrchestrator},
    Result,
};
use chrono::{NaiveDate, Utc};
use ledger_core::{
    AutoTransferSchedule, IdempotencyKey, LockManager, ScheduleId, Storage, TransferStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Outcome tally for one sweep of due schedules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Runs that settled
    pub settled: usize,
    /// Runs that reached a terminal business failure
    pub failed: usize,
    /// Runs skipped on a transient error, left due for the next sweep
    pub skipped: usize,
    /// Runs that hit a non-transient error (needs operator attention)
    pub errored: usize,
}

/// Executes due auto-transfer schedules against the orchestrator
pub struct AutoTransferScheduler {
    storage: Arc<Storage>,
    locks: Arc<LockManager>,
    orchestrator: Arc<TransferOrchestrator>,
    metrics: Arc<Metrics>,
    poll_interval: Duration,
}

impl std::fmt::Debug for AutoTransferScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoTransferScheduler")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl AutoTransferScheduler {
    /// Create a scheduler over shared storage and orchestrator
    pub fn new(
        storage: Arc<Storage>,
        locks: Arc<LockManager>,
        orchestrator: Arc<TransferOrchestrator>,
        metrics: Arc<Metrics>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            storage,
            locks,
            orchestrator,
            metrics,
            poll_interval,
        }
    }

    /// Register a schedule
    pub fn register(&self, schedule: &AutoTransferSchedule) -> Result<()> {
        self.storage.put_schedule(schedule)?;
        info!(
            schedule_id = %schedule.schedule_id,
            next_run = %schedule.next_run_date,
            "Schedule registered"
        );
        Ok(())
    }

    /// Enable or disable a schedule
    pub async fn set_enabled(&self, schedule_id: ScheduleId, enabled: bool) -> Result<()> {
        let _lock = self.locks.lock_schedule(schedule_id).await?;
        let mut schedule = self.storage.get_schedule(schedule_id)?;
        schedule.enabled = enabled;
        self.storage.put_schedule(&schedule)?;
        Ok(())
    }

    /// Schedules due on `reference_date`, selected without any locks
    ///
    /// The set is advisory. Each candidate is re-read under its own lock
    /// before execution, so a concurrent sweep or edit between selection
    /// and execution cannot double-run an occurrence.
    pub fn find_due_schedules(&self, reference_date: NaiveDate) -> Result<Vec<AutoTransferSchedule>> {
        let due = self
            .storage
            .scan_schedules()?
            .into_iter()
            .filter(|s| s.is_due(reference_date))
            .collect();
        Ok(due)
    }

    /// Execute every schedule due on `reference_date`
    ///
    /// Schedules run independently: one schedule's error, transient or
    /// not, is tallied and the sweep continues with the rest.
    pub async fn run_due(&self, reference_date: NaiveDate) -> Result<RunReport> {
        let due = self.find_due_schedules(reference_date)?;
        if due.is_empty() {
            return Ok(RunReport::default());
        }

        info!(count = due.len(), date = %reference_date, "Running due schedules");
        self.metrics.schedule_runs.inc();

        let mut report = RunReport::default();
        for candidate in due {
            match self.run_one(candidate.schedule_id, reference_date).await {
                Ok(Some(TransferStatus::Settled)) => report.settled += 1,
                Ok(Some(TransferStatus::Failed)) => report.failed += 1,
                // Re-check under the lock found it no longer due
                Ok(Some(TransferStatus::Pending)) | Ok(None) => {}
                Err(e) if e.is_transient() => {
                    warn!(
                        schedule_id = %candidate.schedule_id,
                        error = %e,
                        "Scheduled run hit a transient error, will retry next sweep"
                    );
                    report.skipped += 1;
                }
                // One schedule's error never aborts the remaining runs
                Err(e) => {
                    error!(
                        schedule_id = %candidate.schedule_id,
                        error = %e,
                        "Scheduled run failed, needs operator attention"
                    );
                    report.errored += 1;
                }
            }
        }

        info!(
            settled = report.settled,
            failed = report.failed,
            skipped = report.skipped,
            errored = report.errored,
            "Schedule sweep complete"
        );
        Ok(report)
    }

    /// Execute one schedule occurrence under its schedule lock
    ///
    /// Returns `None` when the re-check finds the schedule no longer due.
    /// The run date is advanced on any business outcome, settled or
    /// failed, so a schedule that keeps failing does not retry the same
    /// occurrence forever. Transient errors leave the date untouched.
    async fn run_one(
        &self,
        schedule_id: ScheduleId,
        reference_date: NaiveDate,
    ) -> Result<Option<TransferStatus>> {
        let _lock = self.locks.lock_schedule(schedule_id).await?;

        // Authoritative re-read; the lock-free scan may be stale
        let mut schedule = self.storage.get_schedule(schedule_id)?;
        if !schedule.is_due(reference_date) {
            return Ok(None);
        }

        let occurrence = schedule.next_run_date;
        let command = TransferCommand {
            source_account_id: schedule.source_account_id.clone(),
            target_account_id: schedule.target_account_id.clone(),
            amount: schedule.amount,
            value_date: occurrence,
            transfer_type: schedule.transfer_type,
            memo: schedule.memo.clone(),
            idempotency_key: IdempotencyKey::for_scheduled_run(schedule_id, occurrence),
        };

        let result = self.orchestrator.transfer(command).await?;

        schedule.mark_executed(Utc::now());
        self.storage.put_schedule(&schedule)?;

        info!(
            schedule_id = %schedule_id,
            occurrence = %occurrence,
            status = ?result.status,
            next_run = %schedule.next_run_date,
            "Scheduled transfer executed"
        );
        Ok(Some(result.status))
    }

    /// Point every enabled schedule at `next_run_date` in one atomic batch
    ///
    /// Disabled schedules keep their dates so re-enabling one does not
    /// resurrect a stale occurrence. Returns the number touched.
    pub fn reset_all_next_run_date(&self, next_run_date: NaiveDate) -> Result<usize> {
        let touched = self.storage.reset_enabled_schedules(next_run_date)?;
        info!(count = touched, next_run = %next_run_date, "Reset schedule run dates");
        Ok(touched)
    }

    /// Sweep loop: run due schedules every poll interval until shutdown
    pub async fn start(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval = ?self.poll_interval, "Scheduler loop started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let today = Utc::now().date_naive();
                    if let Err(e) = self.run_due(today).await {
                        error!(error = %e, "Schedule sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Scheduler loop stopping");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopPublisher;
    use ledger_core::{
        Account, AccountId, Config as LedgerConfig, FailureReason, Money, Recurrence, Transfer,
        TransferType,
    };
    use tempfile::TempDir;

    fn test_scheduler() -> (AutoTransferScheduler, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = LedgerConfig::default();
        config.data_dir = temp_dir.path().to_path_buf();

        let storage = Arc::new(Storage::open(&config).unwrap());
        let locks = Arc::new(LockManager::new(Duration::from_millis(500)));
        let metrics = Arc::new(Metrics::new().unwrap());
        let orchestrator = Arc::new(TransferOrchestrator::new(
            Arc::clone(&storage),
            Arc::clone(&locks),
            Arc::new(NoopPublisher),
            Arc::clone(&metrics),
        ));
        let scheduler = AutoTransferScheduler::new(
            storage,
            locks,
            orchestrator,
            metrics,
            Duration::from_secs(60),
        );
        (scheduler, temp_dir)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn schedule(source: &str, target: &str, amount: i64, next_run: NaiveDate) -> AutoTransferSchedule {
        AutoTransferSchedule {
            schedule_id: ScheduleId::generate(),
            source_account_id: AccountId::new(source),
            target_account_id: AccountId::new(target),
            amount: Money::of(amount).unwrap(),
            transfer_type: TransferType::Internal,
            memo: Some("rent".to_string()),
            enabled: true,
            recurrence: Recurrence::Monthly,
            next_run_date: next_run,
            last_executed_at: None,
        }
    }

    async fn seed_account(scheduler: &AutoTransferScheduler, id: &str, balance: i64) {
        scheduler
            .storage
            .put_account(&Account::open(
                AccountId::new(id),
                Money::of(balance).unwrap(),
            ))
            .unwrap();
    }

    #[tokio::test]
    async fn test_due_selection() {
        let (scheduler, _temp) = test_scheduler();
        scheduler.register(&schedule("A", "B", 100, date(2026, 3, 1))).unwrap();
        scheduler.register(&schedule("A", "B", 100, date(2026, 3, 15))).unwrap();
        let mut disabled = schedule("A", "B", 100, date(2026, 3, 1));
        disabled.enabled = false;
        scheduler.register(&disabled).unwrap();

        // On-date and overdue are due; future and disabled are not
        assert_eq!(scheduler.find_due_schedules(date(2026, 3, 10)).unwrap().len(), 1);
        assert_eq!(scheduler.find_due_schedules(date(2026, 3, 15)).unwrap().len(), 2);
        assert!(scheduler.find_due_schedules(date(2026, 2, 28)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_due_settles_and_advances() {
        let (scheduler, _temp) = test_scheduler();
        seed_account(&scheduler, "A", 10_000).await;
        seed_account(&scheduler, "B", 0).await;

        let s = schedule("A", "B", 1_500, date(2026, 3, 1));
        let id = s.schedule_id;
        scheduler.register(&s).unwrap();

        let report = scheduler.run_due(date(2026, 3, 1)).await.unwrap();
        assert_eq!(
            report,
            RunReport {
                settled: 1,
                ..RunReport::default()
            }
        );

        let after = scheduler.storage.get_schedule(id).unwrap();
        assert_eq!(after.next_run_date, date(2026, 4, 1));
        assert!(after.last_executed_at.is_some());

        let a = scheduler.storage.get_account(&AccountId::new("A")).unwrap();
        assert_eq!(a.balance.minor_units(), 8_500);
    }

    #[tokio::test]
    async fn test_rerun_same_date_is_noop() {
        let (scheduler, _temp) = test_scheduler();
        seed_account(&scheduler, "A", 10_000).await;
        seed_account(&scheduler, "B", 0).await;
        scheduler.register(&schedule("A", "B", 1_500, date(2026, 3, 1))).unwrap();

        scheduler.run_due(date(2026, 3, 1)).await.unwrap();
        // Advanced to April, so a second March sweep selects nothing
        let report = scheduler.run_due(date(2026, 3, 1)).await.unwrap();
        assert_eq!(report, RunReport::default());

        let a = scheduler.storage.get_account(&AccountId::new("A")).unwrap();
        assert_eq!(a.balance.minor_units(), 8_500);
    }

    #[tokio::test]
    async fn test_business_failure_still_advances() {
        let (scheduler, _temp) = test_scheduler();
        seed_account(&scheduler, "A", 100).await;
        seed_account(&scheduler, "B", 0).await;

        let s = schedule("A", "B", 1_500, date(2026, 3, 1));
        let id = s.schedule_id;
        scheduler.register(&s).unwrap();

        let report = scheduler.run_due(date(2026, 3, 1)).await.unwrap();
        assert_eq!(report.failed, 1);

        // The occurrence is consumed, not retried forever
        let after = scheduler.storage.get_schedule(id).unwrap();
        assert_eq!(after.next_run_date, date(2026, 4, 1));
        let a = scheduler.storage.get_account(&AccountId::new("A")).unwrap();
        assert_eq!(a.balance.minor_units(), 100);
    }

    #[tokio::test]
    async fn test_overdue_runs_once_with_original_occurrence_date() {
        let (scheduler, _temp) = test_scheduler();
        seed_account(&scheduler, "A", 10_000).await;
        seed_account(&scheduler, "B", 0).await;

        let s = schedule("A", "B", 1_000, date(2026, 3, 1));
        scheduler.register(&s).unwrap();

        // Swept ten days late: one run, posted with the scheduled date
        let report = scheduler.run_due(date(2026, 3, 11)).await.unwrap();
        assert_eq!(report.settled, 1);

        let postings = scheduler
            .storage
            .list_account_transactions(&AccountId::new("A"), 0, 10)
            .unwrap();
        assert_eq!(postings.len(), 1);
        assert_eq!(postings[0].value_date, date(2026, 3, 1));
    }

    #[tokio::test]
    async fn test_one_schedules_error_does_not_abort_the_sweep() {
        let (scheduler, _temp) = test_scheduler();
        seed_account(&scheduler, "A", 10_000).await;
        seed_account(&scheduler, "B", 0).await;

        // First-due schedule whose derived key already maps to an
        // aggregate with a different amount, as after an operator edit
        // between a committed run and its bookkeeping. Replaying it is
        // an idempotency conflict, which is not transient.
        let poisoned = schedule("A", "B", 1_500, date(2026, 3, 1));
        scheduler.register(&poisoned).unwrap();

        let mut recorded = Transfer::pending(
            IdempotencyKey::for_scheduled_run(poisoned.schedule_id, poisoned.next_run_date),
            poisoned.source_account_id.clone(),
            poisoned.target_account_id.clone(),
            Money::of(999).unwrap(),
            poisoned.next_run_date,
            TransferType::Internal,
        );
        recorded.fail(FailureReason::InsufficientBalance).unwrap();
        scheduler.storage.commit_failed_transfer(&recorded).unwrap();

        let healthy = schedule("A", "B", 1_000, date(2026, 3, 1));
        scheduler.register(&healthy).unwrap();

        let report = scheduler.run_due(date(2026, 3, 1)).await.unwrap();
        assert_eq!(
            report,
            RunReport {
                settled: 1,
                errored: 1,
                ..RunReport::default()
            }
        );

        // The healthy schedule ran and advanced; the poisoned one is
        // left untouched for the operator
        let after_healthy = scheduler.storage.get_schedule(healthy.schedule_id).unwrap();
        assert_eq!(after_healthy.next_run_date, date(2026, 4, 1));
        let after_poisoned = scheduler.storage.get_schedule(poisoned.schedule_id).unwrap();
        assert_eq!(after_poisoned.next_run_date, date(2026, 3, 1));

        let a = scheduler.storage.get_account(&AccountId::new("A")).unwrap();
        assert_eq!(a.balance.minor_units(), 9_000);
    }

    #[tokio::test]
    async fn test_reset_all_next_run_date() {
        let (scheduler, _temp) = test_scheduler();
        let s1 = schedule("A", "B", 100, date(2026, 3, 1));
        let s2 = schedule("A", "B", 100, date(2026, 5, 20));
        let mut s3 = schedule("A", "B", 100, date(2026, 3, 1));
        s3.enabled = false;
        scheduler.register(&s1).unwrap();
        scheduler.register(&s2).unwrap();
        scheduler.register(&s3).unwrap();

        let touched = scheduler.reset_all_next_run_date(date(2026, 4, 1)).unwrap();
        assert_eq!(touched, 2);

        assert_eq!(
            scheduler.storage.get_schedule(s1.schedule_id).unwrap().next_run_date,
            date(2026, 4, 1)
        );
        assert_eq!(
            scheduler.storage.get_schedule(s2.schedule_id).unwrap().next_run_date,
            date(2026, 4, 1)
        );
        // Disabled schedules keep their date
        assert_eq!(
            scheduler.storage.get_schedule(s3.schedule_id).unwrap().next_run_date,
            date(2026, 3, 1)
        );
    }

    #[tokio::test]
    async fn test_set_enabled_toggles_selection() {
        let (scheduler, _temp) = test_scheduler();
        let s = schedule("A", "B", 100, date(2026, 3, 1));
        scheduler.register(&s).unwrap();

        scheduler.set_enabled(s.schedule_id, false).await.unwrap();
        assert!(scheduler.find_due_schedules(date(2026, 3, 1)).unwrap().is_empty());

        scheduler.set_enabled(s.schedule_id, true).await.unwrap();
        assert_eq!(scheduler.find_due_schedules(date(2026, 3, 1)).unwrap().len(), 1);
    }
}
