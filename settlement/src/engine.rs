//! Settlement engine wiring
//!
//! Owns the storage, lock manager, ledger, orchestrator, scheduler,
//! publisher and metrics, and hands out shared handles to each.

use crate::{
    config::Config,
    events::BroadcastPublisher,
    metrics::Metrics,
    orchestrator::TransferOrchestrator,
    scheduler::AutoTransferScheduler,
    Result,
};
use ledger_core::{Config as LedgerConfig, LockManager, Storage, TransactionLedger};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Top-level handle over the settlement stack
pub struct SettlementEngine {
    config: Config,
    ledger: Arc<TransactionLedger>,
    orchestrator: Arc<TransferOrchestrator>,
    scheduler: Arc<AutoTransferScheduler>,
    publisher: Arc<BroadcastPublisher>,
    metrics: Arc<Metrics>,
    shutdown_tx: watch::Sender<bool>,
}

impl std::fmt::Debug for SettlementEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementEngine")
            .field("service_name", &self.config.service_name)
            .finish_non_exhaustive()
    }
}

impl SettlementEngine {
    /// Open storage and wire up the full stack
    pub fn new(config: Config) -> Result<Self> {
        let mut ledger_config = LedgerConfig::default();
        ledger_config.data_dir = config.ledger_data_dir.clone();

        let storage = Arc::new(Storage::open(&ledger_config)?);
        let locks = Arc::new(LockManager::new(ledger_config.lock.wait_timeout()));
        let publisher = Arc::new(BroadcastPublisher::new(config.event_channel_capacity));
        let metrics = Arc::new(Metrics::new()?);

        let ledger = Arc::new(TransactionLedger::new(
            Arc::clone(&storage),
            Arc::clone(&locks),
        ));
        let orchestrator = Arc::new(TransferOrchestrator::new(
            Arc::clone(&storage),
            Arc::clone(&locks),
            publisher.clone() as Arc<dyn crate::events::EventPublisher>,
            Arc::clone(&metrics),
        ));
        let scheduler = Arc::new(AutoTransferScheduler::new(
            storage,
            locks,
            Arc::clone(&orchestrator),
            Arc::clone(&metrics),
            Duration::from_secs(config.scheduler.poll_interval_secs),
        ));

        let (shutdown_tx, _) = watch::channel(false);

        info!(
            service = %config.service_name,
            version = %config.service_version,
            data_dir = %config.ledger_data_dir.display(),
            "Settlement engine initialized"
        );

        Ok(Self {
            config,
            ledger,
            orchestrator,
            scheduler,
            publisher,
            metrics,
            shutdown_tx,
        })
    }

    /// Spawn the scheduler sweep loop on the current runtime
    ///
    /// Honors `scheduler.auto_run`; a disabled loop still allows manual
    /// [`AutoTransferScheduler::run_due`] sweeps.
    pub fn start_scheduler(&self) {
        if !self.config.scheduler.auto_run {
            info!("Scheduler auto-run disabled");
            return;
        }
        let scheduler = Arc::clone(&self.scheduler);
        let shutdown = self.shutdown_tx.subscribe();
        tokio::spawn(scheduler.start(shutdown));
    }

    /// Signal the scheduler loop to stop
    pub fn shutdown(&self) {
        // Receiver side may already be gone; nothing to do then
        let _ = self.shutdown_tx.send(true);
        info!("Settlement engine shutdown signalled");
    }

    /// Transfer orchestrator handle
    pub fn orchestrator(&self) -> &Arc<TransferOrchestrator> {
        &self.orchestrator
    }

    /// Transaction ledger handle
    pub fn ledger(&self) -> &Arc<TransactionLedger> {
        &self.ledger
    }

    /// Auto-transfer scheduler handle
    pub fn scheduler(&self) -> &Arc<AutoTransferScheduler> {
        &self.scheduler
    }

    /// Subscribe to settlement events
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<crate::events::SettlementEvent> {
        self.publisher.subscribe()
    }

    /// Metrics handle
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Effective configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}
