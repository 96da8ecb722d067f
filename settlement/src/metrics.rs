//! Metrics collection for observability
//!
//! Prometheus metrics for monitoring settlement throughput and latency.
//!
//! # Metrics
//!
//! - `settlement_transfers_settled_total` - Settled transfer count
//! - `settlement_transfers_failed_total` - Failed transfer count
//! - `settlement_transfer_duration_seconds` - Settlement attempt latency
//! - `settlement_transactions_posted_total` - Ledger postings written
//! - `settlement_schedule_runs_total` - Scheduler occurrences executed
//!
//! The duration histogram wraps the orchestrator entry point, replacing
//! the global execution-time counters the transfer core used to carry.

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Debug, Clone)]
pub struct Metrics {
    /// Settled transfers
    pub transfers_settled: IntCounter,

    /// Failed transfers (terminal business outcomes)
    pub transfers_failed: IntCounter,

    /// Settlement attempt latency
    pub transfer_duration: Histogram,

    /// Ledger postings written
    pub transactions_posted: IntCounter,

    /// Scheduler occurrences executed
    pub schedule_runs: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create a collector with its own registry
    ///
    /// An owned registry keeps repeated construction (tests, multiple
    /// engines in one process) from colliding in the global registry.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transfers_settled = IntCounter::with_opts(Opts::new(
            "settlement_transfers_settled_total",
            "Total number of settled transfers",
        ))?;
        registry.register(Box::new(transfers_settled.clone()))?;

        let transfers_failed = IntCounter::with_opts(Opts::new(
            "settlement_transfers_failed_total",
            "Total number of failed transfers",
        ))?;
        registry.register(Box::new(transfers_failed.clone()))?;

        let transfer_duration = Histogram::with_opts(
            HistogramOpts::new(
                "settlement_transfer_duration_seconds",
                "Histogram of settlement attempt latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(transfer_duration.clone()))?;

        let transactions_posted = IntCounter::with_opts(Opts::new(
            "settlement_transactions_posted_total",
            "Total number of ledger postings written",
        ))?;
        registry.register(Box::new(transactions_posted.clone()))?;

        let schedule_runs = IntCounter::with_opts(Opts::new(
            "settlement_schedule_runs_total",
            "Total number of scheduler occurrences executed",
        ))?;
        registry.register(Box::new(schedule_runs.clone()))?;

        Ok(Self {
            transfers_settled,
            transfers_failed,
            transfer_duration,
            transactions_posted,
            schedule_runs,
            registry,
        })
    }
}
