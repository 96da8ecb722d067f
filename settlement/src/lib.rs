//! Settlement Engine
//!
//! Implements the idempotent money-transfer settlement protocol and the
//! auto-transfer scheduler on top of `ledger-core`.
//!
//! # Architecture
//!
//! One settlement attempt is one unit of work:
//!
//! 1. **Lock**: acquire the transfer-key lock for
//!    `(source account, idempotency key)`
//! 2. **Replay or create**: an existing aggregate resolves the request
//!    without re-execution; otherwise a new Pending aggregate is built
//! 3. **Validate and mutate**: balance guard withdraw/credit under
//!    sorted account locks
//! 4. **Commit**: aggregate, accounts and both postings in one batch
//! 5. **Publish**: settled events after the commit, failure events
//!    immediately
//!
//! # Example
//!
//! ```no_run
//! use settlement::{Config, SettlementEngine, TransferCommand};
//! use ledger_core::{AccountId, IdempotencyKey, Money, TransferType};
//!
//! #[tokio::main]
//! async fn main() -> settlement::Result<()> {
//!     let engine = SettlementEngine::new(Config::default())?;
//!
//!     let result = engine
//!         .orchestrator()
//!         .transfer(TransferCommand {
//!             source_account_id: AccountId::new("ACC-001"),
//!             target_account_id: AccountId::new("ACC-002"),
//!             amount: Money::of(3_000)?,
//!             value_date: chrono::Utc::now().date_naive(),
//!             transfer_type: TransferType::Internal,
//!             memo: None,
//!             idempotency_key: IdempotencyKey::new("req-1"),
//!         })
//!         .await?;
//!     println!("transfer {} -> {:?}", result.transfer_id, result.status);
//!
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod metrics;
pub mod orchestrator;
pub mod scheduler;

// Re-exports
pub use config::Config;
pub use engine::SettlementEngine;
pub use error::{Error, Result};
pub use events::{BroadcastPublisher, EventPublisher, NoopPublisher, SettlementEvent};
pub use metrics::Metrics;
pub use orchestrator::{TransferCommand, TransferOrchestrator, TransferResult};
pub use scheduler::{AutoTransferScheduler, RunReport};
