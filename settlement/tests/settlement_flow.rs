//! End-to-end settlement flows through the engine

use chrono::NaiveDate;
use ledger_core::{
    Account, AccountId, AutoTransferSchedule, Direction, IdempotencyKey, Money, Recurrence,
    ScheduleId, TransactionStatus, TransactionType, TransferStatus, TransferType,
};
use settlement::{Config, SettlementEngine, SettlementEvent, TransferCommand};
use std::sync::Once;
use tempfile::TempDir;

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

fn test_engine() -> (SettlementEngine, TempDir) {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.ledger_data_dir = temp_dir.path().to_path_buf();
    config.scheduler.auto_run = false;
    (SettlementEngine::new(config).unwrap(), temp_dir)
}

async fn seed(engine: &SettlementEngine, id: &str, balance: i64) {
    engine
        .orchestrator()
        .provision_account(Account::open(
            AccountId::new(id),
            Money::of(balance).unwrap(),
        ))
        .await
        .unwrap();
}

fn command(source: &str, target: &str, amount: i64, key: &str) -> TransferCommand {
    TransferCommand {
        source_account_id: AccountId::new(source),
        target_account_id: AccountId::new(target),
        amount: Money::of(amount).unwrap(),
        value_date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
        transfer_type: TransferType::Internal,
        memo: Some("integration".to_string()),
        idempotency_key: IdempotencyKey::new(key),
    }
}

#[tokio::test]
async fn settled_transfer_posts_both_legs() {
    let (engine, _temp) = test_engine();
    seed(&engine, "ACC-001", 10_000).await;
    seed(&engine, "ACC-002", 0).await;

    let result = engine
        .orchestrator()
        .transfer(command("ACC-001", "ACC-002", 3_000, "req-1"))
        .await
        .unwrap();
    assert_eq!(result.status, TransferStatus::Settled);

    let debit = engine
        .orchestrator()
        .storage()
        .get_transaction(result.debit_transaction_id.unwrap())
        .unwrap();
    let credit = engine
        .orchestrator()
        .storage()
        .get_transaction(result.credit_transaction_id.unwrap())
        .unwrap();

    assert_eq!(debit.transaction_type, TransactionType::TransferOut);
    assert_eq!(debit.direction, Direction::Debit);
    assert_eq!(debit.account_id, AccountId::new("ACC-001"));
    assert_eq!(credit.transaction_type, TransactionType::TransferIn);
    assert_eq!(credit.direction, Direction::Credit);
    assert_eq!(credit.account_id, AccountId::new("ACC-002"));
    assert_eq!(debit.amount, credit.amount);
    assert_eq!(debit.value_date, credit.value_date);
}

#[tokio::test]
async fn replay_is_byte_for_byte_identical() {
    let (engine, _temp) = test_engine();
    seed(&engine, "ACC-001", 10_000).await;
    seed(&engine, "ACC-002", 0).await;

    let first = engine
        .orchestrator()
        .transfer(command("ACC-001", "ACC-002", 3_000, "req-1"))
        .await
        .unwrap();

    for _ in 0..3 {
        let again = engine
            .orchestrator()
            .transfer(command("ACC-001", "ACC-002", 3_000, "req-1"))
            .await
            .unwrap();
        assert_eq!(again, first);
    }

    let source = engine
        .orchestrator()
        .storage()
        .get_account(&AccountId::new("ACC-001"))
        .unwrap();
    assert_eq!(source.balance.minor_units(), 7_000);
}

#[tokio::test]
async fn concurrent_same_key_settles_exactly_once() {
    let (engine, _temp) = test_engine();
    seed(&engine, "ACC-001", 10_000).await;
    seed(&engine, "ACC-002", 0).await;

    let engine = std::sync::Arc::new(engine);
    let mut handles = Vec::new();
    for _ in 0..8 {
        let engine = std::sync::Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            engine
                .orchestrator()
                .transfer(command("ACC-001", "ACC-002", 2_500, "race"))
                .await
        }));
    }

    let mut settled = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(result) => settled.push(result),
            // Lock contention under a short timeout is a legal outcome
            Err(e) => assert!(e.is_transient()),
        }
    }

    assert!(!settled.is_empty());
    let first = &settled[0];
    for result in &settled {
        assert_eq!(result, first);
    }

    let source = engine
        .orchestrator()
        .storage()
        .get_account(&AccountId::new("ACC-001"))
        .unwrap();
    assert_eq!(source.balance.minor_units(), 7_500);
}

#[tokio::test]
async fn settled_event_arrives_after_commit() {
    let (engine, _temp) = test_engine();
    seed(&engine, "ACC-001", 10_000).await;
    seed(&engine, "ACC-002", 0).await;

    let mut events = engine.subscribe();
    let result = engine
        .orchestrator()
        .transfer(command("ACC-001", "ACC-002", 3_000, "evt-1"))
        .await
        .unwrap();

    match events.try_recv().unwrap() {
        SettlementEvent::TransferSettled {
            transfer_id,
            amount,
            ..
        } => {
            assert_eq!(transfer_id, result.transfer_id);
            assert_eq!(amount, Money::of(3_000).unwrap());
            // The aggregate the event references is already durable
            let stored = engine
                .orchestrator()
                .storage()
                .get_transfer(transfer_id)
                .unwrap();
            assert_eq!(stored.status, TransferStatus::Settled);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn failed_transfer_emits_failure_event() {
    let (engine, _temp) = test_engine();
    seed(&engine, "ACC-001", 500).await;
    seed(&engine, "ACC-002", 0).await;

    let mut events = engine.subscribe();
    let result = engine
        .orchestrator()
        .transfer(command("ACC-001", "ACC-002", 3_000, "evt-2"))
        .await
        .unwrap();
    assert_eq!(result.status, TransferStatus::Failed);

    match events.try_recv().unwrap() {
        SettlementEvent::TransferFailed {
            transfer_id,
            reason,
            ..
        } => {
            assert_eq!(transfer_id, result.transfer_id);
            assert!(reason.contains("insufficient"));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn void_reverses_a_settled_leg() {
    let (engine, _temp) = test_engine();
    seed(&engine, "ACC-001", 10_000).await;
    seed(&engine, "ACC-002", 0).await;

    let result = engine
        .orchestrator()
        .transfer(command("ACC-001", "ACC-002", 3_000, "void-1"))
        .await
        .unwrap();
    let debit_id = result.debit_transaction_id.unwrap();

    let reversal = engine
        .ledger()
        .void(debit_id, "operator correction")
        .await
        .unwrap();

    assert_eq!(reversal.transaction_type, TransactionType::Reversal);
    assert_eq!(reversal.direction, Direction::Credit);
    assert_eq!(reversal.amount, Money::of(3_000).unwrap());
    assert_eq!(reversal.related_transaction_id, Some(debit_id));

    let original = engine
        .orchestrator()
        .storage()
        .get_transaction(debit_id)
        .unwrap();
    assert_eq!(original.status, TransactionStatus::Void);

    // Voiding is bookkeeping only; balances are not replayed
    let source = engine
        .orchestrator()
        .storage()
        .get_account(&AccountId::new("ACC-001"))
        .unwrap();
    assert_eq!(source.balance.minor_units(), 7_000);
}

#[tokio::test]
async fn scheduler_end_to_end_through_engine() {
    let (engine, _temp) = test_engine();
    seed(&engine, "ACC-001", 10_000).await;
    seed(&engine, "ACC-002", 0).await;

    let schedule = AutoTransferSchedule {
        schedule_id: ScheduleId::generate(),
        source_account_id: AccountId::new("ACC-001"),
        target_account_id: AccountId::new("ACC-002"),
        amount: Money::of(2_000).unwrap(),
        transfer_type: TransferType::Internal,
        memo: Some("monthly rent".to_string()),
        enabled: true,
        recurrence: Recurrence::Monthly,
        next_run_date: NaiveDate::from_ymd_opt(2026, 6, 1).unwrap(),
        last_executed_at: None,
    };
    engine.scheduler().register(&schedule).unwrap();

    let report = engine
        .scheduler()
        .run_due(NaiveDate::from_ymd_opt(2026, 6, 1).unwrap())
        .await
        .unwrap();
    assert_eq!(report.settled, 1);

    // The run is recorded under its derived key, so re-registering the
    // old date and sweeping again replays instead of double-debiting
    let mut rewound = engine
        .orchestrator()
        .storage()
        .get_schedule(schedule.schedule_id)
        .unwrap();
    rewound.next_run_date = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
    engine.scheduler().register(&rewound).unwrap();

    let again = engine
        .scheduler()
        .run_due(NaiveDate::from_ymd_opt(2026, 6, 1).unwrap())
        .await
        .unwrap();
    assert_eq!(again.settled, 1);

    let source = engine
        .orchestrator()
        .storage()
        .get_account(&AccountId::new("ACC-001"))
        .unwrap();
    assert_eq!(source.balance.minor_units(), 8_000);
}

#[tokio::test]
async fn concurrent_mixed_transfers_conserve_total() {
    let (engine, _temp) = test_engine();
    seed(&engine, "ACC-001", 50_000).await;
    seed(&engine, "ACC-002", 50_000).await;
    seed(&engine, "ACC-003", 50_000).await;

    let engine = std::sync::Arc::new(engine);
    let pairs = [
        ("ACC-001", "ACC-002"),
        ("ACC-002", "ACC-003"),
        ("ACC-003", "ACC-001"),
        ("ACC-002", "ACC-001"),
        ("ACC-001", "ACC-003"),
    ];

    let mut handles = Vec::new();
    for (i, (source, target)) in pairs.iter().enumerate() {
        let engine = std::sync::Arc::clone(&engine);
        let key = format!("mix-{}", i);
        let source = source.to_string();
        let target = target.to_string();
        handles.push(tokio::spawn(async move {
            engine
                .orchestrator()
                .transfer(command(&source, &target, 1_000 * (i as i64 + 1), &key))
                .await
        }));
    }
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.status, TransferStatus::Settled);
    }

    let total: u64 = ["ACC-001", "ACC-002", "ACC-003"]
        .iter()
        .map(|id| {
            engine
                .orchestrator()
                .storage()
                .get_account(&AccountId::new(*id))
                .unwrap()
                .balance
                .minor_units()
        })
        .sum();
    assert_eq!(total, 150_000);
}
