//! Concurrent transfer tests
//!
//! Two transfers race for the same source balance. The safe strategies must
//! let exactly one through; the unsafe one is shown losing an update.
//!
//! Run with: cargo test --test concurrent_transfer_test -- --nocapture

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::sync::Barrier;

use ledgerlock_core::adapters::memory::InMemoryAccountStore;
use ledgerlock_core::ports::AccountStore;
use ledgerlock_core::services::TransferEngine;
use ledgerlock_core::{Account, EngineConfig, RetryPolicy, Strategy, TransferError};

/// Number of concurrent transfers for stress tests
const TASK_COUNT: usize = 8;

/// Transfers per task
const ITERATIONS_PER_TASK: usize = 25;

fn dec(n: i64) -> Decimal {
    Decimal::new(n, 0)
}

/// A=100, B=0, C=0
fn seeded_store() -> Arc<InMemoryAccountStore> {
    Arc::new(
        InMemoryAccountStore::with_accounts([
            Account::new("A", dec(100)),
            Account::new("B", dec(0)),
            Account::new("C", dec(0)),
        ])
        .unwrap(),
    )
}

async fn balance(store: &InMemoryAccountStore, id: &str) -> Decimal {
    store.get(&id.into()).await.unwrap().unwrap().balance
}

/// Run A->B and A->C for 80 each at the same time
async fn race_two_transfers(
    engine: Arc<TransferEngine>,
    strategy: Strategy,
) -> Vec<Result<ledgerlock_core::TransferReceipt, TransferError>> {
    let barrier = Arc::new(Barrier::new(2));
    let mut handles = vec![];

    for to in ["B", "C"] {
        let engine = Arc::clone(&engine);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            engine.transfer("A", to, dec(80), strategy).await
        }));
    }

    let mut results = vec![];
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

async fn assert_single_winner(strategy: Strategy) {
    let store = seeded_store();
    let engine = Arc::new(TransferEngine::new(store.clone(), EngineConfig::default()));

    let results = race_two_transfers(engine, strategy).await;

    let successes = results.iter().filter(|r| r.is_ok()).count();
    let failures: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    println!("{}: {} succeeded, failures: {:?}", strategy, successes, failures);

    assert_eq!(successes, 1, "{}", strategy);
    assert_eq!(failures.len(), 1, "{}", strategy);
    assert!(
        matches!(failures[0], TransferError::InsufficientFunds { .. }),
        "{}: unexpected failure {:?}",
        strategy,
        failures[0]
    );

    assert_eq!(balance(&store, "A").await, dec(20));
    assert_eq!(balance(&store, "B").await + balance(&store, "C").await, dec(80));
    assert_eq!(store.total_balance().await.unwrap(), dec(100));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_optimistic_with_retry_lets_exactly_one_through() {
    assert_single_winner(Strategy::OptimisticWithRetry).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pessimistic_lets_exactly_one_through() {
    assert_single_winner(Strategy::Pessimistic).await;
}

/// Plain optimistic may fail with either a conflict or insufficient funds,
/// but never overdraws
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_optimistic_never_overdraws() {
    let store = seeded_store();
    let engine = Arc::new(TransferEngine::new(store.clone(), EngineConfig::default()));

    let results = race_two_transfers(engine, Strategy::Optimistic).await;

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(
            err,
            TransferError::InsufficientFunds { .. } | TransferError::OptimisticConflict { .. }
        ));
    }
    assert_eq!(balance(&store, "A").await, dec(20));
    assert_eq!(store.total_balance().await.unwrap(), dec(100));
}

/// Demonstration only: both unsafe transfers read A=100 before either
/// writes, so both succeed and money is created
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unsafe_race_demonstration() {
    let store = seeded_store();
    let engine = Arc::new(TransferEngine::new(
        store.clone(),
        EngineConfig {
            unsafe_write_delay: Duration::from_millis(50),
            ..EngineConfig::default()
        },
    ));

    let results = race_two_transfers(engine, Strategy::Unsafe).await;

    println!(
        "unsafe: {} succeeded, A={} B={} C={} total={}",
        results.iter().filter(|r| r.is_ok()).count(),
        balance(&store, "A").await,
        balance(&store, "B").await,
        balance(&store, "C").await,
        store.total_balance().await.unwrap(),
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_total_is_conserved_under_contention() {
    let ids = ["A", "B", "C", "D"];
    let store = Arc::new(
        InMemoryAccountStore::with_accounts(ids.iter().map(|id| Account::new(*id, dec(250)))).unwrap(),
    );
    let engine = Arc::new(TransferEngine::new(
        store.clone(),
        EngineConfig {
            retry: RetryPolicy::exponential(20, Duration::from_millis(1), Duration::from_millis(20)),
            ..EngineConfig::default()
        },
    ));
    let success_count = Arc::new(AtomicUsize::new(0));
    let error_count = Arc::new(AtomicUsize::new(0));

    let mut handles = vec![];
    for task in 0..TASK_COUNT {
        let engine = Arc::clone(&engine);
        let success_count = Arc::clone(&success_count);
        let error_count = Arc::clone(&error_count);
        handles.push(tokio::spawn(async move {
            let strategy = if task % 2 == 0 {
                Strategy::Pessimistic
            } else {
                Strategy::OptimisticWithRetry
            };
            for i in 0..ITERATIONS_PER_TASK {
                let from = ids[(task + i) % ids.len()];
                let to = ids[(task + i + 1 + task % 3) % ids.len()];
                match engine.transfer(from, to, dec(7), strategy).await {
                    Ok(_) => success_count.fetch_add(1, Ordering::SeqCst),
                    Err(_) => error_count.fetch_add(1, Ordering::SeqCst),
                };
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    println!(
        "{} transfers committed, {} failed",
        success_count.load(Ordering::SeqCst),
        error_count.load(Ordering::SeqCst)
    );
    assert!(success_count.load(Ordering::SeqCst) > 0);
    assert_eq!(store.total_balance().await.unwrap(), dec(1000));
    for account in store.list().await.unwrap() {
        assert!(account.balance >= Decimal::ZERO, "{} went negative", account.id);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_directions_do_not_deadlock() {
    let store = Arc::new(
        InMemoryAccountStore::with_accounts([Account::new("A", dec(500)), Account::new("B", dec(500))])
            .unwrap(),
    );
    let engine = Arc::new(TransferEngine::new(store.clone(), EngineConfig::default()));

    let mut handles = vec![];
    for task in 0..TASK_COUNT {
        let engine = Arc::clone(&engine);
        let (from, to) = if task % 2 == 0 { ("A", "B") } else { ("B", "A") };
        handles.push(tokio::spawn(async move {
            for _ in 0..ITERATIONS_PER_TASK {
                engine
                    .transfer(from, to, dec(1), Strategy::Pessimistic)
                    .await
                    .unwrap();
            }
        }));
    }

    let all = async {
        for handle in handles {
            handle.await.unwrap();
        }
    };
    tokio::time::timeout(Duration::from_secs(30), all)
        .await
        .expect("opposite-direction transfers deadlocked");

    assert!(!store.is_held(&"A".into()));
    assert!(!store.is_held(&"B".into()));
    assert_eq!(balance(&store, "A").await, dec(500));
    assert_eq!(balance(&store, "B").await, dec(500));
}

#[tokio::test]
async fn test_versions_count_committed_writes() {
    let store = seeded_store();
    let engine = TransferEngine::new(store.clone(), EngineConfig::default());

    engine.transfer("A", "B", dec(10), Strategy::Optimistic).await.unwrap();
    engine.transfer("A", "C", dec(10), Strategy::Pessimistic).await.unwrap();
    engine.transfer("B", "C", dec(5), Strategy::OptimisticWithRetry).await.unwrap();
    engine.transfer("C", "A", dec(1), Strategy::Unsafe).await.unwrap();

    let versions: Vec<(String, u64)> = store
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|a| (a.id.to_string(), a.version))
        .collect();
    assert_eq!(
        versions,
        vec![("A".to_string(), 3), ("B".to_string(), 2), ("C".to_string(), 3)]
    );
}

#[tokio::test]
async fn test_failed_transfer_changes_nothing() {
    let store = seeded_store();
    let engine = TransferEngine::new(store.clone(), EngineConfig::default());
    let before = store.list().await.unwrap();

    for strategy in Strategy::ALL {
        for _ in 0..2 {
            let err = engine.transfer("B", "A", dec(1), strategy).await.unwrap_err();
            assert!(matches!(err, TransferError::InsufficientFunds { .. }));
        }
    }

    assert_eq!(store.list().await.unwrap(), before);
}
