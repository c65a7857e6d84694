//! Direct transfer path under concurrency: money is conserved, balances
//! never go negative and a transaction id moves money at most once.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rust_decimal::Decimal;

use fund_transfer::balance::{BalanceStore, InMemoryBalanceStore};
use fund_transfer::core_types::{BalanceAccountId, TransactionId};
use fund_transfer::ledger::{InMemoryTransactionLedger, TransactionLedger, TransactionStatus};
use fund_transfer::transfer::{
    LockMode, LoggingNotifier, RetryPolicy, TransferError, TransferOrchestrator,
};

const ACCOUNTS: [BalanceAccountId; 4] = [1, 2, 3, 4];

struct Harness {
    orchestrator: Arc<TransferOrchestrator>,
    balances: Arc<InMemoryBalanceStore>,
    ledger: Arc<InMemoryTransactionLedger>,
}

async fn harness(mode: LockMode, retry: RetryPolicy, initial: i64) -> Harness {
    let balances = Arc::new(InMemoryBalanceStore::new());
    let ledger = Arc::new(InMemoryTransactionLedger::new());
    for id in ACCOUNTS {
        balances.create(id, Decimal::from(initial)).await.unwrap();
    }
    let orchestrator = TransferOrchestrator::new(
        ledger.clone(),
        balances.clone(),
        Arc::new(LoggingNotifier::new(Duration::ZERO)),
    )
    .with_lock_mode(mode)
    .with_retry_policy(retry);

    Harness {
        orchestrator: Arc::new(orchestrator),
        balances,
        ledger,
    }
}

async fn amount_of(balances: &InMemoryBalanceStore, id: BalanceAccountId) -> Decimal {
    balances.get(id).await.unwrap().unwrap().amount()
}

/// 60 overlapping transfers around a ring of accounts
async fn run_ring(h: &Harness) -> Vec<(TransactionId, BalanceAccountId, BalanceAccountId, Decimal, bool)> {
    let mut tasks = Vec::new();
    for i in 0..60usize {
        let from = ACCOUNTS[i % 4];
        let to = ACCOUNTS[(i * 3 + 1) % 4];
        let amount = Decimal::from(((i % 7) + 1) as i64 * 60);
        let tx = TransactionId::new(format!("ring-{}", i));
        let orchestrator = h.orchestrator.clone();

        tasks.push(tokio::spawn(async move {
            let ok = orchestrator.transfer(&tx, from, to, amount).await.is_ok();
            (tx, from, to, amount, ok)
        }));
    }

    let mut results = Vec::new();
    for task in tasks {
        results.push(task.await.unwrap());
    }
    results
}

async fn assert_ring_invariants(h: &Harness, initial: i64) {
    let results = run_ring(h).await;

    // Expected balances from the successful transfers alone
    let mut expected = [Decimal::from(initial); 4];
    for (tx, from, to, amount, ok) in &results {
        let record = h.ledger.get(tx).await.unwrap().unwrap();
        if *ok {
            assert_eq!(record.status, TransactionStatus::Completed);
            expected[(*from - 1) as usize] -= *amount;
            expected[(*to - 1) as usize] += *amount;
        } else {
            assert_eq!(record.status, TransactionStatus::Failed);
        }
    }

    let mut total = Decimal::ZERO;
    for (i, id) in ACCOUNTS.iter().enumerate() {
        let actual = amount_of(&h.balances, *id).await;
        assert!(actual >= Decimal::ZERO, "account {} went negative", id);
        assert_eq!(actual, expected[i], "account {}", id);
        total += actual;
    }
    assert_eq!(total, Decimal::from(initial * 4));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pessimistic_ring_conserves_money() {
    let h = harness(LockMode::Pessimistic, RetryPolicy::default(), 500).await;
    assert_ring_invariants(&h, 500).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_optimistic_ring_conserves_money() {
    let h = harness(LockMode::Optimistic, RetryPolicy::default(), 500).await;
    assert_ring_invariants(&h, 500).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_optimistic_ring_with_retries_conserves_money() {
    let retry = RetryPolicy {
        max_attempts: 5,
        backoff_ms: 1,
    };
    let h = harness(LockMode::Optimistic, retry, 500).await;
    assert_ring_invariants(&h, 500).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resubmission_moves_money_once() {
    let h = harness(LockMode::Pessimistic, RetryPolicy::default(), 1000).await;
    let tx = TransactionId::new("T-dup");

    let results = join_all((0..8).map(|_| {
        let orchestrator = h.orchestrator.clone();
        let tx = tx.clone();
        async move { orchestrator.transfer(&tx, 1, 2, Decimal::from(100)).await }
    }))
    .await;

    let mut applied = 0;
    for result in results {
        match result {
            Ok(outcome) if !outcome.replayed => applied += 1,
            Ok(_) => {}
            Err(TransferError::ConflictingTransaction { status, .. }) => {
                assert_eq!(status, TransactionStatus::Pending);
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(applied, 1);

    // A later resubmission is a pure replay
    let replay = h
        .orchestrator
        .transfer(&tx, 1, 2, Decimal::from(100))
        .await
        .unwrap();
    assert!(replay.replayed);

    assert_eq!(amount_of(&h.balances, 1).await, Decimal::from(900));
    assert_eq!(amount_of(&h.balances, 2).await, Decimal::from(1100));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overdraft_race_has_single_winner() {
    for mode in [LockMode::Pessimistic, LockMode::Optimistic] {
        let retry = RetryPolicy {
            max_attempts: 3,
            backoff_ms: 1,
        };
        let h = harness(mode, retry, 1000).await;

        let results = join_all(["race-1", "race-2"].into_iter().map(|id| {
            let orchestrator = h.orchestrator.clone();
            async move {
                orchestrator
                    .transfer(&TransactionId::new(id), 1, 2, Decimal::from(700))
                    .await
            }
        }))
        .await;

        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1, "{:?}", mode);
        for result in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(
                matches!(
                    result,
                    TransferError::InsufficientFunds { .. } | TransferError::ConcurrencyConflict(_)
                ),
                "{:?}: {}",
                mode,
                result
            );
        }

        assert_eq!(amount_of(&h.balances, 1).await, Decimal::from(300));
        assert_eq!(amount_of(&h.balances, 2).await, Decimal::from(1700));
    }
}

#[tokio::test]
async fn test_reference_scenario_in_both_modes() {
    for mode in [LockMode::Pessimistic, LockMode::Optimistic] {
        let h = harness(mode, RetryPolicy::default(), 0).await;
        h.balances.create(10, Decimal::from(1000)).await.unwrap();

        let t1 = TransactionId::new("T1");
        let first = h
            .orchestrator
            .transfer(&t1, 10, 1, Decimal::from(500))
            .await
            .unwrap();
        assert!(!first.replayed);
        assert_eq!(first.record.status, TransactionStatus::Completed);

        let again = h
            .orchestrator
            .transfer(&t1, 10, 1, Decimal::from(500))
            .await
            .unwrap();
        assert!(again.replayed);

        let t2 = TransactionId::new("T2");
        let overdraft = h
            .orchestrator
            .transfer(&t2, 10, 1, Decimal::from(1500))
            .await;
        assert!(matches!(
            overdraft,
            Err(TransferError::InsufficientFunds { .. })
        ));

        assert_eq!(amount_of(&h.balances, 10).await, Decimal::from(500));
        assert_eq!(amount_of(&h.balances, 1).await, Decimal::from(500));
        assert_eq!(
            h.ledger.get(&t2).await.unwrap().unwrap().status,
            TransactionStatus::Failed
        );
        assert_eq!(h.ledger.len(), 2);
    }
}
