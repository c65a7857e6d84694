//! Transfer Orchestrator
//!
//! Direct (non event-sourced) transfer: debit and credit in one unit of
//! work, behind the transaction ledger's idempotency gate.
//!
//! ```text
//! check_and_reserve ──► begin ──► lock/read both rows ──► decrease/increase
//!        │                                                     │
//!   AlreadyDone ──► return                           commit ◄──┴──► rollback
//!                                                      │               │
//!                                              mark_completed     mark_failed
//! ```
//!
//! The ledger reservation and the balance mutation run in separate units of
//! work, so a crash in between leaves an inspectable PENDING record.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::error::TransferError;
use super::events::{TransferEvent, TransferEvents};
use super::notifier::Notifier;
use crate::balance::{BalanceStore, BalanceUnitOfWork};
use crate::core_types::{BalanceAccountId, TransactionId, is_valid_amount};
use crate::ledger::{
    NewTransaction, Reservation, TransactionLedger, TransactionRecord, TransactionStatus,
};

/// Row locking discipline, chosen per deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    /// Exclusive row locks held until commit; concurrent transfers serialize
    #[default]
    Pessimistic,
    /// Version check at write; the loser gets `ConcurrencyConflict`
    Optimistic,
}

/// How often to re-run a transfer that hit an optimistic-lock conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first; 1 disables retry
    pub max_attempts: u32,
    /// Base delay, multiplied by the attempt number
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff_ms: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub record: TransactionRecord,
    /// True when the transaction had already completed and nothing was done
    pub replayed: bool,
}

pub struct TransferOrchestrator {
    ledger: Arc<dyn TransactionLedger>,
    balances: Arc<dyn BalanceStore>,
    notifier: Arc<dyn Notifier>,
    events: TransferEvents,
    lock_mode: LockMode,
    retry: RetryPolicy,
}

impl TransferOrchestrator {
    pub fn new(
        ledger: Arc<dyn TransactionLedger>,
        balances: Arc<dyn BalanceStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            ledger,
            balances,
            notifier,
            events: TransferEvents::default(),
            lock_mode: LockMode::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_lock_mode(mut self, lock_mode: LockMode) -> Self {
        self.lock_mode = lock_mode;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_events(mut self, events: TransferEvents) -> Self {
        self.events = events;
        self
    }

    pub fn lock_mode(&self) -> LockMode {
        self.lock_mode
    }

    pub fn events(&self) -> &TransferEvents {
        &self.events
    }

    /// Move `amount` from `from` to `to` exactly once per `transaction_id`.
    ///
    /// Repeating a completed transaction returns its record without side
    /// effects. Every failure after the reservation leaves the transaction
    /// FAILED.
    pub async fn transfer(
        &self,
        transaction_id: &TransactionId,
        from: BalanceAccountId,
        to: BalanceAccountId,
        amount: Decimal,
    ) -> Result<TransferOutcome, TransferError> {
        let reservation = self
            .ledger
            .check_and_reserve(NewTransaction {
                transaction_id: transaction_id.clone(),
                from_account: from,
                to_account: to,
                amount,
            })
            .await?;

        let record = match reservation {
            Reservation::AlreadyDone(record) => {
                info!(
                    transaction_id = %transaction_id,
                    "Transaction already completed, skipping"
                );
                return Ok(TransferOutcome {
                    record,
                    replayed: true,
                });
            }
            Reservation::Proceed(record) => record,
        };

        self.events.publish(TransferEvent::TransactionCreated {
            transaction_id: transaction_id.clone(),
            from_account: from,
            to_account: to,
            amount,
        });

        match self.execute_with_retry(transaction_id, from, to, amount).await {
            Ok(()) => {
                if let Err(e) = self.ledger.mark_completed(transaction_id).await {
                    // Balances are committed; the PENDING record blocks any re-run
                    error!(
                        transaction_id = %transaction_id,
                        error = %e,
                        "Failed to mark transaction COMPLETED"
                    );
                    return Err(e.into());
                }

                self.events.publish(TransferEvent::FundsTransferred {
                    transaction_id: transaction_id.clone(),
                    from_account: from,
                    to_account: to,
                    amount,
                });
                self.events.publish(TransferEvent::TransactionCompleted {
                    transaction_id: transaction_id.clone(),
                });
                self.notifier.notify(transaction_id, amount);

                info!(
                    transaction_id = %transaction_id,
                    from = from,
                    to = to,
                    amount = %amount,
                    "Transfer completed"
                );
                Ok(TransferOutcome {
                    record: TransactionRecord {
                        status: TransactionStatus::Completed,
                        updated_at: Utc::now(),
                        ..record
                    },
                    replayed: false,
                })
            }
            Err(e) => {
                if let Err(mark_err) = self.ledger.mark_failed(transaction_id).await {
                    error!(
                        transaction_id = %transaction_id,
                        error = %mark_err,
                        "Failed to mark transaction FAILED"
                    );
                }
                self.events.publish(TransferEvent::TransactionFailed {
                    transaction_id: transaction_id.clone(),
                    reason: e.to_string(),
                });
                warn!(
                    transaction_id = %transaction_id,
                    code = e.code(),
                    error = %e,
                    "Transfer failed"
                );
                Err(e)
            }
        }
    }

    async fn execute_with_retry(
        &self,
        transaction_id: &TransactionId,
        from: BalanceAccountId,
        to: BalanceAccountId,
        amount: Decimal,
    ) -> Result<(), TransferError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.execute(from, to, amount).await {
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    debug!(
                        transaction_id = %transaction_id,
                        attempt = attempt,
                        error = %e,
                        "Retrying transfer after conflict"
                    );
                    let backoff = self.retry.backoff_ms.saturating_mul(attempt as u64);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// One attempt in its own unit of work
    async fn execute(
        &self,
        from: BalanceAccountId,
        to: BalanceAccountId,
        amount: Decimal,
    ) -> Result<(), TransferError> {
        if !is_valid_amount(amount) {
            return Err(TransferError::InvalidAmount);
        }
        if from == to {
            return Err(TransferError::SameAccount);
        }

        let mut uow = self.balances.begin().await?;
        let applied = match self.lock_mode {
            LockMode::Pessimistic => apply_pessimistic(&mut *uow, from, to, amount).await,
            LockMode::Optimistic => apply_optimistic(&mut *uow, from, to, amount).await,
        };

        match applied {
            Ok(()) => Ok(uow.commit().await?),
            Err(e) => {
                if let Err(rollback_err) = uow.rollback().await {
                    warn!(error = %rollback_err, "Balance rollback failed");
                }
                Err(e)
            }
        }
    }
}

async fn apply_pessimistic(
    uow: &mut dyn BalanceUnitOfWork,
    from: BalanceAccountId,
    to: BalanceAccountId,
    amount: Decimal,
) -> Result<(), TransferError> {
    // Lock in ascending id order so opposite transfers cannot deadlock
    let (mut source, mut target) = if from < to {
        let source = uow.read_for_update(from).await?;
        let target = uow.read_for_update(to).await?;
        (source, target)
    } else {
        let target = uow.read_for_update(to).await?;
        let source = uow.read_for_update(from).await?;
        (source, target)
    };

    source.decrease(amount)?;
    target.increase(amount)?;

    uow.write(from, source.amount()).await?;
    uow.write(to, target.amount()).await?;
    Ok(())
}

async fn apply_optimistic(
    uow: &mut dyn BalanceUnitOfWork,
    from: BalanceAccountId,
    to: BalanceAccountId,
    amount: Decimal,
) -> Result<(), TransferError> {
    let mut source = uow.read(from).await?;
    let mut target = uow.read(to).await?;
    let (source_version, target_version) = (source.version, target.version);

    source.decrease(amount)?;
    target.increase(amount)?;

    uow.write_optimistic(from, source.amount(), source_version)
        .await?;
    uow.write_optimistic(to, target.amount(), target_version)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::{BalanceError, BalanceRecord, InMemoryBalanceStore};
    use crate::ledger::InMemoryTransactionLedger;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Barrier;

    #[derive(Default)]
    struct CountingNotifier {
        calls: AtomicUsize,
    }

    impl Notifier for CountingNotifier {
        fn notify(&self, _transaction_id: &TransactionId, _amount: Decimal) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        orchestrator: TransferOrchestrator,
        ledger: Arc<InMemoryTransactionLedger>,
        balances: Arc<dyn BalanceStore>,
        notifier: Arc<CountingNotifier>,
    }

    async fn fixture_with(balances: Arc<dyn BalanceStore>, lock_mode: LockMode) -> Fixture {
        balances.create(1, Decimal::from(1000)).await.unwrap();
        balances.create(2, Decimal::ZERO).await.unwrap();

        let ledger = Arc::new(InMemoryTransactionLedger::new());
        let notifier = Arc::new(CountingNotifier::default());
        let orchestrator =
            TransferOrchestrator::new(ledger.clone(), balances.clone(), notifier.clone())
                .with_lock_mode(lock_mode);
        Fixture {
            orchestrator,
            ledger,
            balances,
            notifier,
        }
    }

    async fn fixture(lock_mode: LockMode) -> Fixture {
        fixture_with(Arc::new(InMemoryBalanceStore::new()), lock_mode).await
    }

    async fn amount_of(balances: &Arc<dyn BalanceStore>, id: BalanceAccountId) -> Decimal {
        balances.get(id).await.unwrap().unwrap().amount()
    }

    async fn status_of(ledger: &InMemoryTransactionLedger, tx: &str) -> TransactionStatus {
        ledger.get(&tx.into()).await.unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_scenario() {
        let f = fixture(LockMode::Pessimistic).await;

        let outcome = f
            .orchestrator
            .transfer(&"T1".into(), 1, 2, Decimal::from(500))
            .await
            .unwrap();
        assert!(!outcome.replayed);
        assert_eq!(outcome.record.status, TransactionStatus::Completed);
        assert_eq!(amount_of(&f.balances, 1).await, Decimal::from(500));
        assert_eq!(amount_of(&f.balances, 2).await, Decimal::from(500));
        assert_eq!(status_of(&f.ledger, "T1").await, TransactionStatus::Completed);

        // Replay: success, no change
        let replay = f
            .orchestrator
            .transfer(&"T1".into(), 1, 2, Decimal::from(500))
            .await
            .unwrap();
        assert!(replay.replayed);
        assert_eq!(amount_of(&f.balances, 1).await, Decimal::from(500));
        assert_eq!(amount_of(&f.balances, 2).await, Decimal::from(500));

        let err = f
            .orchestrator
            .transfer(&"T2".into(), 1, 2, Decimal::from(1500))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INSUFFICIENT_FUNDS");
        assert_eq!(amount_of(&f.balances, 1).await, Decimal::from(500));
        assert_eq!(status_of(&f.ledger, "T2").await, TransactionStatus::Failed);

        assert_eq!(f.notifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_validation_failures_mark_failed() {
        let f = fixture(LockMode::Pessimistic).await;

        let err = f
            .orchestrator
            .transfer(&"T1".into(), 1, 2, Decimal::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::InvalidAmount);
        assert_eq!(status_of(&f.ledger, "T1").await, TransactionStatus::Failed);

        let err = f
            .orchestrator
            .transfer(&"T2".into(), 1, 99, Decimal::ONE)
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::AccountNotFound(99));
        assert_eq!(status_of(&f.ledger, "T2").await, TransactionStatus::Failed);

        let err = f
            .orchestrator
            .transfer(&"T3".into(), 1, 1, Decimal::ONE)
            .await
            .unwrap_err();
        assert_eq!(err, TransferError::SameAccount);

        assert_eq!(amount_of(&f.balances, 1).await, Decimal::from(1000));
        assert_eq!(f.notifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_key_cannot_be_reused() {
        let f = fixture(LockMode::Pessimistic).await;
        f.orchestrator
            .transfer(&"T1".into(), 1, 2, Decimal::from(5000))
            .await
            .unwrap_err();

        let err = f
            .orchestrator
            .transfer(&"T1".into(), 1, 2, Decimal::from(10))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TransferError::ConflictingTransaction {
                transaction_id: "T1".into(),
                status: TransactionStatus::Failed,
            }
        );
        assert_eq!(amount_of(&f.balances, 1).await, Decimal::from(1000));
    }

    #[tokio::test]
    async fn test_in_flight_key_conflicts_without_touching_balances() {
        let f = fixture(LockMode::Pessimistic).await;
        f.ledger
            .check_and_reserve(NewTransaction {
                transaction_id: "T1".into(),
                from_account: 1,
                to_account: 2,
                amount: Decimal::from(100),
            })
            .await
            .unwrap();

        let err = f
            .orchestrator
            .transfer(&"T1".into(), 1, 2, Decimal::from(100))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CONFLICTING_TRANSACTION");
        assert_eq!(status_of(&f.ledger, "T1").await, TransactionStatus::Pending);
        assert_eq!(amount_of(&f.balances, 1).await, Decimal::from(1000));
    }

    #[tokio::test]
    async fn test_lifecycle_events() {
        let f = fixture(LockMode::Pessimistic).await;
        let mut rx = f.orchestrator.events().subscribe();

        f.orchestrator
            .transfer(&"T1".into(), 1, 2, Decimal::from(10))
            .await
            .unwrap();
        f.orchestrator
            .transfer(&"T2".into(), 1, 2, Decimal::from(5000))
            .await
            .unwrap_err();

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.name());
        }
        assert_eq!(
            names,
            vec![
                "TransactionCreated",
                "FundsTransferred",
                "TransactionCompleted",
                "TransactionCreated",
                "TransactionFailed",
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pessimistic_concurrent_transfers_serialize() {
        let f = Arc::new(fixture(LockMode::Pessimistic).await);

        let mut handles = Vec::new();
        for tx in ["T1", "T2"] {
            let f = f.clone();
            handles.push(tokio::spawn(async move {
                f.orchestrator
                    .transfer(&tx.into(), 1, 2, Decimal::from(700))
                    .await
            }));
        }

        let mut ok = 0;
        let mut insufficient = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(TransferError::InsufficientFunds { .. }) => insufficient += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!((ok, insufficient), (1, 1));
        assert_eq!(amount_of(&f.balances, 1).await, Decimal::from(300));
        assert_eq!(amount_of(&f.balances, 2).await, Decimal::from(700));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_opposite_transfers_do_not_deadlock() {
        let f = Arc::new(fixture(LockMode::Pessimistic).await);

        let a = {
            let f = f.clone();
            tokio::spawn(async move {
                f.orchestrator
                    .transfer(&"T1".into(), 1, 2, Decimal::from(100))
                    .await
            })
        };
        let b = {
            let f = f.clone();
            tokio::spawn(async move {
                f.orchestrator
                    .transfer(&"T2".into(), 2, 1, Decimal::from(100))
                    .await
            })
        };

        let results = tokio::time::timeout(Duration::from_secs(5), async {
            (a.await.unwrap(), b.await.unwrap())
        })
        .await
        .expect("transfers deadlocked");
        assert!(results.0.is_ok());

        let total = amount_of(&f.balances, 1).await + amount_of(&f.balances, 2).await;
        assert_eq!(total, Decimal::from(1000));
    }

    /// Makes the first `armed` units of work meet at a barrier after their
    /// first read, so concurrent optimistic transfers see the same version
    struct BarrierStore {
        inner: InMemoryBalanceStore,
        barrier: Arc<Barrier>,
        armed: AtomicUsize,
    }

    struct BarrierUnitOfWork {
        inner: Box<dyn BalanceUnitOfWork>,
        barrier: Option<Arc<Barrier>>,
    }

    #[async_trait]
    impl BalanceStore for BarrierStore {
        async fn begin(&self) -> Result<Box<dyn BalanceUnitOfWork>, BalanceError> {
            let armed = self
                .armed
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            Ok(Box::new(BarrierUnitOfWork {
                inner: self.inner.begin().await?,
                barrier: armed.then(|| self.barrier.clone()),
            }))
        }

        async fn get(&self, id: BalanceAccountId) -> Result<Option<BalanceRecord>, BalanceError> {
            self.inner.get(id).await
        }

        async fn create(
            &self,
            id: BalanceAccountId,
            amount: Decimal,
        ) -> Result<BalanceRecord, BalanceError> {
            self.inner.create(id, amount).await
        }
    }

    #[async_trait]
    impl BalanceUnitOfWork for BarrierUnitOfWork {
        async fn read(&mut self, id: BalanceAccountId) -> Result<BalanceRecord, BalanceError> {
            let record = self.inner.read(id).await?;
            if let Some(barrier) = self.barrier.take() {
                barrier.wait().await;
            }
            Ok(record)
        }

        async fn read_for_update(
            &mut self,
            id: BalanceAccountId,
        ) -> Result<BalanceRecord, BalanceError> {
            self.inner.read_for_update(id).await
        }

        async fn write_optimistic(
            &mut self,
            id: BalanceAccountId,
            amount: Decimal,
            expected_version: i64,
        ) -> Result<(), BalanceError> {
            self.inner.write_optimistic(id, amount, expected_version).await
        }

        async fn write(&mut self, id: BalanceAccountId, amount: Decimal) -> Result<(), BalanceError> {
            self.inner.write(id, amount).await
        }

        async fn commit(&mut self) -> Result<(), BalanceError> {
            self.inner.commit().await
        }

        async fn rollback(&mut self) -> Result<(), BalanceError> {
            self.inner.rollback().await
        }
    }

    fn barrier_store() -> Arc<dyn BalanceStore> {
        Arc::new(BarrierStore {
            inner: InMemoryBalanceStore::new(),
            barrier: Arc::new(Barrier::new(2)),
            armed: AtomicUsize::new(2),
        })
    }

    async fn run_two(f: &Arc<Fixture>, amount: i64) -> Vec<Result<TransferOutcome, TransferError>> {
        let mut handles = Vec::new();
        for tx in ["T1", "T2"] {
            let f = f.clone();
            handles.push(tokio::spawn(async move {
                f.orchestrator
                    .transfer(&tx.into(), 1, 2, Decimal::from(amount))
                    .await
            }));
        }
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_optimistic_conflict_surfaces() {
        let f = Arc::new(fixture_with(barrier_store(), LockMode::Optimistic).await);
        let results = run_two(&f, 700).await;

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(TransferError::ConcurrencyConflict(1))))
            .count();
        assert_eq!((ok, conflicts), (1, 1));
        assert_eq!(amount_of(&f.balances, 1).await, Decimal::from(300));

        let statuses = [
            status_of(&f.ledger, "T1").await,
            status_of(&f.ledger, "T2").await,
        ];
        assert!(statuses.contains(&TransactionStatus::Completed));
        assert!(statuses.contains(&TransactionStatus::Failed));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_optimistic_retry_policy() {
        let balances = barrier_store();
        balances.create(1, Decimal::from(1000)).await.unwrap();
        balances.create(2, Decimal::ZERO).await.unwrap();
        let ledger = Arc::new(InMemoryTransactionLedger::new());
        let notifier = Arc::new(CountingNotifier::default());
        let f = Arc::new(Fixture {
            orchestrator: TransferOrchestrator::new(
                ledger.clone(),
                balances.clone(),
                notifier.clone(),
            )
            .with_lock_mode(LockMode::Optimistic)
            .with_retry_policy(RetryPolicy {
                max_attempts: 3,
                backoff_ms: 1,
            }),
            ledger,
            balances,
            notifier,
        });

        let results = run_two(&f, 400).await;
        assert!(results.iter().all(|r| r.is_ok()));
        assert_eq!(amount_of(&f.balances, 1).await, Decimal::from(200));
        assert_eq!(amount_of(&f.balances, 2).await, Decimal::from(800));
    }
}
