//! In-memory balance store
//!
//! Committed rows live behind one mutex so a commit applies every buffered
//! write at once. Row locks for `read_for_update` are per-row async mutexes
//! whose owned guards are held by the unit of work.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tokio::sync::OwnedMutexGuard;

use super::{BalanceError, BalanceRecord, BalanceStore, BalanceUnitOfWork};
use crate::core_types::{BalanceAccountId, is_valid_initial_balance};

type Rows = Arc<Mutex<RowMap>>;
type RowLocks = Arc<DashMap<BalanceAccountId, Arc<tokio::sync::Mutex<()>>>>;

type RowMap = HashMap<BalanceAccountId, BalanceRecord>;

fn lock_rows(rows: &Mutex<RowMap>) -> Result<MutexGuard<'_, RowMap>, BalanceError> {
    rows.lock()
        .map_err(|_| BalanceError::Storage("balance rows lock poisoned".to_string()))
}

#[derive(Default)]
pub struct InMemoryBalanceStore {
    rows: Rows,
    row_locks: RowLocks,
}

impl InMemoryBalanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BalanceStore for InMemoryBalanceStore {
    async fn begin(&self) -> Result<Box<dyn BalanceUnitOfWork>, BalanceError> {
        Ok(Box::new(InMemoryUnitOfWork {
            rows: self.rows.clone(),
            row_locks: self.row_locks.clone(),
            held: HashMap::new(),
            pending: Vec::new(),
        }))
    }

    async fn get(
        &self,
        account_id: BalanceAccountId,
    ) -> Result<Option<BalanceRecord>, BalanceError> {
        Ok(lock_rows(&self.rows)?.get(&account_id).cloned())
    }

    async fn create(
        &self,
        account_id: BalanceAccountId,
        initial_amount: Decimal,
    ) -> Result<BalanceRecord, BalanceError> {
        if !is_valid_initial_balance(initial_amount) {
            return Err(BalanceError::InvalidAmount);
        }
        let mut rows = lock_rows(&self.rows)?;
        if rows.contains_key(&account_id) {
            return Err(BalanceError::AccountExists(account_id));
        }
        let record = BalanceRecord::new(account_id, initial_amount, 0, Utc::now());
        rows.insert(account_id, record.clone());
        Ok(record)
    }
}

struct PendingWrite {
    account_id: BalanceAccountId,
    amount: Decimal,
    /// `Some` for optimistic writes
    expected_version: Option<i64>,
}

pub struct InMemoryUnitOfWork {
    rows: Rows,
    row_locks: RowLocks,
    held: HashMap<BalanceAccountId, OwnedMutexGuard<()>>,
    pending: Vec<PendingWrite>,
}

impl InMemoryUnitOfWork {
    fn committed(&self, account_id: BalanceAccountId) -> Result<BalanceRecord, BalanceError> {
        lock_rows(&self.rows)?
            .get(&account_id)
            .cloned()
            .ok_or(BalanceError::AccountNotFound(account_id))
    }

    fn release(&mut self) {
        self.pending.clear();
        self.held.clear();
    }
}

#[async_trait]
impl BalanceUnitOfWork for InMemoryUnitOfWork {
    async fn read(&mut self, account_id: BalanceAccountId) -> Result<BalanceRecord, BalanceError> {
        self.committed(account_id)
    }

    async fn read_for_update(
        &mut self,
        account_id: BalanceAccountId,
    ) -> Result<BalanceRecord, BalanceError> {
        // Fail fast on unknown rows instead of creating a lock for them
        self.committed(account_id)?;

        if !self.held.contains_key(&account_id) {
            let lock = self.row_locks.entry(account_id).or_default().clone();
            let guard = lock.lock_owned().await;
            self.held.insert(account_id, guard);
        }
        // Re-read: the previous holder may have committed while we waited
        self.committed(account_id)
    }

    async fn write_optimistic(
        &mut self,
        account_id: BalanceAccountId,
        new_amount: Decimal,
        expected_version: i64,
    ) -> Result<(), BalanceError> {
        let current = self.committed(account_id)?;
        if current.version != expected_version {
            return Err(BalanceError::ConcurrencyConflict(account_id));
        }
        self.pending.push(PendingWrite {
            account_id,
            amount: new_amount,
            expected_version: Some(expected_version),
        });
        Ok(())
    }

    async fn write(
        &mut self,
        account_id: BalanceAccountId,
        new_amount: Decimal,
    ) -> Result<(), BalanceError> {
        self.committed(account_id)?;
        self.pending.push(PendingWrite {
            account_id,
            amount: new_amount,
            expected_version: None,
        });
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), BalanceError> {
        let result = {
            let mut rows = lock_rows(&self.rows)?;

            // Validate everything before touching anything
            let mut check = Ok(());
            for write in &self.pending {
                match rows.get(&write.account_id) {
                    None => {
                        check = Err(BalanceError::AccountNotFound(write.account_id));
                        break;
                    }
                    Some(row) => {
                        if write.expected_version.is_some_and(|v| v != row.version) {
                            check = Err(BalanceError::ConcurrencyConflict(write.account_id));
                            break;
                        }
                    }
                }
                if write.amount < Decimal::ZERO {
                    check = Err(BalanceError::Storage(format!(
                        "negative balance for account {}",
                        write.account_id
                    )));
                    break;
                }
            }

            if check.is_ok() {
                let now = Utc::now();
                for write in &self.pending {
                    if let Some(row) = rows.get_mut(&write.account_id) {
                        *row = BalanceRecord::new(write.account_id, write.amount, row.version + 1, now);
                    }
                }
            }
            check
        };

        self.release();
        result
    }

    async fn rollback(&mut self) -> Result<(), BalanceError> {
        self.release();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn store_with(accounts: &[(BalanceAccountId, i64)]) -> Arc<InMemoryBalanceStore> {
        let store = Arc::new(InMemoryBalanceStore::new());
        for (id, amount) in accounts {
            store.create(*id, Decimal::from(*amount)).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_commit_applies_all_writes_and_bumps_version() {
        let store = store_with(&[(1, 1000), (2, 0)]).await;
        let mut uow = store.begin().await.unwrap();
        uow.read_for_update(1).await.unwrap();
        uow.read_for_update(2).await.unwrap();
        uow.write(1, Decimal::from(700)).await.unwrap();
        uow.write(2, Decimal::from(300)).await.unwrap();

        // Nothing visible before commit
        assert_eq!(store.get(1).await.unwrap().unwrap().amount(), Decimal::from(1000));

        uow.commit().await.unwrap();
        let a = store.get(1).await.unwrap().unwrap();
        let b = store.get(2).await.unwrap().unwrap();
        assert_eq!((a.amount(), a.version), (Decimal::from(700), 1));
        assert_eq!((b.amount(), b.version), (Decimal::from(300), 1));
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = store_with(&[(1, 1000)]).await;
        let mut uow = store.begin().await.unwrap();
        uow.read_for_update(1).await.unwrap();
        uow.write(1, Decimal::ZERO).await.unwrap();
        uow.rollback().await.unwrap();

        assert_eq!(store.get(1).await.unwrap().unwrap().amount(), Decimal::from(1000));
        assert_eq!(store.get(1).await.unwrap().unwrap().version, 0);
    }

    #[tokio::test]
    async fn test_optimistic_conflict_at_commit() {
        let store = store_with(&[(1, 1000)]).await;
        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();

        let r1 = first.read(1).await.unwrap();
        let r2 = second.read(1).await.unwrap();
        first.write_optimistic(1, Decimal::from(300), r1.version).await.unwrap();
        second.write_optimistic(1, Decimal::from(300), r2.version).await.unwrap();

        first.commit().await.unwrap();
        assert_eq!(
            second.commit().await,
            Err(BalanceError::ConcurrencyConflict(1))
        );
        assert_eq!(store.get(1).await.unwrap().unwrap().amount(), Decimal::from(300));
    }

    #[tokio::test]
    async fn test_optimistic_conflict_at_write() {
        let store = store_with(&[(1, 1000)]).await;
        let mut uow = store.begin().await.unwrap();
        let stale = uow.read(1).await.unwrap();

        let mut other = store.begin().await.unwrap();
        other.write_optimistic(1, Decimal::from(1), stale.version).await.unwrap();
        other.commit().await.unwrap();

        assert_eq!(
            uow.write_optimistic(1, Decimal::from(2), stale.version).await,
            Err(BalanceError::ConcurrencyConflict(1))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_row_lock_blocks_until_commit() {
        let store = store_with(&[(1, 1000)]).await;
        let mut holder = store.begin().await.unwrap();
        holder.read_for_update(1).await.unwrap();

        let waiter_store = store.clone();
        let waiter = tokio::spawn(async move {
            let mut uow = waiter_store.begin().await.unwrap();
            let seen = uow.read_for_update(1).await.unwrap();
            uow.rollback().await.unwrap();
            seen.amount()
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        holder.write(1, Decimal::from(300)).await.unwrap();
        holder.commit().await.unwrap();

        // The waiter observes the committed amount
        assert_eq!(waiter.await.unwrap(), Decimal::from(300));
    }

    #[tokio::test]
    async fn test_unknown_row() {
        let store = store_with(&[]).await;
        let mut uow = store.begin().await.unwrap();
        assert_eq!(
            uow.read_for_update(9).await,
            Err(BalanceError::AccountNotFound(9))
        );
        assert_eq!(
            store.create(9, Decimal::NEGATIVE_ONE).await,
            Err(BalanceError::InvalidAmount)
        );
    }

    #[tokio::test]
    async fn test_duplicate_create() {
        let store = store_with(&[(1, 10)]).await;
        assert_eq!(
            store.create(1, Decimal::ONE).await,
            Err(BalanceError::AccountExists(1))
        );
    }
}
