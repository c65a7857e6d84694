//! Balance Store
//!
//! Materialized balance rows for the direct transfer path. Each row carries
//! a version that is bumped on every committed write, which is the token
//! optimistic writers check.
//!
//! All mutations of one transfer go through a single [`BalanceUnitOfWork`]
//! and become visible together at `commit`, or not at all.

pub mod db;
pub mod memory;
pub mod provider;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core_types::{BalanceAccountId, is_valid_amount};

pub use db::PgBalanceStore;
pub use memory::InMemoryBalanceStore;
pub use provider::{BalanceProvider, EventSourcedBalances, MaterializedBalances};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BalanceError {
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Insufficient funds in account {account_id}: available {available}, requested {requested}")]
    InsufficientFunds {
        account_id: BalanceAccountId,
        available: Decimal,
        requested: Decimal,
    },

    #[error("Balance overflow in account {0}")]
    Overflow(BalanceAccountId),

    #[error("Balance account not found: {0}")]
    AccountNotFound(BalanceAccountId),

    #[error("Balance account already exists: {0}")]
    AccountExists(BalanceAccountId),

    #[error("Balance of account {0} was modified concurrently")]
    ConcurrencyConflict(BalanceAccountId),

    #[error("Balance storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for BalanceError {
    fn from(e: sqlx::Error) -> Self {
        BalanceError::Storage(e.to_string())
    }
}

/// One account's materialized balance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub account_id: BalanceAccountId,
    amount: Decimal,
    /// Conflict token, bumped by the store on every committed write
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl BalanceRecord {
    pub fn new(
        account_id: BalanceAccountId,
        amount: Decimal,
        version: i64,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id,
            amount,
            version,
            updated_at,
        }
    }

    #[inline]
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    /// Withdraw `amount`; the balance never goes below zero
    pub fn decrease(&mut self, amount: Decimal) -> Result<(), BalanceError> {
        if !is_valid_amount(amount) {
            return Err(BalanceError::InvalidAmount);
        }
        if amount > self.amount {
            return Err(BalanceError::InsufficientFunds {
                account_id: self.account_id,
                available: self.amount,
                requested: amount,
            });
        }
        self.amount -= amount;
        Ok(())
    }

    pub fn increase(&mut self, amount: Decimal) -> Result<(), BalanceError> {
        if !is_valid_amount(amount) {
            return Err(BalanceError::InvalidAmount);
        }
        self.amount = self
            .amount
            .checked_add(amount)
            .ok_or(BalanceError::Overflow(self.account_id))?;
        Ok(())
    }
}

/// A storage transaction over balance rows.
///
/// Dropping a unit of work without `commit` discards its writes and
/// releases its locks.
#[async_trait]
pub trait BalanceUnitOfWork: Send {
    /// Plain read, no lock taken
    async fn read(&mut self, account_id: BalanceAccountId) -> Result<BalanceRecord, BalanceError>;

    /// Read and hold an exclusive lock on the row until commit or rollback.
    /// A second unit of work locking the same row waits.
    async fn read_for_update(
        &mut self,
        account_id: BalanceAccountId,
    ) -> Result<BalanceRecord, BalanceError>;

    /// Write `new_amount` only if the row is still at `expected_version`,
    /// otherwise `ConcurrencyConflict`
    async fn write_optimistic(
        &mut self,
        account_id: BalanceAccountId,
        new_amount: Decimal,
        expected_version: i64,
    ) -> Result<(), BalanceError>;

    /// Unconditional write of a row locked with `read_for_update`
    async fn write(
        &mut self,
        account_id: BalanceAccountId,
        new_amount: Decimal,
    ) -> Result<(), BalanceError>;

    async fn commit(&mut self) -> Result<(), BalanceError>;

    async fn rollback(&mut self) -> Result<(), BalanceError>;
}

#[async_trait]
pub trait BalanceStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn BalanceUnitOfWork>, BalanceError>;

    /// Committed state of one row
    async fn get(
        &self,
        account_id: BalanceAccountId,
    ) -> Result<Option<BalanceRecord>, BalanceError>;

    /// Provision a row at version 0
    async fn create(
        &self,
        account_id: BalanceAccountId,
        initial_amount: Decimal,
    ) -> Result<BalanceRecord, BalanceError>;
}
