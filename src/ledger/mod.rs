//! Transaction Ledger
//!
//! Idempotency gate for direct transfers. The first request for a
//! transaction id reserves a PENDING record; every later request with the
//! same id sees that record instead of executing again.
//!
//! ```text
//! PENDING ──► COMPLETED
//!    │
//!    └──────► FAILED
//! ```

pub mod db;
pub mod memory;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::core_types::{BalanceAccountId, TransactionId};

pub use db::PgTransactionLedger;
pub use memory::InMemoryTransactionLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(TransactionStatus::Pending),
            "COMPLETED" => Some(TransactionStatus::Completed),
            "FAILED" => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Internal row id
    pub id: Ulid,
    /// Caller's idempotency key (unique)
    pub transaction_id: TransactionId,
    pub from_account: BalanceAccountId,
    pub to_account: BalanceAccountId,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to reserve a transaction id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub transaction_id: TransactionId,
    pub from_account: BalanceAccountId,
    pub to_account: BalanceAccountId,
    pub amount: Decimal,
}

impl NewTransaction {
    pub(crate) fn into_pending(self) -> TransactionRecord {
        let now = Utc::now();
        TransactionRecord {
            id: Ulid::new(),
            transaction_id: self.transaction_id,
            from_account: self.from_account,
            to_account: self.to_account,
            amount: self.amount,
            status: TransactionStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Outcome of [`TransactionLedger::check_and_reserve`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// Caller owns the PENDING record and should execute
    Proceed(TransactionRecord),
    /// The transaction already completed; return its record without executing
    AlreadyDone(TransactionRecord),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The id is PENDING elsewhere or already FAILED
    #[error("Transaction {transaction_id} is {status}")]
    ConflictingTransaction {
        transaction_id: TransactionId,
        status: TransactionStatus,
    },

    #[error("Transaction not found: {0}")]
    NotFound(TransactionId),

    #[error("Transaction cannot move from {from} to {to}")]
    InvalidTransition {
        from: TransactionStatus,
        to: TransactionStatus,
    },

    #[error("Ledger storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Storage(e.to_string())
    }
}

#[async_trait]
pub trait TransactionLedger: Send + Sync {
    /// Reserve `tx.transaction_id` atomically.
    ///
    /// - absent: a PENDING record is stored and returned as `Proceed`
    /// - COMPLETED: `AlreadyDone`
    /// - PENDING or FAILED: `ConflictingTransaction`
    ///
    /// Concurrent callers with the same id: exactly one gets `Proceed`.
    async fn check_and_reserve(&self, tx: NewTransaction) -> Result<Reservation, LedgerError>;

    /// PENDING → COMPLETED. Repeating it is a no-op.
    async fn mark_completed(&self, transaction_id: &TransactionId) -> Result<(), LedgerError>;

    /// PENDING → FAILED. Repeating it is a no-op.
    async fn mark_failed(&self, transaction_id: &TransactionId) -> Result<(), LedgerError>;

    async fn get(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<TransactionRecord>, LedgerError>;
}

/// Decide whether `current` may move to `target`.
///
/// `Ok(false)` means the record is already in `target` and nothing needs
/// writing.
pub(crate) fn check_transition(
    current: TransactionStatus,
    target: TransactionStatus,
) -> Result<bool, LedgerError> {
    match current {
        TransactionStatus::Pending => Ok(true),
        status if status == target => Ok(false),
        from => Err(LedgerError::InvalidTransition { from, to: target }),
    }
}

/// Map an existing record found at reservation time
pub(crate) fn existing_reservation(record: TransactionRecord) -> Result<Reservation, LedgerError> {
    match record.status {
        TransactionStatus::Completed => Ok(Reservation::AlreadyDone(record)),
        status => Err(LedgerError::ConflictingTransaction {
            transaction_id: record.transaction_id,
            status,
        }),
    }
}
