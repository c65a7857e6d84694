//! Transfer Error Types
//!
//! The taxonomy exposed to callers of the direct transfer path.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::balance::BalanceError;
use crate::core_types::{BalanceAccountId, TransactionId};
use crate::ledger::{LedgerError, TransactionStatus};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    // === Validation Errors ===
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Source and destination account cannot be the same")]
    SameAccount,

    // === Business Rule Errors ===
    #[error("Insufficient funds in account {account_id}: available {available}, requested {requested}")]
    InsufficientFunds {
        account_id: BalanceAccountId,
        available: Decimal,
        requested: Decimal,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(BalanceAccountId),

    // === Concurrency Errors ===
    #[error("Account {0} was modified by a concurrent transfer")]
    ConcurrencyConflict(BalanceAccountId),

    // === Idempotency Errors ===
    #[error("Transaction {transaction_id} already exists with status {status}")]
    ConflictingTransaction {
        transaction_id: TransactionId,
        status: TransactionStatus,
    },

    // === System Errors ===
    #[error("Storage error: {0}")]
    Storage(String),
}

impl TransferError {
    /// Stable error code for callers
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::InvalidAmount => "INVALID_AMOUNT",
            TransferError::SameAccount => "SAME_ACCOUNT",
            TransferError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            TransferError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            TransferError::ConcurrencyConflict(_) => "CONCURRENCY_CONFLICT",
            TransferError::ConflictingTransaction { .. } => "CONFLICTING_TRANSACTION",
            TransferError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Only an optimistic-lock conflict may succeed on a fresh attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::ConcurrencyConflict(_))
    }
}

impl From<BalanceError> for TransferError {
    fn from(e: BalanceError) -> Self {
        match e {
            BalanceError::InvalidAmount => TransferError::InvalidAmount,
            BalanceError::InsufficientFunds {
                account_id,
                available,
                requested,
            } => TransferError::InsufficientFunds {
                account_id,
                available,
                requested,
            },
            BalanceError::AccountNotFound(id) => TransferError::AccountNotFound(id),
            BalanceError::ConcurrencyConflict(id) => TransferError::ConcurrencyConflict(id),
            other => TransferError::Storage(other.to_string()),
        }
    }
}

impl From<LedgerError> for TransferError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::ConflictingTransaction {
                transaction_id,
                status,
            } => TransferError::ConflictingTransaction {
                transaction_id,
                status,
            },
            other => TransferError::Storage(other.to_string()),
        }
    }
}

impl From<sqlx::Error> for TransferError {
    fn from(e: sqlx::Error) -> Self {
        TransferError::Storage(e.to_string())
    }
}
