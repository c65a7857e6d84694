//! Account Error Types

use rust_decimal::Decimal;
use thiserror::Error;

use crate::core_types::{AccountId, TransactionId};

/// Errors raised by the event log
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventLogError {
    #[error("Write conflict on stream {stream_id}: expected version {expected}, found {actual}")]
    WriteConflict {
        stream_id: AccountId,
        expected: u64,
        actual: u64,
    },

    #[error("Event serialization error: {0}")]
    Serialization(String),

    #[error("Event log storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for EventLogError {
    fn from(e: sqlx::Error) -> Self {
        EventLogError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for EventLogError {
    fn from(e: serde_json::Error) -> Self {
        EventLogError::Serialization(e.to_string())
    }
}

/// Errors raised while handling account commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountError {
    #[error("Amount must be greater than zero (initial balance must not be negative)")]
    InvalidAmount,

    #[error("Insufficient funds: available {available}, requested {requested}")]
    InsufficientFunds {
        available: Decimal,
        requested: Decimal,
    },

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Account already exists: {0}")]
    AccountAlreadyExists(AccountId),

    /// Ids ending in the compensation suffix belong to refunds
    #[error("Transaction id is reserved for compensation: {0}")]
    ReservedTransactionId(TransactionId),

    #[error("Balance overflow on account {0}")]
    Overflow(AccountId),

    /// Stream failed replay validation (gap, reorder, foreign event, negative balance)
    #[error("Corrupt event stream {account_id}: {reason}")]
    CorruptStream { account_id: AccountId, reason: String },

    #[error("Concurrent write to account {0}")]
    WriteConflict(AccountId),

    #[error("Command channel unavailable: {0}")]
    Unavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl AccountError {
    pub fn code(&self) -> &'static str {
        match self {
            AccountError::InvalidAmount => "INVALID_AMOUNT",
            AccountError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            AccountError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            AccountError::AccountAlreadyExists(_) => "ACCOUNT_ALREADY_EXISTS",
            AccountError::ReservedTransactionId(_) => "RESERVED_TRANSACTION_ID",
            AccountError::Overflow(_) => "BALANCE_OVERFLOW",
            AccountError::CorruptStream { .. } => "CORRUPT_STREAM",
            AccountError::WriteConflict(_) => "CONCURRENCY_CONFLICT",
            AccountError::Unavailable(_) => "UNAVAILABLE",
            AccountError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

impl From<EventLogError> for AccountError {
    fn from(e: EventLogError) -> Self {
        match e {
            EventLogError::WriteConflict { stream_id, .. } => AccountError::WriteConflict(stream_id),
            EventLogError::Serialization(msg) | EventLogError::Storage(msg) => {
                AccountError::Storage(msg)
            }
        }
    }
}
