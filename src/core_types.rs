//! Core types used throughout the system
//!
//! Identifiers for both transfer paths and the amount helpers every
//! validation step goes through.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Suffix appended to a transaction id to derive its compensation id.
pub const COMPENSATION_SUFFIX: &str = "-compensation";

/// Event-sourced account identity (one event stream per account).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random account id (UUID v4)
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Balance row identity on the direct (non event-sourced) path.
pub type BalanceAccountId = i64;

/// Caller-supplied idempotency key for one logical transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random transaction id (UUID v4)
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Deterministic id of the compensating credit for this transaction.
    ///
    /// Redelivering a compensation reuses the same id, so the account
    /// aggregate recognises it as already applied.
    pub fn compensation(&self) -> Self {
        Self(format!("{}{}", self.0, COMPENSATION_SUFFIX))
    }

    /// True for ids derived by [`TransactionId::compensation`]
    pub fn is_compensation(&self) -> bool {
        self.compensated_original().is_some()
    }

    /// If this id is a compensation id, return the id it compensates.
    pub fn compensated_original(&self) -> Option<Self> {
        self.0
            .strip_suffix(COMPENSATION_SUFFIX)
            .filter(|original| !original.is_empty())
            .map(|original| Self(original.to_string()))
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TransactionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Amount of a debit, credit or transfer must be strictly positive.
#[inline]
pub fn is_valid_amount(amount: Decimal) -> bool {
    amount > Decimal::ZERO
}

/// Opening balances may be zero but never negative.
#[inline]
pub fn is_valid_initial_balance(amount: Decimal) -> bool {
    amount >= Decimal::ZERO
}
