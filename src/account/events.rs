//! Account Domain Events
//!
//! Immutable facts appended to an account's stream. Once appended an event
//! is never mutated or deleted; balance is derived only by folding them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::{AccountId, TransactionId};

/// Domain event belonging to exactly one account stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AccountEvent {
    AccountCreated {
        account_id: AccountId,
        initial_balance: Decimal,
    },
    MoneyDebited {
        account_id: AccountId,
        counterparty_id: AccountId,
        amount: Decimal,
        transaction_id: TransactionId,
    },
    MoneyCredited {
        account_id: AccountId,
        counterparty_id: AccountId,
        amount: Decimal,
        transaction_id: TransactionId,
    },
}

impl AccountEvent {
    /// Stream this event belongs to
    pub fn account_id(&self) -> &AccountId {
        match self {
            AccountEvent::AccountCreated { account_id, .. }
            | AccountEvent::MoneyDebited { account_id, .. }
            | AccountEvent::MoneyCredited { account_id, .. } => account_id,
        }
    }

    /// Transaction linking this leg to its counterpart, if any
    pub fn transaction_id(&self) -> Option<&TransactionId> {
        match self {
            AccountEvent::AccountCreated { .. } => None,
            AccountEvent::MoneyDebited { transaction_id, .. }
            | AccountEvent::MoneyCredited { transaction_id, .. } => Some(transaction_id),
        }
    }

    /// Stable name used as the stored event type
    pub fn event_type(&self) -> &'static str {
        match self {
            AccountEvent::AccountCreated { .. } => "AccountCreated",
            AccountEvent::MoneyDebited { .. } => "MoneyDebited",
            AccountEvent::MoneyCredited { .. } => "MoneyCredited",
        }
    }
}

/// An event as stored in the log, with its position in the stream.
///
/// Versions start at 1 and are contiguous within a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub stream_id: AccountId,
    pub version: u64,
    pub event: AccountEvent,
    pub recorded_at: DateTime<Utc>,
}
