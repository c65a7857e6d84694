//! Account Commands
//!
//! Intent sent to an account aggregate. Commands may be rejected; only the
//! events they produce are facts.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::{AccountId, TransactionId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountCommand {
    Create {
        account_id: AccountId,
        initial_balance: Decimal,
    },
    Debit {
        account_id: AccountId,
        counterparty_id: AccountId,
        amount: Decimal,
        transaction_id: TransactionId,
    },
    Credit {
        account_id: AccountId,
        counterparty_id: AccountId,
        amount: Decimal,
        transaction_id: TransactionId,
    },
}

impl AccountCommand {
    /// Target aggregate of this command
    pub fn account_id(&self) -> &AccountId {
        match self {
            AccountCommand::Create { account_id, .. }
            | AccountCommand::Debit { account_id, .. }
            | AccountCommand::Credit { account_id, .. } => account_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AccountCommand::Create { .. } => "Create",
            AccountCommand::Debit { .. } => "Debit",
            AccountCommand::Credit { .. } => "Credit",
        }
    }
}

/// Result of a successfully handled command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandReceipt {
    pub account_id: AccountId,
    /// Stream version after the command
    pub version: u64,
    /// Balance after the command
    pub balance: Decimal,
    /// False when the command was a redelivery and emitted no event
    pub applied: bool,
}
