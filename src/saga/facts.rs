//! Saga Facts
//!
//! Everything the transfer saga reacts to, as one tagged union. Account
//! events are mapped onto facts; dispatch outcomes and recovery requests are
//! posted directly.

use rust_decimal::Decimal;

use crate::account::{AccountEvent, RecordedEvent};
use crate::core_types::{AccountId, TransactionId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaFact {
    /// Source leg applied: starts the saga
    Debited {
        transaction_id: TransactionId,
        source: AccountId,
        target: AccountId,
        amount: Decimal,
    },
    /// Forward credit applied to the target
    Credited { transaction_id: TransactionId },
    /// Forward credit explicitly rejected
    CreditFailed {
        transaction_id: TransactionId,
        reason: String,
    },
    /// Compensating credit applied to the source
    CompensationCompleted { transaction_id: TransactionId },
    /// Compensating credit explicitly rejected
    CompensationFailed {
        transaction_id: TransactionId,
        reason: String,
    },
    /// Recovery pass asks the saga to continue from its stored state
    Resume { transaction_id: TransactionId },
}

impl SagaFact {
    /// Map an appended account event to the fact it represents, if any.
    ///
    /// A credit whose transaction id carries the compensation suffix is the
    /// refund of the original transaction.
    pub fn from_event(recorded: &RecordedEvent) -> Option<Self> {
        match &recorded.event {
            AccountEvent::AccountCreated { .. } => None,
            AccountEvent::MoneyDebited {
                account_id,
                counterparty_id,
                amount,
                transaction_id,
            } => Some(SagaFact::Debited {
                transaction_id: transaction_id.clone(),
                source: account_id.clone(),
                target: counterparty_id.clone(),
                amount: *amount,
            }),
            AccountEvent::MoneyCredited { transaction_id, .. } => {
                match transaction_id.compensated_original() {
                    Some(original) => Some(SagaFact::CompensationCompleted {
                        transaction_id: original,
                    }),
                    None => Some(SagaFact::Credited {
                        transaction_id: transaction_id.clone(),
                    }),
                }
            }
        }
    }

    pub fn transaction_id(&self) -> &TransactionId {
        match self {
            SagaFact::Debited { transaction_id, .. }
            | SagaFact::Credited { transaction_id }
            | SagaFact::CreditFailed { transaction_id, .. }
            | SagaFact::CompensationCompleted { transaction_id }
            | SagaFact::CompensationFailed { transaction_id, .. }
            | SagaFact::Resume { transaction_id } => transaction_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SagaFact::Debited { .. } => "Debited",
            SagaFact::Credited { .. } => "Credited",
            SagaFact::CreditFailed { .. } => "CreditFailed",
            SagaFact::CompensationCompleted { .. } => "CompensationCompleted",
            SagaFact::CompensationFailed { .. } => "CompensationFailed",
            SagaFact::Resume { .. } => "Resume",
        }
    }
}
