//! Account Aggregate
//!
//! Balance is derived strictly by folding the account's own ordered event
//! history. Nothing else is authoritative: callers replay, decide, append.
//!
//! # Invariants
//!
//! 1. The first event of a stream is `AccountCreated` and it appears once
//! 2. Versions are contiguous starting at 1 (no gaps, no reordering)
//! 3. Balance is never negative after any applied event
//! 4. Each leg (debit or credit) of a transaction id is applied at most once

use std::collections::HashSet;

use rust_decimal::Decimal;

use super::commands::AccountCommand;
use super::error::AccountError;
use super::events::{AccountEvent, RecordedEvent};
use crate::core_types::{AccountId, TransactionId, is_valid_amount, is_valid_initial_balance};

/// Account state reconstructed from events
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountAggregate {
    account_id: AccountId,
    balance: Decimal,
    version: u64,
    debited: HashSet<TransactionId>,
    credited: HashSet<TransactionId>,
}

impl AccountAggregate {
    pub fn account_id(&self) -> &AccountId {
        &self.account_id
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    /// Version of the last applied event
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Rebuild state from a full ordered stream.
    ///
    /// Returns `Ok(None)` for an empty stream (account never created).
    pub fn replay(
        account_id: &AccountId,
        history: &[RecordedEvent],
    ) -> Result<Option<Self>, AccountError> {
        let mut state: Option<Self> = None;

        for (index, recorded) in history.iter().enumerate() {
            let expected_version = index as u64 + 1;
            if recorded.version != expected_version {
                return Err(corrupt(
                    account_id,
                    format!(
                        "expected version {}, found {}",
                        expected_version, recorded.version
                    ),
                ));
            }
            if recorded.event.account_id() != account_id {
                return Err(corrupt(
                    account_id,
                    format!(
                        "event at version {} belongs to {}",
                        recorded.version,
                        recorded.event.account_id()
                    ),
                ));
            }

            state = Some(Self::evolve(account_id, state, &recorded.event)?);
        }

        Ok(state)
    }

    /// Apply one event to the (possibly absent) state
    fn evolve(
        account_id: &AccountId,
        state: Option<Self>,
        event: &AccountEvent,
    ) -> Result<Self, AccountError> {
        match (state, event) {
            (None, AccountEvent::AccountCreated { initial_balance, .. }) => {
                if !is_valid_initial_balance(*initial_balance) {
                    return Err(corrupt(account_id, "negative initial balance".to_string()));
                }
                Ok(Self {
                    account_id: account_id.clone(),
                    balance: *initial_balance,
                    version: 1,
                    debited: HashSet::new(),
                    credited: HashSet::new(),
                })
            }
            (Some(_), AccountEvent::AccountCreated { .. }) => {
                Err(corrupt(account_id, "duplicate AccountCreated".to_string()))
            }
            (None, _) => Err(corrupt(
                account_id,
                "stream does not start with AccountCreated".to_string(),
            )),
            (
                Some(mut s),
                AccountEvent::MoneyDebited {
                    amount,
                    transaction_id,
                    ..
                },
            ) => {
                let balance = s.balance - *amount;
                if balance < Decimal::ZERO {
                    return Err(corrupt(
                        account_id,
                        format!("debit {} drives balance negative", transaction_id),
                    ));
                }
                s.balance = balance;
                s.version += 1;
                s.debited.insert(transaction_id.clone());
                Ok(s)
            }
            (
                Some(mut s),
                AccountEvent::MoneyCredited {
                    amount,
                    transaction_id,
                    ..
                },
            ) => {
                s.balance = s.balance.checked_add(*amount).ok_or_else(|| {
                    corrupt(
                        account_id,
                        format!("credit {} overflows balance", transaction_id),
                    )
                })?;
                s.version += 1;
                s.credited.insert(transaction_id.clone());
                Ok(s)
            }
        }
    }

    /// Validate a command against current state and produce the events it
    /// would append.
    ///
    /// An empty vector means the command was already applied (redelivery
    /// of a debit or credit with a known transaction id).
    pub fn decide(
        state: Option<&Self>,
        command: &AccountCommand,
    ) -> Result<Vec<AccountEvent>, AccountError> {
        match command {
            AccountCommand::Create {
                account_id,
                initial_balance,
            } => {
                if !is_valid_initial_balance(*initial_balance) {
                    return Err(AccountError::InvalidAmount);
                }
                if state.is_some() {
                    return Err(AccountError::AccountAlreadyExists(account_id.clone()));
                }
                Ok(vec![AccountEvent::AccountCreated {
                    account_id: account_id.clone(),
                    initial_balance: *initial_balance,
                }])
            }
            AccountCommand::Debit {
                account_id,
                counterparty_id,
                amount,
                transaction_id,
            } => {
                if !is_valid_amount(*amount) {
                    return Err(AccountError::InvalidAmount);
                }
                if transaction_id.is_compensation() {
                    return Err(AccountError::ReservedTransactionId(transaction_id.clone()));
                }
                let state = state.ok_or_else(|| AccountError::AccountNotFound(account_id.clone()))?;
                if state.debited.contains(transaction_id) {
                    return Ok(Vec::new());
                }
                if *amount > state.balance {
                    return Err(AccountError::InsufficientFunds {
                        available: state.balance,
                        requested: *amount,
                    });
                }
                Ok(vec![AccountEvent::MoneyDebited {
                    account_id: account_id.clone(),
                    counterparty_id: counterparty_id.clone(),
                    amount: *amount,
                    transaction_id: transaction_id.clone(),
                }])
            }
            AccountCommand::Credit {
                account_id,
                counterparty_id,
                amount,
                transaction_id,
            } => {
                if !is_valid_amount(*amount) {
                    return Err(AccountError::InvalidAmount);
                }
                let state = state.ok_or_else(|| AccountError::AccountNotFound(account_id.clone()))?;
                if state.credited.contains(transaction_id) {
                    return Ok(Vec::new());
                }
                if state.balance.checked_add(*amount).is_none() {
                    return Err(AccountError::Overflow(account_id.clone()));
                }
                Ok(vec![AccountEvent::MoneyCredited {
                    account_id: account_id.clone(),
                    counterparty_id: counterparty_id.clone(),
                    amount: *amount,
                    transaction_id: transaction_id.clone(),
                }])
            }
        }
    }

    /// Apply freshly decided events on top of current state
    pub fn apply_new(
        account_id: &AccountId,
        state: Option<Self>,
        events: &[AccountEvent],
    ) -> Result<Option<Self>, AccountError> {
        let mut state = state;
        for event in events {
            state = Some(Self::evolve(account_id, state, event)?);
        }
        Ok(state)
    }
}

fn corrupt(account_id: &AccountId, reason: String) -> AccountError {
    AccountError::CorruptStream {
        account_id: account_id.clone(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn recorded(version: u64, event: AccountEvent) -> RecordedEvent {
        RecordedEvent {
            stream_id: event.account_id().clone(),
            version,
            event,
            recorded_at: Utc::now(),
        }
    }

    fn created(id: &str, balance: i64) -> AccountEvent {
        AccountEvent::AccountCreated {
            account_id: id.into(),
            initial_balance: Decimal::from(balance),
        }
    }

    fn debited(id: &str, amount: i64, tx: &str) -> AccountEvent {
        AccountEvent::MoneyDebited {
            account_id: id.into(),
            counterparty_id: "B".into(),
            amount: Decimal::from(amount),
            transaction_id: tx.into(),
        }
    }

    fn credited(id: &str, amount: i64, tx: &str) -> AccountEvent {
        AccountEvent::MoneyCredited {
            account_id: id.into(),
            counterparty_id: "B".into(),
            amount: Decimal::from(amount),
            transaction_id: tx.into(),
        }
    }

    fn account(balance: i64) -> AccountAggregate {
        AccountAggregate::replay(&"A".into(), &[recorded(1, created("A", balance))])
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_replay_folds_in_order() {
        let history = vec![
            recorded(1, created("A", 1000)),
            recorded(2, debited("A", 300, "T1")),
            recorded(3, credited("A", 50, "T2")),
        ];
        let state = AccountAggregate::replay(&"A".into(), &history)
            .unwrap()
            .unwrap();
        assert_eq!(state.balance(), Decimal::from(750));
        assert_eq!(state.version(), 3);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let history = vec![
            recorded(1, created("A", 1000)),
            recorded(2, debited("A", 999, "T1")),
            recorded(3, credited("A", 1, "T2")),
        ];
        let first = AccountAggregate::replay(&"A".into(), &history).unwrap();
        let second = AccountAggregate::replay(&"A".into(), &history).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_replay_empty_stream() {
        assert!(AccountAggregate::replay(&"A".into(), &[]).unwrap().is_none());
    }

    #[test]
    fn test_replay_rejects_gap() {
        let history = vec![
            recorded(1, created("A", 1000)),
            recorded(3, debited("A", 300, "T1")),
        ];
        let err = AccountAggregate::replay(&"A".into(), &history).unwrap_err();
        assert!(matches!(err, AccountError::CorruptStream { .. }));
    }

    #[test]
    fn test_replay_rejects_foreign_event() {
        let history = vec![
            recorded(1, created("A", 1000)),
            recorded(2, debited("X", 300, "T1")),
        ];
        assert!(AccountAggregate::replay(&"A".into(), &history).is_err());
    }

    #[test]
    fn test_replay_rejects_negative_balance() {
        let history = vec![
            recorded(1, created("A", 100)),
            recorded(2, debited("A", 300, "T1")),
        ];
        assert!(AccountAggregate::replay(&"A".into(), &history).is_err());
    }

    #[test]
    fn test_replay_requires_created_first() {
        let history = vec![recorded(1, credited("A", 10, "T1"))];
        assert!(AccountAggregate::replay(&"A".into(), &history).is_err());
    }

    #[test]
    fn test_create_validation() {
        let cmd = AccountCommand::Create {
            account_id: "A".into(),
            initial_balance: Decimal::NEGATIVE_ONE,
        };
        assert_eq!(
            AccountAggregate::decide(None, &cmd),
            Err(AccountError::InvalidAmount)
        );

        let cmd = AccountCommand::Create {
            account_id: "A".into(),
            initial_balance: Decimal::ZERO,
        };
        let events = AccountAggregate::decide(None, &cmd).unwrap();
        assert_eq!(events, vec![created("A", 0)]);

        let existing = account(10);
        assert_eq!(
            AccountAggregate::decide(Some(&existing), &cmd),
            Err(AccountError::AccountAlreadyExists("A".into()))
        );
    }

    #[test]
    fn test_debit_validation() {
        let state = account(1000);
        let debit = |amount: i64| AccountCommand::Debit {
            account_id: "A".into(),
            counterparty_id: "B".into(),
            amount: Decimal::from(amount),
            transaction_id: "T1".into(),
        };

        assert_eq!(
            AccountAggregate::decide(Some(&state), &debit(0)),
            Err(AccountError::InvalidAmount)
        );
        assert_eq!(
            AccountAggregate::decide(Some(&state), &debit(-5)),
            Err(AccountError::InvalidAmount)
        );
        assert!(matches!(
            AccountAggregate::decide(Some(&state), &debit(1001)),
            Err(AccountError::InsufficientFunds { .. })
        ));
        assert_eq!(
            AccountAggregate::decide(Some(&state), &debit(1000)).unwrap(),
            vec![debited("A", 1000, "T1")]
        );
        assert_eq!(
            AccountAggregate::decide(None, &debit(10)),
            Err(AccountError::AccountNotFound("A".into()))
        );
    }

    #[test]
    fn test_credit_has_no_upper_bound() {
        let state = account(0);
        let cmd = AccountCommand::Credit {
            account_id: "A".into(),
            counterparty_id: "B".into(),
            amount: Decimal::from(1_000_000_000i64),
            transaction_id: "T1".into(),
        };
        let events = AccountAggregate::decide(Some(&state), &cmd).unwrap();
        let after = AccountAggregate::apply_new(&"A".into(), Some(state), &events)
            .unwrap()
            .unwrap();
        assert_eq!(after.balance(), Decimal::from(1_000_000_000i64));
    }

    #[test]
    fn test_credit_overflow_rejected() {
        let mut state = account(0);
        state.balance = Decimal::MAX;
        let cmd = AccountCommand::Credit {
            account_id: "A".into(),
            counterparty_id: "B".into(),
            amount: Decimal::ONE,
            transaction_id: "D1".into(),
        };
        assert_eq!(
            AccountAggregate::decide(Some(&state), &cmd),
            Err(AccountError::Overflow("A".into()))
        );
    }

    #[test]
    fn test_replay_rejects_overflowing_credit() {
        let history = vec![
            recorded(
                1,
                AccountEvent::AccountCreated {
                    account_id: "A".into(),
                    initial_balance: Decimal::MAX,
                },
            ),
            recorded(2, credited("A", 1, "T1")),
        ];
        let err = AccountAggregate::replay(&"A".into(), &history).unwrap_err();
        assert!(matches!(err, AccountError::CorruptStream { .. }));
    }

    #[test]
    fn test_debit_with_compensation_id_rejected() {
        let state = account(1000);
        let cmd = AccountCommand::Debit {
            account_id: "A".into(),
            counterparty_id: "B".into(),
            amount: Decimal::from(300),
            transaction_id: "order-7-compensation".into(),
        };
        assert_eq!(
            AccountAggregate::decide(Some(&state), &cmd),
            Err(AccountError::ReservedTransactionId(
                "order-7-compensation".into()
            ))
        );
    }

    #[test]
    fn test_redelivered_legs_emit_nothing() {
        let history = vec![
            recorded(1, created("A", 1000)),
            recorded(2, debited("A", 100, "T1")),
            recorded(3, credited("A", 100, "T1-compensation")),
        ];
        let state = AccountAggregate::replay(&"A".into(), &history)
            .unwrap()
            .unwrap();

        let debit = AccountCommand::Debit {
            account_id: "A".into(),
            counterparty_id: "B".into(),
            amount: Decimal::from(100),
            transaction_id: "T1".into(),
        };
        assert!(AccountAggregate::decide(Some(&state), &debit).unwrap().is_empty());

        let compensation = AccountCommand::Credit {
            account_id: "A".into(),
            counterparty_id: "B".into(),
            amount: Decimal::from(100),
            transaction_id: "T1-compensation".into(),
        };
        assert!(
            AccountAggregate::decide(Some(&state), &compensation)
                .unwrap()
                .is_empty()
        );
    }
}
