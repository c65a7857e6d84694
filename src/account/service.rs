//! Account Service
//!
//! Caller-facing entry to the event-sourced path. A transfer here only
//! performs the debit; the transfer saga picks up the `MoneyDebited` fact
//! and drives the credit (or its compensation).

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::info;

use super::channel::CommandChannel;
use super::commands::{AccountCommand, CommandReceipt};
use super::error::AccountError;
use crate::core_types::{AccountId, TransactionId};

pub struct AccountService {
    commands: Arc<dyn CommandChannel>,
}

impl AccountService {
    pub fn new(commands: Arc<dyn CommandChannel>) -> Self {
        Self { commands }
    }

    /// Open a new account with a generated id
    pub async fn create_account(&self, initial_balance: Decimal) -> Result<AccountId, AccountError> {
        let account_id = AccountId::generate();
        self.open_account(account_id.clone(), initial_balance).await?;
        Ok(account_id)
    }

    /// Open an account under a caller-chosen id
    pub async fn open_account(
        &self,
        account_id: AccountId,
        initial_balance: Decimal,
    ) -> Result<CommandReceipt, AccountError> {
        let receipt = self
            .commands
            .dispatch(AccountCommand::Create {
                account_id: account_id.clone(),
                initial_balance,
            })
            .await?;
        info!(account_id = %account_id, initial_balance = %initial_balance, "Account created");
        Ok(receipt)
    }

    /// Start a transfer under a fresh transaction id.
    ///
    /// Returns once the source is debited; completion is asynchronous.
    pub async fn transfer(
        &self,
        from: &AccountId,
        to: &AccountId,
        amount: Decimal,
    ) -> Result<TransactionId, AccountError> {
        let transaction_id = TransactionId::generate();
        self.transfer_with_id(&transaction_id, from, to, amount)
            .await?;
        Ok(transaction_id)
    }

    /// Start a transfer under a caller-supplied transaction id.
    ///
    /// Resubmitting the same id is acknowledged without a second debit.
    pub async fn transfer_with_id(
        &self,
        transaction_id: &TransactionId,
        from: &AccountId,
        to: &AccountId,
        amount: Decimal,
    ) -> Result<CommandReceipt, AccountError> {
        let receipt = self
            .commands
            .dispatch(AccountCommand::Debit {
                account_id: from.clone(),
                counterparty_id: to.clone(),
                amount,
                transaction_id: transaction_id.clone(),
            })
            .await?;
        info!(
            transaction_id = %transaction_id,
            from = %from,
            to = %to,
            amount = %amount,
            applied = receipt.applied,
            "Transfer debit accepted"
        );
        Ok(receipt)
    }

    /// Deposit funds from outside the system (no saga involved)
    pub async fn deposit(
        &self,
        account_id: &AccountId,
        amount: Decimal,
        transaction_id: &TransactionId,
    ) -> Result<CommandReceipt, AccountError> {
        // Would be read back as the refund of another transaction
        if transaction_id.is_compensation() {
            return Err(AccountError::ReservedTransactionId(transaction_id.clone()));
        }
        Ok(self
            .commands
            .dispatch(AccountCommand::Credit {
                account_id: account_id.clone(),
                counterparty_id: account_id.clone(),
                amount,
                transaction_id: transaction_id.clone(),
            })
            .await?)
    }
}
