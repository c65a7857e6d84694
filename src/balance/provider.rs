//! Balance Providers
//!
//! One read interface over both account models: a fold over the account's
//! event stream, or the materialized balance row.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::{BalanceError, BalanceStore};
use crate::account::{AccountAggregate, EventLog};
use crate::core_types::{AccountId, BalanceAccountId};

#[async_trait]
pub trait BalanceProvider: Send + Sync {
    type AccountKey: Send + Sync;

    /// Current balance, or `None` for an unknown account
    async fn balance(&self, account: &Self::AccountKey) -> Result<Option<Decimal>, BalanceError>;
}

/// Balance derived by replaying the account's events
pub struct EventSourcedBalances {
    log: Arc<dyn EventLog>,
}

impl EventSourcedBalances {
    pub fn new(log: Arc<dyn EventLog>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl BalanceProvider for EventSourcedBalances {
    type AccountKey = AccountId;

    async fn balance(&self, account: &AccountId) -> Result<Option<Decimal>, BalanceError> {
        let history = self
            .log
            .read_all(account)
            .await
            .map_err(|e| BalanceError::Storage(e.to_string()))?;
        let state = AccountAggregate::replay(account, &history)
            .map_err(|e| BalanceError::Storage(e.to_string()))?;
        Ok(state.map(|s| s.balance()))
    }
}

/// Balance read from the materialized row
pub struct MaterializedBalances {
    store: Arc<dyn BalanceStore>,
}

impl MaterializedBalances {
    pub fn new(store: Arc<dyn BalanceStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl BalanceProvider for MaterializedBalances {
    type AccountKey = BalanceAccountId;

    async fn balance(&self, account: &BalanceAccountId) -> Result<Option<Decimal>, BalanceError> {
        Ok(self.store.get(*account).await?.map(|r| r.amount()))
    }
}
