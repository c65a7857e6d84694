//! Saga Records
//!
//! One durable record per transaction id. All state changes are atomic CAS
//! updates so a redelivered fact or a recovery pass can never move a saga
//! backwards.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;

use super::error::SagaError;
use super::state::SagaState;
use crate::core_types::{AccountId, TransactionId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SagaRecord {
    pub transaction_id: TransactionId,
    pub source: AccountId,
    pub target: AccountId,
    pub amount: Decimal,
    pub state: SagaState,
    /// Last failure reason, if any
    pub error: Option<String>,
    /// Number of recovery re-dispatches
    pub retry_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaRecord {
    pub fn new(
        transaction_id: TransactionId,
        source: AccountId,
        target: AccountId,
        amount: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            transaction_id,
            source,
            target,
            amount,
            state: SagaState::Started,
            error: None,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Insert a new record; returns false if one already exists for the id
    async fn create(&self, record: &SagaRecord) -> Result<bool, SagaError>;

    async fn get(&self, transaction_id: &TransactionId) -> Result<Option<SagaRecord>, SagaError>;

    /// Update state only if the current state matches `expected`
    async fn update_state_if(
        &self,
        transaction_id: &TransactionId,
        expected: SagaState,
        new_state: SagaState,
    ) -> Result<bool, SagaError>;

    /// CAS update that also records a failure reason
    async fn update_state_with_error(
        &self,
        transaction_id: &TransactionId,
        expected: SagaState,
        new_state: SagaState,
        error: &str,
    ) -> Result<bool, SagaError>;

    /// Record a failure reason without changing state
    async fn record_error(&self, transaction_id: &TransactionId, error: &str)
    -> Result<(), SagaError>;

    async fn increment_retry(&self, transaction_id: &TransactionId) -> Result<(), SagaError>;

    /// Non-terminal sagas not touched for at least `threshold`, oldest first
    async fn find_stale(
        &self,
        threshold: Duration,
        limit: usize,
    ) -> Result<Vec<SagaRecord>, SagaError>;
}

/// In-memory saga store
#[derive(Default)]
pub struct InMemorySagaStore {
    records: DashMap<TransactionId, SagaRecord>,
}

impl InMemorySagaStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn create(&self, record: &SagaRecord) -> Result<bool, SagaError> {
        match self.records.entry(record.transaction_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn get(&self, transaction_id: &TransactionId) -> Result<Option<SagaRecord>, SagaError> {
        Ok(self.records.get(transaction_id).map(|r| r.value().clone()))
    }

    async fn update_state_if(
        &self,
        transaction_id: &TransactionId,
        expected: SagaState,
        new_state: SagaState,
    ) -> Result<bool, SagaError> {
        match self.records.get_mut(transaction_id) {
            Some(mut record) if record.state == expected => {
                record.state = new_state;
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_state_with_error(
        &self,
        transaction_id: &TransactionId,
        expected: SagaState,
        new_state: SagaState,
        error: &str,
    ) -> Result<bool, SagaError> {
        match self.records.get_mut(transaction_id) {
            Some(mut record) if record.state == expected => {
                record.state = new_state;
                record.error = Some(error.to_string());
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_error(
        &self,
        transaction_id: &TransactionId,
        error: &str,
    ) -> Result<(), SagaError> {
        let mut record = self
            .records
            .get_mut(transaction_id)
            .ok_or_else(|| SagaError::NotFound(transaction_id.clone()))?;
        record.error = Some(error.to_string());
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn increment_retry(&self, transaction_id: &TransactionId) -> Result<(), SagaError> {
        let mut record = self
            .records
            .get_mut(transaction_id)
            .ok_or_else(|| SagaError::NotFound(transaction_id.clone()))?;
        record.retry_count += 1;
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn find_stale(
        &self,
        threshold: Duration,
        limit: usize,
    ) -> Result<Vec<SagaRecord>, SagaError> {
        let threshold = chrono::Duration::from_std(threshold)
            .map_err(|e| SagaError::Storage(e.to_string()))?;
        let cutoff = Utc::now() - threshold;

        let mut stale: Vec<SagaRecord> = self
            .records
            .iter()
            .filter(|r| !r.state.is_terminal() && r.updated_at <= cutoff)
            .map(|r| r.value().clone())
            .collect();
        stale.sort_by_key(|r| r.updated_at);
        stale.truncate(limit);
        Ok(stale)
    }
}
