//! In-memory transaction ledger

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::{
    LedgerError, NewTransaction, Reservation, TransactionLedger, TransactionRecord,
    TransactionStatus, check_transition, existing_reservation,
};
use crate::core_types::TransactionId;

#[derive(Default)]
pub struct InMemoryTransactionLedger {
    records: DashMap<TransactionId, TransactionRecord>,
}

impl InMemoryTransactionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn transition(
        &self,
        transaction_id: &TransactionId,
        target: TransactionStatus,
    ) -> Result<(), LedgerError> {
        let mut record = self
            .records
            .get_mut(transaction_id)
            .ok_or_else(|| LedgerError::NotFound(transaction_id.clone()))?;
        if check_transition(record.status, target)? {
            record.status = target;
            record.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionLedger for InMemoryTransactionLedger {
    async fn check_and_reserve(&self, tx: NewTransaction) -> Result<Reservation, LedgerError> {
        // The entry guard makes check-and-insert atomic per id
        match self.records.entry(tx.transaction_id.clone()) {
            Entry::Occupied(existing) => existing_reservation(existing.get().clone()),
            Entry::Vacant(slot) => {
                let record = tx.into_pending();
                slot.insert(record.clone());
                Ok(Reservation::Proceed(record))
            }
        }
    }

    async fn mark_completed(&self, transaction_id: &TransactionId) -> Result<(), LedgerError> {
        self.transition(transaction_id, TransactionStatus::Completed)
    }

    async fn mark_failed(&self, transaction_id: &TransactionId) -> Result<(), LedgerError> {
        self.transition(transaction_id, TransactionStatus::Failed)
    }

    async fn get(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<TransactionRecord>, LedgerError> {
        Ok(self.records.get(transaction_id).map(|r| r.value().clone()))
    }
}
