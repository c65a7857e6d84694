//! Transaction Ledger Database Layer
//!
//! `transactions_tb` with a unique `transaction_id`. Reservation is a single
//! `INSERT ... ON CONFLICT DO NOTHING`, so concurrent requests for the same
//! id are resolved by the database.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use ulid::Ulid;

use super::{
    LedgerError, NewTransaction, Reservation, TransactionLedger, TransactionRecord,
    TransactionStatus, check_transition, existing_reservation,
};
use crate::core_types::TransactionId;

const SELECT_COLUMNS: &str =
    "id, transaction_id, from_account, to_account, amount, status, created_at, updated_at";

pub struct PgTransactionLedger {
    pool: PgPool,
}

impl PgTransactionLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<TransactionRecord, LedgerError> {
        let id: String = row.try_get("id")?;
        let id = id
            .parse::<Ulid>()
            .map_err(|e| LedgerError::Storage(format!("Invalid ledger row id: {}", e)))?;
        let status: String = row.try_get("status")?;
        let status = TransactionStatus::parse(&status)
            .ok_or_else(|| LedgerError::Storage(format!("Invalid status: {}", status)))?;
        let transaction_id: String = row.try_get("transaction_id")?;
        let amount: Decimal = row.try_get("amount")?;

        Ok(TransactionRecord {
            id,
            transaction_id: transaction_id.into(),
            from_account: row.try_get("from_account")?,
            to_account: row.try_get("to_account")?,
            amount,
            status,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn transition(
        &self,
        transaction_id: &TransactionId,
        target: TransactionStatus,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE transactions_tb
            SET status = $1, updated_at = NOW()
            WHERE transaction_id = $2 AND status = $3
            "#,
        )
        .bind(target.as_str())
        .bind(transaction_id.as_str())
        .bind(TransactionStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        // Not PENDING: either already in target, terminal the other way, or absent
        let current = self
            .get(transaction_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(transaction_id.clone()))?;
        check_transition(current.status, target).map(|_| ())
    }
}

#[async_trait]
impl TransactionLedger for PgTransactionLedger {
    async fn check_and_reserve(&self, tx: NewTransaction) -> Result<Reservation, LedgerError> {
        let pending = tx.into_pending();

        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO transactions_tb
                (id, transaction_id, from_account, to_account, amount, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
            ON CONFLICT (transaction_id) DO NOTHING
            RETURNING {}
            "#,
            SELECT_COLUMNS
        ))
        .bind(pending.id.to_string())
        .bind(pending.transaction_id.as_str())
        .bind(pending.from_account)
        .bind(pending.to_account)
        .bind(pending.amount)
        .bind(TransactionStatus::Pending.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(Reservation::Proceed(Self::row_to_record(&row)?));
        }

        let existing = self
            .get(&pending.transaction_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(pending.transaction_id.clone()))?;
        existing_reservation(existing)
    }

    async fn mark_completed(&self, transaction_id: &TransactionId) -> Result<(), LedgerError> {
        self.transition(transaction_id, TransactionStatus::Completed)
            .await
    }

    async fn mark_failed(&self, transaction_id: &TransactionId) -> Result<(), LedgerError> {
        self.transition(transaction_id, TransactionStatus::Failed)
            .await
    }

    async fn get(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<TransactionRecord>, LedgerError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions_tb WHERE transaction_id = $1",
            SELECT_COLUMNS
        ))
        .bind(transaction_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }
}
