//! Saga Database Layer
//!
//! PostgreSQL persistence for saga records so an in-flight transfer
//! survives a process restart. State updates are CAS on `state`.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};

use super::error::SagaError;
use super::state::SagaState;
use super::store::{SagaRecord, SagaStore};
use crate::core_types::TransactionId;

const SELECT_COLUMNS: &str = "transaction_id, source_account, target_account, amount, state, \
                              error_message, retry_count, created_at, updated_at";

pub struct PgSagaStore {
    pool: PgPool,
}

impl PgSagaStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<SagaRecord, SagaError> {
        let state_id: i16 = row.try_get("state")?;
        let state = SagaState::from_id(state_id)
            .ok_or_else(|| SagaError::Storage(format!("Invalid saga state ID: {}", state_id)))?;

        let transaction_id: String = row.try_get("transaction_id")?;
        let source: String = row.try_get("source_account")?;
        let target: String = row.try_get("target_account")?;
        let amount: Decimal = row.try_get("amount")?;

        Ok(SagaRecord {
            transaction_id: transaction_id.into(),
            source: source.into(),
            target: target.into(),
            amount,
            state,
            error: row.try_get("error_message")?,
            retry_count: row.try_get("retry_count")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl SagaStore for PgSagaStore {
    async fn create(&self, record: &SagaRecord) -> Result<bool, SagaError> {
        let result = sqlx::query(
            r#"
            INSERT INTO transfer_sagas_tb
                (transaction_id, source_account, target_account, amount, state, retry_count, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, 0, NOW(), NOW())
            ON CONFLICT (transaction_id) DO NOTHING
            "#,
        )
        .bind(record.transaction_id.as_str())
        .bind(record.source.as_str())
        .bind(record.target.as_str())
        .bind(record.amount)
        .bind(record.state.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, transaction_id: &TransactionId) -> Result<Option<SagaRecord>, SagaError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transfer_sagas_tb WHERE transaction_id = $1",
            SELECT_COLUMNS
        ))
        .bind(transaction_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn update_state_if(
        &self,
        transaction_id: &TransactionId,
        expected: SagaState,
        new_state: SagaState,
    ) -> Result<bool, SagaError> {
        let result = sqlx::query(
            r#"
            UPDATE transfer_sagas_tb
            SET state = $1, updated_at = NOW()
            WHERE transaction_id = $2 AND state = $3
            "#,
        )
        .bind(new_state.id())
        .bind(transaction_id.as_str())
        .bind(expected.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_state_with_error(
        &self,
        transaction_id: &TransactionId,
        expected: SagaState,
        new_state: SagaState,
        error: &str,
    ) -> Result<bool, SagaError> {
        let result = sqlx::query(
            r#"
            UPDATE transfer_sagas_tb
            SET state = $1, error_message = $2, updated_at = NOW()
            WHERE transaction_id = $3 AND state = $4
            "#,
        )
        .bind(new_state.id())
        .bind(error)
        .bind(transaction_id.as_str())
        .bind(expected.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_error(
        &self,
        transaction_id: &TransactionId,
        error: &str,
    ) -> Result<(), SagaError> {
        let result = sqlx::query(
            r#"
            UPDATE transfer_sagas_tb
            SET error_message = $1, updated_at = NOW()
            WHERE transaction_id = $2
            "#,
        )
        .bind(error)
        .bind(transaction_id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SagaError::NotFound(transaction_id.clone()));
        }
        Ok(())
    }

    async fn increment_retry(&self, transaction_id: &TransactionId) -> Result<(), SagaError> {
        let result = sqlx::query(
            r#"
            UPDATE transfer_sagas_tb
            SET retry_count = retry_count + 1, updated_at = NOW()
            WHERE transaction_id = $1
            "#,
        )
        .bind(transaction_id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SagaError::NotFound(transaction_id.clone()));
        }
        Ok(())
    }

    async fn find_stale(
        &self,
        threshold: Duration,
        limit: usize,
    ) -> Result<Vec<SagaRecord>, SagaError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM transfer_sagas_tb
            WHERE state NOT IN ($1, $2)
              AND updated_at <= NOW() - INTERVAL '1 second' * $3
            ORDER BY updated_at ASC
            LIMIT $4
            "#,
            SELECT_COLUMNS
        ))
        .bind(SagaState::Completed.id())
        .bind(SagaState::Compensated.id())
        .bind(threshold.as_secs() as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_record).collect()
    }
}
