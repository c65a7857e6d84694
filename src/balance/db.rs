//! Balance Database Layer
//!
//! `balances_tb` rows. A unit of work is one PostgreSQL transaction:
//! `read_for_update` is `SELECT ... FOR UPDATE` and optimistic writes are
//! `UPDATE ... WHERE version = $expected`.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Row, Transaction};

use super::{BalanceError, BalanceRecord, BalanceStore, BalanceUnitOfWork};
use crate::core_types::{BalanceAccountId, is_valid_initial_balance};

fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<BalanceRecord, BalanceError> {
    Ok(BalanceRecord::new(
        row.try_get("account_id")?,
        row.try_get("amount")?,
        row.try_get("version")?,
        row.try_get("updated_at")?,
    ))
}

pub struct PgBalanceStore {
    pool: PgPool,
}

impl PgBalanceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BalanceStore for PgBalanceStore {
    async fn begin(&self) -> Result<Box<dyn BalanceUnitOfWork>, BalanceError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnitOfWork { tx: Some(tx) }))
    }

    async fn get(
        &self,
        account_id: BalanceAccountId,
    ) -> Result<Option<BalanceRecord>, BalanceError> {
        let row = sqlx::query(
            "SELECT account_id, amount, version, updated_at FROM balances_tb WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn create(
        &self,
        account_id: BalanceAccountId,
        initial_amount: Decimal,
    ) -> Result<BalanceRecord, BalanceError> {
        if !is_valid_initial_balance(initial_amount) {
            return Err(BalanceError::InvalidAmount);
        }

        let row = sqlx::query(
            r#"
            INSERT INTO balances_tb (account_id, amount, version, updated_at)
            VALUES ($1, $2, 0, NOW())
            ON CONFLICT (account_id) DO NOTHING
            RETURNING account_id, amount, version, updated_at
            "#,
        )
        .bind(account_id)
        .bind(initial_amount)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_record(&row),
            None => Err(BalanceError::AccountExists(account_id)),
        }
    }
}

pub struct PgUnitOfWork {
    /// `None` once committed or rolled back
    tx: Option<Transaction<'static, Postgres>>,
}

impl PgUnitOfWork {
    fn tx(&mut self) -> Result<&mut Transaction<'static, Postgres>, BalanceError> {
        self.tx
            .as_mut()
            .ok_or_else(|| BalanceError::Storage("unit of work already finished".to_string()))
    }

    async fn select(
        &mut self,
        account_id: BalanceAccountId,
        for_update: bool,
    ) -> Result<BalanceRecord, BalanceError> {
        let sql = if for_update {
            "SELECT account_id, amount, version, updated_at FROM balances_tb WHERE account_id = $1 FOR UPDATE"
        } else {
            "SELECT account_id, amount, version, updated_at FROM balances_tb WHERE account_id = $1"
        };
        let tx = self.tx()?;
        let row = sqlx::query(sql)
            .bind(account_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or(BalanceError::AccountNotFound(account_id))?;
        row_to_record(&row)
    }
}

#[async_trait]
impl BalanceUnitOfWork for PgUnitOfWork {
    async fn read(&mut self, account_id: BalanceAccountId) -> Result<BalanceRecord, BalanceError> {
        self.select(account_id, false).await
    }

    async fn read_for_update(
        &mut self,
        account_id: BalanceAccountId,
    ) -> Result<BalanceRecord, BalanceError> {
        self.select(account_id, true).await
    }

    async fn write_optimistic(
        &mut self,
        account_id: BalanceAccountId,
        new_amount: Decimal,
        expected_version: i64,
    ) -> Result<(), BalanceError> {
        let tx = self.tx()?;
        let result = sqlx::query(
            r#"
            UPDATE balances_tb
            SET amount = $1, version = version + 1, updated_at = NOW()
            WHERE account_id = $2 AND version = $3
            "#,
        )
        .bind(new_amount)
        .bind(account_id)
        .bind(expected_version)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BalanceError::ConcurrencyConflict(account_id));
        }
        Ok(())
    }

    async fn write(
        &mut self,
        account_id: BalanceAccountId,
        new_amount: Decimal,
    ) -> Result<(), BalanceError> {
        let tx = self.tx()?;
        let result = sqlx::query(
            r#"
            UPDATE balances_tb
            SET amount = $1, version = version + 1, updated_at = NOW()
            WHERE account_id = $2
            "#,
        )
        .bind(new_amount)
        .bind(account_id)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BalanceError::AccountNotFound(account_id));
        }
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), BalanceError> {
        match self.tx.take() {
            Some(tx) => Ok(tx.commit().await?),
            None => Err(BalanceError::Storage(
                "unit of work already finished".to_string(),
            )),
        }
    }

    async fn rollback(&mut self) -> Result<(), BalanceError> {
        match self.tx.take() {
            Some(tx) => Ok(tx.rollback().await?),
            None => Ok(()),
        }
    }
}
