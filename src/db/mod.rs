//! Database connection management

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};

/// Tables for every PostgreSQL-backed store
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS account_events_tb (
        stream_id   TEXT        NOT NULL,
        version     BIGINT      NOT NULL,
        event_type  TEXT        NOT NULL,
        payload     TEXT        NOT NULL,
        recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (stream_id, version)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transfer_sagas_tb (
        transaction_id TEXT PRIMARY KEY,
        source_account TEXT          NOT NULL,
        target_account TEXT          NOT NULL,
        amount         NUMERIC(38,18) NOT NULL CHECK (amount > 0),
        state          SMALLINT      NOT NULL,
        error_message  TEXT,
        retry_count    INTEGER       NOT NULL DEFAULT 0,
        created_at     TIMESTAMPTZ   NOT NULL DEFAULT NOW(),
        updated_at     TIMESTAMPTZ   NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_transfer_sagas_stale ON transfer_sagas_tb (state, updated_at)",
    r#"
    CREATE TABLE IF NOT EXISTS transactions_tb (
        id             TEXT PRIMARY KEY,
        transaction_id TEXT          NOT NULL UNIQUE,
        from_account   BIGINT        NOT NULL,
        to_account     BIGINT        NOT NULL,
        amount         NUMERIC(38,18) NOT NULL,
        status         TEXT          NOT NULL CHECK (status IN ('PENDING', 'COMPLETED', 'FAILED')),
        created_at     TIMESTAMPTZ   NOT NULL DEFAULT NOW(),
        updated_at     TIMESTAMPTZ   NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS balances_tb (
        account_id BIGINT PRIMARY KEY,
        amount     NUMERIC(38,18) NOT NULL CHECK (amount >= 0),
        version    BIGINT        NOT NULL DEFAULT 0,
        updated_at TIMESTAMPTZ   NOT NULL DEFAULT NOW()
    )
    "#,
];

/// PostgreSQL database connection pool
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(50)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        tracing::info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Create missing tables. Safe to run on every start.
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!("Database schema ready");
    Ok(())
}
