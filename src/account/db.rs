//! Event Log Database Layer
//!
//! PostgreSQL-backed event streams. The `(stream_id, version)` primary key
//! is the conflict detector: a second writer at the same version hits a
//! unique violation and gets `WriteConflict`.

use async_trait::async_trait;
use sqlx::{PgPool, Row};

use super::error::EventLogError;
use super::event_log::EventLog;
use super::events::{AccountEvent, RecordedEvent};
use crate::core_types::AccountId;

/// PostgreSQL event log over `account_events_tb`
pub struct PgEventLog {
    pool: PgPool,
}

impl PgEventLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventLog for PgEventLog {
    async fn append(
        &self,
        stream_id: &AccountId,
        expected_version: u64,
        events: Vec<AccountEvent>,
    ) -> Result<u64, EventLogError> {
        let mut tx = self.pool.begin().await?;

        let actual: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM account_events_tb WHERE stream_id = $1",
        )
        .bind(stream_id.as_str())
        .fetch_one(&mut *tx)
        .await?;

        if actual as u64 != expected_version {
            tx.rollback().await?;
            return Err(EventLogError::WriteConflict {
                stream_id: stream_id.clone(),
                expected: expected_version,
                actual: actual as u64,
            });
        }

        let mut version = expected_version;
        for event in &events {
            version += 1;
            let payload = serde_json::to_string(event)?;
            let inserted = sqlx::query(
                r#"
                INSERT INTO account_events_tb (stream_id, version, event_type, payload, recorded_at)
                VALUES ($1, $2, $3, $4, NOW())
                "#,
            )
            .bind(stream_id.as_str())
            .bind(version as i64)
            .bind(event.event_type())
            .bind(payload)
            .execute(&mut *tx)
            .await;

            match inserted {
                Ok(_) => {}
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                    tx.rollback().await?;
                    return Err(EventLogError::WriteConflict {
                        stream_id: stream_id.clone(),
                        expected: expected_version,
                        actual: version,
                    });
                }
                Err(e) => return Err(e.into()),
            }
        }

        tx.commit().await?;
        Ok(version)
    }

    async fn read_all(&self, stream_id: &AccountId) -> Result<Vec<RecordedEvent>, EventLogError> {
        let rows = sqlx::query(
            r#"
            SELECT version, payload, recorded_at
            FROM account_events_tb
            WHERE stream_id = $1
            ORDER BY version ASC
            "#,
        )
        .bind(stream_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let payload: String = row.try_get("payload")?;
            let version: i64 = row.try_get("version")?;
            events.push(RecordedEvent {
                stream_id: stream_id.clone(),
                version: version as u64,
                event: serde_json::from_str(&payload)?,
                recorded_at: row.try_get("recorded_at")?,
            });
        }

        Ok(events)
    }
}
