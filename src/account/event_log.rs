//! Event Log
//!
//! Append-only per-account streams with optimistic concurrency on append.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

use super::error::EventLogError;
use super::events::{AccountEvent, RecordedEvent};
use crate::core_types::AccountId;

/// Durable ordered event streams keyed by account id
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Append events to a stream.
    ///
    /// `expected_version` is the version the caller replayed (0 for a new
    /// stream). Fails with `WriteConflict` if another writer got there first.
    /// Returns the stream version after the append.
    async fn append(
        &self,
        stream_id: &AccountId,
        expected_version: u64,
        events: Vec<AccountEvent>,
    ) -> Result<u64, EventLogError>;

    /// Load the whole stream, oldest first. Unknown streams are empty.
    async fn read_all(&self, stream_id: &AccountId) -> Result<Vec<RecordedEvent>, EventLogError>;
}

/// In-memory event log
#[derive(Default)]
pub struct InMemoryEventLog {
    streams: DashMap<AccountId, Vec<RecordedEvent>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of streams holding at least one event
    pub fn stream_count(&self) -> usize {
        self.streams.iter().filter(|s| !s.value().is_empty()).count()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(
        &self,
        stream_id: &AccountId,
        expected_version: u64,
        events: Vec<AccountEvent>,
    ) -> Result<u64, EventLogError> {
        // The entry guard holds the shard lock for the whole check-and-append
        let mut stream = self.streams.entry(stream_id.clone()).or_default();
        let actual = stream.len() as u64;
        if actual != expected_version {
            return Err(EventLogError::WriteConflict {
                stream_id: stream_id.clone(),
                expected: expected_version,
                actual,
            });
        }

        let now = Utc::now();
        for event in events {
            let version = stream.len() as u64 + 1;
            stream.push(RecordedEvent {
                stream_id: stream_id.clone(),
                version,
                event,
                recorded_at: now,
            });
        }

        Ok(stream.len() as u64)
    }

    async fn read_all(&self, stream_id: &AccountId) -> Result<Vec<RecordedEvent>, EventLogError> {
        Ok(self
            .streams
            .get(stream_id)
            .map(|s| s.value().clone())
            .unwrap_or_default())
    }
}
