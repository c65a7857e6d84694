//! Account Command Handler
//!
//! Hosts the aggregate: replay → decide → append → publish.
//!
//! Commands against the same account id are serialized by a per-stream
//! async mutex. The aggregate itself does no locking; the expected-version
//! check on append still catches writers outside this process.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::aggregate::AccountAggregate;
use super::channel::{CommandChannel, CommandError};
use super::commands::{AccountCommand, CommandReceipt};
use super::error::AccountError;
use super::event_log::EventLog;
use super::events::RecordedEvent;
use crate::core_types::AccountId;

/// Fan-out of appended events to in-process subscribers (the saga manager).
///
/// Subscribers get an unbounded queue so a slow consumer never drops facts.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<RecordedEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<RecordedEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|p| p.into_inner());
        subscribers.push(tx);
        rx
    }

    /// Deliver to every live subscriber; closed subscribers are dropped.
    pub fn publish(&self, event: &RecordedEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|p| p.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }
}

/// Executes account commands against the event log
pub struct AccountCommandHandler {
    log: Arc<dyn EventLog>,
    bus: EventBus,
    stream_locks: DashMap<AccountId, Arc<tokio::sync::Mutex<()>>>,
}

impl AccountCommandHandler {
    pub fn new(log: Arc<dyn EventLog>, bus: EventBus) -> Self {
        Self {
            log,
            bus,
            stream_locks: DashMap::new(),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn event_log(&self) -> &Arc<dyn EventLog> {
        &self.log
    }

    /// Handle one command to completion
    pub async fn handle(&self, command: AccountCommand) -> Result<CommandReceipt, AccountError> {
        let account_id = command.account_id().clone();
        let lock = self
            .stream_locks
            .entry(account_id.clone())
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        let history = self.log.read_all(&account_id).await?;
        let state = AccountAggregate::replay(&account_id, &history)?;
        let expected_version = state.as_ref().map(|s| s.version()).unwrap_or(0);

        let events = match AccountAggregate::decide(state.as_ref(), &command) {
            Ok(events) => events,
            Err(e) => {
                debug!(
                    account_id = %account_id,
                    command = command.name(),
                    error = %e,
                    "Command rejected"
                );
                return Err(e);
            }
        };

        if events.is_empty() {
            debug!(
                account_id = %account_id,
                command = command.name(),
                "Command already applied (redelivery)"
            );
            let balance = state.as_ref().map(|s| s.balance()).unwrap_or_default();
            return Ok(CommandReceipt {
                account_id,
                version: expected_version,
                balance,
                applied: false,
            });
        }

        let next = AccountAggregate::apply_new(&account_id, state, &events)?
            .ok_or_else(|| AccountError::AccountNotFound(account_id.clone()))?;

        let version = match self
            .log
            .append(&account_id, expected_version, events.clone())
            .await
        {
            Ok(v) => v,
            Err(e) => {
                warn!(account_id = %account_id, error = %e, "Append failed");
                return Err(e.into());
            }
        };

        let first_version = version - events.len() as u64 + 1;
        let now = chrono::Utc::now();
        for (offset, event) in events.into_iter().enumerate() {
            self.bus.publish(&RecordedEvent {
                stream_id: account_id.clone(),
                version: first_version + offset as u64,
                event,
                recorded_at: now,
            });
        }

        debug!(
            account_id = %account_id,
            command = command.name(),
            version = version,
            balance = %next.balance(),
            "Command applied"
        );

        Ok(CommandReceipt {
            account_id,
            version,
            balance: next.balance(),
            applied: true,
        })
    }

    /// Current state by replaying the stream
    pub async fn load(&self, account_id: &AccountId) -> Result<Option<AccountAggregate>, AccountError> {
        let history = self.log.read_all(account_id).await?;
        AccountAggregate::replay(account_id, &history)
    }
}

#[async_trait]
impl CommandChannel for AccountCommandHandler {
    async fn dispatch(&self, command: AccountCommand) -> Result<CommandReceipt, CommandError> {
        self.handle(command).await.map_err(CommandError::from)
    }
}
