//! Transfer lifecycle events
//!
//! Published on a broadcast channel as the direct path progresses.
//! Having no subscribers is fine; publishing never affects the outcome.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core_types::{BalanceAccountId, TransactionId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TransferEvent {
    TransactionCreated {
        transaction_id: TransactionId,
        from_account: BalanceAccountId,
        to_account: BalanceAccountId,
        amount: Decimal,
    },
    FundsTransferred {
        transaction_id: TransactionId,
        from_account: BalanceAccountId,
        to_account: BalanceAccountId,
        amount: Decimal,
    },
    TransactionCompleted {
        transaction_id: TransactionId,
    },
    TransactionFailed {
        transaction_id: TransactionId,
        reason: String,
    },
}

impl TransferEvent {
    pub fn transaction_id(&self) -> &TransactionId {
        match self {
            TransferEvent::TransactionCreated { transaction_id, .. }
            | TransferEvent::FundsTransferred { transaction_id, .. }
            | TransferEvent::TransactionCompleted { transaction_id }
            | TransferEvent::TransactionFailed { transaction_id, .. } => transaction_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TransferEvent::TransactionCreated { .. } => "TransactionCreated",
            TransferEvent::FundsTransferred { .. } => "FundsTransferred",
            TransferEvent::TransactionCompleted { .. } => "TransactionCompleted",
            TransferEvent::TransactionFailed { .. } => "TransactionFailed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransferEvents {
    sender: broadcast::Sender<TransferEvent>,
}

impl TransferEvents {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: TransferEvent) {
        // Err only means nobody is listening
        let _ = self.sender.send(event);
    }
}

impl Default for TransferEvents {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Log every lifecycle event until the channel closes
pub fn spawn_lifecycle_listener(events: &TransferEvents) -> JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(TransferEvent::TransactionFailed {
                    transaction_id,
                    reason,
                }) => {
                    warn!(transaction_id = %transaction_id, reason = %reason, "Transaction failed");
                }
                Ok(event) => {
                    info!(
                        transaction_id = %event.transaction_id(),
                        event = event.name(),
                        "Transfer lifecycle event"
                    );
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Lifecycle listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
