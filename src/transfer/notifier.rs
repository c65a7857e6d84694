//! Transfer notifications
//!
//! Out-of-band and fire-and-forget: the orchestrator never waits on a
//! notifier and never sees its errors.

use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::core_types::TransactionId;

pub trait Notifier: Send + Sync {
    /// Must return immediately; delivery happens elsewhere
    fn notify(&self, transaction_id: &TransactionId, amount: Decimal);
}

/// Stands in for e-mail delivery: logs on a spawned task after `delay`
#[derive(Debug, Clone, Default)]
pub struct LoggingNotifier {
    delay: Duration,
}

impl LoggingNotifier {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Notifier for LoggingNotifier {
    fn notify(&self, transaction_id: &TransactionId, amount: Decimal) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(transaction_id = %transaction_id, "No runtime for notification, dropped");
            return;
        };

        let transaction_id = transaction_id.clone();
        let delay = self.delay;
        runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            debug!(
                transaction_id = %transaction_id,
                amount = %amount,
                "Transfer notification sent"
            );
        });
    }
}
