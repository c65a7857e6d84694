//! Saga Recovery Worker
//!
//! Periodically finds sagas that have not moved for a while and posts a
//! `Resume` fact for each. The saga manager decides what resuming means
//! for the stored state.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::error::SagaError;
use super::facts::SagaFact;
use super::manager::SagaHandle;
use super::state::SagaState;
use super::store::SagaStore;

/// Sagas redelivered this many times are flagged loudly
const RETRY_ALERT_THRESHOLD: i32 = 10;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to scan
    pub scan_interval: Duration,
    /// How long a saga must sit untouched to be considered stale
    pub stale_threshold: Duration,
    /// Maximum sagas resumed per scan
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(30),
            stale_threshold: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

pub struct SagaRecoveryWorker {
    store: Arc<dyn SagaStore>,
    saga: SagaHandle,
    config: WorkerConfig,
}

impl SagaRecoveryWorker {
    pub fn new(store: Arc<dyn SagaStore>, saga: SagaHandle, config: WorkerConfig) -> Self {
        Self {
            store,
            saga,
            config,
        }
    }

    /// Runs forever
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_secs = self.config.scan_interval.as_secs(),
            stale_threshold_secs = self.config.stale_threshold.as_secs(),
            "Starting saga recovery worker"
        );

        loop {
            if let Err(e) = self.scan_and_recover().await {
                error!(error = %e, "Saga recovery scan failed");
            }
            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// One scan; returns how many sagas were resumed
    pub async fn scan_and_recover(&self) -> Result<usize, SagaError> {
        let stale = self
            .store
            .find_stale(self.config.stale_threshold, self.config.batch_size)
            .await?;

        if stale.is_empty() {
            debug!("No stale sagas found");
            return Ok(0);
        }
        info!(count = stale.len(), "Found stale sagas to recover");

        let mut resumed = 0;
        for record in &stale {
            if record.state == SagaState::CreditDispatched
                && record.retry_count > RETRY_ALERT_THRESHOLD
            {
                warn!(
                    transaction_id = %record.transaction_id,
                    retry_count = record.retry_count,
                    "CRITICAL: saga stuck in CREDIT_DISPATCHED with many retries"
                );
            }

            self.saga.submit(SagaFact::Resume {
                transaction_id: record.transaction_id.clone(),
            })?;
            resumed += 1;
        }

        Ok(resumed)
    }
}
