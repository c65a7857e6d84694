//! Saga Manager
//!
//! Single consumer of saga facts. Account events arrive from the event bus,
//! dispatch outcomes and recovery requests from the fact channel. Facts are
//! processed one at a time so a saga record is only ever advanced by this
//! task.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::error::SagaError;
use super::facts::SagaFact;
use super::stats::SagaStats;
use super::store::SagaStore;
use super::transfer_saga::TransferSaga;
use crate::account::{CommandChannel, EventBus, RecordedEvent};

/// Cloneable handle for posting facts to a running manager
#[derive(Clone)]
pub struct SagaHandle {
    facts_tx: mpsc::UnboundedSender<SagaFact>,
}

impl SagaHandle {
    /// Wrap a raw fact sender, for callers that run their own consumer
    pub fn from_sender(facts_tx: mpsc::UnboundedSender<SagaFact>) -> Self {
        Self { facts_tx }
    }

    pub fn submit(&self, fact: SagaFact) -> Result<(), SagaError> {
        self.facts_tx
            .send(fact)
            .map_err(|_| SagaError::ManagerStopped)
    }
}

pub struct SagaManager {
    saga: TransferSaga,
    facts_tx: mpsc::UnboundedSender<SagaFact>,
    facts_rx: mpsc::UnboundedReceiver<SagaFact>,
    events_rx: mpsc::UnboundedReceiver<RecordedEvent>,
}

impl SagaManager {
    /// Subscribe to `bus` and prepare a manager. Nothing runs until
    /// [`SagaManager::run`] or [`SagaManager::spawn`].
    pub fn new(
        store: Arc<dyn SagaStore>,
        commands: Arc<dyn CommandChannel>,
        bus: &EventBus,
        stats: Arc<SagaStats>,
    ) -> Self {
        let (facts_tx, facts_rx) = mpsc::unbounded_channel();
        let saga = TransferSaga::new(store, commands, facts_tx.clone(), stats);
        Self {
            saga,
            facts_tx,
            facts_rx,
            events_rx: bus.subscribe(),
        }
    }

    pub fn with_compensation_retry(mut self, enabled: bool) -> Self {
        self.saga.set_retry_compensation(enabled);
        self
    }

    pub fn handle(&self) -> SagaHandle {
        SagaHandle {
            facts_tx: self.facts_tx.clone(),
        }
    }

    pub fn stats(&self) -> Arc<SagaStats> {
        self.saga.stats().clone()
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process facts until the event bus is gone
    pub async fn run(mut self) {
        info!("Saga manager started");

        loop {
            let fact = tokio::select! {
                event = self.events_rx.recv() => match event {
                    Some(event) => SagaFact::from_event(&event),
                    None => break,
                },
                Some(fact) = self.facts_rx.recv() => Some(fact),
            };

            if let Some(fact) = fact {
                self.process(fact).await;
            }
        }

        // Drain outcomes already posted before stopping
        while let Ok(fact) = self.facts_rx.try_recv() {
            self.process(fact).await;
        }
        info!("Saga manager stopped: {}", self.saga.stats().snapshot());
    }

    async fn process(&self, fact: SagaFact) {
        let transaction_id = fact.transaction_id().clone();
        let name = fact.name();

        match self.saga.handle(fact).await {
            Ok(state) => {
                debug!(
                    transaction_id = %transaction_id,
                    fact = name,
                    state = ?state,
                    "Saga fact processed"
                );
            }
            Err(e) => {
                error!(
                    transaction_id = %transaction_id,
                    fact = name,
                    error = %e,
                    "Saga fact failed"
                );
            }
        }
    }
}
