//! Transfer Saga
//!
//! Per-transaction state machine driven by facts, issuing commands.
//!
//! # Safety Invariants
//!
//! 1. **Persist-Before-Call**: the saga record moves to CREDIT_DISPATCHED or
//!    COMPENSATING before the corresponding command is sent
//! 2. **Explicit Fail Rule**: only an explicit rejection of the forward credit
//!    triggers compensation. An unknown outcome leaves the saga in
//!    CREDIT_DISPATCHED for the recovery worker to redeliver
//! 3. **Never Re-debit**: the source debit is the saga's trigger and is never
//!    re-issued; only the forward credit can fail and be compensated
//! 4. **Deterministic Compensation Id**: the refund uses `T-compensation`, so
//!    redelivering it is a no-op on the source account

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::error::SagaError;
use super::facts::SagaFact;
use super::state::SagaState;
use super::stats::SagaStats;
use super::store::{SagaRecord, SagaStore};
use crate::account::{AccountCommand, CommandChannel};
use crate::core_types::{AccountId, TransactionId};

pub struct TransferSaga {
    store: Arc<dyn SagaStore>,
    commands: Arc<dyn CommandChannel>,
    /// Dispatch outcomes are fed back as facts through here
    outcomes: mpsc::UnboundedSender<SagaFact>,
    stats: Arc<SagaStats>,
    retry_compensation: bool,
}

impl TransferSaga {
    pub fn new(
        store: Arc<dyn SagaStore>,
        commands: Arc<dyn CommandChannel>,
        outcomes: mpsc::UnboundedSender<SagaFact>,
        stats: Arc<SagaStats>,
    ) -> Self {
        Self {
            store,
            commands,
            outcomes,
            stats,
            retry_compensation: false,
        }
    }

    /// Let recovery re-send a compensation that never resolved
    pub fn set_retry_compensation(&mut self, enabled: bool) {
        self.retry_compensation = enabled;
    }

    pub fn store(&self) -> &Arc<dyn SagaStore> {
        &self.store
    }

    pub fn stats(&self) -> &Arc<SagaStats> {
        &self.stats
    }

    /// Handle one fact.
    ///
    /// Returns the saga's state afterwards, or `None` if the fact does not
    /// belong to any saga (e.g. a plain deposit).
    pub async fn handle(&self, fact: SagaFact) -> Result<Option<SagaState>, SagaError> {
        match fact {
            SagaFact::Debited {
                transaction_id,
                source,
                target,
                amount,
            } => {
                self.on_debited(transaction_id, source, target, amount)
                    .await
            }
            SagaFact::Credited { transaction_id } => self.on_credited(&transaction_id).await,
            SagaFact::CreditFailed {
                transaction_id,
                reason,
            } => self.on_credit_failed(&transaction_id, &reason).await,
            SagaFact::CompensationCompleted { transaction_id } => {
                self.on_compensation_completed(&transaction_id).await
            }
            SagaFact::CompensationFailed {
                transaction_id,
                reason,
            } => self.on_compensation_failed(&transaction_id, &reason).await,
            SagaFact::Resume { transaction_id } => self.on_resume(&transaction_id).await,
        }
    }

    async fn on_debited(
        &self,
        transaction_id: TransactionId,
        source: AccountId,
        target: AccountId,
        amount: Decimal,
    ) -> Result<Option<SagaState>, SagaError> {
        let record = SagaRecord::new(transaction_id.clone(), source, target, amount);

        if !self.store.create(&record).await? {
            debug!(transaction_id = %transaction_id, "Saga already exists (redelivered debit)");
            return self.current_state(&transaction_id).await;
        }
        SagaStats::incr(&self.stats.started);

        if !self
            .store
            .update_state_if(
                &transaction_id,
                SagaState::Started,
                SagaState::CreditDispatched,
            )
            .await?
        {
            return self.current_state(&transaction_id).await;
        }

        info!(
            transaction_id = %transaction_id,
            source = %record.source,
            target = %record.target,
            amount = %record.amount,
            "Transfer saga started, dispatching credit"
        );
        self.dispatch_credit(&record);
        Ok(Some(SagaState::CreditDispatched))
    }

    async fn on_credited(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<SagaState>, SagaError> {
        let Some(record) = self.store.get(transaction_id).await? else {
            debug!(transaction_id = %transaction_id, "Credit outside any saga, ignoring");
            return Ok(None);
        };

        match record.state {
            SagaState::CreditDispatched => {
                if self
                    .store
                    .update_state_if(
                        transaction_id,
                        SagaState::CreditDispatched,
                        SagaState::Completed,
                    )
                    .await?
                {
                    SagaStats::incr(&self.stats.completed);
                    info!(transaction_id = %transaction_id, "Transfer saga completed");
                    return Ok(Some(SagaState::Completed));
                }
                self.current_state(transaction_id).await
            }
            SagaState::Compensating | SagaState::Compensated => {
                error!(
                    transaction_id = %transaction_id,
                    state = %record.state,
                    "Forward credit applied after compensation started"
                );
                Ok(Some(record.state))
            }
            state => Ok(Some(state)),
        }
    }

    async fn on_credit_failed(
        &self,
        transaction_id: &TransactionId,
        reason: &str,
    ) -> Result<Option<SagaState>, SagaError> {
        if !self
            .store
            .update_state_with_error(
                transaction_id,
                SagaState::CreditDispatched,
                SagaState::Compensating,
                reason,
            )
            .await?
        {
            debug!(transaction_id = %transaction_id, "Credit failure for saga not awaiting credit");
            return self.current_state(transaction_id).await;
        }
        SagaStats::incr(&self.stats.credit_failures);

        let record = self
            .store
            .get(transaction_id)
            .await?
            .ok_or_else(|| SagaError::NotFound(transaction_id.clone()))?;

        warn!(
            transaction_id = %transaction_id,
            reason = reason,
            "Forward credit failed, compensating source"
        );
        self.dispatch_compensation(&record);
        Ok(Some(SagaState::Compensating))
    }

    async fn on_compensation_completed(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<SagaState>, SagaError> {
        if self
            .store
            .update_state_if(
                transaction_id,
                SagaState::Compensating,
                SagaState::Compensated,
            )
            .await?
        {
            SagaStats::incr(&self.stats.compensated);
            info!(transaction_id = %transaction_id, "Transfer saga compensated");
            return Ok(Some(SagaState::Compensated));
        }
        self.current_state(transaction_id).await
    }

    async fn on_compensation_failed(
        &self,
        transaction_id: &TransactionId,
        reason: &str,
    ) -> Result<Option<SagaState>, SagaError> {
        SagaStats::incr(&self.stats.compensation_failures);
        error!(
            transaction_id = %transaction_id,
            reason = reason,
            "Compensation failed, saga remains COMPENSATING"
        );
        self.store
            .record_error(transaction_id, &format!("compensation failed: {}", reason))
            .await?;
        self.current_state(transaction_id).await
    }

    async fn on_resume(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<SagaState>, SagaError> {
        let Some(record) = self.store.get(transaction_id).await? else {
            return Err(SagaError::NotFound(transaction_id.clone()));
        };

        match record.state {
            SagaState::Started => {
                if !self
                    .store
                    .update_state_if(
                        transaction_id,
                        SagaState::Started,
                        SagaState::CreditDispatched,
                    )
                    .await?
                {
                    return self.current_state(transaction_id).await;
                }
                self.redispatch_credit(&record).await?;
                Ok(Some(SagaState::CreditDispatched))
            }
            SagaState::CreditDispatched => {
                self.redispatch_credit(&record).await?;
                Ok(Some(SagaState::CreditDispatched))
            }
            SagaState::Compensating => {
                SagaStats::incr(&self.stats.stuck_compensations);
                warn!(
                    transaction_id = %transaction_id,
                    retry_count = record.retry_count,
                    error = record.error.as_deref().unwrap_or(""),
                    "Saga stuck in COMPENSATING"
                );
                if self.retry_compensation {
                    self.store.increment_retry(transaction_id).await?;
                    self.dispatch_compensation(&record);
                }
                Ok(Some(SagaState::Compensating))
            }
            state => Ok(Some(state)),
        }
    }

    async fn redispatch_credit(&self, record: &SagaRecord) -> Result<(), SagaError> {
        self.store.increment_retry(&record.transaction_id).await?;
        SagaStats::incr(&self.stats.redispatches);
        info!(
            transaction_id = %record.transaction_id,
            retry_count = record.retry_count + 1,
            "Redelivering forward credit"
        );
        self.dispatch_credit(record);
        Ok(())
    }

    async fn current_state(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<SagaState>, SagaError> {
        Ok(self.store.get(transaction_id).await?.map(|r| r.state))
    }

    /// Send `Credit(target, source, amount, T)` without waiting.
    ///
    /// Success surfaces as a `MoneyCredited` event on the bus; an explicit
    /// rejection comes back as `CreditFailed`.
    fn dispatch_credit(&self, record: &SagaRecord) {
        let command = AccountCommand::Credit {
            account_id: record.target.clone(),
            counterparty_id: record.source.clone(),
            amount: record.amount,
            transaction_id: record.transaction_id.clone(),
        };
        let transaction_id = record.transaction_id.clone();
        let commands = self.commands.clone();
        let outcomes = self.outcomes.clone();

        tokio::spawn(async move {
            match commands.dispatch(command).await {
                Ok(receipt) => {
                    debug!(
                        transaction_id = %transaction_id,
                        applied = receipt.applied,
                        "Forward credit accepted"
                    );
                    // Already applied earlier: no event follows, report it here
                    if !receipt.applied {
                        report(&outcomes, SagaFact::Credited { transaction_id });
                    }
                }
                Err(e) if e.is_explicit_fail() => {
                    report(
                        &outcomes,
                        SagaFact::CreditFailed {
                            transaction_id,
                            reason: e.to_string(),
                        },
                    );
                }
                Err(e) => {
                    warn!(
                        transaction_id = %transaction_id,
                        error = %e,
                        "Forward credit outcome unknown, left for recovery"
                    );
                }
            }
        });
    }

    /// Send `Credit(source, target, amount, T-compensation)` without waiting.
    fn dispatch_compensation(&self, record: &SagaRecord) {
        let command = AccountCommand::Credit {
            account_id: record.source.clone(),
            counterparty_id: record.target.clone(),
            amount: record.amount,
            transaction_id: record.transaction_id.compensation(),
        };
        let transaction_id = record.transaction_id.clone();
        let commands = self.commands.clone();
        let outcomes = self.outcomes.clone();

        tokio::spawn(async move {
            match commands.dispatch(command).await {
                Ok(receipt) => {
                    debug!(
                        transaction_id = %transaction_id,
                        applied = receipt.applied,
                        "Compensation accepted"
                    );
                    if !receipt.applied {
                        report(&outcomes, SagaFact::CompensationCompleted { transaction_id });
                    }
                }
                Err(e) if e.is_explicit_fail() => {
                    report(
                        &outcomes,
                        SagaFact::CompensationFailed {
                            transaction_id,
                            reason: e.to_string(),
                        },
                    );
                }
                Err(e) => {
                    warn!(
                        transaction_id = %transaction_id,
                        error = %e,
                        "Compensation outcome unknown"
                    );
                }
            }
        });
    }
}

/// Feed a dispatch outcome back to the manager
fn report(outcomes: &mpsc::UnboundedSender<SagaFact>, fact: SagaFact) {
    if let Err(lost) = outcomes.send(fact) {
        warn!(
            transaction_id = %lost.0.transaction_id(),
            fact = lost.0.name(),
            "Saga manager stopped, outcome dropped and left for recovery"
        );
    }
}
