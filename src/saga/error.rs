//! Saga Error Types

use thiserror::Error;

use super::state::SagaState;
use crate::core_types::TransactionId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SagaError {
    #[error("Saga not found: {0}")]
    NotFound(TransactionId),

    #[error("Saga {transaction_id} cannot move from {from} to {to}")]
    InvalidStateTransition {
        transaction_id: TransactionId,
        from: SagaState,
        to: SagaState,
    },

    #[error("Saga manager stopped")]
    ManagerStopped,

    #[error("Saga storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for SagaError {
    fn from(e: sqlx::Error) -> Self {
        SagaError::Storage(e.to_string())
    }
}
