//! Transfer Saga
//!
//! Drives the credit leg of an event-sourced transfer after its debit has
//! been applied, and compensates the source when the credit is rejected.
//!
//! ```text
//! STARTED ──► CREDIT_DISPATCHED ──► COMPLETED
//!                    │
//!                    ▼ (credit rejected)
//!              COMPENSATING ──► COMPENSATED
//! ```

pub mod db;
pub mod error;
pub mod facts;
pub mod manager;
pub mod state;
pub mod stats;
pub mod store;
pub mod transfer_saga;
pub mod worker;

pub use db::PgSagaStore;
pub use error::SagaError;
pub use facts::SagaFact;
pub use manager::{SagaHandle, SagaManager};
pub use state::SagaState;
pub use stats::{SagaStats, SagaStatsSnapshot};
pub use store::{InMemorySagaStore, SagaRecord, SagaStore};
pub use transfer_saga::TransferSaga;
pub use worker::{SagaRecoveryWorker, WorkerConfig};
