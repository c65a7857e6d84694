//! Fund Transfer - exactly-once transfers between accounts
//!
//! Two independent implementations of the same transfer contract.
//!
//! # Modules
//!
//! - [`core_types`] - Account and transaction identifiers, amount checks
//! - [`account`] - Event-sourced account aggregate, event log, command handling
//! - [`saga`] - Transfer saga driving credit and compensation
//! - [`ledger`] - Transaction ledger (idempotency gate)
//! - [`balance`] - Materialized balance rows and units of work
//! - [`transfer`] - Direct transfer orchestrator with pessimistic/optimistic locking
//! - [`config`] - YAML application config
//! - [`logging`] - tracing subscriber setup
//! - [`db`] - PostgreSQL pool and schema
//!
//! ```text
//! event-sourced:  AccountService ─► AccountCommandHandler ─► EventLog
//!                                            │ MoneyDebited / MoneyCredited
//!                                            ▼
//!                                       SagaManager ─► Credit / Compensate
//!
//! direct:         TransferOrchestrator ─► TransactionLedger
//!                                     └─► BalanceStore (unit of work)
//! ```

// Core types - must be first!
pub mod core_types;

pub mod account;
pub mod balance;
pub mod ledger;
pub mod saga;
pub mod transfer;

pub mod config;
pub mod db;
pub mod logging;

// Convenient re-exports at crate root
pub use account::{
    AccountCommand, AccountCommandHandler, AccountError, AccountEvent, AccountService, EventBus,
    EventLog, InMemoryEventLog, PgEventLog,
};
pub use balance::{
    BalanceError, BalanceProvider, BalanceRecord, BalanceStore, EventSourcedBalances,
    InMemoryBalanceStore, MaterializedBalances, PgBalanceStore,
};
pub use core_types::{AccountId, BalanceAccountId, TransactionId};
pub use ledger::{
    InMemoryTransactionLedger, LedgerError, PgTransactionLedger, TransactionLedger,
    TransactionRecord, TransactionStatus,
};
pub use saga::{
    InMemorySagaStore, PgSagaStore, SagaManager, SagaRecoveryWorker, SagaState, SagaStats,
    SagaStore,
};
pub use transfer::{
    LockMode, LoggingNotifier, Notifier, RetryPolicy, TransferError, TransferOrchestrator,
};
