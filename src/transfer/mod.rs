//! Direct Transfers
//!
//! Transfers over materialized balance rows, made idempotent by the
//! transaction ledger.
//!
//! # Safety Invariants
//!
//! 1. **Reserve First**: nothing touches a balance before the transaction id
//!    is reserved as PENDING
//! 2. **Atomic Legs**: debit and credit commit in one unit of work or not at all
//! 3. **Terminal Outcome**: every attempt past the reservation ends COMPLETED
//!    or FAILED in the ledger
//! 4. **No Silent Retry**: an optimistic-lock conflict is surfaced unless a
//!    retry policy says otherwise

pub mod error;
pub mod events;
pub mod notifier;
pub mod orchestrator;

pub use error::TransferError;
pub use events::{TransferEvent, TransferEvents, spawn_lifecycle_listener};
pub use notifier::{LoggingNotifier, Notifier};
pub use orchestrator::{LockMode, RetryPolicy, TransferOrchestrator, TransferOutcome};
