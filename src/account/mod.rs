//! Event-Sourced Accounts
//!
//! Each account is an append-only stream of domain events. Current balance
//! is always obtained by replaying that stream.
//!
//! ```text
//! AccountService ──► CommandChannel ──► AccountCommandHandler
//!                                          │ replay → decide → append
//!                                          ▼
//!                                       EventLog ──► EventBus ──► SagaManager
//! ```

pub mod aggregate;
pub mod channel;
pub mod commands;
pub mod db;
pub mod error;
pub mod event_log;
pub mod events;
pub mod handler;
pub mod service;

pub use aggregate::AccountAggregate;
pub use channel::{CommandChannel, CommandError, CommandSender, command_channel, serve_commands};
pub use commands::{AccountCommand, CommandReceipt};
pub use db::PgEventLog;
pub use error::{AccountError, EventLogError};
pub use event_log::{EventLog, InMemoryEventLog};
pub use events::{AccountEvent, RecordedEvent};
pub use handler::{AccountCommandHandler, EventBus};
pub use service::AccountService;
