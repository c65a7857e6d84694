//! Command Channel
//!
//! `dispatch(command) -> future<success | failure>`. The saga only sees this
//! trait; commands may arrive in-process or through the queued channel below
//! (mpsc requests, oneshot replies).

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::commands::{AccountCommand, CommandReceipt};
use super::error::AccountError;
use super::handler::AccountCommandHandler;

/// Outcome of a dispatch that did not succeed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The aggregate explicitly refused the command. Safe to compensate.
    #[error("Command rejected: {0}")]
    Rejected(AccountError),

    /// Delivery or reply was lost. The command may or may not have applied.
    #[error("Command channel unavailable: {0}")]
    Unavailable(String),
}

impl CommandError {
    /// Whether the failure is an explicit refusal (as opposed to unknown)
    pub fn is_explicit_fail(&self) -> bool {
        matches!(self, CommandError::Rejected(_))
    }
}

impl From<AccountError> for CommandError {
    fn from(e: AccountError) -> Self {
        match e {
            AccountError::Unavailable(msg) => CommandError::Unavailable(msg),
            // Storage trouble leaves the outcome unknown; a redelivery settles it
            AccountError::Storage(msg) => CommandError::Unavailable(msg),
            AccountError::WriteConflict(id) => {
                CommandError::Unavailable(format!("write conflict on {}", id))
            }
            other => CommandError::Rejected(other),
        }
    }
}

impl From<CommandError> for AccountError {
    fn from(e: CommandError) -> Self {
        match e {
            CommandError::Rejected(inner) => inner,
            CommandError::Unavailable(msg) => AccountError::Unavailable(msg),
        }
    }
}

#[async_trait]
pub trait CommandChannel: Send + Sync {
    async fn dispatch(&self, command: AccountCommand) -> Result<CommandReceipt, CommandError>;
}

/// Queued command with its reply slot
#[derive(Debug)]
pub struct CommandEnvelope {
    pub command: AccountCommand,
    pub response_tx: oneshot::Sender<Result<CommandReceipt, CommandError>>,
}

/// Sender side of the command channel
#[derive(Clone)]
pub struct CommandSender {
    tx: mpsc::Sender<CommandEnvelope>,
}

#[async_trait]
impl CommandChannel for CommandSender {
    async fn dispatch(&self, command: AccountCommand) -> Result<CommandReceipt, CommandError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.tx
            .send(CommandEnvelope {
                command,
                response_tx,
            })
            .await
            .map_err(|_| CommandError::Unavailable("Command channel closed".to_string()))?;

        response_rx.await.map_err(|_| {
            CommandError::Unavailable("Command response channel closed".to_string())
        })?
    }
}

/// Receiver side of the command channel
pub struct CommandReceiver {
    rx: mpsc::Receiver<CommandEnvelope>,
}

impl CommandReceiver {
    /// Non-blocking receive
    pub fn try_recv(&mut self) -> Option<CommandEnvelope> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next command; `None` once every sender is dropped
    pub async fn recv(&mut self) -> Option<CommandEnvelope> {
        self.rx.recv().await
    }
}

/// Create a new command channel pair
pub fn command_channel(buffer: usize) -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::channel(buffer);
    (CommandSender { tx }, CommandReceiver { rx })
}

/// Serve queued commands until all senders are gone.
///
/// Each command runs on its own task; the handler serializes commands that
/// target the same account, unrelated accounts proceed in parallel.
pub async fn serve_commands(handler: Arc<AccountCommandHandler>, mut receiver: CommandReceiver) {
    while let Some(envelope) = receiver.recv().await {
        let handler = handler.clone();
        tokio::spawn(async move {
            let CommandEnvelope {
                command,
                response_tx,
            } = envelope;
            let name = command.name();
            let result = handler.handle(command).await.map_err(CommandError::from);
            if response_tx.send(result).is_err() {
                warn!(command = name, "Command caller went away before reply");
            }
        });
    }
    debug!("Command channel closed, server exiting");
}
