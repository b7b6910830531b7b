//! Capabilities the redirection core needs from a broker client.
//!
//! Two client kinds exist: a plain [`BackendClient`] and a
//! [`TransactionalBackendClient`]. Both share the [`Lifecycle`] of being
//! bound to one group, started once and shut down once.

use crate::message::{NormalizedMessage, SendReceipt};
use crate::transaction::LocalTransactionState;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{error, info};

/// The backend's view of a message while its transaction is open.
#[derive(Debug, Clone, PartialEq)]
pub struct InFlightMessage {
    pub topic: String,
    pub tag: Option<String>,
    pub key: String,
    pub msg_id: Option<String>,
    pub body: Bytes,
}

impl From<&NormalizedMessage> for InFlightMessage {
    fn from(message: &NormalizedMessage) -> Self {
        Self {
            topic: message.topic.clone(),
            tag: message.tag.clone(),
            key: message.key.clone(),
            msg_id: None,
            body: message.body.clone(),
        }
    }
}

/// Executes the local branch of a transactional send.
pub trait LocalTransactionBranch: Send + Sync {
    fn execute(&self, message: &InFlightMessage) -> LocalTransactionState;
}

/// Answers a backend-driven status check for an uncertain transaction.
pub trait TransactionCheckListener: Send + Sync {
    fn check(&self, message: &InFlightMessage) -> LocalTransactionState;
}

/// Completion callback for asynchronous sends.
///
/// Invoked on whatever task the backend completes the send on.
pub trait SendCallback: Send + Sync {
    fn on_success(&self, receipt: SendReceipt);
    fn on_exception(&self, error: Error);
}

/// Callback that only logs the outcome.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingCallback;

impl SendCallback for LoggingCallback {
    fn on_success(&self, receipt: SendReceipt) {
        info!(topic = %receipt.topic, message_id = %receipt.message_id, "Message sent");
    }

    fn on_exception(&self, error: Error) {
        error!("Message send failed: {}", error);
    }
}

/// Final state of a transactional send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReceipt {
    pub receipt: SendReceipt,
    pub state: LocalTransactionState,
}

#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Group the client is bound to.
    fn group(&self) -> &str;

    /// Starts the client. Fails with [`Error::GroupAlreadyStarted`] when
    /// another client of the same group runs in this process.
    async fn start(&self) -> Result<()>;

    async fn shutdown(&self) -> Result<()>;
}

#[async_trait]
pub trait BackendClient: Lifecycle {
    /// Sends and waits for the broker acknowledgement.
    async fn send(&self, message: &NormalizedMessage) -> Result<SendReceipt>;

    /// Enqueues without waiting for an acknowledgement.
    async fn send_oneway(&self, message: &NormalizedMessage) -> Result<()>;

    /// Sends in the background and reports through `callback`.
    fn send_async(&self, message: NormalizedMessage, callback: Arc<dyn SendCallback>);
}

#[async_trait]
pub trait TransactionalBackendClient: Lifecycle {
    /// Sends `message` as a half message, runs `branch` to decide it and
    /// finalizes commit or rollback.
    async fn send_in_transaction(
        &self,
        message: &NormalizedMessage,
        branch: &dyn LocalTransactionBranch,
    ) -> Result<TransactionReceipt>;
}
