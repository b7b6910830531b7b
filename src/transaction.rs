//! Transactional message outcomes.
//!
//! Callers report local transaction results as [`TransactionStatus`];
//! backends finalize half messages with [`LocalTransactionState`]. Both are
//! translated through the canonical [`TransactionDecision`], and anything
//! that is not an explicit commit or rollback becomes `Unknown`.

use crate::backend::{InFlightMessage, LocalTransactionBranch, TransactionCheckListener};
use crate::message::Message;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Canonical outcome vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionDecision {
    Commit,
    Rollback,
    Unknown,
}

/// Outcome reported by caller-side executors and checkers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    CommitTransaction,
    RollbackTransaction,
    Unknow,
}

/// Outcome consumed by the backend to finalize a half message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalTransactionState {
    CommitMessage,
    RollbackMessage,
    Unknown,
}

impl TransactionStatus {
    /// Parses a loosely written status name; unrecognized input is `Unknow`.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "commit" | "committransaction" | "commit_transaction" => Self::CommitTransaction,
            "rollback" | "rollbacktransaction" | "rollback_transaction" => Self::RollbackTransaction,
            _ => Self::Unknow,
        }
    }
}

impl From<TransactionStatus> for TransactionDecision {
    fn from(status: TransactionStatus) -> Self {
        match status {
            TransactionStatus::CommitTransaction => Self::Commit,
            TransactionStatus::RollbackTransaction => Self::Rollback,
            TransactionStatus::Unknow => Self::Unknown,
        }
    }
}

impl From<LocalTransactionState> for TransactionDecision {
    fn from(state: LocalTransactionState) -> Self {
        match state {
            LocalTransactionState::CommitMessage => Self::Commit,
            LocalTransactionState::RollbackMessage => Self::Rollback,
            LocalTransactionState::Unknown => Self::Unknown,
        }
    }
}

impl From<TransactionDecision> for TransactionStatus {
    fn from(decision: TransactionDecision) -> Self {
        match decision {
            TransactionDecision::Commit => Self::CommitTransaction,
            TransactionDecision::Rollback => Self::RollbackTransaction,
            TransactionDecision::Unknown => Self::Unknow,
        }
    }
}

impl From<TransactionDecision> for LocalTransactionState {
    fn from(decision: TransactionDecision) -> Self {
        match decision {
            TransactionDecision::Commit => Self::CommitMessage,
            TransactionDecision::Rollback => Self::RollbackMessage,
            TransactionDecision::Unknown => Self::Unknown,
        }
    }
}

impl fmt::Display for TransactionDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Commit => "commit",
            Self::Rollback => "rollback",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Caller status to backend state.
pub fn to_backend_state(status: TransactionStatus) -> LocalTransactionState {
    TransactionDecision::from(status).into()
}

/// Backend state to caller status.
pub fn to_caller_status(state: LocalTransactionState) -> TransactionStatus {
    TransactionDecision::from(state).into()
}

/// Runs the local transaction that decides a transactional send.
pub trait LocalTransactionExecutor: Send + Sync {
    fn execute(&self, message: &Message) -> TransactionStatus;
}

/// Re-checks the outcome of a local transaction left uncertain.
pub trait LocalTransactionChecker: Send + Sync {
    fn check(&self, message: &Message) -> TransactionStatus;
}

impl<F> LocalTransactionExecutor for F
where
    F: Fn(&Message) -> TransactionStatus + Send + Sync,
{
    fn execute(&self, message: &Message) -> TransactionStatus {
        self(message)
    }
}

/// Checker answering the same status for every message.
#[derive(Debug, Clone, Copy)]
pub struct FixedChecker(pub TransactionStatus);

impl LocalTransactionChecker for FixedChecker {
    fn check(&self, _message: &Message) -> TransactionStatus {
        self.0
    }
}

fn to_caller_message(in_flight: &InFlightMessage) -> Message {
    Message {
        topic: in_flight.topic.clone(),
        tag: in_flight.tag.clone(),
        key: Some(in_flight.key.clone()),
        msg_id: in_flight.msg_id.clone(),
        body: in_flight.body.clone(),
        deliver_at: None,
    }
}

/// Bridges a caller executor into the backend's transactional send.
pub struct ExecutionBridge {
    executor: Arc<dyn LocalTransactionExecutor>,
}

impl ExecutionBridge {
    pub fn new(executor: Arc<dyn LocalTransactionExecutor>) -> Self {
        Self { executor }
    }
}

impl LocalTransactionBranch for ExecutionBridge {
    fn execute(&self, message: &InFlightMessage) -> LocalTransactionState {
        let status = self.executor.execute(&to_caller_message(message));
        let state = to_backend_state(status);
        debug!(key = %message.key, ?status, ?state, "Local transaction executed");
        state
    }
}

/// Bridges a caller checker into the backend's status check.
pub struct CheckBridge {
    checker: Arc<dyn LocalTransactionChecker>,
}

impl CheckBridge {
    pub fn new(checker: Arc<dyn LocalTransactionChecker>) -> Self {
        Self { checker }
    }
}

impl TransactionCheckListener for CheckBridge {
    fn check(&self, message: &InFlightMessage) -> LocalTransactionState {
        let status = self.checker.check(&to_caller_message(message));
        let state = to_backend_state(status);
        debug!(key = %message.key, ?status, ?state, "Local transaction checked");
        state
    }
}
