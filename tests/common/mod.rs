#![allow(dead_code)]

use async_trait::async_trait;
use mq_redirect::backend::{
    BackendClient, InFlightMessage, Lifecycle, LocalTransactionBranch, SendCallback,
    TransactionCheckListener, TransactionReceipt, TransactionalBackendClient,
};
use mq_redirect::consumer::{ConsumeAction, MessageListener};
use mq_redirect::descriptor::ProducerDefinition;
use mq_redirect::kafka::GroupTable;
use mq_redirect::message::{Message, NormalizedMessage, SendReceipt};
use mq_redirect::transaction::LocalTransactionState;
use mq_redirect::{Environment, Error, Properties, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// The notice producer of the `test2` environment on host `devbox1`.
pub fn test_env() -> Environment {
    Environment::new("test2", true, "devbox1")
}

pub fn prod_env() -> Environment {
    Environment::new("prod", true, "devbox1")
}

pub fn notice_properties() -> Properties {
    Properties::new()
        .with("msgNoticeId", "GID-SDHS_MSG_NOTICE_test2")
        .with("ConsumerId", "CID-SDHS_MSG_NOTICE_test2")
}

pub fn notice_producer() -> ProducerDefinition {
    ProducerDefinition::new("msg_notice_topic", notice_properties())
}

/// How a [`RecordingClient`] reacts to `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartBehavior {
    Succeed,
    Fail,
}

/// In-memory plain backend recording every message it is given.
pub struct RecordingClient {
    group: String,
    groups: GroupTable,
    behavior: StartBehavior,
    failing_sends: AtomicBool,
    pub sent: Mutex<Vec<(NormalizedMessage, &'static str)>>,
    pub starts: AtomicUsize,
    pub shutdowns: AtomicUsize,
}

impl RecordingClient {
    pub fn new(group: &str, groups: GroupTable) -> Self {
        Self::with_behavior(group, groups, StartBehavior::Succeed)
    }

    pub fn with_behavior(group: &str, groups: GroupTable, behavior: StartBehavior) -> Self {
        Self {
            group: group.to_string(),
            groups,
            behavior,
            failing_sends: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            starts: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
        }
    }

    /// Makes every later send fail with a backend error.
    pub fn fail_sends(&self) {
        self.failing_sends.store(true, Ordering::SeqCst);
    }

    fn rejection(&self, message: &NormalizedMessage) -> Option<Error> {
        self.failing_sends
            .load(Ordering::SeqCst)
            .then(|| Error::Backend(format!("broker rejected {}", message.key)))
    }

    pub fn sent(&self) -> Vec<(NormalizedMessage, &'static str)> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, message: NormalizedMessage, how: &'static str) -> SendReceipt {
        let mut sent = self.sent.lock().unwrap();
        let receipt = SendReceipt {
            message_id: format!("{}-0@{}", message.topic, sent.len()),
            topic: message.topic.clone(),
        };
        sent.push((message, how));
        receipt
    }
}

#[async_trait]
impl Lifecycle for RecordingClient {
    fn group(&self) -> &str {
        &self.group
    }

    async fn start(&self) -> Result<()> {
        if self.behavior == StartBehavior::Fail {
            return Err(Error::Startup {
                group: self.group.clone(),
                message: "broker unreachable".to_string(),
            });
        }
        self.groups.claim(&self.group)?;
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.groups.release(&self.group);
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl BackendClient for RecordingClient {
    async fn send(&self, message: &NormalizedMessage) -> Result<SendReceipt> {
        if let Some(e) = self.rejection(message) {
            return Err(e);
        }
        Ok(self.record(message.clone(), "sync"))
    }

    async fn send_oneway(&self, message: &NormalizedMessage) -> Result<()> {
        if let Some(e) = self.rejection(message) {
            return Err(e);
        }
        self.record(message.clone(), "oneway");
        Ok(())
    }

    fn send_async(&self, message: NormalizedMessage, callback: Arc<dyn SendCallback>) {
        match self.rejection(&message) {
            Some(e) => callback.on_exception(e),
            None => callback.on_success(self.record(message, "async")),
        }
    }
}

/// Outcome a [`RecordingTransactionalClient`] finalized a transaction with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalized {
    Committed,
    RolledBack,
}

/// In-memory transactional backend that drives the same check path as the
/// Kafka client: an unknown local outcome is re-checked, a still unknown
/// one is rolled back.
pub struct RecordingTransactionalClient {
    group: String,
    groups: GroupTable,
    checker: Option<Arc<dyn TransactionCheckListener>>,
    pub finalized: Mutex<Vec<(InFlightMessage, Finalized)>>,
    pub checks: AtomicUsize,
    pub shutdowns: AtomicUsize,
}

impl RecordingTransactionalClient {
    pub fn new(group: &str, groups: GroupTable, checker: Option<Arc<dyn TransactionCheckListener>>) -> Self {
        Self {
            group: group.to_string(),
            groups,
            checker,
            finalized: Mutex::new(Vec::new()),
            checks: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
        }
    }

    pub fn finalized(&self) -> Vec<(InFlightMessage, Finalized)> {
        self.finalized.lock().unwrap().clone()
    }
}

#[async_trait]
impl Lifecycle for RecordingTransactionalClient {
    fn group(&self) -> &str {
        &self.group
    }

    async fn start(&self) -> Result<()> {
        self.groups.claim(&self.group)
    }

    async fn shutdown(&self) -> Result<()> {
        self.groups.release(&self.group);
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl TransactionalBackendClient for RecordingTransactionalClient {
    async fn send_in_transaction(
        &self,
        message: &NormalizedMessage,
        branch: &dyn LocalTransactionBranch,
    ) -> Result<TransactionReceipt> {
        let mut in_flight = InFlightMessage::from(message);
        in_flight.msg_id = Some(format!("{}-0@0", message.topic));

        let mut state = branch.execute(&in_flight);
        if state == LocalTransactionState::Unknown {
            if let Some(checker) = &self.checker {
                self.checks.fetch_add(1, Ordering::SeqCst);
                state = checker.check(&in_flight);
            }
        }

        let finalized = match state {
            LocalTransactionState::CommitMessage => Finalized::Committed,
            LocalTransactionState::RollbackMessage | LocalTransactionState::Unknown => Finalized::RolledBack,
        };
        self.finalized.lock().unwrap().push((in_flight.clone(), finalized));

        Ok(TransactionReceipt {
            receipt: SendReceipt {
                message_id: in_flight.msg_id.unwrap_or_default(),
                topic: message.topic.clone(),
            },
            state,
        })
    }
}

/// Callback capturing the outcome of an asynchronous send.
#[derive(Default)]
pub struct CapturingCallback {
    pub receipts: Mutex<Vec<SendReceipt>>,
    pub errors: Mutex<Vec<String>>,
}

impl SendCallback for CapturingCallback {
    fn on_success(&self, receipt: SendReceipt) {
        self.receipts.lock().unwrap().push(receipt);
    }

    fn on_exception(&self, error: Error) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

/// Listener recording the messages it is given.
#[derive(Default)]
pub struct RecordingListener {
    pub received: Mutex<Vec<Message>>,
}

impl MessageListener for RecordingListener {
    fn consume(&self, message: &Message) -> ConsumeAction {
        self.received.lock().unwrap().push(message.clone());
        ConsumeAction::CommitMessage
    }
}
