//! Producer descriptors and the producer contract application code uses.
//!
//! A descriptor exposes the target topic and the properties bundle of a
//! producer; the redirection core reads nothing else from it.

use crate::backend::TransactionReceipt;
use crate::call::{ProducerCall, TransactionalCall};
use crate::config::{ProducerEntry, TransactionalProducerEntry};
use crate::identity::Properties;
use crate::message::SendOutcome;
use crate::transaction::{FixedChecker, LocalTransactionChecker, TransactionStatus};
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

pub trait ProducerDescriptor: Send + Sync {
    fn topic(&self) -> &str;
    fn properties(&self) -> &Properties;
}

pub trait TransactionalDescriptor: ProducerDescriptor {
    /// Checker consulted when a transaction outcome is uncertain.
    fn transaction_checker(&self) -> Option<Arc<dyn LocalTransactionChecker>>;
}

/// Plain producer contract.
#[async_trait]
pub trait MessageProducer: ProducerDescriptor {
    async fn send(&self, call: ProducerCall) -> Result<SendOutcome>;
}

/// Transactional producer contract.
#[async_trait]
pub trait TransactionalMessageProducer: TransactionalDescriptor {
    async fn send_in_transaction(&self, call: TransactionalCall) -> Result<TransactionReceipt>;
}

impl<T: ProducerDescriptor + ?Sized> ProducerDescriptor for Arc<T> {
    fn topic(&self) -> &str {
        (**self).topic()
    }

    fn properties(&self) -> &Properties {
        (**self).properties()
    }
}

impl<T: TransactionalDescriptor + ?Sized> TransactionalDescriptor for Arc<T> {
    fn transaction_checker(&self) -> Option<Arc<dyn LocalTransactionChecker>> {
        (**self).transaction_checker()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerDefinition {
    pub topic: String,
    pub properties: Properties,
}

impl ProducerDefinition {
    pub fn new(topic: impl Into<String>, properties: Properties) -> Self {
        Self {
            topic: topic.into(),
            properties,
        }
    }
}

impl From<&ProducerEntry> for ProducerDefinition {
    fn from(entry: &ProducerEntry) -> Self {
        Self::new(entry.topic.clone(), entry.properties.clone().into())
    }
}

impl ProducerDescriptor for ProducerDefinition {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn properties(&self) -> &Properties {
        &self.properties
    }
}

#[derive(Clone)]
pub struct TransactionalProducerDefinition {
    pub topic: String,
    pub properties: Properties,
    pub checker: Option<Arc<dyn LocalTransactionChecker>>,
}

impl TransactionalProducerDefinition {
    pub fn new(topic: impl Into<String>, properties: Properties) -> Self {
        Self {
            topic: topic.into(),
            properties,
            checker: None,
        }
    }

    pub fn with_checker(mut self, checker: Arc<dyn LocalTransactionChecker>) -> Self {
        self.checker = Some(checker);
        self
    }
}

impl From<&TransactionalProducerEntry> for TransactionalProducerDefinition {
    fn from(entry: &TransactionalProducerEntry) -> Self {
        let definition = Self::new(entry.topic.clone(), entry.properties.clone().into());
        match entry.check_outcome.as_deref() {
            Some(outcome) => {
                definition.with_checker(Arc::new(FixedChecker(TransactionStatus::from_name(outcome))))
            }
            None => definition,
        }
    }
}

impl fmt::Debug for TransactionalProducerDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionalProducerDefinition")
            .field("topic", &self.topic)
            .field("properties", &self.properties)
            .field("checker", &self.checker.is_some())
            .finish()
    }
}

impl ProducerDescriptor for TransactionalProducerDefinition {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn properties(&self) -> &Properties {
        &self.properties
    }
}

impl TransactionalDescriptor for TransactionalProducerDefinition {
    fn transaction_checker(&self) -> Option<Arc<dyn LocalTransactionChecker>> {
        self.checker.clone()
    }
}
