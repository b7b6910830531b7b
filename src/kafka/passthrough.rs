//! Producers talking to the managed broker under the original names.
//!
//! These are what application code holds. Wrapped in
//! [`Redirecting`](crate::interceptor::Redirecting) they are used as is in
//! production and bypassed elsewhere.

use crate::backend::{BackendClient, TransactionReceipt, TransactionalBackendClient};
use crate::call::{ProducerCall, TransactionalCall};
use crate::descriptor::{
    MessageProducer, ProducerDescriptor, TransactionalDescriptor, TransactionalMessageProducer,
};
use crate::identity::Properties;
use crate::interceptor::deliver;
use crate::message::SendOutcome;
use crate::transaction::{ExecutionBridge, LocalTransactionChecker};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

pub struct CloudProducer<D, C: ?Sized = dyn BackendClient> {
    descriptor: D,
    client: Arc<C>,
}

impl<D: ProducerDescriptor, C: BackendClient + ?Sized> CloudProducer<D, C> {
    pub fn new(descriptor: D, client: Arc<C>) -> Self {
        Self { descriptor, client }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }
}

impl<D: ProducerDescriptor, C: BackendClient + ?Sized> ProducerDescriptor for CloudProducer<D, C> {
    fn topic(&self) -> &str {
        self.descriptor.topic()
    }

    fn properties(&self) -> &Properties {
        self.descriptor.properties()
    }
}

#[async_trait]
impl<D: ProducerDescriptor, C: BackendClient + ?Sized> MessageProducer for CloudProducer<D, C> {
    async fn send(&self, call: ProducerCall) -> Result<SendOutcome> {
        let (message, dispatch) = call.into_message(self.descriptor.topic());
        debug!(topic = %message.topic, key = %message.key, "Sending to managed broker");
        deliver(self.client.as_ref(), message, dispatch).await
    }
}

pub struct CloudTransactionalProducer<D, C: ?Sized = dyn TransactionalBackendClient> {
    descriptor: D,
    client: Arc<C>,
}

impl<D: TransactionalDescriptor, C: TransactionalBackendClient + ?Sized> CloudTransactionalProducer<D, C> {
    pub fn new(descriptor: D, client: Arc<C>) -> Self {
        Self { descriptor, client }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }
}

impl<D: TransactionalDescriptor, C: TransactionalBackendClient + ?Sized> ProducerDescriptor
    for CloudTransactionalProducer<D, C>
{
    fn topic(&self) -> &str {
        self.descriptor.topic()
    }

    fn properties(&self) -> &Properties {
        self.descriptor.properties()
    }
}

impl<D: TransactionalDescriptor, C: TransactionalBackendClient + ?Sized> TransactionalDescriptor
    for CloudTransactionalProducer<D, C>
{
    fn transaction_checker(&self) -> Option<Arc<dyn LocalTransactionChecker>> {
        self.descriptor.transaction_checker()
    }
}

#[async_trait]
impl<D: TransactionalDescriptor, C: TransactionalBackendClient + ?Sized> TransactionalMessageProducer
    for CloudTransactionalProducer<D, C>
{
    async fn send_in_transaction(&self, call: TransactionalCall) -> Result<TransactionReceipt> {
        let (message, executor) = call.into_message(self.descriptor.topic());
        debug!(topic = %message.topic, key = %message.key, "Sending transaction to managed broker");
        self.client
            .send_in_transaction(&message, &ExecutionBridge::new(executor))
            .await
    }
}
