//! Call interception and redirection.
//!
//! [`Redirecting`] wraps a producer written against the
//! [`MessageProducer`] / [`TransactionalMessageProducer`] contract. In
//! production every call goes to the wrapped producer untouched. Elsewhere
//! the call is normalized, renamed into the environment namespace and
//! dispatched through the registered self-hosted client.

use crate::backend::{
    BackendClient, LoggingCallback, SendCallback, TransactionReceipt, TransactionalBackendClient,
};
use crate::call::{classify, ClassifiedCall, Dispatch, ProducerCall, RawCall, TransactionalCall};
use crate::descriptor::{
    MessageProducer, ProducerDescriptor, TransactionalDescriptor, TransactionalMessageProducer,
};
use crate::environment::Environment;
use crate::identity::{resolve_producer_id, Properties};
use crate::message::{NormalizedMessage, SendOutcome};
use crate::naming::{namespaced_group, namespaced_topic};
use crate::registry::EntityRegistry;
use crate::transaction::{ExecutionBridge, LocalTransactionChecker};
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};

/// Hands a normalized message to a plain client the way `dispatch` asks.
pub async fn deliver<C>(client: &C, message: NormalizedMessage, dispatch: Dispatch) -> Result<SendOutcome>
where
    C: BackendClient + ?Sized,
{
    match dispatch {
        Dispatch::Sync => client.send(&message).await.map(SendOutcome::Sent),
        Dispatch::Oneway => {
            client.send_oneway(&message).await?;
            Ok(SendOutcome::Enqueued)
        }
        Dispatch::Async(callback) => {
            let callback =
                callback.unwrap_or_else(|| Arc::new(LoggingCallback) as Arc<dyn SendCallback>);
            client.send_async(message, callback);
            Ok(SendOutcome::Enqueued)
        }
    }
}

/// Shared state of the interception layer.
pub struct Interceptor {
    env: Arc<Environment>,
    producers: Arc<EntityRegistry<dyn BackendClient>>,
    transactional: Arc<EntityRegistry<dyn TransactionalBackendClient>>,
}

impl Interceptor {
    pub fn new(
        env: Arc<Environment>,
        producers: Arc<EntityRegistry<dyn BackendClient>>,
        transactional: Arc<EntityRegistry<dyn TransactionalBackendClient>>,
    ) -> Self {
        Self {
            env,
            producers,
            transactional,
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    pub fn producers(&self) -> &EntityRegistry<dyn BackendClient> {
        &self.producers
    }

    pub fn transactional_producers(&self) -> &EntityRegistry<dyn TransactionalBackendClient> {
        &self.transactional
    }

    /// Redirects a plain call made on `target`.
    #[instrument(skip_all, fields(topic = %target.topic(), operation = call.operation()))]
    pub async fn dispatch<T>(&self, target: &T, call: ProducerCall) -> Result<SendOutcome>
    where
        T: ProducerDescriptor + ?Sized,
    {
        let (producer_id, topic) = self.resolve(target.topic(), target.properties())?;
        let handle = self.producers.lookup(&producer_id)?;

        let (message, dispatch) = call.into_message(&topic);
        debug!(group = %handle.group, key = %message.key, ?dispatch, "Redirecting message");
        deliver(handle.client.as_ref(), message, dispatch).await
    }

    /// Redirects a transactional call made on `target`.
    #[instrument(skip_all, fields(topic = %target.topic()))]
    pub async fn dispatch_transactional<T>(
        &self,
        target: &T,
        call: TransactionalCall,
    ) -> Result<TransactionReceipt>
    where
        T: ProducerDescriptor + ?Sized,
    {
        let (producer_id, topic) = self.resolve(target.topic(), target.properties())?;
        let handle = self.transactional.lookup(&producer_id)?;

        let (message, executor) = call.into_message(&topic);
        debug!(group = %handle.group, key = %message.key, "Redirecting transactional message");
        let bridge = ExecutionBridge::new(executor);
        handle.client.send_in_transaction(&message, &bridge).await
    }

    /// Classifies and redirects a dynamically described call.
    ///
    /// Unknown call shapes are logged and skipped.
    pub async fn dispatch_raw<T>(&self, target: &T, raw: RawCall) -> Result<SendOutcome>
    where
        T: ProducerDescriptor + ?Sized,
    {
        match classify(&raw) {
            Ok(ClassifiedCall::Producer(call)) => self.dispatch(target, call).await,
            Ok(ClassifiedCall::Transactional(call)) => {
                let receipt = self.dispatch_transactional(target, call).await?;
                Ok(SendOutcome::Sent(receipt.receipt))
            }
            Err(e @ Error::UnrecognizedCallShape { .. }) => {
                error!(args = ?raw.args, "{}, message dropped", e);
                Ok(SendOutcome::Skipped)
            }
            Err(e) => Err(e),
        }
    }

    fn resolve(&self, topic: &str, properties: &Properties) -> Result<(String, String)> {
        let producer_id = resolve_producer_id(properties, topic)?;
        let namespaced = namespaced_topic(&self.env, topic);
        debug!(
            producer_id = %producer_id,
            group = %namespaced_group(&self.env, &producer_id),
            namespaced_topic = %namespaced,
            "Resolved redirect target"
        );
        Ok((producer_id, namespaced))
    }
}

/// A producer whose calls are redirected outside production.
pub struct Redirecting<P> {
    inner: P,
    interceptor: Arc<Interceptor>,
}

impl<P: ProducerDescriptor> Redirecting<P> {
    pub fn new(inner: P, interceptor: Arc<Interceptor>) -> Self {
        if interceptor.environment().is_production_env() {
            info!(
                environment = %interceptor.environment().name(),
                topic = %inner.topic(),
                "Production environment, messages go to the managed broker"
            );
        } else {
            info!(
                environment = %interceptor.environment().name(),
                topic = %inner.topic(),
                "Non-production environment, messages go to the self-hosted broker"
            );
        }
        Self { inner, interceptor }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    fn pass_through(&self) -> bool {
        self.interceptor.environment().is_production_env()
    }
}

impl<P: MessageProducer> Redirecting<P> {
    /// Classifies a dynamically described call and sends it.
    ///
    /// In production an unknown shape is an error as the wrapped producer
    /// has no such operation; elsewhere it is logged and skipped.
    pub async fn invoke(&self, raw: RawCall) -> Result<SendOutcome> {
        if self.pass_through() {
            return match classify(&raw)? {
                ClassifiedCall::Producer(call) => self.inner.send(call).await,
                ClassifiedCall::Transactional(_) => Err(Error::UnrecognizedCallShape {
                    operation: raw.operation,
                    argc: raw.args.len(),
                }),
            };
        }
        self.interceptor.dispatch_raw(&self.inner, raw).await
    }
}

impl<P: ProducerDescriptor> ProducerDescriptor for Redirecting<P> {
    fn topic(&self) -> &str {
        self.inner.topic()
    }

    fn properties(&self) -> &Properties {
        self.inner.properties()
    }
}

impl<P: TransactionalDescriptor> TransactionalDescriptor for Redirecting<P> {
    fn transaction_checker(&self) -> Option<Arc<dyn LocalTransactionChecker>> {
        self.inner.transaction_checker()
    }
}

#[async_trait]
impl<P: MessageProducer> MessageProducer for Redirecting<P> {
    async fn send(&self, call: ProducerCall) -> Result<SendOutcome> {
        if self.pass_through() {
            return self.inner.send(call).await;
        }
        self.interceptor.dispatch(&self.inner, call).await
    }
}

#[async_trait]
impl<P: TransactionalMessageProducer> TransactionalMessageProducer for Redirecting<P> {
    async fn send_in_transaction(&self, call: TransactionalCall) -> Result<TransactionReceipt> {
        if self.pass_through() {
            return self.inner.send_in_transaction(call).await;
        }
        self.interceptor.dispatch_transactional(&self.inner, call).await
    }
}
