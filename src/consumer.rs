//! Consumer-side redirection.
//!
//! Outside production every subscription of a consumer descriptor gets its
//! own self-hosted consumer, subscribed to the namespaced topic in the
//! namespaced group, so it only sees traffic of its own environment (and,
//! with local-consume-only, of its own host).

use crate::backend::Lifecycle;
use crate::config::ConsumerEntry;
use crate::environment::Environment;
use crate::identity::{resolve_producer_id, Properties};
use crate::message::Message;
use crate::naming::{namespaced_group, namespaced_topic};
use crate::Result;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// What the consumer should do with a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeAction {
    CommitMessage,
    ReconsumeLater,
}

pub trait MessageListener: Send + Sync {
    fn consume(&self, message: &Message) -> ConsumeAction;
}

impl<F> MessageListener for F
where
    F: Fn(&Message) -> ConsumeAction + Send + Sync,
{
    fn consume(&self, message: &Message) -> ConsumeAction {
        self(message)
    }
}

/// Listener that logs and acknowledges every message.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl MessageListener for LoggingListener {
    fn consume(&self, message: &Message) -> ConsumeAction {
        info!(
            topic = %message.topic,
            tag = ?message.tag,
            key = ?message.key,
            msg_id = ?message.msg_id,
            body = %String::from_utf8_lossy(&message.body),
            "Received message"
        );
        ConsumeAction::CommitMessage
    }
}

#[derive(Clone)]
pub struct Subscription {
    pub topic: String,
    pub listener: Arc<dyn MessageListener>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("topic", &self.topic).finish_non_exhaustive()
    }
}

pub trait ConsumerDescriptor: Send + Sync {
    fn properties(&self) -> &Properties;
    fn subscriptions(&self) -> Vec<Subscription>;
}

#[derive(Debug, Clone)]
pub struct ConsumerDefinition {
    pub properties: Properties,
    pub subscriptions: Vec<Subscription>,
}

impl ConsumerDefinition {
    pub fn new(properties: Properties) -> Self {
        Self {
            properties,
            subscriptions: Vec::new(),
        }
    }

    pub fn subscribe(mut self, topic: impl Into<String>, listener: Arc<dyn MessageListener>) -> Self {
        self.subscriptions.push(Subscription {
            topic: topic.into(),
            listener,
        });
        self
    }

    /// Builds a definition whose subscriptions all use `listener`.
    pub fn from_entry(entry: &ConsumerEntry, listener: Arc<dyn MessageListener>) -> Self {
        entry.subscriptions.iter().fold(
            Self::new(entry.properties.clone().into()),
            |definition, topic| definition.subscribe(topic.clone(), listener.clone()),
        )
    }
}

impl ConsumerDescriptor for ConsumerDefinition {
    fn properties(&self) -> &Properties {
        &self.properties
    }

    fn subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.clone()
    }
}

/// Binding of one subscription to a consumer client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriptionSpec {
    pub producer_id: String,
    pub group: String,
    pub topic: String,
    pub namespaced_topic: String,
}

pub struct ConsumerHandle<C: ?Sized> {
    pub spec: SubscriptionSpec,
    pub client: Arc<C>,
}

/// The consumers started for the configured descriptors.
pub struct ConsumerSet<C: ?Sized> {
    handles: Vec<ConsumerHandle<C>>,
    shut_down: AtomicBool,
}

impl<C: ?Sized + Lifecycle> ConsumerSet<C> {
    pub fn empty() -> Self {
        Self {
            handles: Vec::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Creates and starts one consumer per subscription. Failures skip the
    /// subscription. In production nothing is built.
    #[instrument(skip_all, fields(environment = %env.name(), descriptors = descriptors.len()))]
    pub async fn build<D, F>(env: &Environment, descriptors: &[D], mut factory: F) -> Self
    where
        D: ConsumerDescriptor,
        F: FnMut(&SubscriptionSpec, Arc<dyn MessageListener>) -> Result<Arc<C>>,
    {
        let mut set = Self::empty();

        if env.is_production_env() {
            info!("Production environment, consumers stay on the managed broker");
            return set;
        }

        for descriptor in descriptors {
            for subscription in descriptor.subscriptions() {
                let spec = match subscription_spec(env, descriptor.properties(), &subscription.topic) {
                    Ok(spec) => spec,
                    Err(e) => {
                        error!(topic = %subscription.topic, "Skipping subscription: {}", e);
                        continue;
                    }
                };

                let client = match factory(&spec, subscription.listener.clone()) {
                    Ok(client) => client,
                    Err(e) => {
                        error!(group = %spec.group, "Failed to create consumer: {}", e);
                        continue;
                    }
                };

                if let Err(e) = client.start().await {
                    error!(group = %spec.group, topic = %spec.namespaced_topic, "Failed to start consumer: {}", e);
                    continue;
                }

                info!(topic = %spec.namespaced_topic, group = %spec.group, "Created consumer");
                set.handles.push(ConsumerHandle { spec, client });
            }
        }

        set
    }

    pub fn handles(&self) -> &[ConsumerHandle<C>] {
        &self.handles
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub async fn shutdown_all(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        for handle in &self.handles {
            if let Err(e) = handle.client.shutdown().await {
                warn!(group = %handle.spec.group, "Failed to stop consumer: {}", e);
            }
        }
    }
}

pub fn subscription_spec(env: &Environment, properties: &Properties, topic: &str) -> Result<SubscriptionSpec> {
    let producer_id = resolve_producer_id(properties, topic)?;
    Ok(SubscriptionSpec {
        group: namespaced_group(env, &producer_id),
        namespaced_topic: namespaced_topic(env, topic),
        topic: topic.to_string(),
        producer_id,
    })
}
