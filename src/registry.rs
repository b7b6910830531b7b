//! Registry of live backend clients, one per producer identity.
//!
//! The registry is built once at startup and read concurrently afterwards
//! without locking. Shutdown is idempotent and best-effort.

use crate::backend::Lifecycle;
use crate::descriptor::ProducerDescriptor;
use crate::environment::Environment;
use crate::identity::resolve_producer_id;
use crate::naming::{namespaced_group, namespaced_topic};
use crate::{Error, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Everything a client factory needs to bind a new client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientSpec {
    pub producer_id: String,
    pub group: String,
    pub topic: String,
    pub namespaced_topic: String,
}

/// A started client bound to one producer identity.
pub struct ProducerHandle<C: ?Sized> {
    pub producer_id: String,
    pub topic: String,
    pub namespaced_topic: String,
    pub group: String,
    pub consumer_id: Option<String>,
    pub client: Arc<C>,
}

impl<C: ?Sized> fmt::Debug for ProducerHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerHandle")
            .field("producer_id", &self.producer_id)
            .field("topic", &self.topic)
            .field("namespaced_topic", &self.namespaced_topic)
            .field("group", &self.group)
            .field("consumer_id", &self.consumer_id)
            .finish_non_exhaustive()
    }
}

pub struct EntityRegistry<C: ?Sized> {
    handles: HashMap<String, ProducerHandle<C>>,
    shut_down: AtomicBool,
}

impl<C: ?Sized + Lifecycle> EntityRegistry<C> {
    pub fn empty() -> Self {
        Self {
            handles: HashMap::new(),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Creates and starts one client per descriptor.
    ///
    /// Descriptors whose identity cannot be resolved or whose client fails
    /// to start are skipped. A start refused because the group already runs
    /// in this process keeps the earlier handle. In production nothing is
    /// built.
    #[instrument(skip_all, fields(environment = %env.name(), descriptors = descriptors.len()))]
    pub async fn build<D, F>(env: &Environment, descriptors: &[D], mut factory: F) -> Self
    where
        D: ProducerDescriptor,
        F: FnMut(&D, &ClientSpec) -> Result<Arc<C>>,
    {
        let mut registry = Self::empty();

        if env.is_production_env() {
            info!("Production environment, producers go to the managed broker unchanged");
            return registry;
        }

        if descriptors.is_empty() {
            info!("No producers to redirect");
            return registry;
        }

        info!("Creating redirected producers");
        for descriptor in descriptors {
            let spec = match client_spec(env, descriptor) {
                Ok(spec) => spec,
                Err(e) => {
                    error!(topic = %descriptor.topic(), "Skipping producer: {}", e);
                    continue;
                }
            };

            let client = match factory(descriptor, &spec) {
                Ok(client) => client,
                Err(e) => {
                    error!(group = %spec.group, "Failed to create client: {}", e);
                    continue;
                }
            };

            match client.start().await {
                Ok(()) => {}
                Err(Error::GroupAlreadyStarted(group)) => {
                    warn!(%group, topic = %spec.topic, "Group already started in this process, keeping existing client");
                    continue;
                }
                Err(e) => {
                    error!(group = %spec.group, topic = %spec.topic, "Failed to start client: {}", e);
                    continue;
                }
            }

            info!(topic = %spec.namespaced_topic, group = %spec.group, "Created producer");
            let handle = ProducerHandle {
                consumer_id: descriptor.properties().consumer_id().map(str::to_string),
                producer_id: spec.producer_id.clone(),
                topic: spec.topic,
                namespaced_topic: spec.namespaced_topic,
                group: spec.group,
                client,
            };

            if let Some(replaced) = registry.handles.insert(spec.producer_id, handle) {
                debug!(producer_id = %replaced.producer_id, "Replacing earlier handle");
                if let Err(e) = replaced.client.shutdown().await {
                    warn!(group = %replaced.group, "Failed to shut down replaced client: {}", e);
                }
            }
        }

        info!(producers = registry.len(), "Redirected producers created");
        registry
    }

    pub fn lookup(&self, producer_id: &str) -> Result<&ProducerHandle<C>> {
        if self.is_shut_down() {
            return Err(Error::Shutdown);
        }
        self.handles
            .get(producer_id)
            .ok_or_else(|| Error::HandleNotFound(producer_id.to_string()))
    }

    pub fn handles(&self) -> impl Iterator<Item = &ProducerHandle<C>> {
        self.handles.values()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Shuts every distinct client down once. Later calls do nothing.
    pub async fn shutdown_all(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let mut seen = HashSet::new();
        for handle in self.handles.values() {
            if !seen.insert(Arc::as_ptr(&handle.client) as *const () as usize) {
                continue;
            }
            match handle.client.shutdown().await {
                Ok(()) => debug!(group = %handle.group, "Client shut down"),
                Err(e) => warn!(group = %handle.group, "Failed to shut down client: {}", e),
            }
        }

        if !self.handles.is_empty() {
            info!(clients = seen.len(), "Redirected producers shut down");
        }
    }
}

impl<C: ?Sized + Lifecycle> Default for EntityRegistry<C> {
    fn default() -> Self {
        Self::empty()
    }
}

/// Resolves identity and names for one descriptor.
pub fn client_spec<D: ProducerDescriptor + ?Sized>(env: &Environment, descriptor: &D) -> Result<ClientSpec> {
    let topic = descriptor.topic();
    let producer_id = resolve_producer_id(descriptor.properties(), topic)?;
    Ok(ClientSpec {
        group: namespaced_group(env, &producer_id),
        namespaced_topic: namespaced_topic(env, topic),
        topic: topic.to_string(),
        producer_id,
    })
}
