use crate::backend::{BackendClient, Lifecycle, SendCallback};
use crate::config::BrokerConfig;
use crate::kafka::groups::GroupTable;
use crate::kafka::record;
use crate::message::{NormalizedMessage, SendReceipt};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rdkafka::producer::{FutureProducer, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Producer configuration shared by plain and transactional clients.
pub fn producer_config(address: &str, group: &str, config: &BrokerConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", address)
        .set("client.id", group)
        .set("compression.type", &config.compression)
        .set("acks", &config.acks)
        .set("linger.ms", config.linger_ms.to_string())
        .set("message.timeout.ms", config.message_timeout_ms.to_string());
    client_config
}

/// Plain Kafka producer bound to one group.
pub struct KafkaClient {
    group: String,
    client_config: ClientConfig,
    groups: GroupTable,
    send_timeout: Duration,
    producer: RwLock<Option<FutureProducer>>,
}

impl KafkaClient {
    pub fn new(address: &str, group: &str, config: &BrokerConfig, groups: GroupTable) -> Self {
        Self {
            group: group.to_string(),
            client_config: producer_config(address, group, config),
            groups,
            send_timeout: Duration::from_millis(config.message_timeout_ms),
            producer: RwLock::new(None),
        }
    }

    /// Applies extra librdkafka properties, e.g. credentials of a managed broker.
    pub fn with_client_properties(mut self, properties: &BTreeMap<String, String>) -> Self {
        for (key, value) in properties {
            self.client_config.set(key, value);
        }
        self
    }

    fn producer(&self) -> Result<FutureProducer> {
        self.producer
            .read()
            .clone()
            .ok_or_else(|| Error::NotStarted(self.group.clone()))
    }
}

#[async_trait]
impl Lifecycle for KafkaClient {
    fn group(&self) -> &str {
        &self.group
    }

    async fn start(&self) -> Result<()> {
        self.groups.claim(&self.group)?;

        let producer: FutureProducer = match self.client_config.create() {
            Ok(producer) => producer,
            Err(e) => {
                self.groups.release(&self.group);
                return Err(Error::Startup {
                    group: self.group.clone(),
                    message: e.to_string(),
                });
            }
        };

        *self.producer.write() = Some(producer);
        info!(group = %self.group, "Kafka producer started");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let producer = self.producer.write().take();
        self.groups.release(&self.group);

        if let Some(producer) = producer {
            let timeout = self.send_timeout;
            tokio::task::spawn_blocking(move || producer.flush(Timeout::After(timeout)))
                .await
                .map_err(|e| Error::Backend(e.to_string()))??;
            debug!(group = %self.group, "Kafka producer flushed");
        }
        Ok(())
    }
}

#[async_trait]
impl BackendClient for KafkaClient {
    async fn send(&self, message: &NormalizedMessage) -> Result<SendReceipt> {
        let producer = self.producer()?;
        let outgoing = record::future_record(message, Utc::now());

        let (partition, offset) = producer
            .send(outgoing, Timeout::After(self.send_timeout))
            .await
            .map_err(|(e, _)| Error::Kafka(e))?;

        debug!(key = %message.key, partition, offset, "Message delivered");
        Ok(record::receipt(&message.topic, partition, offset))
    }

    async fn send_oneway(&self, message: &NormalizedMessage) -> Result<()> {
        let producer = self.producer()?;
        let outgoing = record::future_record(message, Utc::now());

        // the delivery future is dropped, the record stays queued
        let _ = producer.send_result(outgoing).map_err(|(e, _)| Error::Kafka(e))?;
        Ok(())
    }

    /// Must be called within a Tokio runtime.
    fn send_async(&self, message: NormalizedMessage, callback: Arc<dyn SendCallback>) {
        let producer = match self.producer() {
            Ok(producer) => producer,
            Err(e) => {
                callback.on_exception(e);
                return;
            }
        };

        let delivery = match producer.send_result(record::future_record(&message, Utc::now())) {
            Ok(delivery) => delivery,
            Err((e, _)) => {
                callback.on_exception(Error::Kafka(e));
                return;
            }
        };

        let topic = message.topic;
        tokio::spawn(async move {
            match delivery.await {
                Ok(Ok((partition, offset))) => callback.on_success(record::receipt(&topic, partition, offset)),
                Ok(Err((e, _))) => callback.on_exception(Error::Kafka(e)),
                Err(_) => callback.on_exception(Error::DeliveryCanceled),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_before_start_fails() {
        let client = KafkaClient::new("localhost:9092", "dev_GID-A", &BrokerConfig::default(), GroupTable::new());
        let message = NormalizedMessage::new("dev_a_topic", "x", None, None, Default::default());

        assert!(matches!(client.send(&message).await, Err(Error::NotStarted(g)) if g == "dev_GID-A"));
        assert!(matches!(client.send_oneway(&message).await, Err(Error::NotStarted(_))));
    }

    #[tokio::test]
    async fn test_duplicate_group_start_is_refused() {
        let groups = GroupTable::new();
        let config = BrokerConfig::default();
        let first = KafkaClient::new("localhost:9092", "dev_GID-A", &config, groups.clone());
        let second = KafkaClient::new("localhost:9092", "dev_GID-A", &config, groups.clone());

        // creating a producer does not contact the broker
        first.start().await.unwrap();
        assert!(matches!(second.start().await, Err(Error::GroupAlreadyStarted(_))));

        first.shutdown().await.ok();
        assert!(!groups.contains("dev_GID-A"));
    }

    #[tokio::test]
    #[ignore] // Requires running Kafka
    async fn test_send_roundtrip() {
        let client = KafkaClient::new("localhost:9092", "dev_GID-IT", &BrokerConfig::default(), GroupTable::new());
        client.start().await.unwrap();

        let message = NormalizedMessage::new("dev_mq_redirect_it_topic", "hello", Some("TAG1".into()), None, Default::default());
        let receipt = client.send(&message).await.unwrap();
        assert_eq!(receipt.topic, "dev_mq_redirect_it_topic");

        client.shutdown().await.unwrap();
    }
}
