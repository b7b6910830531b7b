use crate::config::BrokerConfig;
use crate::{Error, Result};
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::ClientConfig;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Provisions namespaced topics on the self-hosted broker.
pub struct TopicManager {
    admin_client: AdminClient<DefaultClientContext>,
    partitions: i32,
    replication_factor: i32,
    known_topics: HashSet<String>,
}

impl TopicManager {
    pub fn new(config: &BrokerConfig) -> Result<Self> {
        let admin_client: AdminClient<_> = ClientConfig::new()
            .set("bootstrap.servers", &config.address)
            .create()
            .map_err(Error::Kafka)?;

        Ok(Self {
            admin_client,
            partitions: config.partitions,
            replication_factor: config.replication_factor,
            known_topics: HashSet::new(),
        })
    }

    #[instrument(skip(self), fields(topic = %topic_name))]
    pub async fn ensure_topic_exists(&mut self, topic_name: &str) -> Result<()> {
        if self.known_topics.contains(topic_name) {
            debug!("Topic '{}' already verified to exist", topic_name);
            return Ok(());
        }

        match self.topic_exists(topic_name).await {
            Ok(true) => {
                debug!("Topic '{}' already exists", topic_name);
            }
            Ok(false) => {
                info!("Creating topic '{}'", topic_name);
                self.create_topic(topic_name).await?;
            }
            Err(e) => {
                warn!("Failed to check if topic '{}' exists: {}", topic_name, e);
                return Err(e);
            }
        }
        self.known_topics.insert(topic_name.to_string());
        Ok(())
    }

    /// Ensures every topic exists, logging failures without stopping.
    pub async fn ensure_all<'a, I>(&mut self, topics: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut failed = 0;
        for topic in topics {
            if let Err(e) = self.ensure_topic_exists(topic).await {
                warn!(%topic, "Topic provisioning failed: {}", e);
                failed += 1;
            }
        }
        failed
    }

    async fn topic_exists(&self, topic_name: &str) -> Result<bool> {
        let metadata = self
            .admin_client
            .inner()
            .fetch_metadata(Some(topic_name), Duration::from_secs(5))
            .map_err(Error::Kafka)?;

        // auto-creating brokers answer with an errored entry for unknown topics
        Ok(metadata
            .topics()
            .iter()
            .any(|topic| topic.name() == topic_name && topic.error().is_none()))
    }

    async fn create_topic(&self, topic_name: &str) -> Result<()> {
        let new_topic = NewTopic::new(
            topic_name,
            self.partitions,
            TopicReplication::Fixed(self.replication_factor),
        )
        .set("cleanup.policy", "delete");

        let opts = AdminOptions::new().operation_timeout(Some(Duration::from_secs(30)));

        let results = self
            .admin_client
            .create_topics(&[new_topic], &opts)
            .await
            .map_err(Error::Kafka)?;

        for result in results {
            match result {
                Ok(topic) => info!("Created topic: {}", topic),
                Err((_topic, rdkafka::types::RDKafkaErrorCode::TopicAlreadyExists)) => {
                    debug!("Topic '{}' created concurrently", topic_name)
                }
                Err((_topic, error)) => {
                    return Err(Error::Kafka(rdkafka::error::KafkaError::AdminOp(error)));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires running Kafka
    async fn test_topic_creation() {
        let mut manager = TopicManager::new(&BrokerConfig::default()).unwrap();
        let topic_name = "test2_mq_redirect_provisioning_topic";

        manager.ensure_topic_exists(topic_name).await.unwrap();
        assert!(manager.topic_exists(topic_name).await.unwrap());

        // Second call hits the cache or tolerates the existing topic.
        manager.ensure_topic_exists(topic_name).await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires running Kafka
    async fn test_ensure_all_reports_failures() {
        let mut manager = TopicManager::new(&BrokerConfig::default()).unwrap();
        let failed = manager.ensure_all(["test2_mq_redirect_a_topic", ""]).await;
        assert_eq!(failed, 1);
    }
}
