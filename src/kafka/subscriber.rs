use crate::backend::Lifecycle;
use crate::config::BrokerConfig;
use crate::consumer::{ConsumeAction, MessageListener};
use crate::kafka::record;
use crate::message::Message;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const RECONSUME_DELAY: Duration = Duration::from_secs(1);
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Kafka consumer delivering one namespaced topic to one listener.
///
/// Records carrying a future `deliver-at` header are held back until that
/// time before the listener sees them. Meanwhile their partition is paused
/// and rewound, and the stream keeps being polled so a long hold stays
/// within `max.poll.interval.ms`.
pub struct KafkaSubscriber {
    group: String,
    topic: String,
    client_config: ClientConfig,
    listener: Arc<dyn MessageListener>,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl KafkaSubscriber {
    pub fn new(
        address: &str,
        group: &str,
        topic: &str,
        config: &BrokerConfig,
        listener: Arc<dyn MessageListener>,
    ) -> Self {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", address)
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "latest")
            .set("session.timeout.ms", config.message_timeout_ms.clamp(6_000, 300_000).to_string());

        let (stop, _) = watch::channel(false);
        Self {
            group: group.to_string(),
            topic: topic.to_string(),
            client_config,
            listener,
            stop,
            task: Mutex::new(None),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[async_trait]
impl Lifecycle for KafkaSubscriber {
    fn group(&self) -> &str {
        &self.group
    }

    async fn start(&self) -> Result<()> {
        let consumer: StreamConsumer = self.client_config.create().map_err(|e| Error::Startup {
            group: self.group.clone(),
            message: e.to_string(),
        })?;
        consumer.subscribe(&[self.topic.as_str()])?;

        let task = tokio::spawn(consume_loop(
            consumer,
            self.topic.clone(),
            self.listener.clone(),
            self.stop.subscribe(),
        ));
        *self.task.lock() = Some(task);

        info!(group = %self.group, topic = %self.topic, "Kafka consumer started");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let _ = self.stop.send(true);
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.await.map_err(|e| Error::Backend(e.to_string()))?;
        }
        debug!(group = %self.group, topic = %self.topic, "Kafka consumer stopped");
        Ok(())
    }
}

/// Partitions paused until their held record is due.
#[derive(Debug, Default)]
struct HeldPartitions {
    until: BTreeMap<i32, DateTime<Utc>>,
}

impl HeldPartitions {
    fn hold(&mut self, partition: i32, at: DateTime<Utc>) {
        self.until.insert(partition, at);
    }

    fn next_release(&self) -> Option<DateTime<Utc>> {
        self.until.values().min().copied()
    }

    /// Removes and returns the partitions due at `now`.
    fn take_due(&mut self, now: DateTime<Utc>) -> Vec<i32> {
        let due: Vec<i32> = self
            .until
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(partition, _)| *partition)
            .collect();
        for partition in &due {
            self.until.remove(partition);
        }
        due
    }
}

/// Time left until `at`, `None` when already due.
fn hold_for(at: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    (at - now).to_std().ok().filter(|wait| !wait.is_zero())
}

async fn sleep_until_release(release: Option<DateTime<Utc>>) {
    match release {
        Some(at) => tokio::time::sleep(hold_for(at, Utc::now()).unwrap_or_default()).await,
        None => futures::future::pending().await,
    }
}

fn partition_list(topic: &str, partitions: &[i32]) -> TopicPartitionList {
    let mut list = TopicPartitionList::new();
    for partition in partitions {
        list.add_partition(topic, *partition);
    }
    list
}

/// Pauses `partition` and rewinds it to `offset` so the record is fetched
/// again once the partition resumes.
fn hold(consumer: &StreamConsumer, topic: &str, partition: i32, offset: i64) -> KafkaResult<()> {
    consumer.pause(&partition_list(topic, &[partition]))?;
    consumer.seek(topic, partition, Offset::Offset(offset), SEEK_TIMEOUT)
}

async fn consume_loop(
    consumer: StreamConsumer,
    topic: String,
    listener: Arc<dyn MessageListener>,
    mut stop: watch::Receiver<bool>,
) {
    let mut stream = consumer.stream();
    let mut held = HeldPartitions::default();

    loop {
        let received = tokio::select! {
            _ = stop.changed() => break,
            _ = sleep_until_release(held.next_release()) => {
                let due = held.take_due(Utc::now());
                if let Err(e) = consumer.resume(&partition_list(&topic, &due)) {
                    warn!(%topic, ?due, "Resume of held partitions failed: {}", e);
                }
                continue;
            }
            next = stream.next() => match next {
                None => break,
                Some(Err(e)) => {
                    warn!(%topic, "Consumer error: {}", e);
                    continue;
                }
                Some(Ok(borrowed)) => {
                    (record::to_message(&borrowed), borrowed_position(&borrowed))
                }
            },
        };
        let (message, (partition, offset)) = received;

        if let Some(at) = message.deliver_at {
            if let Some(wait) = hold_for(at, Utc::now()) {
                match hold(&consumer, &topic, partition, offset) {
                    Ok(()) => {
                        debug!(key = ?message.key, partition, ?wait, "Holding delayed message");
                        held.hold(partition, at);
                        continue;
                    }
                    Err(e) => warn!(%topic, partition, offset, "Could not hold delayed message, delivering now: {}", e),
                }
            }
        }

        match deliver(listener.as_ref(), &message) {
            ConsumeAction::CommitMessage => {
                let mut positions = TopicPartitionList::new();
                let committed = positions
                    .add_partition_offset(&topic, partition, Offset::Offset(offset + 1))
                    .and_then(|_| consumer.commit(&positions, CommitMode::Async));
                if let Err(e) = committed {
                    warn!(%topic, partition, offset, "Commit failed: {}", e);
                }
            }
            ConsumeAction::ReconsumeLater => {
                tokio::time::sleep(RECONSUME_DELAY).await;
                if let Err(e) = consumer.seek(&topic, partition, Offset::Offset(offset), SEEK_TIMEOUT) {
                    warn!(%topic, partition, offset, "Seek for redelivery failed: {}", e);
                }
            }
        }
    }
}

fn borrowed_position<M: rdkafka::Message>(record: &M) -> (i32, i64) {
    (record.partition(), record.offset())
}

fn deliver(listener: &dyn MessageListener, message: &Message) -> ConsumeAction {
    let action = listener.consume(message);
    debug!(msg_id = ?message.msg_id, ?action, "Message consumed");
    action
}
