use crate::backend::{
    InFlightMessage, Lifecycle, LocalTransactionBranch, TransactionCheckListener,
    TransactionReceipt, TransactionalBackendClient,
};
use crate::config::BrokerConfig;
use crate::kafka::groups::GroupTable;
use crate::kafka::producer::producer_config;
use crate::kafka::record;
use crate::message::NormalizedMessage;
use crate::transaction::LocalTransactionState;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::producer::{FutureProducer, Producer};
use rdkafka::util::Timeout;
use rdkafka::ClientConfig;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// What a failed commit leaves the producer able to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommitRecovery {
    /// The open transaction must be aborted before the next one begins.
    Abort,
    /// The producer can no longer run transactions.
    Disable,
}

fn commit_recovery(err: &Error) -> CommitRecovery {
    match err {
        Error::Kafka(KafkaError::Transaction(e)) if e.is_fatal() => CommitRecovery::Disable,
        _ => CommitRecovery::Abort,
    }
}

/// Kafka transactional producer bound to one group.
///
/// The group doubles as `transactional.id`. A producer holds one open
/// transaction at a time, so transactional sends are serialized.
pub struct KafkaTransactionalClient {
    group: String,
    client_config: ClientConfig,
    groups: GroupTable,
    checker: Option<Arc<dyn TransactionCheckListener>>,
    send_timeout: Duration,
    transaction_timeout: Duration,
    check_attempts: u32,
    check_interval: Duration,
    producer: RwLock<Option<FutureProducer>>,
    in_transaction: Mutex<()>,
}

impl KafkaTransactionalClient {
    pub fn new(
        address: &str,
        group: &str,
        config: &BrokerConfig,
        groups: GroupTable,
        checker: Option<Arc<dyn TransactionCheckListener>>,
    ) -> Self {
        let mut client_config = producer_config(address, group, config);
        client_config
            .set("transactional.id", group)
            .set("enable.idempotence", "true")
            .set("transaction.timeout.ms", config.transaction_timeout_ms.to_string());

        Self {
            group: group.to_string(),
            client_config,
            groups,
            checker,
            send_timeout: Duration::from_millis(config.message_timeout_ms),
            transaction_timeout: Duration::from_millis(config.transaction_timeout_ms),
            check_attempts: config.check_attempts,
            check_interval: Duration::from_millis(config.check_interval_ms),
            producer: RwLock::new(None),
            in_transaction: Mutex::new(()),
        }
    }

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

    /// Asks the checker until the outcome is known or attempts run out.
    async fn recheck(&self, message: &InFlightMessage) -> LocalTransactionState {
        let Some(checker) = &self.checker else {
            warn!(group = %self.group, key = %message.key, "Transaction outcome unknown and no checker registered");
            return LocalTransactionState::Unknown;
        };

        for attempt in 1..=self.check_attempts {
            tokio::time::sleep(self.check_interval).await;
            let state = checker.check(message);
            if state != LocalTransactionState::Unknown {
                debug!(attempt, ?state, "Transaction outcome resolved by check");
                return state;
            }
            debug!(attempt, "Transaction outcome still unknown");
        }
        LocalTransactionState::Unknown
    }

    async fn finish(&self, producer: &FutureProducer, state: LocalTransactionState) -> Result<()> {
        match state {
            LocalTransactionState::CommitMessage => self.commit(producer).await,
            LocalTransactionState::RollbackMessage | LocalTransactionState::Unknown => {
                self.abort(producer).await
            }
        }
    }

    async fn abort(&self, producer: &FutureProducer) -> Result<()> {
        let timeout = self.transaction_timeout;
        blocking(producer, move |p| p.abort_transaction(Timeout::After(timeout))).await
    }

    /// Commits the open transaction. A failed commit is aborted so the next
    /// transaction can begin, or disables the producer when the error is
    /// fatal. The commit error is returned either way.
    async fn commit(&self, producer: &FutureProducer) -> Result<()> {
        let timeout = self.transaction_timeout;
        let e = match blocking(producer, move |p| p.commit_transaction(Timeout::After(timeout))).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        match commit_recovery(&e) {
            CommitRecovery::Abort => {
                warn!(group = %self.group, "Commit failed, aborting transaction: {}", e);
                if let Err(abort) = self.abort(producer).await {
                    warn!(group = %self.group, "Failed to abort transaction after commit failure: {}", abort);
                    if commit_recovery(&abort) == CommitRecovery::Disable {
                        self.disable();
                    }
                }
            }
            CommitRecovery::Disable => self.disable(),
        }
        Err(e)
    }

    fn disable(&self) {
        if self.producer.write().take().is_some() {
            error!(group = %self.group, "Fatal transactional error, producer disabled until restart");
        }
    }
}

async fn blocking<F>(producer: &FutureProducer, f: F) -> Result<()>
where
    F: FnOnce(&FutureProducer) -> KafkaResult<()> + Send + 'static,
{
    let producer = producer.clone();
    tokio::task::spawn_blocking(move || f(&producer))
        .await
        .map_err(|e| Error::Backend(e.to_string()))??;
    Ok(())
}

#[async_trait]
impl Lifecycle for KafkaTransactionalClient {
    fn group(&self) -> &str {
        &self.group
    }

    async fn start(&self) -> Result<()> {
        self.groups.claim(&self.group)?;

        let startup_error = |message: String| Error::Startup {
            group: self.group.clone(),
            message,
        };

        let producer: FutureProducer = match self.client_config.create() {
            Ok(producer) => producer,
            Err(e) => {
                self.groups.release(&self.group);
                return Err(startup_error(e.to_string()));
            }
        };

        let timeout = self.transaction_timeout;
        if let Err(e) = blocking(&producer, move |p| p.init_transactions(Timeout::After(timeout))).await {
            self.groups.release(&self.group);
            return Err(startup_error(e.to_string()));
        }

        *self.producer.write() = Some(producer);
        info!(group = %self.group, "Kafka transactional producer started");
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let producer = self.producer.write().take();
        self.groups.release(&self.group);

        if let Some(producer) = producer {
            let timeout = self.send_timeout;
            blocking(&producer, move |p| p.flush(Timeout::After(timeout))).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionalBackendClient for KafkaTransactionalClient {
    #[instrument(skip_all, fields(group = %self.group, key = %message.key))]
    async fn send_in_transaction(
        &self,
        message: &NormalizedMessage,
        branch: &dyn LocalTransactionBranch,
    ) -> Result<TransactionReceipt> {
        let producer = self.producer()?;
        let _open = self.in_transaction.lock().await;

        producer.begin_transaction()?;

        let outgoing = record::future_record(message, Utc::now());
        let receipt = match producer.send(outgoing, Timeout::After(self.send_timeout)).await {
            Ok((partition, offset)) => record::receipt(&message.topic, partition, offset),
            Err((e, _)) => {
                if let Err(abort) = self.finish(&producer, LocalTransactionState::RollbackMessage).await {
                    warn!("Failed to abort transaction after send failure: {}", abort);
                }
                return Err(Error::Kafka(e));
            }
        };

        let mut in_flight = InFlightMessage::from(message);
        in_flight.msg_id = Some(receipt.message_id.clone());

        let mut state = branch.execute(&in_flight);
        if state == LocalTransactionState::Unknown {
            state = self.recheck(&in_flight).await;
        }

        self.finish(&producer, state).await?;
        info!(?state, message_id = %receipt.message_id, "Transaction finished");

        Ok(TransactionReceipt { receipt, state })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{CheckBridge, FixedChecker, TransactionStatus};

    fn client(checker: Option<Arc<dyn TransactionCheckListener>>, attempts: u32) -> KafkaTransactionalClient {
        let config = BrokerConfig {
            check_attempts: attempts,
            check_interval_ms: 1,
            ..BrokerConfig::default()
        };
        KafkaTransactionalClient::new("localhost:9092", "dev_GID-TX", &config, GroupTable::new(), checker)
    }

    fn in_flight() -> InFlightMessage {
        InFlightMessage::from(&NormalizedMessage::new("dev_tx_topic", "x", None, None, Default::default()))
    }

    #[tokio::test]
    async fn test_recheck_without_checker_stays_unknown() {
        assert_eq!(client(None, 3).recheck(&in_flight()).await, LocalTransactionState::Unknown);
    }

    #[tokio::test]
    async fn test_recheck_uses_translated_checker_outcome() {
        let checker: Arc<dyn TransactionCheckListener> =
            Arc::new(CheckBridge::new(Arc::new(FixedChecker(TransactionStatus::CommitTransaction))));
        assert_eq!(
            client(Some(checker), 3).recheck(&in_flight()).await,
            LocalTransactionState::CommitMessage
        );
    }

    #[tokio::test]
    async fn test_recheck_gives_up_after_attempts() {
        let checker: Arc<dyn TransactionCheckListener> =
            Arc::new(CheckBridge::new(Arc::new(FixedChecker(TransactionStatus::Unknow))));
        assert_eq!(
            client(Some(checker), 2).recheck(&in_flight()).await,
            LocalTransactionState::Unknown
        );
    }

    #[test]
    fn test_failed_commit_is_aborted_unless_fatal() {
        let timed_out = Error::Kafka(KafkaError::Canceled);
        assert_eq!(commit_recovery(&timed_out), CommitRecovery::Abort);
        assert_eq!(commit_recovery(&Error::Backend("join failed".into())), CommitRecovery::Abort);
    }

    #[tokio::test]
    async fn test_disabled_client_refuses_sends() {
        let client = client(None, 1);
        let producer: FutureProducer = client.client_config.create().unwrap();
        *client.producer.write() = Some(producer);
        assert!(client.producer().is_ok());

        client.disable();
        assert!(matches!(client.producer(), Err(Error::NotStarted(_))));
    }

    #[tokio::test]
    async fn test_send_before_start_fails() {
        let branch = crate::transaction::ExecutionBridge::new(Arc::new(
            |_: &crate::message::Message| TransactionStatus::CommitTransaction,
        ));
        let message = NormalizedMessage::new("dev_tx_topic", "x", None, None, Default::default());
        let result = client(None, 1).send_in_transaction(&message, &branch).await;
        assert!(matches!(result, Err(Error::NotStarted(_))));
    }
}
