mod common;

use common::*;
use mq_redirect::backend::{BackendClient, TransactionCheckListener, TransactionalBackendClient};
use mq_redirect::call::{CallArg, RawCall};
use mq_redirect::descriptor::{
    ProducerDescriptor, TransactionalDescriptor, TransactionalMessageProducer,
    TransactionalProducerDefinition,
};
use mq_redirect::kafka::{CloudTransactionalProducer, GroupTable};
use mq_redirect::message::{Message, SendOutcome};
use mq_redirect::transaction::{
    CheckBridge, FixedChecker, LocalTransactionExecutor, LocalTransactionState, TransactionStatus,
};
use mq_redirect::{EntityRegistry, Environment, Interceptor, Redirecting, TransactionalCall};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

fn tx_definition(check_outcome: Option<TransactionStatus>) -> TransactionalProducerDefinition {
    let definition = TransactionalProducerDefinition::new("pay_topic", notice_properties().with("payId", "GID-SDHS_PAY_test2"));
    match check_outcome {
        Some(status) => definition.with_checker(Arc::new(FixedChecker(status))),
        None => definition,
    }
}

struct Fixture {
    interceptor: Arc<Interceptor>,
    redirected: Vec<Arc<RecordingTransactionalClient>>,
    cloud: Arc<RecordingTransactionalClient>,
}

impl Fixture {
    async fn new(env: Environment, definition: &TransactionalProducerDefinition) -> Self {
        let groups = GroupTable::new();
        let mut redirected = Vec::new();

        let transactional = EntityRegistry::<dyn TransactionalBackendClient>::build(
            &env,
            std::slice::from_ref(definition),
            |descriptor, spec| {
                let checker = descriptor
                    .transaction_checker()
                    .map(|checker| Arc::new(CheckBridge::new(checker)) as Arc<dyn TransactionCheckListener>);
                let client = Arc::new(RecordingTransactionalClient::new(&spec.group, groups.clone(), checker));
                redirected.push(client.clone());
                Ok(client as Arc<dyn TransactionalBackendClient>)
            },
        )
        .await;

        Self {
            interceptor: Arc::new(Interceptor::new(
                Arc::new(env),
                Arc::new(EntityRegistry::<dyn BackendClient>::empty()),
                Arc::new(transactional),
            )),
            redirected,
            cloud: Arc::new(RecordingTransactionalClient::new("GID-SDHS_PAY_test2", GroupTable::new(), None)),
        }
    }

    fn producer(
        &self,
        definition: TransactionalProducerDefinition,
    ) -> Redirecting<CloudTransactionalProducer<TransactionalProducerDefinition, RecordingTransactionalClient>> {
        Redirecting::new(
            CloudTransactionalProducer::new(definition, self.cloud.clone()),
            self.interceptor.clone(),
        )
    }
}

fn reporting(status: TransactionStatus, seen: Arc<Mutex<Vec<Message>>>) -> Arc<dyn LocalTransactionExecutor> {
    Arc::new(move |message: &Message| {
        seen.lock().unwrap().push(message.clone());
        status
    })
}

#[tokio::test]
async fn test_commit_is_redirected() {
    let definition = tx_definition(None);
    let fixture = Fixture::new(test_env(), &definition).await;
    let seen = Arc::new(Mutex::new(Vec::new()));

    let call = TransactionalCall::new("pay", "TAG1", reporting(TransactionStatus::CommitTransaction, seen.clone()))
        .with_key("K1");
    let receipt = fixture.producer(definition).send_in_transaction(call).await.unwrap();

    assert_eq!(receipt.state, LocalTransactionState::CommitMessage);
    assert_eq!(receipt.receipt.topic, "test2_pay_topic");

    let finalized = fixture.redirected[0].finalized();
    assert_eq!(finalized.len(), 1);
    assert_eq!(finalized[0].1, Finalized::Committed);
    assert_eq!(finalized[0].0.key, "K1");

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].topic, "test2_pay_topic");
    assert_eq!(seen[0].tag.as_deref(), Some("TAG1"));
    assert_eq!(seen[0].key.as_deref(), Some("K1"));
    assert!(seen[0].msg_id.is_some());
}

#[tokio::test]
async fn test_rollback_never_commits() {
    let definition = tx_definition(Some(TransactionStatus::CommitTransaction));
    let fixture = Fixture::new(test_env(), &definition).await;
    let seen = Arc::new(Mutex::new(Vec::new()));

    let call = TransactionalCall::new("pay", "TAG1", reporting(TransactionStatus::RollbackTransaction, seen));
    let receipt = fixture.producer(definition).send_in_transaction(call).await.unwrap();

    assert_eq!(receipt.state, LocalTransactionState::RollbackMessage);
    assert_eq!(fixture.redirected[0].finalized()[0].1, Finalized::RolledBack);
    assert_eq!(fixture.redirected[0].checks.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_outcome_is_resolved_by_checker() {
    let definition = tx_definition(Some(TransactionStatus::CommitTransaction));
    let fixture = Fixture::new(test_env(), &definition).await;
    let seen = Arc::new(Mutex::new(Vec::new()));

    let call = TransactionalCall::new("pay", "TAG1", reporting(TransactionStatus::Unknow, seen));
    let receipt = fixture.producer(definition).send_in_transaction(call).await.unwrap();

    assert_eq!(fixture.redirected[0].checks.load(Ordering::SeqCst), 1);
    assert_eq!(receipt.state, LocalTransactionState::CommitMessage);
    assert_eq!(fixture.redirected[0].finalized()[0].1, Finalized::Committed);
}

#[tokio::test]
async fn test_unknown_outcome_without_checker_rolls_back() {
    let definition = tx_definition(None);
    let fixture = Fixture::new(test_env(), &definition).await;
    let seen = Arc::new(Mutex::new(Vec::new()));

    let call = TransactionalCall::new("pay", "TAG1", reporting(TransactionStatus::Unknow, seen));
    let receipt = fixture.producer(definition).send_in_transaction(call).await.unwrap();

    assert_eq!(receipt.state, LocalTransactionState::Unknown);
    assert_eq!(fixture.redirected[0].finalized()[0].1, Finalized::RolledBack);
}

#[tokio::test]
async fn test_production_transaction_passes_through() {
    let definition = tx_definition(None);
    let fixture = Fixture::new(prod_env(), &definition).await;
    let seen = Arc::new(Mutex::new(Vec::new()));

    let producer = fixture.producer(definition);
    assert_eq!(producer.topic(), "pay_topic");
    let call = TransactionalCall::new("pay", "TAG1", reporting(TransactionStatus::CommitTransaction, seen));
    producer.send_in_transaction(call).await.unwrap();

    assert!(fixture.redirected.is_empty());
    let finalized = fixture.cloud.finalized();
    assert_eq!(finalized.len(), 1);
    assert_eq!(finalized[0].0.topic, "pay_topic");
}

#[tokio::test]
async fn test_raw_transactional_call_is_dispatched() {
    let definition = tx_definition(None);
    let fixture = Fixture::new(test_env(), &definition).await;
    let seen = Arc::new(Mutex::new(Vec::new()));

    let raw = RawCall::new(
        "send_in_transaction",
        vec![
            CallArg::from("pay"),
            CallArg::from("TAG1"),
            CallArg::Executor(reporting(TransactionStatus::CommitTransaction, seen.clone())),
        ],
    );
    let outcome = fixture.interceptor.dispatch_raw(&definition, raw).await.unwrap();

    assert!(matches!(outcome, SendOutcome::Sent(ref receipt) if receipt.topic == "test2_pay_topic"));
    assert_eq!(seen.lock().unwrap().len(), 1);
}
