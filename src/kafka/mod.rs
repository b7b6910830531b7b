//! Kafka-backed clients.

pub mod groups;
pub mod passthrough;
pub mod producer;
pub mod record;
pub mod subscriber;
pub mod topic_manager;
pub mod transactional;

pub use groups::GroupTable;
pub use passthrough::{CloudProducer, CloudTransactionalProducer};
pub use producer::KafkaClient;
pub use subscriber::KafkaSubscriber;
pub use topic_manager::TopicManager;
pub use transactional::KafkaTransactionalClient;
