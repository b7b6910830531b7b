use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub environment: EnvironmentConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub cloud: CloudConfig,
    #[serde(default)]
    pub producers: Vec<ProducerEntry>,
    #[serde(default)]
    pub transactional_producers: Vec<TransactionalProducerEntry>,
    #[serde(default)]
    pub consumers: Vec<ConsumerEntry>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnvironmentConfig {
    /// Active profiles, first one wins.
    #[serde(default)]
    pub profiles: Vec<String>,
    /// Only `"1"` enables local-consume-only.
    #[serde(default = "default_local_consume_only")]
    pub local_consume_only: String,
    /// Skips host name lookup when set.
    #[serde(default)]
    pub host_id: Option<String>,
}

/// The self-hosted broker used outside production.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_address")]
    pub address: String,
    #[serde(default = "default_acks")]
    pub acks: String,
    #[serde(default = "default_compression")]
    pub compression: String,
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u32,
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
    #[serde(default = "default_transaction_timeout_ms")]
    pub transaction_timeout_ms: u64,
    #[serde(default = "default_check_attempts")]
    pub check_attempts: u32,
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    #[serde(default)]
    pub auto_create_topics: bool,
    #[serde(default = "default_partitions")]
    pub partitions: i32,
    #[serde(default = "default_replication_factor")]
    pub replication_factor: i32,
}

/// The managed broker production traffic goes to unchanged.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CloudConfig {
    #[serde(default = "default_cloud_address")]
    pub address: String,
    #[serde(default)]
    pub client_properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProducerEntry {
    pub topic: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransactionalProducerEntry {
    pub topic: String,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    /// Outcome the configured checker reports when asked to re-check.
    #[serde(default)]
    pub check_outcome: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsumerEntry {
    pub subscriptions: Vec<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("MQ_REDIRECT")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("environment.profiles")
                    .try_parsing(true),
            )
            .build()?;

        settings.try_deserialize()
    }

    pub fn from_toml_str(content: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(content, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            profiles: Vec::new(),
            local_consume_only: default_local_consume_only(),
            host_id: None,
        }
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            address: default_broker_address(),
            acks: default_acks(),
            compression: default_compression(),
            linger_ms: default_linger_ms(),
            message_timeout_ms: default_message_timeout_ms(),
            transaction_timeout_ms: default_transaction_timeout_ms(),
            check_attempts: default_check_attempts(),
            check_interval_ms: default_check_interval_ms(),
            auto_create_topics: false,
            partitions: default_partitions(),
            replication_factor: default_replication_factor(),
        }
    }
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            address: default_cloud_address(),
            client_properties: BTreeMap::new(),
        }
    }
}

fn default_local_consume_only() -> String {
    "1".to_string()
}

fn default_broker_address() -> String {
    "127.0.0.1:9092".to_string()
}

fn default_cloud_address() -> String {
    "127.0.0.1:9093".to_string()
}

fn default_acks() -> String {
    "all".to_string()
}

fn default_compression() -> String {
    "none".to_string()
}

fn default_linger_ms() -> u32 {
    5
}

fn default_message_timeout_ms() -> u64 {
    30_000
}

fn default_transaction_timeout_ms() -> u64 {
    60_000
}

fn default_check_attempts() -> u32 {
    3
}

fn default_check_interval_ms() -> u64 {
    1_000
}

fn default_partitions() -> i32 {
    1
}

fn default_replication_factor() -> i32 {
    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_for_empty_file() {
        let config = Config::from_toml_str("").unwrap();
        assert!(config.environment.profiles.is_empty());
        assert_eq!(config.environment.local_consume_only, "1");
        assert_eq!(config.broker.address, "127.0.0.1:9092");
        assert_eq!(config.broker.check_attempts, 3);
        assert!(config.producers.is_empty());
    }

    #[test]
    fn test_descriptor_tables() {
        let config = Config::from_toml_str(
            r#"
            [environment]
            profiles = ["test2"]
            local_consume_only = "0"

            [[producers]]
            topic = "msg_notice_topic"
            [producers.properties]
            msg_notice_pid = "GID-SDHS_MSG_NOTICE_test2"

            [[transactional_producers]]
            topic = "signature_topic"
            check_outcome = "commit"
            [transactional_producers.properties]
            signature_pid = "GID-SDHS_SIGNATURE_test2"

            [[consumers]]
            subscriptions = ["msg_notice_topic"]
            [consumers.properties]
            msg_notice_cid = "GID-SDHS_MSG_NOTICE_test2"
            "#,
        )
        .unwrap();

        assert_eq!(config.environment.profiles, vec!["test2".to_string()]);
        assert_eq!(config.environment.local_consume_only, "0");
        assert_eq!(config.producers[0].topic, "msg_notice_topic");
        assert_eq!(
            config.producers[0].properties.get("msg_notice_pid").map(String::as_str),
            Some("GID-SDHS_MSG_NOTICE_test2")
        );
        assert_eq!(
            config.transactional_producers[0].check_outcome.as_deref(),
            Some("commit")
        );
        assert_eq!(config.consumers[0].subscriptions, vec!["msg_notice_topic".to_string()]);
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(file, "[broker]\naddress = \"kafka.internal:9092\"").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.broker.address, "kafka.internal:9092");
        assert_eq!(config.cloud.address, "127.0.0.1:9093");
    }
}
