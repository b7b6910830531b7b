use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand, ValueEnum};
use mq_redirect::backend::{BackendClient, Lifecycle, TransactionCheckListener, TransactionalBackendClient};
use mq_redirect::config::BrokerConfig;
use mq_redirect::consumer::{subscription_spec, ConsumerDefinition, ConsumerSet, LoggingListener, MessageListener};
use mq_redirect::descriptor::{
    MessageProducer, ProducerDefinition, ProducerDescriptor, TransactionalDescriptor,
    TransactionalMessageProducer, TransactionalProducerDefinition,
};
use mq_redirect::identity::{resolve_producer_id, Properties};
use mq_redirect::kafka::{
    CloudProducer, CloudTransactionalProducer, GroupTable, KafkaClient, KafkaSubscriber,
    KafkaTransactionalClient, TopicManager,
};
use mq_redirect::message::Message;
use mq_redirect::registry::client_spec;
use mq_redirect::transaction::{CheckBridge, TransactionStatus};
use mq_redirect::{
    Config, EntityRegistry, Environment, Interceptor, ProducerCall, Redirecting, TransactionalCall,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "mq-redirect")]
#[command(about = "Environment-aware message queue redirection", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "mq-redirect.toml")]
    config: PathBuf,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one message through a configured producer
    Send {
        topic: String,
        body: String,
        #[arg(long, default_value = "")]
        tag: String,
        #[arg(long)]
        key: Option<String>,
        #[arg(long, default_value_t = 0)]
        delay_minutes: i64,
        #[arg(long, value_enum, default_value_t = SendMode::Sync)]
        mode: SendMode,
    },
    /// Send one message in a transaction through a configured transactional producer
    SendTx {
        topic: String,
        body: String,
        #[arg(long, default_value = "")]
        tag: String,
        #[arg(long)]
        key: Option<String>,
        /// Outcome the local transaction reports
        #[arg(long, value_enum, default_value_t = Outcome::Commit)]
        outcome: Outcome,
    },
    /// Consume the configured subscriptions until interrupted
    Listen,
    /// Print the names each configured entity resolves to
    Show {
        /// One JSON object per line
        #[arg(long)]
        json: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SendMode {
    Sync,
    Async,
    Oneway,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Outcome {
    Commit,
    Rollback,
    Unknown,
}

impl From<Outcome> for TransactionStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Commit => TransactionStatus::CommitTransaction,
            Outcome::Rollback => TransactionStatus::RollbackTransaction,
            Outcome::Unknown => TransactionStatus::Unknow,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Loading configuration from {:?}", args.config);
    let config = Config::from_file(&args.config)
        .with_context(|| format!("failed to load configuration from {:?}", args.config))?;

    let env = Arc::new(Environment::from_config(&config.environment));
    info!(
        environment = %env.name(),
        production = env.is_production_env(),
        local_consume_only = env.is_local_consume_only(),
        host = %env.host_identifier(),
        broker = %config.broker.address,
        cloud = %config.cloud.address,
        producers = config.producers.len(),
        transactional_producers = config.transactional_producers.len(),
        consumers = config.consumers.len(),
        "Configuration summary"
    );

    if let Command::Show { json } = args.command {
        return show(&config, &env, json);
    }

    let runtime = Runtime::start(config, env, matches!(args.command, Command::Listen)).await;

    let outcome = tokio::select! {
        result = run(&runtime, args.command) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    };

    runtime.shutdown().await;
    if let Err(e) = &outcome {
        error!("{:#}", e);
    }
    outcome
}

/// Clients and registries alive for the duration of one command.
struct Runtime {
    config: Config,
    env: Arc<Environment>,
    groups: GroupTable,
    interceptor: Arc<Interceptor>,
    consumers: ConsumerSet<KafkaSubscriber>,
    cloud_clients: Mutex<Vec<Arc<dyn Lifecycle>>>,
}

impl Runtime {
    async fn start(config: Config, env: Arc<Environment>, listen: bool) -> Self {
        let broker = config.broker.clone();
        let groups = GroupTable::new();

        if broker.auto_create_topics && !env.is_production_env() {
            provision_topics(&config, &env).await;
        }

        let producers: Vec<ProducerDefinition> = config.producers.iter().map(Into::into).collect();
        let producer_registry = EntityRegistry::<dyn BackendClient>::build(&env, &producers, |_, spec| {
            let client = KafkaClient::new(&broker.address, &spec.group, &broker, groups.clone());
            Ok(Arc::new(client) as Arc<dyn BackendClient>)
        })
        .await;

        let transactional: Vec<TransactionalProducerDefinition> =
            config.transactional_producers.iter().map(Into::into).collect();
        let transactional_registry =
            EntityRegistry::<dyn TransactionalBackendClient>::build(&env, &transactional, |definition, spec| {
                let checker = definition
                    .transaction_checker()
                    .map(|checker| Arc::new(CheckBridge::new(checker)) as Arc<dyn TransactionCheckListener>);
                let client =
                    KafkaTransactionalClient::new(&broker.address, &spec.group, &broker, groups.clone(), checker);
                Ok(Arc::new(client) as Arc<dyn TransactionalBackendClient>)
            })
            .await;

        let consumers = if listen {
            let listener: Arc<dyn MessageListener> = Arc::new(LoggingListener);
            let definitions: Vec<ConsumerDefinition> = config
                .consumers
                .iter()
                .map(|entry| ConsumerDefinition::from_entry(entry, listener.clone()))
                .collect();
            ConsumerSet::<KafkaSubscriber>::build(&env, &definitions, |spec, listener| {
                Ok(Arc::new(KafkaSubscriber::new(
                    &broker.address,
                    &spec.group,
                    &spec.namespaced_topic,
                    &broker,
                    listener,
                )))
            })
            .await
        } else {
            ConsumerSet::empty()
        };

        let interceptor = Arc::new(Interceptor::new(
            env.clone(),
            Arc::new(producer_registry),
            Arc::new(transactional_registry),
        ));

        Self {
            config,
            env,
            groups,
            interceptor,
            consumers,
            cloud_clients: Mutex::new(Vec::new()),
        }
    }

    fn cloud_broker(&self) -> BrokerConfig {
        BrokerConfig {
            address: self.config.cloud.address.clone(),
            ..self.config.broker.clone()
        }
    }

    /// Managed-broker clients are only started where they will be used.
    async fn track_cloud_client(&self, client: Arc<dyn Lifecycle>) -> anyhow::Result<()> {
        if !self.env.is_production_env() {
            return Ok(());
        }
        client
            .start()
            .await
            .with_context(|| format!("failed to start managed broker client {}", client.group()))?;
        self.cloud_clients.lock().push(client);
        Ok(())
    }

    fn producer(&self, topic: &str) -> anyhow::Result<ProducerDefinition> {
        self.config
            .producers
            .iter()
            .find(|entry| entry.topic == topic)
            .map(Into::into)
            .ok_or_else(|| anyhow!("no producer configured for topic {}", topic))
    }

    fn transactional_producer(&self, topic: &str) -> anyhow::Result<TransactionalProducerDefinition> {
        self.config
            .transactional_producers
            .iter()
            .find(|entry| entry.topic == topic)
            .map(Into::into)
            .ok_or_else(|| anyhow!("no transactional producer configured for topic {}", topic))
    }

    async fn shutdown(&self) {
        self.consumers.shutdown_all().await;
        self.interceptor.producers().shutdown_all().await;
        self.interceptor.transactional_producers().shutdown_all().await;

        let cloud_clients = std::mem::take(&mut *self.cloud_clients.lock());
        for client in cloud_clients {
            if let Err(e) = client.shutdown().await {
                warn!(group = %client.group(), "Failed to shut down managed broker client: {}", e);
            }
        }
        info!("Shutdown complete");
    }
}

/// Group of a managed-broker client: the un-namespaced producer identity.
fn cloud_group<D: ProducerDescriptor>(descriptor: &D) -> String {
    resolve_producer_id(descriptor.properties(), descriptor.topic())
        .unwrap_or_else(|_| descriptor.topic().to_string())
}

async fn run(runtime: &Runtime, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Send {
            topic,
            body,
            tag,
            key,
            delay_minutes,
            mode,
        } => {
            let definition = runtime.producer(&topic)?;
            let client = Arc::new(
                KafkaClient::new(
                    &runtime.config.cloud.address,
                    &cloud_group(&definition),
                    &runtime.cloud_broker(),
                    runtime.groups.clone(),
                )
                .with_client_properties(&runtime.config.cloud.client_properties),
            );
            runtime.track_cloud_client(client.clone()).await?;

            let producer = Redirecting::new(CloudProducer::new(definition, client), runtime.interceptor.clone());
            let call = match mode {
                SendMode::Sync => ProducerCall::send(body, tag, delay_minutes),
                SendMode::Async => ProducerCall::send_async(body, tag, delay_minutes),
                SendMode::Oneway => ProducerCall::send_oneway(body, tag, delay_minutes),
            };
            let call = match key {
                Some(key) => call.with_key(key),
                None => call,
            };

            let outcome = producer.send(call).await?;
            info!(?outcome, "Send finished");
            Ok(())
        }
        Command::SendTx {
            topic,
            body,
            tag,
            key,
            outcome,
        } => {
            let definition = runtime.transactional_producer(&topic)?;
            let checker = definition
                .transaction_checker()
                .map(|checker| Arc::new(CheckBridge::new(checker)) as Arc<dyn TransactionCheckListener>);
            let client = Arc::new(
                KafkaTransactionalClient::new(
                    &runtime.config.cloud.address,
                    &cloud_group(&definition),
                    &runtime.cloud_broker(),
                    runtime.groups.clone(),
                    checker,
                )
                .with_client_properties(&runtime.config.cloud.client_properties),
            );
            runtime.track_cloud_client(client.clone()).await?;

            let producer = Redirecting::new(
                CloudTransactionalProducer::new(definition, client),
                runtime.interceptor.clone(),
            );
            let status = TransactionStatus::from(outcome);
            let call = TransactionalCall::new(body, tag, Arc::new(move |_: &Message| status));
            let call = match key {
                Some(key) => call.with_key(key),
                None => call,
            };

            let receipt = producer.send_in_transaction(call).await?;
            info!(message_id = %receipt.receipt.message_id, state = ?receipt.state, "Transactional send finished");
            Ok(())
        }
        Command::Listen => {
            if runtime.consumers.is_empty() {
                warn!("No consumers running");
                return Ok(());
            }
            info!(consumers = runtime.consumers.len(), "Listening, press Ctrl+C to stop");
            futures::future::pending::<()>().await;
            Ok(())
        }
        Command::Show { .. } => Ok(()),
    }
}

/// Creates the namespaced topics of every configured entity.
async fn provision_topics(config: &Config, env: &Environment) {
    let mut manager = match TopicManager::new(&config.broker) {
        Ok(manager) => manager,
        Err(e) => {
            warn!("Topic provisioning skipped: {}", e);
            return;
        }
    };

    let topics: Vec<String> = config
        .producers
        .iter()
        .map(|entry| entry.topic.as_str())
        .chain(config.transactional_producers.iter().map(|entry| entry.topic.as_str()))
        .chain(config.consumers.iter().flat_map(|entry| entry.subscriptions.iter().map(String::as_str)))
        .map(|topic| mq_redirect::naming::namespaced_topic(env, topic))
        .collect();

    let failed = manager.ensure_all(topics.iter().map(String::as_str)).await;
    info!(topics = topics.len(), failed, "Topics provisioned");
}

fn show(config: &Config, env: &Environment, json: bool) -> anyhow::Result<()> {
    if !json {
        println!("environment: {} (production: {})", env.name(), env.is_production_env());
    }

    let producers = config
        .producers
        .iter()
        .map(ProducerDefinition::from)
        .map(|definition| (definition.topic.clone(), client_spec(env, &definition)));
    let transactional = config
        .transactional_producers
        .iter()
        .map(TransactionalProducerDefinition::from)
        .map(|definition| (definition.topic.clone(), client_spec(env, &definition)));

    for (topic, spec) in producers.chain(transactional) {
        match spec {
            Ok(spec) if json => println!("{}", serde_json::to_string(&spec)?),
            Ok(spec) => println!(
                "producer {} -> topic {} group {} (id {})",
                topic, spec.namespaced_topic, spec.group, spec.producer_id
            ),
            Err(e) => eprintln!("producer {} -> {}", topic, e),
        }
    }

    for entry in &config.consumers {
        let properties: Properties = entry.properties.clone().into();
        for topic in &entry.subscriptions {
            match subscription_spec(env, &properties, topic) {
                Ok(spec) if json => println!("{}", serde_json::to_string(&spec)?),
                Ok(spec) => println!(
                    "consumer {} -> topic {} group {}",
                    topic, spec.namespaced_topic, spec.group
                ),
                Err(e) => eprintln!("consumer {} -> {}", topic, e),
            }
        }
    }
    Ok(())
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("mq_redirect=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mq_redirect=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();
}
