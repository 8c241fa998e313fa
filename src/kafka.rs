use crate::config::Config;
use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use consumer_core::{CancellationSignal, Message, PartitionOffset, ReceiveOutcome, Subscription};
use rdkafka::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Message as KafkaMessage};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::info;

/// Single-topic group subscription backed by an rdkafka `StreamConsumer`.
pub struct KafkaSubscription {
    consumer: Option<StreamConsumer>,
    topic: String,
}

impl KafkaSubscription {
    pub fn open(config: &Config) -> Result<Self> {
        let consumer = client_config(config)
            .create::<StreamConsumer>()
            .context("create kafka stream consumer")?;

        consumer
            .subscribe(&[config.kafka_topic.as_str()])
            .with_context(|| format!("subscribe to topic: {}", config.kafka_topic))?;

        info!(
            topic = %config.kafka_topic,
            group_id = %config.kafka_group_id,
            brokers = %config.kafka_brokers,
            offset_reset = config.kafka_offset_reset.as_str(),
            "kafka subscription opened"
        );

        Ok(Self {
            consumer: Some(consumer),
            topic: config.kafka_topic.clone(),
        })
    }
}

impl Subscription for KafkaSubscription {
    async fn receive(&mut self, cancel: &CancellationSignal) -> ReceiveOutcome {
        let Some(consumer) = self.consumer.as_ref() else {
            return ReceiveOutcome::Fatal(anyhow!("subscription to {} is closed", self.topic));
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => ReceiveOutcome::Cancelled,
            received = consumer.recv() => match received {
                Ok(record) => ReceiveOutcome::Message(to_message(&record)),
                Err(error) => classify_error(error),
            },
        }
    }

    fn close(&mut self) -> Result<()> {
        let Some(consumer) = self.consumer.take() else {
            return Ok(());
        };

        // Offsets are auto-committed on an interval; flush whatever is
        // pending so the group resumes after the last delivered record.
        let committed = match commit_final_offsets(&consumer) {
            Ok(()) => Ok(()),
            Err(error) if error.rdkafka_error_code() == Some(RDKafkaErrorCode::NoOffset) => Ok(()),
            Err(error) => Err(anyhow::Error::new(error)
                .context(format!("commit final offsets for topic {}", self.topic))),
        };

        consumer.unsubscribe();
        drop(consumer);
        info!(topic = %self.topic, "kafka subscription closed");

        committed
    }
}

/// Synchronous commit for shutdown. On a multi-threaded runtime the worker
/// is handed off first so a slow coordinator does not stall other tasks.
fn commit_final_offsets(consumer: &StreamConsumer) -> KafkaResult<()> {
    let commit = || consumer.commit_consumer_state(CommitMode::Sync);
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(commit),
        _ => commit(),
    }
}

pub fn client_config(config: &Config) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", &config.kafka_brokers)
        .set("group.id", &config.kafka_group_id)
        .set("auto.offset.reset", config.kafka_offset_reset.as_str())
        .set("enable.auto.commit", "true")
        .set("enable.partition.eof", "false")
        .set(
            "session.timeout.ms",
            config.kafka_session_timeout_ms.to_string(),
        )
        .set("security.protocol", &config.kafka_security_protocol);

    if let Some(client_id) = &config.kafka_client_id {
        client.set("client.id", client_id);
    }
    if let Some(mechanism) = &config.kafka_sasl_mechanism {
        client.set("sasl.mechanism", mechanism);
    }
    if let (Some(username), Some(password)) =
        (&config.kafka_sasl_username, &config.kafka_sasl_password)
    {
        client
            .set("sasl.username", username)
            .set("sasl.password", password);
    }

    client
}

fn to_message(record: &BorrowedMessage<'_>) -> Message {
    Message {
        value: record
            .payload()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned()),
        position: PartitionOffset::new(record.topic(), record.partition(), record.offset()),
        timestamp: record
            .timestamp()
            .to_millis()
            .and_then(DateTime::<Utc>::from_timestamp_millis),
    }
}

/// Authentication, authorization and configuration failures end the loop;
/// every other client error is treated as transient.
pub fn classify_error(error: KafkaError) -> ReceiveOutcome {
    if is_fatal(&error) {
        return ReceiveOutcome::Fatal(anyhow::Error::new(error).context("kafka consumer failed"));
    }
    ReceiveOutcome::Recoverable(error.to_string())
}

fn is_fatal(error: &KafkaError) -> bool {
    match error {
        KafkaError::ClientConfig(..)
        | KafkaError::ClientCreation(_)
        | KafkaError::Subscription(_)
        | KafkaError::MessageConsumptionFatal(_) => true,
        _ => matches!(
            error.rdkafka_error_code(),
            Some(
                RDKafkaErrorCode::Fatal
                    | RDKafkaErrorCode::Authentication
                    | RDKafkaErrorCode::SaslAuthenticationFailed
                    | RDKafkaErrorCode::TopicAuthorizationFailed
                    | RDKafkaErrorCode::GroupAuthorizationFailed
                    | RDKafkaErrorCode::ClusterAuthorizationFailed
                    | RDKafkaErrorCode::InvalidArgument
            )
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use consumer_core::OffsetReset;

    fn config() -> Config {
        Config {
            kafka_brokers: "localhost:9092".to_string(),
            kafka_group_id: "console-consumer".to_string(),
            kafka_topic: "my-topic".to_string(),
            kafka_offset_reset: OffsetReset::Earliest,
            kafka_client_id: None,
            kafka_security_protocol: "PLAINTEXT".to_string(),
            kafka_sasl_mechanism: None,
            kafka_sasl_username: None,
            kafka_sasl_password: None,
            kafka_session_timeout_ms: 10_000,
            error_backoff_base_ms: 100,
            error_backoff_max_ms: 5_000,
        }
    }

    fn unreachable_config() -> Config {
        let mut config = config();
        config.kafka_brokers = "127.0.0.1:1".to_string();
        config.kafka_group_id = "topic-consumer-tests".to_string();
        config
    }

    async fn cancelled_receive_then_double_close() {
        let mut subscription = KafkaSubscription::open(&unreachable_config()).unwrap();
        let cancel = CancellationSignal::new();
        cancel.cancel();

        let outcome = subscription.receive(&cancel).await;
        assert!(matches!(outcome, ReceiveOutcome::Cancelled), "{outcome:?}");

        // nothing was consumed, so the final commit reports NoOffset
        subscription.close().unwrap();
        subscription.close().unwrap();

        let outcome = subscription.receive(&CancellationSignal::new()).await;
        assert!(matches!(outcome, ReceiveOutcome::Fatal(_)), "{outcome:?}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn subscription_lifecycle_without_broker_on_worker_pool() {
        cancelled_receive_then_double_close().await;
    }

    #[tokio::test]
    async fn subscription_lifecycle_without_broker_on_current_thread() {
        cancelled_receive_then_double_close().await;
    }

    #[test]
    fn client_config_maps_group_settings() {
        let client = client_config(&config());

        assert_eq!(client.get("bootstrap.servers"), Some("localhost:9092"));
        assert_eq!(client.get("group.id"), Some("console-consumer"));
        assert_eq!(client.get("auto.offset.reset"), Some("earliest"));
        assert_eq!(client.get("enable.auto.commit"), Some("true"));
        assert_eq!(client.get("session.timeout.ms"), Some("10000"));
        assert_eq!(client.get("client.id"), None);
        assert_eq!(client.get("sasl.username"), None);
    }

    #[test]
    fn client_config_adds_optional_security_settings() {
        let mut config = config();
        config.kafka_offset_reset = OffsetReset::Latest;
        config.kafka_client_id = Some("console-1".to_string());
        config.kafka_security_protocol = "SASL_SSL".to_string();
        config.kafka_sasl_mechanism = Some("SCRAM-SHA-512".to_string());
        config.kafka_sasl_username = Some("svc".to_string());
        config.kafka_sasl_password = Some("secret".to_string());

        let client = client_config(&config);

        assert_eq!(client.get("auto.offset.reset"), Some("latest"));
        assert_eq!(client.get("client.id"), Some("console-1"));
        assert_eq!(client.get("security.protocol"), Some("SASL_SSL"));
        assert_eq!(client.get("sasl.mechanism"), Some("SCRAM-SHA-512"));
        assert_eq!(client.get("sasl.username"), Some("svc"));
        assert_eq!(client.get("sasl.password"), Some("secret"));
    }

    #[test]
    fn transient_broker_errors_are_recoverable() {
        for code in [
            RDKafkaErrorCode::LeaderNotAvailable,
            RDKafkaErrorCode::BrokerTransportFailure,
            RDKafkaErrorCode::UnknownTopicOrPartition,
        ] {
            let outcome = classify_error(KafkaError::MessageConsumption(code));
            assert!(
                matches!(outcome, ReceiveOutcome::Recoverable(_)),
                "{code:?} should be recoverable"
            );
        }
    }

    #[test]
    fn auth_and_fatal_errors_end_the_loop() {
        for error in [
            KafkaError::MessageConsumption(RDKafkaErrorCode::SaslAuthenticationFailed),
            KafkaError::MessageConsumption(RDKafkaErrorCode::TopicAuthorizationFailed),
            KafkaError::Global(RDKafkaErrorCode::Fatal),
            KafkaError::ClientCreation("bad config".to_string()),
        ] {
            assert!(matches!(classify_error(error), ReceiveOutcome::Fatal(_)));
        }
    }

    #[test]
    fn recoverable_description_carries_reason() {
        let outcome = classify_error(KafkaError::MessageConsumption(
            RDKafkaErrorCode::LeaderNotAvailable,
        ));
        let ReceiveOutcome::Recoverable(reason) = outcome else {
            panic!("expected recoverable outcome");
        };
        assert!(reason.contains("Leader not available"), "{reason}");
    }
}
