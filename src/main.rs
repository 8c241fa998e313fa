use anyhow::{Context, Result};
use consumer_core::{CancellationSignal, ConsumptionLoop, ErrorBackoff};
use topic_consumer::config::Config;
use topic_consumer::kafka::KafkaSubscription;
use topic_consumer::shutdown;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing();
    info!("application started; press Ctrl+C to shut down");

    let config = Config::from_env().context("load consumer config")?;
    let subscription = KafkaSubscription::open(&config).context("open kafka subscription")?;

    let cancel = CancellationSignal::new();
    let shutdown_handle = shutdown::install(cancel.clone());

    let consumption = ConsumptionLoop::new(ErrorBackoff::new(
        config.error_backoff_base_ms,
        config.error_backoff_max_ms,
    ));

    info!(topic = %config.kafka_topic, group_id = %config.kafka_group_id, "kafka consuming");

    let mut consumed = 0u64;
    let mut failed = 0u64;
    let result = consumption
        .run(
            subscription,
            &cancel,
            |message| {
                consumed += 1;
                info!(
                    value = message.value_or_empty(),
                    position = %message.position,
                    "consumed message"
                );
            },
            |reason| {
                failed += 1;
                warn!(reason, "error occurred while consuming");
            },
        )
        .await;

    shutdown_handle.abort();
    info!(consumed, failed, "application is shutting down");

    result.context("consume topic")
}

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
