use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rdkafka::consumer::{Consumer, StreamConsumer};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::{
    config::Config,
    kafka::KafkaOffsetCommitter,
    message::{ConsumerMessage, RecordDecoder, RecordProcessor},
    strategy::ProcessingStrategy,
};

/// A decoded event: the derived group key plus the parsed JSON body
pub struct JsonRecord {
    pub group_key: String,
    pub body: Value,
}

/// Decodes message payloads as JSON and derives the group key from a
/// configured top-level field. Messages that are not valid JSON objects, or
/// lack the field, are undecodable.
pub struct JsonFieldDecoder {
    group_key_field: String,
}

impl JsonFieldDecoder {
    pub fn new(group_key_field: String) -> Self {
        Self { group_key_field }
    }
}

impl RecordDecoder for JsonFieldDecoder {
    type Decoded = JsonRecord;

    fn decode(&self, message: &ConsumerMessage) -> Option<JsonRecord> {
        let payload = message.payload.as_deref()?;
        let body: Value = serde_json::from_slice(payload).ok()?;
        let group_key = body.get(&self.group_key_field)?.as_str()?.to_string();
        Some(JsonRecord { group_key, body })
    }

    fn group_key(&self, record: &JsonRecord) -> String {
        record.group_key.clone()
    }
}

/// Default processor: logs each record. Stands in until a real sink is
/// plugged in through `PipelineService::with_processor`.
pub struct LogSinkProcessor;

#[async_trait]
impl RecordProcessor<JsonRecord> for LogSinkProcessor {
    async fn process(&self, group_key: &str, record: JsonRecord) -> Result<()> {
        info!(group_key = %group_key, body = %record.body, "Processed record");
        Ok(())
    }
}

/// The main consumer service wiring Kafka to the processing strategy
pub struct PipelineService<P: RecordProcessor<JsonRecord> + 'static> {
    config: Config,
    processor: Arc<P>,
}

impl PipelineService<LogSinkProcessor> {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            processor: Arc::new(LogSinkProcessor),
        }
    }
}

impl<P: RecordProcessor<JsonRecord> + 'static> PipelineService<P> {
    /// Create a service with a custom processor (useful for testing)
    pub fn with_processor(config: Config, processor: Arc<P>) -> Self {
        Self { config, processor }
    }

    /// Run until ctrl+c
    pub async fn run(self) -> Result<()> {
        let signal = async {
            tokio::signal::ctrl_c()
                .await
                .expect("Failed to listen for ctrl+c signal");
        };
        self.run_with_shutdown(signal).await
    }

    /// Run the service with a custom shutdown signal
    pub async fn run_with_shutdown(self, shutdown_signal: impl Future<Output = ()>) -> Result<()> {
        let consumer: Arc<StreamConsumer> = Arc::new(
            self.config
                .client_config()
                .create()
                .context("Failed to create Kafka consumer")?,
        );

        consumer
            .subscribe(&[&self.config.kafka_consumer_topic])
            .with_context(|| {
                format!(
                    "Failed to subscribe to topic '{}'",
                    self.config.kafka_consumer_topic
                )
            })?;

        let decoder = Arc::new(JsonFieldDecoder::new(self.config.group_key_field.clone()));
        let committer = Arc::new(KafkaOffsetCommitter::new(consumer.clone()));
        let strategy = ProcessingStrategy::new(
            decoder,
            self.processor.clone(),
            committer,
            self.config.strategy_config(),
        );

        info!(
            topic = %self.config.kafka_consumer_topic,
            group = %self.config.kafka_consumer_group,
            "Starting ordered consumer service"
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let poll_handle = tokio::spawn(async move {
            Self::poll_loop(consumer, strategy, shutdown_rx).await;
        });

        shutdown_signal.await;

        info!("Received shutdown signal, shutting down gracefully...");
        let _ = shutdown_tx.send(());

        // The poll loop closes the strategy before exiting; give it the
        // strategy's own timeout plus a margin
        let deadline = self.config.shutdown_timeout() + Duration::from_secs(5);
        match tokio::time::timeout(deadline, poll_handle).await {
            Ok(Ok(())) => info!("Consumer stopped normally"),
            Ok(Err(e)) => error!("Consumer task panicked: {e:#}"),
            Err(_) => error!("Consumer shutdown timed out after {deadline:?}"),
        }

        info!("Ordered consumer service stopped");
        Ok(())
    }

    async fn poll_loop(
        consumer: Arc<StreamConsumer>,
        strategy: ProcessingStrategy<JsonFieldDecoder>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Poll loop stopping");
                    break;
                }
                result = consumer.recv() => {
                    match result {
                        Ok(borrowed) => {
                            let message = ConsumerMessage::from_borrowed_message(&borrowed);
                            strategy.submit(message).await;
                        }
                        Err(e) => {
                            warn!("Error receiving from Kafka: {e:#}");
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }
            }
        }

        strategy.close().await;
    }
}
