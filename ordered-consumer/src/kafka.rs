//! Kafka wiring: consumer configuration and the broker-side offset committer

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::{Offset, TopicPartitionList};
use tracing::debug;

use crate::message::OffsetCommitter;
use crate::types::Partition;

/// Build an rdkafka client config for a group consumer with manual offset
/// management. Auto-commit and auto-store are disabled: the tracker decides
/// what is safe to commit, not librdkafka.
pub fn consumer_client_config(
    hosts: &str,
    consumer_group: &str,
    offset_reset: &str,
) -> ClientConfig {
    let mut config = ClientConfig::new();
    config
        .set("bootstrap.servers", hosts)
        .set("group.id", consumer_group)
        .set("auto.offset.reset", offset_reset)
        .set("enable.auto.commit", "false")
        .set("enable.auto.offset.store", "false")
        .set("socket.timeout.ms", "10000")
        .set("session.timeout.ms", "60000")
        .set("heartbeat.interval.ms", "5000")
        .set("max.poll.interval.ms", "300000");
    config
}

/// Commits offsets through a shared rdkafka consumer.
///
/// Kafka commit semantics: the committed offset is the NEXT offset to read,
/// so a fully processed offset N is committed as N + 1.
pub struct KafkaOffsetCommitter {
    consumer: Arc<StreamConsumer>,
}

impl KafkaOffsetCommitter {
    pub fn new(consumer: Arc<StreamConsumer>) -> Self {
        Self { consumer }
    }
}

#[async_trait]
impl OffsetCommitter for KafkaOffsetCommitter {
    async fn commit(&self, offsets: HashMap<Partition, i64>) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        for (partition, offset) in &offsets {
            tpl.add_partition_offset(
                partition.topic(),
                partition.partition_number(),
                Offset::Offset(offset + 1),
            )
            .with_context(|| {
                format!("Failed to add {partition} offset {offset} to commit list")
            })?;
        }

        self.consumer
            .commit(&tpl, rdkafka::consumer::CommitMode::Async)
            .context("Failed to commit offsets to broker")?;

        debug!(partitions = offsets.len(), "Committed offsets to broker");
        Ok(())
    }
}
