use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use async_trait::async_trait;
use rdkafka::message::BorrowedMessage;
use rdkafka::Message;

use crate::types::Partition;

/// Owned envelope for a single message pulled off the stream. The pipeline
/// only interprets `partition` and `offset`; the payload is opaque until the
/// caller-supplied decoder sees it.
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    partition: Partition,
    offset: i64,

    /// Optional message key as raw bytes
    pub key: Option<Vec<u8>>,

    /// Raw payload, handed to the decoder untouched
    pub payload: Option<Vec<u8>>,

    /// Broker-assigned message timestamp
    pub timestamp: SystemTime,
}

impl ConsumerMessage {
    pub fn new(
        partition: Partition,
        offset: i64,
        key: Option<Vec<u8>>,
        payload: Option<Vec<u8>>,
    ) -> Self {
        Self {
            partition,
            offset,
            key,
            payload,
            timestamp: SystemTime::now(),
        }
    }

    /// Detach the fields the pipeline needs from a borrowed Kafka message.
    pub fn from_borrowed_message(msg: &BorrowedMessage<'_>) -> Self {
        let timestamp = msg
            .timestamp()
            .to_millis()
            .map(|ms| UNIX_EPOCH + Duration::from_millis(ms as u64))
            .unwrap_or_else(SystemTime::now);

        Self {
            partition: Partition::new(msg.topic().to_owned(), msg.partition()),
            offset: msg.offset(),
            key: msg.key().map(|k| k.to_vec()),
            payload: msg.payload().map(|p| p.to_vec()),
            timestamp,
        }
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Get the message key as a UTF-8 string if possible
    pub fn key_as_str(&self) -> Option<Result<&str, std::str::Utf8Error>> {
        self.key.as_ref().map(|k| std::str::from_utf8(k))
    }
}

/// Turns a raw payload into a typed record and derives the record's group
/// key. Both operations are pure; a failed decode is represented as `None`,
/// never as a panic into the pipeline.
pub trait RecordDecoder: Send + Sync {
    type Decoded: Send + 'static;

    /// Returns `None` when the payload cannot be interpreted. The pipeline
    /// still accounts for the message's offset in that case.
    fn decode(&self, message: &ConsumerMessage) -> Option<Self::Decoded>;

    /// Must be deterministic for a given record; it selects the queue (and
    /// therefore the worker) the record is processed on.
    fn group_key(&self, record: &Self::Decoded) -> String;
}

/// Business callback invoked by queue workers. Errors are logged and
/// swallowed by the worker; if retry is wanted, it belongs here, behind this
/// trait, where it can be made ordering-safe for the key.
#[async_trait]
pub trait RecordProcessor<T>: Send + Sync {
    async fn process(&self, group_key: &str, record: T) -> Result<()>;
}

/// Persists committable offsets to the broker. A failed commit leaves the
/// tracker untouched, so the same frontier is recomputed and retried on the
/// next commit tick.
#[async_trait]
pub trait OffsetCommitter: Send + Sync {
    async fn commit(&self, offsets: HashMap<Partition, i64>) -> Result<()>;
}
