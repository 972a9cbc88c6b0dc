//! Fixed Queue Pool - owns N queues and N workers, routes by group key
//!
//! A group key maps to exactly one queue for the lifetime of the pool.
//! Reassigning a key mid-stream could let two items for the same key run on
//! two workers concurrently, so the assignment is static: load balance is
//! traded for an ordering guarantee that is cheap to state and verify.

use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use siphasher::sip::SipHasher13;
use thiserror::Error;
use tracing::info;

use crate::message::RecordProcessor;
use crate::metrics_const::{
    PIPELINE_BACKPRESSURE_TOTAL, PIPELINE_BACKPRESSURE_WAIT_MS, PIPELINE_QUEUED_ITEMS,
    PIPELINE_QUEUE_DEPTH,
};
use crate::offset_tracker::OffsetTracker;
use crate::worker::{QueueWorker, WorkItem};

/// Error returned when a work item cannot be enqueued
#[derive(Error, Debug)]
pub enum SubmitError {
    /// The selected queue is closed (pool shutting down)
    #[error("queue {0} is closed")]
    QueueClosed(usize),
}

/// Configuration for the fixed worker pool
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of queues and workers (always 1:1)
    pub num_workers: usize,
    /// Buffer size of each worker's channel; a full buffer blocks `submit`
    pub channel_buffer_size: usize,
    /// How long shutdown waits for each worker to drain and stop
    pub shutdown_grace: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 4,
            channel_buffer_size: 1000,
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// Snapshot of queue depths, for gauges and drain checks
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub queue_depths: Vec<usize>,
    pub total_queued: usize,
}

/// A static set of queues and workers with deterministic key routing
pub struct FixedWorkerPool<T: Send + 'static> {
    workers: Vec<QueueWorker<T>>,
    tracker: Arc<OffsetTracker>,
    shutdown_grace: Duration,
}

impl<T: Send + 'static> FixedWorkerPool<T> {
    pub fn new<P>(
        processor: Arc<P>,
        tracker: Arc<OffsetTracker>,
        config: &WorkerPoolConfig,
    ) -> Self
    where
        P: RecordProcessor<T> + 'static,
    {
        assert!(config.num_workers > 0, "pool needs at least one worker");

        info!(
            num_workers = config.num_workers,
            buffer = config.channel_buffer_size,
            "Starting fixed worker pool"
        );

        let workers = (0..config.num_workers)
            .map(|index| {
                QueueWorker::new(
                    index,
                    processor.clone(),
                    tracker.clone(),
                    config.channel_buffer_size,
                )
            })
            .collect();

        Self {
            workers,
            tracker,
            shutdown_grace: config.shutdown_grace,
        }
    }

    /// Queue index for a group key. Stable for the lifetime of the pool:
    /// same key, same queue, same worker.
    pub fn queue_index(&self, group_key: &str) -> usize {
        let mut hasher = SipHasher13::new();
        group_key.hash(&mut hasher);
        (hasher.finish() as usize) % self.workers.len()
    }

    /// Register the item's offset with the tracker and enqueue it on the
    /// queue its group key hashes to. Registration happens before the
    /// enqueue so the commit frontier can never pass an item that was
    /// accepted but not yet delivered to a worker. Awaits when the queue is
    /// full; that wait is the backpressure path and is counted and timed.
    pub async fn submit(&self, item: WorkItem<T>) -> Result<(), SubmitError> {
        let index = self.queue_index(&item.group_key);

        self.tracker.add_offset(&item.partition, item.offset);

        let sender = self.workers[index].sender();

        let backpressured = sender.capacity() == 0;
        let send_start = if backpressured {
            metrics::counter!(PIPELINE_BACKPRESSURE_TOTAL, "queue" => index.to_string())
                .increment(1);
            Some(Instant::now())
        } else {
            None
        };

        let result = sender
            .send(item)
            .await
            .map_err(|_| SubmitError::QueueClosed(index));

        if let Some(start) = send_start {
            metrics::histogram!(PIPELINE_BACKPRESSURE_WAIT_MS, "queue" => index.to_string())
                .record(start.elapsed().as_millis() as f64);
        }

        result
    }

    /// Current depth of each queue and their sum. Observability only; the
    /// queues themselves gate nothing beyond their own buffer size.
    pub fn stats(&self) -> PoolStats {
        let queue_depths: Vec<usize> = self.workers.iter().map(|w| w.depth()).collect();
        let total_queued = queue_depths.iter().sum();

        for (index, depth) in queue_depths.iter().enumerate() {
            metrics::gauge!(PIPELINE_QUEUE_DEPTH, "queue" => index.to_string())
                .set(*depth as f64);
        }
        metrics::gauge!(PIPELINE_QUEUED_ITEMS).set(total_queued as f64);

        PoolStats {
            queue_depths,
            total_queued,
        }
    }

    pub fn num_workers(&self) -> usize {
        self.workers.len()
    }

    /// Poll until every queue is empty or the timeout elapses. An item that
    /// a worker has already pulled no longer counts as queued.
    pub async fn wait_until_empty(&self, wait: Duration) -> bool {
        let deadline = Instant::now() + wait;
        loop {
            if self.stats().total_queued == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Close every queue and join the workers concurrently, letting queued
    /// items drain within the configured grace period.
    pub async fn shutdown(self) {
        let grace = self.shutdown_grace;
        self.shutdown_with_grace(grace).await;
    }

    /// Shutdown with an explicit grace period. A zero grace abandons
    /// whatever is still queued; broker redelivery covers it.
    pub async fn shutdown_with_grace(self, grace: Duration) {
        info!(num_workers = self.workers.len(), "Shutting down worker pool");
        join_all(self.workers.into_iter().map(|w| w.shutdown(grace))).await;
    }
}
