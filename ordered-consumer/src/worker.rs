//! Queue Worker - drains exactly one queue, in order, until told to stop
//!
//! Each worker owns one bounded channel. Items arrive in submission order
//! and are processed one at a time, which is what makes the per-key
//! ordering guarantee hold: a key always hashes to the same queue, and a
//! queue is only ever drained by its own worker.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::message::RecordProcessor;
use crate::metrics_const::PIPELINE_PROCESSING_FAILURES;
use crate::offset_tracker::OffsetTracker;
use crate::types::Partition;

/// A unit of work bound for one queue: a decoded record plus the
/// coordinates needed to account for it afterwards. Owned by the queue it
/// sits in, then by the worker executing it.
pub struct WorkItem<T> {
    pub partition: Partition,
    pub offset: i64,
    pub group_key: String,
    pub record: T,
}

/// A worker that processes items from a single queue
pub struct QueueWorker<T: Send + 'static> {
    index: usize,
    sender: mpsc::Sender<WorkItem<T>>,
    handle: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> QueueWorker<T> {
    pub fn new<P>(
        index: usize,
        processor: Arc<P>,
        tracker: Arc<OffsetTracker>,
        buffer_size: usize,
    ) -> Self
    where
        P: RecordProcessor<T> + 'static,
    {
        let (sender, receiver) = mpsc::channel(buffer_size);

        let handle = tokio::spawn(async move {
            Self::run_worker(index, receiver, processor, tracker).await;
        });

        Self {
            index,
            sender,
            handle: Some(handle),
        }
    }

    /// Get a clone of the queue's sender
    pub fn sender(&self) -> mpsc::Sender<WorkItem<T>> {
        self.sender.clone()
    }

    /// Number of items currently sitting in this worker's queue
    pub fn depth(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Remaining capacity of the queue; zero means the next send waits
    pub fn capacity(&self) -> usize {
        self.sender.capacity()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Close the queue to new items and join the worker, letting queued
    /// items drain first. A worker that does not stop within the grace
    /// period is logged and abandoned, never escalated.
    pub async fn shutdown(mut self, grace: Duration) {
        drop(self.sender);

        let Some(handle) = self.handle.take() else {
            return;
        };
        match timeout(grace, handle).await {
            Ok(Ok(())) => debug!(queue = self.index, "Queue worker shut down"),
            Ok(Err(e)) => warn!(
                queue = self.index,
                error = ?e,
                "Queue worker panicked during shutdown"
            ),
            Err(_) => warn!(
                queue = self.index,
                grace = ?grace,
                "Queue worker did not stop within grace period, abandoning"
            ),
        }
    }

    /// The main worker loop. Exits when the channel is closed and drained.
    async fn run_worker<P>(
        index: usize,
        mut receiver: mpsc::Receiver<WorkItem<T>>,
        processor: Arc<P>,
        tracker: Arc<OffsetTracker>,
    ) where
        P: RecordProcessor<T> + 'static,
    {
        info!(queue = index, "Queue worker started");

        while let Some(item) = receiver.recv().await {
            let WorkItem {
                partition,
                offset,
                group_key,
                record,
            } = item;

            match processor.process(&group_key, record).await {
                Ok(()) => {
                    debug!(
                        queue = index,
                        partition = %partition,
                        offset,
                        group_key = %group_key,
                        "Processed item"
                    );
                }
                Err(e) => {
                    // At-least-once, not at-least-once-correct: the offset
                    // completes anyway. Retry, if wanted, belongs to the
                    // processor, where it can be kept ordering-safe.
                    error!(
                        queue = index,
                        partition = %partition,
                        offset,
                        group_key = %group_key,
                        error = ?e,
                        "Processing failed"
                    );
                    metrics::counter!(
                        PIPELINE_PROCESSING_FAILURES,
                        "queue" => index.to_string()
                    )
                    .increment(1);
                }
            }

            // Completion accounting must never leak, whatever process() did.
            tracker.complete_offset(&partition, offset);
        }

        info!(queue = index, "Queue worker shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::time::sleep;

    struct FailingProcessor {
        failures: AtomicUsize,
        processed: AtomicUsize,
    }

    impl FailingProcessor {
        fn new() -> Self {
            Self {
                failures: AtomicUsize::new(0),
                processed: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RecordProcessor<String> for FailingProcessor {
        async fn process(&self, _group_key: &str, record: String) -> Result<()> {
            if record == "fail" {
                self.failures.fetch_add(1, Ordering::SeqCst);
                return Err(anyhow!("simulated processing failure"));
            }
            self.processed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct SlowProcessor {
        processed: AtomicUsize,
        delay: Duration,
    }

    #[async_trait]
    impl RecordProcessor<String> for SlowProcessor {
        async fn process(&self, _group_key: &str, _record: String) -> Result<()> {
            sleep(self.delay).await;
            self.processed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct OrderRecordingProcessor {
        seen: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl RecordProcessor<i64> for OrderRecordingProcessor {
        async fn process(&self, _group_key: &str, record: i64) -> Result<()> {
            self.seen.lock().unwrap().push(record);
            Ok(())
        }
    }

    fn test_partition() -> Partition {
        Partition::new("test-topic".to_string(), 0)
    }

    fn item(offset: i64, record: &str) -> WorkItem<String> {
        WorkItem {
            partition: test_partition(),
            offset,
            group_key: "k".to_string(),
            record: record.to_string(),
        }
    }

    #[tokio::test]
    async fn test_failures_still_complete_offsets() {
        let tracker = Arc::new(OffsetTracker::new());
        let processor = Arc::new(FailingProcessor::new());
        let worker = QueueWorker::new(0, processor.clone(), tracker.clone(), 10);
        let partition = test_partition();

        for offset in 0..4 {
            tracker.add_offset(&partition, offset);
            let record = if offset == 1 { "fail" } else { "ok" };
            worker.sender().send(item(offset, record)).await.unwrap();
        }

        worker.shutdown(Duration::from_secs(5)).await;

        assert_eq!(processor.failures.load(Ordering::SeqCst), 1);
        assert_eq!(processor.processed.load(Ordering::SeqCst), 3);
        // The failed offset completed anyway, so the frontier covers it
        assert_eq!(tracker.get_committable_offsets().get(&partition), Some(&3));
    }

    #[tokio::test]
    async fn test_drains_queue_on_shutdown() {
        let tracker = Arc::new(OffsetTracker::new());
        let processor = Arc::new(SlowProcessor {
            processed: AtomicUsize::new(0),
            delay: Duration::from_millis(10),
        });
        let worker = QueueWorker::new(0, processor.clone(), tracker.clone(), 10);
        let partition = test_partition();

        for offset in 0..5 {
            tracker.add_offset(&partition, offset);
            worker.sender().send(item(offset, "ok")).await.unwrap();
        }

        // Shutdown immediately; all queued items must still be processed
        worker.shutdown(Duration::from_secs(5)).await;

        assert_eq!(processor.processed.load(Ordering::SeqCst), 5);
        assert_eq!(tracker.outstanding_count(), 0);
    }

    #[tokio::test]
    async fn test_fifo_within_queue() {
        let tracker = Arc::new(OffsetTracker::new());
        let processor = Arc::new(OrderRecordingProcessor {
            seen: Mutex::new(Vec::new()),
        });
        let worker = QueueWorker::new(0, processor.clone(), tracker.clone(), 32);
        let partition = test_partition();

        for offset in 0..20i64 {
            tracker.add_offset(&partition, offset);
            worker
                .sender()
                .send(WorkItem {
                    partition: partition.clone(),
                    offset,
                    group_key: "k".to_string(),
                    record: offset,
                })
                .await
                .unwrap();
        }

        worker.shutdown(Duration::from_secs(5)).await;

        let seen = processor.seen.lock().unwrap();
        assert_eq!(*seen, (0..20).collect::<Vec<i64>>());
    }
}
