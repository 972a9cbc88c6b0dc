//! Processing Strategy - the per-message entry point and the commit loop
//!
//! Message lifecycle: received -> decoded|dropped -> offset-tracked ->
//! queued -> completed. There is no retry state; an undecodable message is
//! tracked and immediately completed, so it can never block the commit
//! frontier.
//!
//! A background loop periodically asks the tracker for safely committable
//! offsets and hands them to the broker-side committer. A failed commit
//! leaves the tracker untouched: the same frontier is recomputed on the
//! next tick, so an error only delays the commit, never corrupts it.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::message::{ConsumerMessage, OffsetCommitter, RecordDecoder, RecordProcessor};
use crate::metrics_const::{
    PIPELINE_COMMIT_FAILURES, PIPELINE_OFFSETS_COMMITTED, PIPELINE_OUTSTANDING_OFFSETS,
    PIPELINE_UNDECODABLE_MESSAGES,
};
use crate::offset_tracker::OffsetTracker;
use crate::worker::WorkItem;
use crate::worker_pool::{FixedWorkerPool, PoolStats, WorkerPoolConfig};

/// Configuration for the processing strategy
#[derive(Debug, Clone)]
pub struct StrategyConfig {
    pub pool: WorkerPoolConfig,
    /// Period of the background commit loop
    pub commit_interval: Duration,
    /// How long close() waits for queues to drain and loops to stop
    pub shutdown_timeout: Duration,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            pool: WorkerPoolConfig::default(),
            commit_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Orchestrates decode, routing, offset accounting and periodic commits
pub struct ProcessingStrategy<D: RecordDecoder> {
    decoder: Arc<D>,
    pool: FixedWorkerPool<D::Decoded>,
    tracker: Arc<OffsetTracker>,
    commit_handle: Option<JoinHandle<()>>,
    commit_stop: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl<D: RecordDecoder + 'static> ProcessingStrategy<D> {
    pub fn new<P>(
        decoder: Arc<D>,
        processor: Arc<P>,
        committer: Arc<dyn OffsetCommitter>,
        config: StrategyConfig,
    ) -> Self
    where
        P: RecordProcessor<D::Decoded> + 'static,
    {
        let tracker = Arc::new(OffsetTracker::new());
        let pool = FixedWorkerPool::new(processor, tracker.clone(), &config.pool);

        let (commit_stop, stop_rx) = oneshot::channel();
        let loop_tracker = tracker.clone();
        let commit_handle = tokio::spawn(async move {
            Self::run_commit_loop(loop_tracker, committer, config.commit_interval, stop_rx).await;
        });

        Self {
            decoder,
            pool,
            tracker,
            commit_handle: Some(commit_handle),
            commit_stop: Some(commit_stop),
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    /// Feed one message through the pipeline. Never raises to the caller:
    /// every failure path still accounts for the message's offset, so a
    /// message that was never queued cannot stall the commit frontier.
    pub async fn submit(&self, message: ConsumerMessage) {
        let partition = message.partition().clone();
        let offset = message.offset();

        let Some(record) = self.decoder.decode(&message) else {
            debug!(partition = %partition, offset, "Dropping undecodable message");
            metrics::counter!(PIPELINE_UNDECODABLE_MESSAGES).increment(1);
            // Vacuously complete: tracked, then immediately done
            self.tracker.add_offset(&partition, offset);
            self.tracker.complete_offset(&partition, offset);
            return;
        };

        let group_key = self.decoder.group_key(&record);
        let item = WorkItem {
            partition: partition.clone(),
            offset,
            group_key,
            record,
        };

        // pool.submit registers the offset before enqueueing
        if let Err(e) = self.pool.submit(item).await {
            error!(
                partition = %partition,
                offset,
                error = %e,
                "Failed to enqueue work item, force-completing its offset"
            );
            self.tracker.complete_offset(&partition, offset);
        }
    }

    /// The tracker backing this strategy, for observability and tests
    pub fn tracker(&self) -> Arc<OffsetTracker> {
        self.tracker.clone()
    }

    /// Queue depth snapshot from the underlying pool
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Graceful shutdown: drain the queues, stop the commit loop (which
    /// runs one final commit), then stop the workers.
    pub async fn close(mut self) {
        info!("Closing processing strategy");

        if !self.pool.wait_until_empty(self.shutdown_timeout).await {
            warn!(
                stats = ?self.pool.stats(),
                "Queues did not drain within the shutdown timeout"
            );
        }

        self.stop_commit_loop().await;
        self.pool.shutdown().await;

        info!("Processing strategy closed");
    }

    /// Immediate shutdown: abandon queued items and rely on broker
    /// redelivery from the last committed offset.
    pub async fn terminate(mut self) {
        info!("Terminating processing strategy");

        self.stop_commit_loop().await;
        self.pool.shutdown_with_grace(Duration::ZERO).await;
    }

    async fn stop_commit_loop(&mut self) {
        if let Some(stop) = self.commit_stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.commit_handle.take() {
            match timeout(self.shutdown_timeout, handle).await {
                Ok(Ok(())) => debug!("Commit loop stopped"),
                Ok(Err(e)) => warn!(error = ?e, "Commit loop panicked"),
                Err(_) => warn!("Commit loop did not stop within the shutdown timeout"),
            }
        }
    }

    async fn run_commit_loop(
        tracker: Arc<OffsetTracker>,
        committer: Arc<dyn OffsetCommitter>,
        commit_interval: Duration,
        mut stop_rx: oneshot::Receiver<()>,
    ) {
        info!(interval = ?commit_interval, "Commit loop started");

        let mut interval = tokio::time::interval(commit_interval);
        loop {
            tokio::select! {
                _ = &mut stop_rx => {
                    info!("Commit loop stopping");
                    break;
                }
                _ = interval.tick() => {
                    Self::commit_tick(&tracker, committer.as_ref()).await;
                }
            }
        }

        // One final pass so a graceful shutdown persists everything that
        // finished while the last tick was pending
        Self::commit_tick(&tracker, committer.as_ref()).await;
    }

    async fn commit_tick(tracker: &OffsetTracker, committer: &dyn OffsetCommitter) {
        metrics::gauge!(PIPELINE_OUTSTANDING_OFFSETS).set(tracker.outstanding_count() as f64);

        let committable = tracker.get_committable_offsets();
        if committable.is_empty() {
            debug!("No committable offsets");
            return;
        }

        match committer.commit(committable.clone()).await {
            Ok(()) => {
                for (partition, offset) in &committable {
                    tracker.mark_committed(partition, *offset);
                    debug!(partition = %partition, offset, "Committed offset");
                }
                metrics::counter!(PIPELINE_OFFSETS_COMMITTED)
                    .increment(committable.len() as u64);
            }
            Err(e) => {
                // Nothing was marked committed, so the same frontier is
                // recomputed and retried on the next tick
                error!(error = ?e, "Commit failed, will retry on next tick");
                metrics::counter!(PIPELINE_COMMIT_FAILURES).increment(1);
            }
        }
    }
}
