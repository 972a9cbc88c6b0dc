// ==== Pipeline queue metrics ====
/// Gauge for the number of items queued across all workers
pub const PIPELINE_QUEUED_ITEMS: &str = "pipeline_queued_items";

/// Gauge for per-queue depth
pub const PIPELINE_QUEUE_DEPTH: &str = "pipeline_queue_depth";

/// Counter for submissions that found their queue full
pub const PIPELINE_BACKPRESSURE_TOTAL: &str = "pipeline_backpressure_total";

/// Histogram for time spent waiting on a full queue (ms)
pub const PIPELINE_BACKPRESSURE_WAIT_MS: &str = "pipeline_backpressure_wait_ms";

// ==== Processing metrics ====
/// Counter for messages dropped because they could not be decoded
pub const PIPELINE_UNDECODABLE_MESSAGES: &str = "pipeline_undecodable_messages_total";

/// Counter for processing callbacks that returned an error
pub const PIPELINE_PROCESSING_FAILURES: &str = "pipeline_processing_failures_total";

// ==== Commit metrics ====
/// Counter for partition offsets committed to the broker
pub const PIPELINE_OFFSETS_COMMITTED: &str = "pipeline_offsets_committed_total";

/// Counter for failed commit attempts
pub const PIPELINE_COMMIT_FAILURES: &str = "pipeline_commit_failures_total";

/// Gauge for offsets tracked but not yet completed
pub const PIPELINE_OUTSTANDING_OFFSETS: &str = "pipeline_outstanding_offsets";
