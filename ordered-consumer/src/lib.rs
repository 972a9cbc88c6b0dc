//! Ordered consumer service.
//!
//! Consumes a partitioned stream, processes records concurrently while
//! preserving per-group-key order, and commits only gap-free offset
//! prefixes so a crash never skips an unprocessed message.
//!
//! ## Error logging (anyhow)
//!
//! When logging `anyhow::Error` or other error types that implement `std::error::Error` with
//! a cause chain, use formats that include the full chain so root causes are visible in logs:
//!
//! - **Inline format:** `{e:#}` — full chain on one line (`outer: middle: root cause`).
//! - **Structured field:** `error = ?e` — full chain with `Caused by:` sections (Debug).
//!
//! Avoid `{}` / `%e` (Display) for errors — they only show the top-level message and hide the chain.

pub mod config;
pub mod kafka;
pub mod message;
pub mod metrics;
pub mod metrics_const;
pub mod offset_tracker;
pub mod service;
pub mod strategy;
pub mod types;
pub mod worker;
pub mod worker_pool;

// Re-export commonly used types for convenience
pub use message::{ConsumerMessage, OffsetCommitter, RecordDecoder, RecordProcessor};
pub use offset_tracker::OffsetTracker;
pub use strategy::{ProcessingStrategy, StrategyConfig};
pub use types::Partition;
pub use worker::WorkItem;
pub use worker_pool::{FixedWorkerPool, WorkerPoolConfig};
