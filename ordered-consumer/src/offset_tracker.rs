//! Offset Tracker - per-partition bookkeeping of in-flight offsets
//!
//! Tracks which offsets have been handed to workers and which have finished,
//! and computes the highest contiguous offset that is safe to commit. An
//! offset is safe only when every offset at or below it has finished, even
//! if a later offset finished first; committing past a still-in-flight hole
//! would silently lose that message on restart.
//!
//! The tracker never persists anything. Losing it in a crash is recovered by
//! broker redelivery from the last externally committed offset.

use std::collections::{BTreeSet, HashMap, HashSet};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::types::Partition;

/// State tracked per partition
struct PartitionState {
    /// Every offset added and not yet purged by a commit watermark
    tracked: BTreeSet<i64>,
    /// Offsets still being processed; always a subset of `tracked`
    outstanding: HashSet<i64>,
    /// Highest offset confirmed committed, -1 when nothing committed yet
    last_committed: i64,
}

impl Default for PartitionState {
    fn default() -> Self {
        Self {
            tracked: BTreeSet::new(),
            outstanding: HashSet::new(),
            last_committed: -1,
        }
    }
}

/// Thread-safe tracker for in-flight and completed offsets per partition.
///
/// Per-partition state lives behind a `DashMap`, so mutations for one
/// partition are serialized while partitions never block each other. All
/// operations are pure in-memory bookkeeping and cannot fail.
pub struct OffsetTracker {
    partitions: DashMap<Partition, PartitionState>,
}

impl Default for OffsetTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self {
            partitions: DashMap::new(),
        }
    }

    /// Record that processing of an offset has begun. Idempotent; must be
    /// called before the offset is dispatched to any worker so the commit
    /// frontier cannot pass an accepted-but-undelivered item.
    pub fn add_offset(&self, partition: &Partition, offset: i64) {
        let mut state = self.partitions.entry(partition.clone()).or_default();

        if offset <= state.last_committed {
            // Redelivery of something already committed. Tracking it again
            // would leave an entry below the watermark that can never be
            // purged.
            debug!(
                partition = %partition,
                offset,
                last_committed = state.last_committed,
                "Ignoring offset at or below committed watermark"
            );
            return;
        }

        state.tracked.insert(offset);
        state.outstanding.insert(offset);
    }

    /// Mark an offset as finished processing. Called on success and failure
    /// alike; the offset stays in `tracked` until a commit watermark passes
    /// it.
    pub fn complete_offset(&self, partition: &Partition, offset: i64) {
        let Some(mut state) = self.partitions.get_mut(partition) else {
            warn!(partition = %partition, offset, "Completion for untracked partition");
            return;
        };

        if !state.outstanding.remove(&offset) {
            debug!(partition = %partition, offset, "Completion for offset not outstanding");
        }
    }

    /// For each partition, the highest offset such that every tracked offset
    /// at or below it has finished processing. Partitions whose frontier has
    /// not moved past `last_committed` are omitted.
    ///
    /// Takes one partition's shard lock at a time while scanning; a stale
    /// frontier in one partition does not affect another's correctness.
    pub fn get_committable_offsets(&self) -> HashMap<Partition, i64> {
        let mut committable = HashMap::new();

        for entry in self.partitions.iter() {
            let state = entry.value();
            let Some(&lowest) = state.tracked.first() else {
                continue;
            };

            let mut next = lowest.max(state.last_committed + 1);
            let mut frontier = state.last_committed;
            while state.tracked.contains(&next) && !state.outstanding.contains(&next) {
                frontier = next;
                next += 1;
            }

            if frontier > state.last_committed {
                committable.insert(entry.key().clone(), frontier);
            }
        }

        committable
    }

    /// Advance the committed watermark for a partition and drop tracked
    /// state at or below it. The watermark never regresses.
    pub fn mark_committed(&self, partition: &Partition, offset: i64) {
        let Some(mut state) = self.partitions.get_mut(partition) else {
            return;
        };

        if offset <= state.last_committed {
            return;
        }

        debug!(
            partition = %partition,
            previous = state.last_committed,
            committed = offset,
            "Advancing committed watermark"
        );
        state.last_committed = offset;
        let retained = state.tracked.split_off(&(offset + 1));
        state.tracked = retained;
    }

    /// Highest committed offset for a partition, if any commit has happened.
    pub fn last_committed(&self, partition: &Partition) -> Option<i64> {
        self.partitions
            .get(partition)
            .and_then(|s| (s.last_committed >= 0).then_some(s.last_committed))
    }

    /// Offsets tracked but not yet completed, summed across partitions.
    pub fn outstanding_count(&self) -> usize {
        self.partitions
            .iter()
            .map(|e| e.value().outstanding.len())
            .sum()
    }

    /// Number of partitions with tracked state
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    use rand::seq::SliceRandom;
    use rand::Rng;

    fn test_partition(num: i32) -> Partition {
        Partition::new("test-topic".to_string(), num)
    }

    #[test]
    fn test_add_offset_is_idempotent() {
        let tracker = OffsetTracker::new();
        let partition = test_partition(0);

        tracker.add_offset(&partition, 5);
        tracker.add_offset(&partition, 5);
        tracker.complete_offset(&partition, 5);

        // A double-counted add would leave 5 looking outstanding forever
        assert_eq!(tracker.get_committable_offsets().get(&partition), Some(&5));
    }

    #[test]
    fn test_no_commit_past_hole() {
        let tracker = OffsetTracker::new();
        let partition = test_partition(0);

        for offset in 0..3 {
            tracker.add_offset(&partition, offset);
        }
        tracker.complete_offset(&partition, 0);
        tracker.complete_offset(&partition, 2);

        // 1 is still outstanding: the frontier stops at 0
        assert_eq!(tracker.get_committable_offsets().get(&partition), Some(&0));

        tracker.mark_committed(&partition, 0);
        assert!(tracker.get_committable_offsets().is_empty());

        tracker.complete_offset(&partition, 1);
        assert_eq!(tracker.get_committable_offsets().get(&partition), Some(&2));
    }

    #[test]
    fn test_watermark_is_monotonic() {
        let tracker = OffsetTracker::new();
        let partition = test_partition(0);

        for offset in 0..10 {
            tracker.add_offset(&partition, offset);
            tracker.complete_offset(&partition, offset);
        }

        tracker.mark_committed(&partition, 7);
        tracker.mark_committed(&partition, 3); // stale commit must not regress

        assert_eq!(tracker.last_committed(&partition), Some(7));
        assert_eq!(tracker.get_committable_offsets().get(&partition), Some(&9));
    }

    #[test]
    fn test_committed_offsets_are_purged() {
        let tracker = OffsetTracker::new();
        let partition = test_partition(0);

        for offset in 0..5 {
            tracker.add_offset(&partition, offset);
            tracker.complete_offset(&partition, offset);
        }
        tracker.mark_committed(&partition, 4);

        // Nothing tracked, nothing committable
        assert!(tracker.get_committable_offsets().is_empty());

        tracker.add_offset(&partition, 5);
        tracker.complete_offset(&partition, 5);
        assert_eq!(tracker.get_committable_offsets().get(&partition), Some(&5));
    }

    #[test]
    fn test_redelivery_below_watermark_is_ignored() {
        let tracker = OffsetTracker::new();
        let partition = test_partition(0);

        for offset in 0..3 {
            tracker.add_offset(&partition, offset);
            tracker.complete_offset(&partition, offset);
        }
        tracker.mark_committed(&partition, 2);

        tracker.add_offset(&partition, 1);

        assert_eq!(tracker.outstanding_count(), 0);
        assert!(tracker.get_committable_offsets().is_empty());
    }

    #[test]
    fn test_partitions_are_independent() {
        let tracker = OffsetTracker::new();
        let p0 = test_partition(0);
        let p1 = test_partition(1);

        tracker.add_offset(&p0, 0);
        tracker.complete_offset(&p0, 0);
        tracker.add_offset(&p1, 0);

        let committable = tracker.get_committable_offsets();
        assert_eq!(committable.get(&p0), Some(&0));
        assert_eq!(committable.get(&p1), None);
        assert_eq!(tracker.partition_count(), 2);
    }

    #[test]
    fn test_frontier_matches_contiguous_completed_prefix() {
        // Complete a random subset of 1..=100 out of order; the frontier
        // must equal the longest contiguous completed prefix from 1.
        let mut rng = rand::thread_rng();

        for _ in 0..20 {
            let tracker = OffsetTracker::new();
            let partition = test_partition(0);

            for offset in 1..=100 {
                tracker.add_offset(&partition, offset);
            }

            let mut offsets: Vec<i64> = (1..=100).collect();
            offsets.shuffle(&mut rng);
            let completed_count = rng.gen_range(0..=100);
            let completed: HashSet<i64> = offsets[..completed_count].iter().copied().collect();

            for &offset in &completed {
                tracker.complete_offset(&partition, offset);
            }

            let mut expected = 0i64;
            while completed.contains(&(expected + 1)) {
                expected += 1;
            }

            let got = tracker.get_committable_offsets().get(&partition).copied();
            if expected == 0 {
                assert_eq!(got, None);
            } else {
                assert_eq!(got, Some(expected));
            }
        }
    }

    #[test]
    fn test_concurrent_completions_converge() {
        let tracker = Arc::new(OffsetTracker::new());
        let partition = test_partition(0);

        for offset in 0..100 {
            tracker.add_offset(&partition, offset);
        }

        let mut handles = vec![];
        for lane in 0..4i64 {
            let tracker = tracker.clone();
            let partition = partition.clone();
            handles.push(thread::spawn(move || {
                let mut offset = lane;
                while offset < 100 {
                    tracker.complete_offset(&partition, offset);
                    offset += 4;
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(tracker.get_committable_offsets().get(&partition), Some(&99));
    }
}
