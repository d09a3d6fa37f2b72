//! Usage analytics: concurrent per-key observation counting.

use std::sync::atomic::{AtomicU64, Ordering};

use ahash::RandomState;
use dashmap::DashMap;
use relay_core::{ObservationCount, ObservationKey, ObservationReport};

/// A counter bucket. `seq` is the order in which the bucket was first created.
#[derive(Debug)]
struct Bucket {
    seq: u64,
    count: AtomicU64,
}

/// Thread-safe keyed counter map.
///
/// Buckets are created by an atomic increment-or-initialize under the owning
/// shard's write lock, so racing first-time records of the same key share
/// one bucket. Existing buckets are bumped with an atomic add under a shard
/// read lock. Buckets are never removed and counts never decrease.
#[derive(Debug)]
pub struct CounterAggregator {
    buckets: DashMap<ObservationKey, Bucket, RandomState>,
    next_seq: AtomicU64,
}

impl CounterAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: DashMap::with_hasher(RandomState::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Increment the bucket for `key`, creating it at 1 if absent.
    ///
    /// Returns the count after this increment.
    pub fn record(&self, key: &ObservationKey) -> u64 {
        if let Some(bucket) = self.buckets.get(key) {
            return bucket.count.fetch_add(1, Ordering::Relaxed) + 1;
        }

        let bucket = self.buckets.entry(key.clone()).or_insert_with(|| Bucket {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            count: AtomicU64::new(0),
        });
        bucket.count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Current count for `key`; zero if it was never recorded.
    #[must_use]
    pub fn count(&self, key: &ObservationKey) -> u64 {
        self.buckets
            .get(key)
            .map_or(0, |bucket| bucket.count.load(Ordering::Relaxed))
    }

    /// Number of distinct keys recorded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Point-in-time report, ordered by first observation of each key.
    ///
    /// Shards are read-locked one at a time while they are copied; each
    /// count is a committed integer.
    #[must_use]
    pub fn snapshot(&self) -> ObservationReport {
        let mut rows: Vec<(u64, ObservationCount)> = self
            .buckets
            .iter()
            .map(|entry| {
                let bucket = entry.value();
                (
                    bucket.seq,
                    ObservationCount {
                        key: entry.key().clone(),
                        count: bucket.count.load(Ordering::Relaxed),
                    },
                )
            })
            .collect();
        rows.sort_unstable_by_key(|(seq, _)| *seq);
        ObservationReport::new(rows.into_iter().map(|(_, row)| row).collect())
    }
}

impl Default for CounterAggregator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
