/// Logical timestamp oracle.
///
/// The host table never calls `SystemTime::now()` to decide whether one
/// update wins over another: it asks an external oracle for a timestamp
/// and compares the timestamps it was handed. This keeps the convergence
/// algorithm correct even when node clocks drift, and lets a deployment
/// swap in a hybrid-logical-clock or per-key Lamport counter without
/// touching `host_table`.
///
/// Per the design, timestamps only need to be comparable *within the same
/// key*: the oracle is free to hand out values that are incomparable
/// across different `HostId`s (a plain per-node Lamport clock would not
/// have this property, but nothing here relies on cross-key ordering).
use crate::types::HostId;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// An opaque, totally-ordered (per key) logical timestamp.
///
/// `Timestamp` values are only meaningful relative to other timestamps
/// issued for the same `HostId`. Comparing timestamps from different
/// hosts is well-defined (it's just an integer compare) but carries no
/// guarantee about real-time ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub u64);

impl Timestamp {
    /// The smallest possible timestamp. Useful as a sentinel for "never
    /// observed" when comparing against an absent tombstone or host.
    pub const MIN: Timestamp = Timestamp(0);

    /// Returns true if `self` is strictly newer than `other`.
    ///
    /// Equal timestamps are treated as not-newer: the oracle guarantees
    /// uniqueness per key, so two equal timestamps arriving for the same
    /// host is already a defensive case, and we never want a no-op write
    /// to masquerade as a move.
    pub fn is_newer(&self, other: &Timestamp) -> bool {
        self > other
    }
}

/// Issues logical timestamps for host keys.
///
/// This is one of the out-of-scope external collaborators: a real
/// deployment wires in whatever its cluster already uses for causal
/// ordering (a hybrid-logical clock, a per-partition Lamport sequence,
/// ...). `MonotonicClock` is a minimal, in-memory implementation
/// sufficient for a single process and for tests.
pub trait TimestampOracle: Send + Sync {
    /// Returns a timestamp for `host_id` that is strictly greater than
    /// every timestamp this oracle has previously returned for the same
    /// key.
    fn timestamp(&self, host_id: &HostId) -> Timestamp;
}

/// A per-key monotonic counter, guarded by atomics so reads never block.
///
/// Each `HostId` gets its own counter starting at 1; counters for
/// different hosts advance independently, matching the "comparable only
/// within the same key" contract of `TimestampOracle`.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    counters: DashMap<HostId, AtomicU64>,
}

impl MonotonicClock {
    /// Create a fresh clock with no history.
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }
}

impl TimestampOracle for MonotonicClock {
    fn timestamp(&self, host_id: &HostId) -> Timestamp {
        let counter = self
            .counters
            .entry(host_id.clone())
            .or_insert_with(|| AtomicU64::new(0));
        Timestamp(counter.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_strictly_monotonic_per_key() {
        let clock = MonotonicClock::new();
        let h1 = HostId::new("aa:bb:cc:dd:ee:ff", 10);
        let h2 = HostId::new("11:22:33:44:55:66", 10);

        let t1 = clock.timestamp(&h1);
        let t2 = clock.timestamp(&h1);
        let t3 = clock.timestamp(&h1);
        assert!(t2.is_newer(&t1));
        assert!(t3.is_newer(&t2));

        // A different key starts its own sequence.
        let u1 = clock.timestamp(&h2);
        assert_eq!(u1, Timestamp(1));
    }

    #[test]
    fn equal_timestamps_are_not_newer() {
        let t = Timestamp(5);
        assert!(!t.is_newer(&t));
    }
}
