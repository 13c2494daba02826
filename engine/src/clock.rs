//! Logical clock for ordering cell writes across replicas.
//!
//! Every local write is stamped with a [`LogicalTime`]. The clock is a Lamport
//! counter: it ticks on each local write and jumps forward past any time it
//! observes in merged content, so a write made after seeing another replica's
//! write always orders after it.

use crate::ReplicaId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A point in logical time.
///
/// Ordering rules:
/// 1. Higher counter wins
/// 2. If counters are equal, the lexicographically higher replica id wins
///
/// This is a total order, so every replica picks the same winner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogicalTime {
    /// Monotonically increasing counter
    pub counter: u64,
    /// Replica that produced this time
    pub replica: ReplicaId,
}

impl LogicalTime {
    pub fn new(replica: impl Into<ReplicaId>, counter: u64) -> Self {
        Self {
            counter,
            replica: replica.into(),
        }
    }
}

impl Ord for LogicalTime {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.counter.cmp(&other.counter) {
            Ordering::Equal => self.replica.cmp(&other.replica),
            other => other,
        }
    }
}

impl PartialOrd for LogicalTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Largest counter accepted in content from other replicas. Counters stay
/// exactly representable as JSON numbers and far from overflow.
pub const MAX_COUNTER: u64 = 1 << 53;

/// The clock owned by one replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clock {
    replica: ReplicaId,
    counter: u64,
}

impl Clock {
    /// Create a new clock for a replica, starting at counter 0.
    pub fn new(replica: impl Into<ReplicaId>) -> Self {
        Self::with_counter(replica, 0)
    }

    pub fn with_counter(replica: impl Into<ReplicaId>, counter: u64) -> Self {
        Self {
            replica: replica.into(),
            counter,
        }
    }

    pub fn replica_id(&self) -> &ReplicaId {
        &self.replica
    }

    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Advance the clock and return the time for a new local write.
    pub fn tick(&mut self) -> LogicalTime {
        self.counter = self.counter.saturating_add(1);
        LogicalTime::new(self.replica.clone(), self.counter)
    }

    /// Move the clock past a time seen in remote content.
    pub fn observe(&mut self, time: &LogicalTime) {
        self.counter = self.counter.max(time.counter.min(MAX_COUNTER));
    }
}
