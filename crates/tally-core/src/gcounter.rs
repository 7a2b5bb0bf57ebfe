//! G-Counter (grow-only counter) CRDT
//!
//! Every replica owns one sub-count. The counter value is the sum of all
//! sub-counts, and merge takes the per-replica maximum, so counts never
//! decrease and concurrent increments from different replicas are never lost.
//!
//! ```text
//! replica-1: {replica-1: 30, replica-2: 10}
//! replica-2: {replica-1: 20, replica-2: 25}
//! merge:     {replica-1: 30, replica-2: 25}   value = 55
//! ```

use crate::error::{CounterError, Result};
use crate::ids::ReplicaId;
use crate::lattice::Lattice;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Largest sub-count a replica stores or accepts from a peer.
///
/// Durable backends keep counts in signed 64-bit columns.
pub const MAX_COUNT: u64 = i64::MAX as u64;

/// A grow-only counter keyed by replica.
///
/// A replica missing from the map counts as zero, so equality ignores
/// zero entries: `{r: 0}` and `{}` compare equal.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GCounter {
    counts: BTreeMap<ReplicaId, u64>,
}

impl GCounter {
    /// Create an empty counter.
    pub fn new() -> Self {
        Self {
            counts: BTreeMap::new(),
        }
    }

    /// Build a counter from raw `(replica, count)` pairs.
    ///
    /// Duplicate replicas keep the larger count.
    pub fn from_counts<I, K>(counts: I) -> Self
    where
        I: IntoIterator<Item = (K, u64)>,
        K: Into<ReplicaId>,
    {
        let mut counter = Self::new();
        for (replica, count) in counts {
            counter.observe(replica.into(), count);
        }
        counter
    }

    /// Add `amount` to the sub-count of `replica_id`.
    ///
    /// Returns the new sub-count, capped at [`MAX_COUNT`]. Negative amounts
    /// are rejected and leave the counter unchanged.
    pub fn increment(&mut self, replica_id: impl Into<ReplicaId>, amount: i64) -> Result<u64> {
        if amount < 0 {
            return Err(CounterError::NegativeIncrement(amount));
        }
        let entry = self.counts.entry(replica_id.into()).or_insert(0);
        *entry = entry.saturating_add(amount as u64).min(MAX_COUNT);
        Ok(*entry)
    }

    /// Raise the sub-count of `replica_id` to `count` if it is larger.
    ///
    /// Returns `true` when the stored value changed.
    pub fn observe(&mut self, replica_id: ReplicaId, count: u64) -> bool {
        if count == 0 {
            return false;
        }
        let entry = self.counts.entry(replica_id).or_insert(0);
        if count > *entry {
            *entry = count;
            true
        } else {
            false
        }
    }

    /// Fail on the first sub-count above [`MAX_COUNT`].
    pub fn check_range(&self) -> Result<()> {
        match self.counts.iter().find(|(_, count)| **count > MAX_COUNT) {
            Some((replica, count)) => Err(CounterError::CountOutOfRange {
                replica: replica.to_string(),
                count: *count,
            }),
            None => Ok(()),
        }
    }

    /// Sum of all sub-counts.
    pub fn value(&self) -> u64 {
        self.counts
            .values()
            .fold(0u64, |acc, c| acc.saturating_add(*c))
    }

    /// Sub-count for a single replica, zero if absent.
    pub fn replica_value(&self, replica_id: &str) -> u64 {
        self.counts.get(replica_id).copied().unwrap_or(0)
    }

    /// Pointwise maximum of both counters. Neither operand is modified.
    pub fn merge(&self, other: &Self) -> Self {
        self.join(other)
    }

    /// Number of replicas with an entry.
    pub fn replica_count(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn counts(&self) -> &BTreeMap<ReplicaId, u64> {
        &self.counts
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ReplicaId, u64)> {
        self.counts.iter().map(|(k, v)| (k, *v))
    }

    pub fn into_counts(self) -> BTreeMap<ReplicaId, u64> {
        self.counts
    }
}

impl PartialEq for GCounter {
    fn eq(&self, other: &Self) -> bool {
        let nonzero = |counter: &Self| {
            counter
                .counts
                .iter()
                .filter(|(_, count)| **count > 0)
                .map(|(replica, count)| (replica.clone(), *count))
                .collect::<Vec<_>>()
        };
        nonzero(self) == nonzero(other)
    }
}

impl Eq for GCounter {}

impl Lattice for GCounter {
    fn bottom() -> Self {
        Self::new()
    }

    fn join(&self, other: &Self) -> Self {
        let mut counts = self.counts.clone();
        for (k, v) in &other.counts {
            counts
                .entry(k.clone())
                .and_modify(|e| *e = (*e).max(*v))
                .or_insert(*v);
        }
        Self { counts }
    }
}

impl From<BTreeMap<ReplicaId, u64>> for GCounter {
    fn from(counts: BTreeMap<ReplicaId, u64>) -> Self {
        Self { counts }
    }
}

impl fmt::Display for GCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GCounter{{")?;
        for (i, (replica, count)) in self.counts.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", replica, count)?;
        }
        write!(f, "}} total={}", self.value())
    }
}
