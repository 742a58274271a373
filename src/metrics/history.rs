//! Fixed-capacity rolling history for a single metric series.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Append-and-evict sample buffer.
///
/// The ring never holds more than `capacity` samples; appending to a full
/// ring drops the oldest sample. Samples stay in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "HistoryRingRepr")]
pub struct HistoryRing {
    capacity: usize,
    samples: VecDeque<f32>,
}

#[derive(Deserialize)]
struct HistoryRingRepr {
    capacity: usize,
    samples: VecDeque<f32>,
}

impl From<HistoryRingRepr> for HistoryRing {
    fn from(repr: HistoryRingRepr) -> Self {
        let mut ring = HistoryRing::new(repr.capacity);
        for sample in repr.samples {
            ring.append(sample);
        }
        ring
    }
}

impl HistoryRing {
    /// Create an empty ring holding at most `capacity` samples.
    ///
    /// The capacity is clamped to `1..=MAX_HISTORY_CAPACITY`. Storage grows
    /// with the samples rather than being reserved up front.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, crate::MAX_HISTORY_CAPACITY);
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity.min(crate::DEFAULT_HISTORY_CAPACITY)),
        }
    }

    /// Push a sample to the tail, evicting the head when full.
    pub fn append(&mut self, value: f32) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Iterate samples oldest first.
    pub fn iter(&self) -> impl Iterator<Item = f32> + '_ {
        self.samples.iter().copied()
    }

    /// Ordered copy of the samples for chart widgets that want a slice.
    pub fn to_vec(&self) -> Vec<f32> {
        self.samples.iter().copied().collect()
    }

    /// Most recent sample.
    pub fn last(&self) -> Option<f32> {
        self.samples.back().copied()
    }

    pub fn min(&self) -> Option<f32> {
        self.samples.iter().copied().reduce(f32::min)
    }

    pub fn max(&self) -> Option<f32> {
        self.samples.iter().copied().reduce(f32::max)
    }
}

impl Default for HistoryRing {
    fn default() -> Self {
        Self::new(crate::DEFAULT_HISTORY_CAPACITY)
    }
}
