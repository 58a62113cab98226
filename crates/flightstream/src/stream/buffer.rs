//! Fixed-capacity sliding window over received samples.

use std::collections::VecDeque;

use crate::telemetry::TelemetrySample;

/// Capacity used by the live display.
pub const DEFAULT_CAPACITY: usize = 100;

/// Bounded FIFO of the most recent samples.
///
/// Pushing past capacity evicts from the head, so the buffer always holds the
/// last `capacity` samples in push order.
#[derive(Debug, Clone)]
pub struct TelemetryBuffer {
    samples: VecDeque<TelemetrySample>,
    capacity: usize,
}

impl TelemetryBuffer {
    /// Create an empty buffer. A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest ones beyond capacity.
    pub fn push(&mut self, sample: TelemetrySample) {
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// The most recently pushed sample.
    #[must_use]
    pub fn latest(&self) -> Option<&TelemetrySample> {
        self.samples.back()
    }

    /// Iterate samples oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &TelemetrySample> {
        self.samples.iter()
    }

    /// Copy the current window, oldest first.
    #[must_use]
    pub fn to_vec(&self) -> Vec<TelemetrySample> {
        self.samples.iter().cloned().collect()
    }

    /// Number of buffered samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// The fixed capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for TelemetryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
