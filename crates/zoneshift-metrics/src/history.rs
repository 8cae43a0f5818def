//! Bounded sample history and the stability predicate.

use std::collections::VecDeque;

use zoneshift_core::MetricSample;

/// Ring buffer of the most recent samples, oldest first.
#[derive(Debug, Clone)]
pub struct MetricHistory {
    samples: VecDeque<MetricSample>,
    capacity: usize,
}

impl MetricHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest past capacity.
    pub fn push(&mut self, sample: MetricSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn latest(&self) -> Option<&MetricSample> {
        self.samples.back()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// The last `n` samples, oldest first.
    pub fn recent(&self, n: usize) -> Vec<MetricSample> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).cloned().collect()
    }

    /// Stable iff the last `window` samples exist and their qps spread is
    /// below `spread_limit`.
    pub fn is_stable(&self, window: usize, spread_limit: f64) -> bool {
        if window == 0 || self.samples.len() < window {
            return false;
        }
        is_stable(self.samples.range(self.samples.len() - window..), spread_limit)
    }
}

/// `max(qps) − min(qps)` over the samples, `None` when empty.
pub fn qps_spread<'a, I>(samples: I) -> Option<f64>
where
    I: IntoIterator<Item = &'a MetricSample>,
{
    samples.into_iter().fold(None, |acc, s| match acc {
        None => Some((s.qps, s.qps)),
        Some((lo, hi)) => Some((lo.min(s.qps), hi.max(s.qps))),
    })
    .map(|(lo, hi)| hi - lo)
}

/// Stability predicate over an explicit window.
pub fn is_stable<'a, I>(window: I, spread_limit: f64) -> bool
where
    I: IntoIterator<Item = &'a MetricSample>,
{
    qps_spread(window).is_some_and(|spread| spread < spread_limit)
}
