//! Logical timeline — one clock and one timer queue for every entity.
//!
//! Timers are ordered by (due, insertion seq) so equal-time timers fire in
//! the order they were scheduled. Each timer carries the generation it was
//! scheduled under; a reset bumps the generation and the leftovers discard
//! themselves when popped.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

use tracing::debug;

use zoneshift_topology::WorkflowStep;

/// What a timer does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Produce one metric sample.
    Tick,
    /// End the demand phase entered under `epoch`.
    DemandAdvance { epoch: u64 },
    /// Run the next step of the scale workflow.
    Workflow(WorkflowStep),
    /// Re-evaluate the autoscale trigger armed under `arm`.
    TriggerCheck { arm: u64 },
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    due: Duration,
    seq: u64,
    generation: u64,
    kind: TimerKind,
}

impl PartialEq for Timer {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Timer {}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timer {
    // Reversed: BinaryHeap is a max-heap, the earliest timer must be on top.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
pub struct Timeline {
    now: Duration,
    timers: BinaryHeap<Timer>,
    next_seq: u64,
    generation: u64,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Timers still queued, stale ones included.
    pub fn pending(&self) -> usize {
        self.timers.len()
    }

    /// Schedule `kind` at absolute logical time `due` (clamped to now).
    pub fn schedule_at(&mut self, due: Duration, kind: TimerKind) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.timers.push(Timer {
            due: due.max(self.now),
            seq,
            generation: self.generation,
            kind,
        });
    }

    pub fn schedule_in(&mut self, delay: Duration, kind: TimerKind) {
        self.schedule_at(self.now.saturating_add(delay), kind);
    }

    /// Pop the next live timer due at or before `until`, moving the clock
    /// to its due time. Stale timers are dropped along the way.
    pub fn pop_due(&mut self, until: Duration) -> Option<TimerKind> {
        while let Some(top) = self.timers.peek() {
            if top.due > until {
                return None;
            }
            let timer = self.timers.pop()?;
            if timer.generation != self.generation {
                debug!(
                    kind = ?timer.kind,
                    generation = timer.generation,
                    current = self.generation,
                    "discarding stale timer"
                );
                continue;
            }
            self.now = self.now.max(timer.due);
            return Some(timer.kind);
        }
        None
    }

    /// Move the clock forward to `until` once every due timer has fired.
    pub fn settle(&mut self, until: Duration) {
        self.now = self.now.max(until);
    }

    /// New generation, clock back to zero. Queued timers become stale.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.now = Duration::ZERO;
    }
}
