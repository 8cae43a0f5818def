//! Event log — bounded, most-recent-first lifecycle notifications.

use std::collections::VecDeque;
use std::time::Duration;

use zoneshift_core::{as_millis, EventKind, LifecycleEvent};

#[derive(Debug, Clone)]
pub struct EventLog {
    /// Most recent first.
    events: VecDeque<LifecycleEvent>,
    capacity: usize,
    next_id: u64,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            next_id: 1,
        }
    }

    /// Record an event, evicting the oldest past capacity. Returns its id.
    pub fn push(&mut self, now: Duration, kind: EventKind, message: impl Into<String>) -> u64 {
        self.record(now, kind, message.into(), false)
    }

    /// Record the event marking a primary-role handover.
    pub fn push_handover(&mut self, now: Duration, message: impl Into<String>) -> u64 {
        self.record(now, EventKind::Success, message.into(), true)
    }

    pub fn info(&mut self, now: Duration, message: impl Into<String>) -> u64 {
        self.push(now, EventKind::Info, message)
    }

    fn record(&mut self, now: Duration, kind: EventKind, message: String, marker: bool) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.events.push_front(LifecycleEvent {
            id,
            timestamp_ms: as_millis(now),
            kind,
            message,
            is_handover_marker: marker,
        });
        self.events.truncate(self.capacity);
        id
    }

    /// Timestamp of the most recent retained handover marker.
    pub fn last_handover(&self) -> Option<Duration> {
        self.events
            .iter()
            .find(|e| e.is_handover_marker)
            .map(|e| Duration::from_millis(e.timestamp_ms))
    }

    /// Events, most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &LifecycleEvent> {
        self.events.iter()
    }

    pub fn to_vec(&self) -> Vec<LifecycleEvent> {
        self.events.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Drop all events and restart ids at 1.
    pub fn clear(&mut self) {
        self.events.clear();
        self.next_id = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn most_recent_first_with_increasing_ids() {
        let mut log = EventLog::new(10);
        log.info(Duration::from_secs(1), "first");
        log.push(Duration::from_secs(2), EventKind::Warning, "second");

        let events = log.to_vec();
        assert_eq!(events[0].message, "second");
        assert_eq!(events[0].kind, EventKind::Warning);
        assert_eq!(events[0].timestamp_ms, 2000);
        assert!(events[0].id > events[1].id);
    }

    #[test]
    fn evicts_oldest_past_capacity() {
        let mut log = EventLog::new(50);
        for i in 0..60 {
            log.info(Duration::from_secs(i), format!("event {i}"));
        }
        assert_eq!(log.len(), 50);
        let events = log.to_vec();
        assert_eq!(events.first().unwrap().message, "event 59");
        assert_eq!(events.last().unwrap().message, "event 10");
    }

    #[test]
    fn last_handover_finds_newest_marker() {
        let mut log = EventLog::new(10);
        assert_eq!(log.last_handover(), None);

        log.push_handover(Duration::from_millis(3000), "first handover");
        log.info(Duration::from_millis(4000), "noise");
        log.push_handover(Duration::from_millis(9000), "second handover");
        log.info(Duration::from_millis(9500), "more noise");

        assert_eq!(log.last_handover(), Some(Duration::from_millis(9000)));
        assert!(log.iter().filter(|e| e.is_handover_marker).all(|e| e.kind == EventKind::Success));
    }

    #[test]
    fn clear_restarts_ids() {
        let mut log = EventLog::new(5);
        log.info(Duration::ZERO, "a");
        log.info(Duration::ZERO, "b");
        log.clear();
        assert!(log.is_empty());
        assert_eq!(log.info(Duration::ZERO, "c"), 1);
    }
}
