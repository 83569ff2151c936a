// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Cancellable one-shot timers of a participant.
//!
//! Timers never call into protocol state. Popping a due timer only yields
//! its [`TimerKind`]; the participant then looks the target endpoint up and
//! does nothing if it is gone. Rescheduling or cancelling bumps the
//! generation of the kind, so heap entries left behind are skipped.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

use crate::core::Guid;

/// What a timer fires for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Participant announcement.
    Announce,
    LeaseCheck,
    /// Tombstone collection (and backup flush for backup servers).
    GarbageCollect,
    /// Periodic heartbeat of a writer.
    Heartbeat(Guid),
    /// Pending ACKNACK of a reader.
    AckNack(Guid),
}

#[derive(Debug)]
struct Entry {
    due: Instant,
    generation: u64,
    kind: TimerKind,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.generation == other.generation
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // Min-heap on (due, generation).
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Entry>,
    armed: HashMap<TimerKind, (u64, Instant)>,
    next_generation: u64,
}

impl TimerQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `kind` at `due`, replacing any earlier arming. Returns `true`
    /// when `due` is now the earliest deadline of the queue.
    pub fn schedule(&mut self, kind: TimerKind, due: Instant) -> bool {
        let earliest = self.next_deadline().map_or(true, |d| due < d);
        self.next_generation += 1;
        let generation = self.next_generation;
        self.armed.insert(kind, (generation, due));
        self.heap.push(Entry {
            due,
            generation,
            kind,
        });
        earliest
    }

    /// Arm `kind` at `due` unless it is already armed earlier.
    pub fn schedule_before(&mut self, kind: TimerKind, due: Instant) -> bool {
        match self.armed.get(&kind) {
            Some((_, armed)) if *armed <= due => false,
            _ => self.schedule(kind, due),
        }
    }

    pub fn cancel(&mut self, kind: &TimerKind) -> bool {
        self.armed.remove(kind).is_some()
    }

    /// Cancel the heartbeat and acknack timers of an endpoint.
    pub fn cancel_endpoint(&mut self, guid: &Guid) {
        self.cancel(&TimerKind::Heartbeat(*guid));
        self.cancel(&TimerKind::AckNack(*guid));
    }

    #[must_use]
    pub fn is_armed(&self, kind: &TimerKind) -> bool {
        self.armed.contains_key(kind)
    }

    /// Earliest armed deadline.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.armed.values().map(|(_, due)| *due).min()
    }

    /// Disarm and return every timer due at `now`, earliest first.
    pub fn pop_due(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut fired = Vec::new();
        while self.heap.peek().is_some_and(|e| e.due <= now) {
            let Some(entry) = self.heap.pop() else {
                break;
            };
            let live = self
                .armed
                .get(&entry.kind)
                .is_some_and(|(generation, _)| *generation == entry.generation);
            if live {
                self.armed.remove(&entry.kind);
                fired.push(entry.kind);
            }
        }
        fired
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.armed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
        self.armed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EntityId, GuidPrefix};
    use std::time::Duration;

    fn writer() -> Guid {
        Guid::new(GuidPrefix::new([1; 12]), EntityId::user_writer(1))
    }

    #[test]
    fn test_fires_in_deadline_order() {
        let t0 = Instant::now();
        let mut timers = TimerQueue::new();
        timers.schedule(TimerKind::LeaseCheck, t0 + Duration::from_secs(2));
        timers.schedule(TimerKind::Announce, t0 + Duration::from_secs(1));
        assert_eq!(timers.next_deadline(), Some(t0 + Duration::from_secs(1)));
        assert!(timers.pop_due(t0).is_empty());
        assert_eq!(
            timers.pop_due(t0 + Duration::from_secs(5)),
            vec![TimerKind::Announce, TimerKind::LeaseCheck]
        );
        assert!(timers.is_empty());
    }

    #[test]
    fn test_reschedule_replaces_previous_arming() {
        let t0 = Instant::now();
        let mut timers = TimerQueue::new();
        let kind = TimerKind::Heartbeat(writer());
        timers.schedule(kind, t0 + Duration::from_millis(100));
        timers.schedule(kind, t0 + Duration::from_millis(300));
        assert!(timers.pop_due(t0 + Duration::from_millis(200)).is_empty());
        assert_eq!(timers.pop_due(t0 + Duration::from_millis(300)), vec![kind]);
    }

    #[test]
    fn test_cancelled_timer_never_fires() {
        let t0 = Instant::now();
        let mut timers = TimerQueue::new();
        timers.schedule(TimerKind::Heartbeat(writer()), t0);
        timers.schedule(TimerKind::AckNack(writer()), t0);
        timers.cancel_endpoint(&writer());
        assert!(timers.pop_due(t0 + Duration::from_secs(1)).is_empty());
        assert_eq!(timers.next_deadline(), None);
    }

    #[test]
    fn test_schedule_before_keeps_earlier_deadline() {
        let t0 = Instant::now();
        let mut timers = TimerQueue::new();
        let kind = TimerKind::AckNack(writer());
        assert!(timers.schedule_before(kind, t0 + Duration::from_millis(10)));
        assert!(!timers.schedule_before(kind, t0 + Duration::from_millis(20)));
        assert_eq!(timers.next_deadline(), Some(t0 + Duration::from_millis(10)));
    }
}
