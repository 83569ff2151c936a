// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reader-side sequence accounting for one matched writer.
//!
//! Every sequence number below `next_expected` is accounted for: delivered,
//! reported irrelevant by a GAP, or skipped because the writer no longer
//! offers it. Above `next_expected` the tracker remembers which numbers were
//! received out of order and which were declared irrelevant, so the reader
//! can deliver in order and request exactly what is missing.
//!
//! ```text
//! next_expected = 3, received = {5}, irrelevant = [6, 8)
//!
//!   1 2 | 3 4 5 6 7 8 9
//!   done| ? ? R G G ? ?      missing up to 9: {3, 4, 8, 9}
//! ```

use std::collections::BTreeSet;
use std::ops::Range;

use crate::core::{SequenceNumber, SequenceNumberSet, MAX_BITMAP_BITS};

/// Upper bound on irrelevant ranges tracked above `next_expected`.
const MAX_GAP_RANGES: usize = 100;

#[derive(Debug, Clone)]
pub struct GapTracker {
    next_expected: u64,
    received: BTreeSet<u64>,
    /// Sorted, merged ranges above `next_expected` reported irrelevant.
    irrelevant: Vec<Range<u64>>,
}

impl Default for GapTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl GapTracker {
    /// Tracker expecting sequence number 1.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Tracker resuming at `next_expected` (persisted reader state).
    #[must_use]
    pub fn starting_at(next_expected: u64) -> Self {
        Self {
            next_expected: next_expected.max(1),
            received: BTreeSet::new(),
            irrelevant: Vec::new(),
        }
    }

    #[must_use]
    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Highest sequence number received so far (0 if none).
    #[must_use]
    pub fn highest_received(&self) -> u64 {
        self.received
            .iter()
            .next_back()
            .copied()
            .unwrap_or_else(|| self.next_expected.saturating_sub(1))
    }

    /// Record a received sample. Returns `false` for duplicates and numbers
    /// already accounted for.
    pub fn on_receive(&mut self, seq: u64) -> bool {
        if seq < self.next_expected || self.is_irrelevant(seq) {
            return false;
        }
        self.received.insert(seq)
    }

    fn is_irrelevant(&self, seq: u64) -> bool {
        self.irrelevant.iter().any(|r| r.contains(&seq))
    }

    /// Mark `range` as never to be delivered (GAP).
    pub fn mark_irrelevant(&mut self, range: Range<u64>) {
        let start = range.start.max(self.next_expected);
        if start >= range.end {
            return;
        }
        self.irrelevant.push(start..range.end);
        self.merge_and_compact();
    }

    /// Writer no longer offers anything below `first_available`.
    ///
    /// Returns how many of the skipped numbers were neither received nor
    /// declared irrelevant, i.e. samples the reader lost.
    pub fn skip_to(&mut self, first_available: u64) -> u64 {
        if first_available <= self.next_expected {
            return 0;
        }
        let window = self.next_expected..first_available;
        let received = self.received.range(window.clone()).count() as u64;
        let irrelevant: u64 = self
            .irrelevant
            .iter()
            .map(|r| {
                let start = r.start.max(window.start);
                let end = r.end.min(window.end);
                end.saturating_sub(start)
            })
            .sum();
        let lost = (window.end - window.start).saturating_sub(received + irrelevant);
        // Received-but-undelivered samples in the window stay deliverable.
        self.mark_irrelevant_keep_received(window);
        lost
    }

    fn mark_irrelevant_keep_received(&mut self, window: Range<u64>) {
        let mut cursor = window.start;
        let holes: Vec<Range<u64>> = self
            .received
            .range(window.clone())
            .filter_map(|r| {
                let hole = cursor..*r;
                cursor = r + 1;
                (hole.start < hole.end).then_some(hole)
            })
            .collect();
        for hole in holes {
            self.irrelevant.push(hole);
        }
        if cursor < window.end {
            self.irrelevant.push(cursor..window.end);
        }
        self.merge_and_compact();
    }

    /// Advance `next_expected` over everything accounted for. Returns the
    /// received sequence numbers that became deliverable, ascending.
    pub fn advance(&mut self) -> Vec<u64> {
        let mut deliverable = Vec::new();
        loop {
            if self.received.remove(&self.next_expected) {
                deliverable.push(self.next_expected);
                self.next_expected += 1;
                continue;
            }
            match self.irrelevant.first() {
                Some(r) if r.start <= self.next_expected => {
                    self.next_expected = self.next_expected.max(r.end);
                    self.irrelevant.remove(0);
                }
                _ => break,
            }
        }
        deliverable
    }

    /// Sequence numbers in `[next_expected, last_available]` that are
    /// neither received nor irrelevant, as merged ranges.
    ///
    /// Walks the stored bookkeeping, not the numbers themselves, so a far
    /// away `last_available` costs nothing extra.
    #[must_use]
    pub fn missing_ranges(&self, last_available: u64) -> Vec<Range<u64>> {
        let end = last_available.saturating_add(1);
        let mut cursor = self.next_expected;
        if cursor >= end {
            return Vec::new();
        }
        let mut covered: Vec<Range<u64>> = self
            .received
            .range(cursor..end)
            .map(|seq| *seq..seq.saturating_add(1))
            .chain(self.irrelevant.iter().cloned())
            .collect();
        covered.sort_by_key(|r| r.start);

        let mut ranges = Vec::new();
        for range in covered {
            if range.start >= end {
                break;
            }
            if range.start > cursor {
                ranges.push(cursor..range.start);
            }
            cursor = cursor.max(range.end);
        }
        if cursor < end {
            ranges.push(cursor..end);
        }
        ranges
    }

    /// ACKNACK set: base is `next_expected`, members are missing numbers up
    /// to `last_available`, capped at one bitmap window. Larger gaps are
    /// requested by later acknacks as the window slides.
    #[must_use]
    pub fn missing_set(&self, last_available: u64) -> SequenceNumberSet {
        let mut set = SequenceNumberSet::new(SequenceNumber::from_linear(self.next_expected));
        let window_end = self
            .next_expected
            .saturating_add(u64::from(MAX_BITMAP_BITS) - 1)
            .min(last_available);
        for range in self.missing_ranges(window_end) {
            for seq in range {
                set.add(SequenceNumber::from_linear(seq));
            }
        }
        set
    }

    /// Total number of missing sequence numbers up to `last_available`.
    #[must_use]
    pub fn total_missing(&self, last_available: u64) -> u64 {
        self.missing_ranges(last_available)
            .iter()
            .map(|r| r.end - r.start)
            .sum()
    }

    fn merge_and_compact(&mut self) {
        if self.irrelevant.is_empty() {
            return;
        }
        self.irrelevant.sort_by_key(|r| r.start);
        let mut merged: Vec<Range<u64>> = Vec::with_capacity(self.irrelevant.len());
        for range in self.irrelevant.drain(..) {
            match merged.last_mut() {
                Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
                _ => merged.push(range),
            }
        }
        if merged.len() > MAX_GAP_RANGES {
            // Forgotten ranges are requested again and the writer answers
            // with another GAP.
            log::warn!(
                "[RELIABLE] Gap bookkeeping full, forgetting {} ranges",
                merged.len() - MAX_GAP_RANGES
            );
            merged.truncate(MAX_GAP_RANGES);
        }
        self.irrelevant = merged;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_order_delivery() {
        let mut tracker = GapTracker::new();
        assert!(tracker.on_receive(1));
        assert!(tracker.on_receive(2));
        assert_eq!(tracker.advance(), vec![1, 2]);
        assert_eq!(tracker.next_expected(), 3);
        assert!(!tracker.on_receive(2), "already delivered");
    }

    #[test]
    fn test_out_of_order_held_back() {
        let mut tracker = GapTracker::new();
        tracker.on_receive(1);
        tracker.on_receive(3);
        assert_eq!(tracker.advance(), vec![1]);
        assert_eq!(tracker.missing_ranges(3), vec![2..3]);
        tracker.on_receive(2);
        assert_eq!(tracker.advance(), vec![2, 3]);
        assert_eq!(tracker.total_missing(3), 0);
    }

    #[test]
    fn test_gap_unblocks_delivery() {
        let mut tracker = GapTracker::new();
        tracker.on_receive(4);
        tracker.mark_irrelevant(1..4);
        assert_eq!(tracker.advance(), vec![4]);
        assert_eq!(tracker.next_expected(), 5);
    }

    #[test]
    fn test_missing_set_window() {
        let mut tracker = GapTracker::new();
        tracker.on_receive(2);
        tracker.mark_irrelevant(5..7);
        let set = tracker.missing_set(8);
        let members: Vec<u64> = set.iter().map(|s| s.to_linear()).collect();
        assert_eq!(set.base().to_linear(), 1);
        assert_eq!(members, vec![1, 3, 4, 7, 8]);

        let far = GapTracker::new().missing_set(10_000);
        assert_eq!(far.len(), 256, "bounded by one bitmap window");
    }

    #[test]
    fn test_skip_counts_lost_samples() {
        let mut tracker = GapTracker::new();
        tracker.on_receive(2);
        tracker.mark_irrelevant(4..5);
        // 1 and 3 were never received; 2 was, 4 was irrelevant.
        assert_eq!(tracker.skip_to(6), 3, "1, 3 and 5 are lost");
        assert_eq!(tracker.advance(), vec![2], "received sample still delivered");
        assert_eq!(tracker.next_expected(), 6);
    }

    #[test]
    fn test_resume_from_persisted_state() {
        let mut tracker = GapTracker::starting_at(10);
        assert!(!tracker.on_receive(9));
        assert!(tracker.on_receive(10));
        assert_eq!(tracker.advance(), vec![10]);
    }

    #[test]
    fn test_missing_far_heartbeat() {
        let mut tracker = GapTracker::new();
        tracker.on_receive(2);
        tracker.mark_irrelevant(10..20);
        let last = 1u64 << 60;
        assert_eq!(tracker.missing_ranges(last), vec![1..2, 3..10, 20..last + 1]);
        assert_eq!(tracker.total_missing(last), last - 11);
        assert_eq!(tracker.missing_set(last).len(), 256 - 11);
        assert!(GapTracker::starting_at(5).missing_ranges(4).is_empty());
    }
}
