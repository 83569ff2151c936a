// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Reliable delivery submessages: DATA, HEARTBEAT, ACKNACK and GAP.
//!
//! Every message names the writer and the reader it is about. A reader Guid
//! of `Guid::UNKNOWN` addresses every matched reader of the writer.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::core::{Guid, InstanceHandle, SequenceNumber, SequenceNumberSet, MAX_BITMAP_BITS};

/// One sample (writer -> reader).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMsg {
    pub writer: Guid,
    pub reader: Guid,
    pub sequence: SequenceNumber,
    pub instance: InstanceHandle,
    /// Request this sample answers, if any.
    pub related_request: Option<Guid>,
    pub payload: Vec<u8>,
}

/// Available range announcement (writer -> reader).
///
/// `first_sn > last_sn` means the writer has nothing to offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatMsg {
    pub writer: Guid,
    pub reader: Guid,
    pub first_sn: SequenceNumber,
    pub last_sn: SequenceNumber,
    /// Strictly increasing per writer; older counts are replays.
    pub count: u32,
    /// No response is required when nothing is missing.
    pub final_flag: bool,
}

impl HeartbeatMsg {
    /// True when the announced range is empty.
    #[must_use]
    pub fn is_empty_range(&self) -> bool {
        self.first_sn > self.last_sn
    }
}

/// Acknowledgment (reader -> writer).
///
/// Everything below `set.base()` is acknowledged; members of `set` are
/// requested again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckNackMsg {
    pub reader: Guid,
    pub writer: Guid,
    pub set: SequenceNumberSet,
    pub count: u32,
}

impl AckNackMsg {
    /// Highest sequence number acknowledged by this message.
    #[must_use]
    pub fn acked_up_to(&self) -> u64 {
        self.set.base().to_linear().saturating_sub(1)
    }

    /// True when the reader requests nothing.
    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.set.is_empty()
    }
}

/// Permanently unavailable sequence numbers (writer -> reader).
///
/// Covers `[gap_start, gap_list.base())` plus every member of `gap_list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GapMsg {
    pub writer: Guid,
    pub reader: Guid,
    pub gap_start: SequenceNumber,
    pub gap_list: SequenceNumberSet,
}

impl GapMsg {
    /// GAP for the contiguous range `[range.start, range.end)`.
    #[must_use]
    pub fn contiguous(writer: Guid, reader: Guid, range: Range<u64>) -> Option<Self> {
        if range.start == 0 || range.start >= range.end {
            return None;
        }
        Some(Self {
            writer,
            reader,
            gap_start: SequenceNumber::from_linear(range.start),
            gap_list: SequenceNumberSet::new(SequenceNumber::from_linear(range.end)),
        })
    }

    /// GAP messages covering `sequences` (sorted, deduplicated by the caller
    /// or not). Sequences farther apart than one bitmap are split over
    /// several messages.
    #[must_use]
    pub fn from_sequences(writer: Guid, reader: Guid, sequences: &[u64]) -> Vec<Self> {
        let mut sorted: Vec<u64> = sequences.iter().copied().filter(|s| *s > 0).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let mut messages = Vec::new();
        let mut i = 0;
        while i < sorted.len() {
            // Leading contiguous run goes into [gap_start, base).
            let start = sorted[i];
            let mut end = start + 1;
            i += 1;
            while i < sorted.len() && sorted[i] == end {
                end += 1;
                i += 1;
            }
            let mut gap_list = SequenceNumberSet::new(SequenceNumber::from_linear(end));
            while i < sorted.len() && sorted[i] < end + u64::from(MAX_BITMAP_BITS) {
                gap_list.add(SequenceNumber::from_linear(sorted[i]));
                i += 1;
            }
            messages.push(Self {
                writer,
                reader,
                gap_start: SequenceNumber::from_linear(start),
                gap_list,
            });
        }
        messages
    }

    /// Every lost sequence number, ascending.
    #[must_use]
    pub fn lost_sequences(&self) -> Vec<u64> {
        let mut seqs: Vec<u64> = self.lost_ranges().into_iter().flatten().collect();
        seqs.dedup();
        seqs
    }

    /// Lost sequence numbers as merged ranges `[start, end)`.
    #[must_use]
    pub fn lost_ranges(&self) -> Vec<Range<u64>> {
        let mut ranges: Vec<Range<u64>> = Vec::new();
        let start = self.gap_start.to_linear();
        let base = self.gap_list.base().to_linear();
        if start > 0 && start < base {
            ranges.push(start..base);
        }
        for sn in self.gap_list.iter() {
            let sn = sn.to_linear();
            match ranges.last_mut() {
                Some(last) if last.end >= sn => last.end = last.end.max(sn + 1),
                _ => ranges.push(sn..sn + 1),
            }
        }
        ranges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{EntityId, GuidPrefix};

    fn guids() -> (Guid, Guid) {
        (
            Guid::new(GuidPrefix::new([1; 12]), EntityId::user_writer(1)),
            Guid::new(GuidPrefix::new([2; 12]), EntityId::user_reader(1)),
        )
    }

    #[test]
    fn test_gap_contiguous_range() {
        let (w, r) = guids();
        let gap = GapMsg::contiguous(w, r, 3..7).expect("non-empty");
        assert_eq!(gap.lost_ranges(), vec![3..7]);
        assert_eq!(gap.lost_sequences(), vec![3, 4, 5, 6]);
        assert!(GapMsg::contiguous(w, r, 5..5).is_none());
        assert!(GapMsg::contiguous(w, r, 0..2).is_none());
    }

    #[test]
    fn test_gap_from_sparse_sequences() {
        let (w, r) = guids();
        let gaps = GapMsg::from_sequences(w, r, &[4, 2, 3, 9, 12]);
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].lost_ranges(), vec![2..5, 9..10, 12..13]);
    }

    #[test]
    fn test_gap_splits_past_bitmap_window() {
        let (w, r) = guids();
        let gaps = GapMsg::from_sequences(w, r, &[1, 3, 1000]);
        assert_eq!(gaps.len(), 2, "1000 lies beyond the 256-bit window of 2");
        let all: Vec<u64> = gaps.iter().flat_map(GapMsg::lost_sequences).collect();
        assert_eq!(all, vec![1, 3, 1000]);
    }

    #[test]
    fn test_acknack_acked_up_to() {
        let (w, r) = guids();
        let mut set = SequenceNumberSet::new(SequenceNumber::from_linear(4));
        let msg = AckNackMsg {
            reader: r,
            writer: w,
            set: set.clone(),
            count: 1,
        };
        assert_eq!(msg.acked_up_to(), 3);
        assert!(msg.is_positive());
        set.add(SequenceNumber::from_linear(5));
        assert!(!AckNackMsg { set, ..msg }.is_positive());
    }

    #[test]
    fn test_heartbeat_empty_range() {
        let (w, r) = guids();
        let hb = HeartbeatMsg {
            writer: w,
            reader: r,
            first_sn: SequenceNumber::from_linear(1),
            last_sn: SequenceNumber::ZERO,
            count: 1,
            final_flag: false,
        };
        assert!(hb.is_empty_range());
    }
}
