// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sequence numbers, bounded sequence-number sets and per-writer generation.
//!
//! RTPS carries sequence numbers as a signed high word and an unsigned low
//! word. Valid numbers start at 1; zero and negative values are sentinels.
//! All arithmetic goes through [`SequenceNumber::to_linear`], which is
//! monotone across the high/low split and saturates instead of wrapping.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Maximum bits carried by a [`SequenceNumberSet`] (RTPS limit).
pub const MAX_BITMAP_BITS: u32 = 256;
const WORD_BITS: u32 = 32;
const BITMAP_WORDS: usize = 8;

// ============================================================================
// SEQUENCE NUMBER
// ============================================================================

/// 64-bit logical counter split into `high: i32` / `low: u32`.
///
/// Field order makes the derived `Ord` the numeric order.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SequenceNumber {
    pub high: i32,
    pub low: u32,
}

impl SequenceNumber {
    /// SEQUENCENUMBER_UNKNOWN (-1:0).
    pub const UNKNOWN: SequenceNumber = SequenceNumber { high: -1, low: 0 };
    /// Zero, "nothing written yet".
    pub const ZERO: SequenceNumber = SequenceNumber { high: 0, low: 0 };
    /// First valid sequence number.
    pub const FIRST: SequenceNumber = SequenceNumber { high: 0, low: 1 };
    /// Largest representable sequence number.
    pub const MAX: SequenceNumber = SequenceNumber {
        high: i32::MAX,
        low: u32::MAX,
    };

    /// Build from a signed 64-bit value.
    #[must_use]
    pub fn new(value: i64) -> Self {
        Self {
            high: (value >> 32) as i32,
            low: value as u32,
        }
    }

    /// Build from a linear value, saturating at [`SequenceNumber::MAX`].
    #[must_use]
    pub fn from_linear(value: u64) -> Self {
        if value > Self::MAX.to_linear() {
            return Self::MAX;
        }
        Self {
            high: (value >> 32) as i32,
            low: value as u32,
        }
    }

    /// Monotone linearisation. Sentinels (negative high word) map to 0.
    #[must_use]
    pub fn to_linear(&self) -> u64 {
        if self.high < 0 {
            return 0;
        }
        (u64::from(self.high as u32) << 32) | u64::from(self.low)
    }

    /// True for numbers >= 1.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.high > 0 || (self.high == 0 && self.low > 0)
    }

    /// Next number (carry into the high word, saturating at MAX).
    #[must_use]
    pub fn next(&self) -> Self {
        self.saturating_add(1)
    }

    /// Saturating addition on the linear value.
    #[must_use]
    pub fn saturating_add(&self, n: u64) -> Self {
        Self::from_linear(self.to_linear().saturating_add(n))
    }

    /// Saturating subtraction on the linear value (floors at zero).
    #[must_use]
    pub fn saturating_sub(&self, n: u64) -> Self {
        Self::from_linear(self.to_linear().saturating_sub(n))
    }

    /// Distance `self - other` in linear space (0 if `other >= self`).
    #[must_use]
    pub fn distance_from(&self, other: SequenceNumber) -> u64 {
        self.to_linear().saturating_sub(other.to_linear())
    }
}

impl From<u64> for SequenceNumber {
    fn from(value: u64) -> Self {
        Self::from_linear(value)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.high < 0 {
            write!(f, "unknown")
        } else {
            write!(f, "{}", self.to_linear())
        }
    }
}

impl fmt::Debug for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SN({})", self)
    }
}

// ============================================================================
// SEQUENCE NUMBER SET
// ============================================================================

/// Bitmap of sequence numbers in `[base, base + 255]`.
///
/// Used by ACKNACK (missing numbers) and GAP (unavailable numbers).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceNumberSet {
    base: SequenceNumber,
    num_bits: u32,
    bitmap: [u32; BITMAP_WORDS],
}

impl SequenceNumberSet {
    /// Maximum number of bitmap bits (RTPS limit).
    pub const MAX_BITS: u32 = MAX_BITMAP_BITS;

    /// Empty set anchored at `base`.
    #[must_use]
    pub fn new(base: SequenceNumber) -> Self {
        Self {
            base,
            num_bits: 0,
            bitmap: [0; BITMAP_WORDS],
        }
    }

    /// Add `sn` to the set.
    ///
    /// Returns `false` and leaves the set unchanged when `sn` lies outside
    /// `[base, base + 255]`.
    pub fn add(&mut self, sn: SequenceNumber) -> bool {
        let Some(offset) = self.offset_of(sn) else {
            return false;
        };
        let word = (offset / WORD_BITS) as usize;
        let bit = offset % WORD_BITS;
        self.bitmap[word] |= 1 << (31 - bit);
        self.num_bits = self.num_bits.max(offset + 1);
        true
    }

    /// Membership test.
    #[must_use]
    pub fn contains(&self, sn: SequenceNumber) -> bool {
        match self.offset_of(sn) {
            Some(offset) if offset < self.num_bits => {
                let word = (offset / WORD_BITS) as usize;
                let bit = offset % WORD_BITS;
                self.bitmap[word] & (1 << (31 - bit)) != 0
            }
            _ => false,
        }
    }

    fn offset_of(&self, sn: SequenceNumber) -> Option<u32> {
        if !sn.is_valid() || sn < self.base {
            return None;
        }
        let offset = sn.distance_from(self.base);
        if offset >= u64::from(MAX_BITMAP_BITS) {
            return None;
        }
        Some(offset as u32)
    }

    /// Base sequence number of the set.
    #[must_use]
    pub fn base(&self) -> SequenceNumber {
        self.base
    }

    /// Number of bitmap bits in use.
    #[must_use]
    pub fn num_bits(&self) -> u32 {
        self.num_bits
    }

    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bitmap.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// True when no member is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bitmap.iter().all(|&w| w == 0)
    }

    /// Highest member, if any.
    #[must_use]
    pub fn max(&self) -> Option<SequenceNumber> {
        self.iter().last()
    }

    /// Iterate members in increasing order.
    pub fn iter(&self) -> SequenceNumberIter {
        SequenceNumberIter {
            base: self.base,
            num_bits: self.num_bits,
            bitmap: self.bitmap,
            index: 0,
        }
    }
}

impl fmt::Debug for SequenceNumberSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceNumberSet")
            .field("base", &self.base)
            .field("members", &self.iter().collect::<Vec<_>>())
            .finish()
    }
}

/// Iterator over sequences contained in a `SequenceNumberSet`.
#[derive(Clone)]
pub struct SequenceNumberIter {
    base: SequenceNumber,
    num_bits: u32,
    bitmap: [u32; BITMAP_WORDS],
    index: u32,
}

impl Iterator for SequenceNumberIter {
    type Item = SequenceNumber;

    fn next(&mut self) -> Option<Self::Item> {
        while self.index < self.num_bits {
            let offset = self.index;
            let word = (offset / WORD_BITS) as usize;
            let mask = 1u32 << (31 - offset % WORD_BITS);
            self.index += 1;
            if self.bitmap[word] & mask != 0 {
                return Some(self.base.saturating_add(u64::from(offset)));
            }
        }
        None
    }
}

impl IntoIterator for &SequenceNumberSet {
    type Item = SequenceNumber;
    type IntoIter = SequenceNumberIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

// ============================================================================
// GENERATOR
// ============================================================================

/// Per-writer monotonic sequence number generator.
///
/// Starts at 1 unless resumed from persisted state, so numbers never regress
/// across a restart.
#[derive(Debug)]
pub struct SeqNumGenerator {
    next: AtomicU64,
}

impl SeqNumGenerator {
    /// Generator starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(SequenceNumber::FIRST)
    }

    /// Generator resuming at `next` (values below 1 are clamped to 1).
    #[must_use]
    pub fn starting_at(next: SequenceNumber) -> Self {
        Self {
            next: AtomicU64::new(next.to_linear().max(1)),
        }
    }

    /// Assign the next sequence number.
    #[inline]
    pub fn next(&self) -> SequenceNumber {
        SequenceNumber::from_linear(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Last assigned number (ZERO if none yet).
    #[inline]
    pub fn last(&self) -> SequenceNumber {
        SequenceNumber::from_linear(self.next.load(Ordering::Relaxed).saturating_sub(1))
    }
}

impl Default for SeqNumGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sn(v: u64) -> SequenceNumber {
        SequenceNumber::from_linear(v)
    }

    #[test]
    fn test_linear_is_monotone_across_low_word() {
        let below = SequenceNumber { high: 0, low: u32::MAX };
        let above = below.next();
        assert_eq!(above, SequenceNumber { high: 1, low: 0 });
        assert!(above > below);
        assert!(above.to_linear() > below.to_linear());
    }

    #[test]
    fn test_saturates_at_max() {
        assert_eq!(SequenceNumber::MAX.next(), SequenceNumber::MAX);
        assert_eq!(SequenceNumber::from_linear(u64::MAX), SequenceNumber::MAX);
    }

    #[test]
    fn test_sentinels() {
        assert!(!SequenceNumber::UNKNOWN.is_valid());
        assert!(!SequenceNumber::ZERO.is_valid());
        assert!(SequenceNumber::FIRST.is_valid());
        assert_eq!(SequenceNumber::UNKNOWN.to_linear(), 0);
        assert!(SequenceNumber::UNKNOWN < SequenceNumber::ZERO);
        assert_eq!(SequenceNumber::new(-1).high, -1);
    }

    #[test]
    fn test_set_bounds() {
        let mut set = SequenceNumberSet::new(sn(10));
        assert!(set.add(sn(10)));
        assert!(set.add(sn(265)), "base + 255 is the last valid slot");
        assert!(!set.add(sn(266)), "base + 256 is out of range");
        assert!(!set.add(sn(9)), "below base is out of range");
        assert_eq!(set.len(), 2);
        assert_eq!(set.num_bits(), 256);
        assert!(!set.contains(sn(9)));
        assert!(!set.contains(sn(266)));
    }

    #[test]
    fn test_rejected_add_leaves_set_unchanged() {
        let mut set = SequenceNumberSet::new(sn(1));
        set.add(sn(3));
        let before = set.clone();
        assert!(!set.add(sn(500)));
        assert_eq!(set, before);
    }

    #[test]
    fn test_set_iteration_order() {
        let mut set = SequenceNumberSet::new(sn(100));
        for v in [140, 101, 100, 133] {
            set.add(sn(v));
        }
        let members: Vec<u64> = set.iter().map(|s| s.to_linear()).collect();
        assert_eq!(members, vec![100, 101, 133, 140]);
        assert_eq!(set.max(), Some(sn(140)));
    }

    #[test]
    fn test_set_across_high_word() {
        let base = SequenceNumber { high: 0, low: u32::MAX - 1 };
        let mut set = SequenceNumberSet::new(base);
        assert!(set.add(SequenceNumber { high: 1, low: 2 }));
        assert!(set.contains(SequenceNumber { high: 1, low: 2 }));
    }

    #[test]
    fn test_generator_resume() {
        let gen = SeqNumGenerator::starting_at(sn(42));
        assert_eq!(gen.last(), sn(41));
        assert_eq!(gen.next(), sn(42));
        assert_eq!(gen.next(), sn(43));
        assert_eq!(SeqNumGenerator::new().next(), SequenceNumber::FIRST);
    }
}
