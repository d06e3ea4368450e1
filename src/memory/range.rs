//! Address ranges and the no-overlap checks behind the disjointness invariant

use serde::{Deserialize, Serialize};

/// Half-open address range `[start, start + len)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AddrRange {
    /// First address
    pub start: u64,
    /// Length in bytes
    pub len: u64,
}

impl AddrRange {
    /// Creates a range
    pub fn new(start: u64, len: u64) -> Self {
        Self { start, len }
    }

    /// One past the last address (saturating)
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.len)
    }

    /// Returns true for zero-length ranges
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns true if the two ranges share at least one address
    pub fn overlaps(&self, other: &AddrRange) -> bool {
        !self.is_empty() && !other.is_empty() && self.start < other.end() && other.start < self.end()
    }

    /// Returns true if `[addr, addr + len)` lies inside this range
    pub fn contains(&self, addr: u64, len: u64) -> bool {
        addr >= self.start && addr.saturating_add(len) <= self.end()
    }
}

/// Returns true if no two ranges overlap.
///
/// Sorts a copy by start address and compares neighbours, so the scan is
/// `O(n log n)`.
pub fn all_disjoint(ranges: &[AddrRange]) -> bool {
    let mut sorted = ranges.to_vec();
    sorted.sort();
    sorted.windows(2).all(|w| w[0].end() <= w[1].start)
}

/// Returns true if `range` overlaps none of `others`
pub fn disjoint_from(range: &AddrRange, others: &[AddrRange]) -> bool {
    others.iter().all(|o| !range.overlaps(o))
}

/// Returns true if no range is empty
pub fn no_empty_range(ranges: &[AddrRange]) -> bool {
    ranges.iter().all(|r| !r.is_empty())
}

/// Rounds `value` up to a multiple of `align` (a power of two)
pub fn align_up(value: u64, align: u64) -> Option<u64> {
    let mask = align.checked_sub(1)?;
    value.checked_add(mask).map(|v| v & !mask)
}
