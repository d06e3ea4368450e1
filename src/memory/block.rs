//! Allocation blocks

use super::bits::Byte;
use super::range::AddrRange;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Block identifier. Never reused, so a pointer to a freed block stays
/// distinguishable from a pointer to a later block at the same address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(pub u64);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#b{}", self.0)
    }
}

/// Logical time of an allocation or free
pub type Tick = u64;

/// Where a block was allocated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockKind {
    /// `alloca`, released when its frame returns
    Stack,
    /// `malloc`, released by `free`
    Heap,
}

/// One allocation: metadata plus byte storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Identifier
    pub id: BlockId,
    /// Stack or heap
    pub kind: BlockKind,
    /// Concrete base address
    pub base: u64,
    /// Size in bytes (never zero)
    pub size: u64,
    /// Clock value at allocation
    pub born: Tick,
    /// Clock value at free, `None` while alive
    pub died: Option<Tick>,
    /// Alignment of the base address
    pub align: u64,
    /// Contents, `size` bytes
    pub bytes: Vec<Byte>,
    /// Reserved twin addresses; `base` is one of them
    pub candidates: BTreeSet<u64>,
}

impl Block {
    /// Returns true until the block is freed
    pub fn is_alive(&self) -> bool {
        self.died.is_none()
    }

    /// The address range the block actually occupies
    pub fn range(&self) -> AddrRange {
        AddrRange::new(self.base, self.size)
    }

    /// Every range the block reserves, one per twin address
    pub fn reserved_ranges(&self) -> impl Iterator<Item = AddrRange> + '_ {
        self.candidates
            .iter()
            .map(move |&c| AddrRange::new(c, self.size))
    }

    /// Returns true if `offset` points strictly inside the block
    pub fn in_bounds(&self, offset: u64) -> bool {
        offset < self.size
    }

    /// Returns true if `[offset, offset + len)` lies within the block
    pub fn access_in_bounds(&self, offset: u64, len: u64) -> bool {
        offset
            .checked_add(len)
            .is_some_and(|end| end <= self.size)
    }

    /// Structural equality that ignores allocation and free times but not liveness
    pub fn eq_modulo_clock(&self, other: &Block) -> bool {
        self.id == other.id
            && self.kind == other.kind
            && self.base == other.base
            && self.size == other.size
            && self.is_alive() == other.is_alive()
            && self.align == other.align
            && self.bytes == other.bytes
            && self.candidates == other.candidates
    }
}
