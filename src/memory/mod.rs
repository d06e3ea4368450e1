//! # Block-Based Memory Model
//!
//! Memory is a table of [`Block`]s keyed by [`BlockId`]. Every block owns its
//! bytes and a set of reserved *twin* base addresses, one of which is the
//! concrete base. Blocks are never removed: freeing only records the time of
//! death, so stale pointers stay attributable to the block they came from.
//!
//! ## Invariants
//!
//! Checked by [`Memory::check_invariants`] and preserved by every mutating
//! operation:
//!
//! 1. **Disjointness**: the reserved ranges of distinct live blocks never
//!    overlap, and every range lies inside `(0, MEMSZ)`.
//! 2. **No empty range**: every block has a non-zero size.
//! 3. **Fresh ids**: `fresh_id` is greater than every issued id.

mod bits;
mod block;
pub mod codec;
pub mod range;

pub use bits::{Bit, Byte, BITS_PER_BYTE};
pub use block::{Block, BlockId, BlockKind, Tick};
pub use range::AddrRange;

use crate::options::MAX_MEMSZ;
use range::{align_up, all_disjoint, disjoint_from};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Address-space parameters, fixed when the memory is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemConfig {
    /// Size of the address space (MEMSZ); address 0 is reserved for null
    pub memsz: u64,
    /// Default allocation alignment (SYSALIGN)
    pub sysalign: u64,
    /// Upper bound on twin addresses proposed per allocation
    pub max_candidates: usize,
}

impl Default for MemConfig {
    fn default() -> Self {
        Self {
            memsz: 1 << 16,
            sysalign: 8,
            max_candidates: 4,
        }
    }
}

impl MemConfig {
    /// Checks that the parameters describe a usable address space
    pub fn validate(&self) -> crate::Result<()> {
        if self.memsz < 2 || self.memsz > MAX_MEMSZ {
            return Err(crate::Error::invalid_options(format!(
                "memsz must be in 2..={}, got {}",
                MAX_MEMSZ, self.memsz
            )));
        }
        if !self.sysalign.is_power_of_two() {
            return Err(crate::Error::invalid_options(format!(
                "sysalign must be a power of two, got {}",
                self.sysalign
            )));
        }
        if self.sysalign >= self.memsz {
            return Err(crate::Error::invalid_options("sysalign must be below memsz"));
        }
        if self.max_candidates == 0 {
            return Err(crate::Error::invalid_options("max_candidates must be at least 1"));
        }
        Ok(())
    }
}

/// Memory operation failures
#[derive(Error, Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemError {
    /// No candidate keeps the live blocks disjoint
    #[error("Out of memory: no disjoint placement for {size} bytes")]
    OutOfMemory {
        /// Requested size
        size: u64,
    },

    /// Zero-sized allocation request
    #[error("Allocation of zero bytes")]
    EmptyRange,

    /// Alignment is zero or not a power of two
    #[error("Invalid alignment: {0}")]
    InvalidAlignment(u64),

    /// Initial contents do not match the requested size
    #[error("Initial contents have {got} bytes, block has {size}")]
    InitSizeMismatch {
        /// Block size
        size: u64,
        /// Length of the supplied contents
        got: usize,
    },

    /// Placement index beyond the viable candidates
    #[error("Placement {pick} out of range ({available} viable candidates)")]
    InvalidPick {
        /// Requested index
        pick: usize,
        /// Number of viable candidates
        available: usize,
    },

    /// Block ID was never issued
    #[error("No such block: {0}")]
    NoSuchBlock(BlockId),

    /// Block has been freed
    #[error("Block {0} has been freed")]
    DeadBlock(BlockId),

    /// Access outside the block
    #[error("Access of {len} bytes at offset {offset} exceeds block {block} of size {size}")]
    OutOfBounds {
        /// Accessed block
        block: BlockId,
        /// Start offset of the access
        offset: u64,
        /// Length of the access
        len: u64,
        /// Block size
        size: u64,
    },

    /// A global invariant does not hold
    #[error("Memory invariant violated: {0}")]
    InvariantViolated(String),
}

/// Allocation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocRequest {
    /// Stack or heap
    pub kind: BlockKind,
    /// Size in bytes, must be positive
    pub size: u64,
    /// Base alignment, a power of two
    pub align: u64,
    /// Initial contents; poison when absent
    pub init: Option<Vec<Byte>>,
    /// Proposed base addresses, in preference order
    pub candidates: Vec<u64>,
    /// Index into the viable candidates of the one to use as base
    pub pick: usize,
}

impl AllocRequest {
    /// Request with poisoned contents, placed at the first viable candidate
    pub fn new(kind: BlockKind, size: u64, align: u64, candidates: Vec<u64>) -> Self {
        Self {
            kind,
            size,
            align,
            init: None,
            candidates,
            pick: 0,
        }
    }

    /// Sets the initial contents
    pub fn with_init(mut self, bytes: Vec<Byte>) -> Self {
        self.init = Some(bytes);
        self
    }

    /// Chooses which viable candidate becomes the base
    pub fn with_pick(mut self, pick: usize) -> Self {
        self.pick = pick;
        self
    }
}

/// The memory: all blocks ever allocated, a logical clock and an id counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    blocks: BTreeMap<BlockId, Block>,
    clock: Tick,
    fresh_id: u64,
    config: MemConfig,
}

impl Memory {
    /// Creates an empty memory.
    ///
    /// **Triggered by:** `InvalidOptions` when `config` fails
    /// [`MemConfig::validate`].
    pub fn new(config: MemConfig) -> crate::Result<Self> {
        config.validate()?;
        Ok(Self {
            blocks: BTreeMap::new(),
            clock: 0,
            fresh_id: 0,
            config,
        })
    }

    /// Address-space parameters
    pub fn config(&self) -> &MemConfig {
        &self.config
    }

    /// Current logical time
    pub fn clock(&self) -> Tick {
        self.clock
    }

    /// The ID the next allocation will receive
    pub fn fresh_id(&self) -> BlockId {
        BlockId(self.fresh_id)
    }

    /// Looks up a block, alive or dead
    pub fn get(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    /// All blocks, including freed ones
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    /// Blocks that have not been freed
    pub fn live_blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values().filter(|b| b.is_alive())
    }

    fn reserved_ranges(&self) -> Vec<AddrRange> {
        self.live_blocks()
            .flat_map(|b| b.reserved_ranges())
            .collect()
    }

    fn fits(&self, range: &AddrRange, align: u64) -> bool {
        range.start > 0 && range.start % align == 0 && range.end() <= self.config.memsz
    }

    /// Proposes up to `max` base addresses for a new block, first fit.
    ///
    /// The proposed ranges are aligned, lie in `(0, MEMSZ)`, avoid every
    /// range reserved by a live block and do not overlap each other.
    pub fn propose_candidates(&self, size: u64, align: u64, max: usize) -> Vec<u64> {
        let mut taken = self.reserved_ranges();
        let mut out = Vec::new();
        if size == 0 || align == 0 || !align.is_power_of_two() {
            return out;
        }

        let mut base = align;
        while out.len() < max {
            let candidate = AddrRange::new(base, size);
            if candidate.start.checked_add(size).map_or(true, |end| end > self.config.memsz) {
                break;
            }
            let blocking_end = taken
                .iter()
                .filter(|r| r.overlaps(&candidate))
                .map(AddrRange::end)
                .max();
            let next = match blocking_end {
                Some(end) => end,
                None => {
                    out.push(base);
                    taken.push(candidate);
                    candidate.end()
                }
            };
            match align_up(next, align) {
                Some(aligned) => base = aligned,
                None => break,
            }
        }
        out
    }

    /// Allocates a block.
    ///
    /// Candidates that are misaligned, leave the address space, or overlap a
    /// live block (or an earlier viable candidate) are dropped; the rest
    /// become the block's reserved twins and `pick` selects the base.
    pub fn allocate(&mut self, req: AllocRequest) -> Result<BlockId, MemError> {
        if req.size == 0 {
            return Err(MemError::EmptyRange);
        }
        if req.align == 0 || !req.align.is_power_of_two() {
            return Err(MemError::InvalidAlignment(req.align));
        }
        if let Some(bytes) = &req.init {
            if bytes.len() as u64 != req.size {
                return Err(MemError::InitSizeMismatch {
                    size: req.size,
                    got: bytes.len(),
                });
            }
        }

        let mut taken = self.reserved_ranges();
        let mut viable = Vec::new();
        for &base in &req.candidates {
            let range = AddrRange::new(base, req.size);
            if self.fits(&range, req.align) && disjoint_from(&range, &taken) {
                viable.push(base);
                taken.push(range);
            }
        }

        if viable.is_empty() {
            return Err(MemError::OutOfMemory { size: req.size });
        }
        let base = *viable.get(req.pick).ok_or(MemError::InvalidPick {
            pick: req.pick,
            available: viable.len(),
        })?;
        let bytes = match req.init {
            Some(bytes) => bytes,
            None => {
                let len = usize::try_from(req.size)
                    .map_err(|_| MemError::OutOfMemory { size: req.size })?;
                vec![Byte::poison(); len]
            }
        };

        let id = BlockId(self.fresh_id);
        self.fresh_id += 1;
        let block = Block {
            id,
            kind: req.kind,
            base,
            size: req.size,
            born: self.clock,
            died: None,
            align: req.align,
            bytes,
            candidates: viable.into_iter().collect::<BTreeSet<_>>(),
        };
        self.clock += 1;

        tracing::debug!(
            "allocated {} ({:?}, {} bytes) at 0x{:x}",
            id,
            block.kind,
            block.size,
            block.base
        );
        self.blocks.insert(id, block);
        Ok(id)
    }

    /// Frees a live block. The record stays in the table.
    pub fn free(&mut self, id: BlockId) -> Result<(), MemError> {
        let clock = self.clock;
        let block = self.blocks.get_mut(&id).ok_or(MemError::NoSuchBlock(id))?;
        if !block.is_alive() {
            return Err(MemError::DeadBlock(id));
        }
        block.died = Some(clock);
        self.clock += 1;
        tracing::debug!("freed {}", id);
        Ok(())
    }

    fn live(&self, id: BlockId) -> Result<&Block, MemError> {
        let block = self.blocks.get(&id).ok_or(MemError::NoSuchBlock(id))?;
        if block.is_alive() {
            Ok(block)
        } else {
            Err(MemError::DeadBlock(id))
        }
    }

    /// Reads `len` bytes at `offset` of a live block
    pub fn read(&self, id: BlockId, offset: u64, len: u64) -> Result<Vec<Byte>, MemError> {
        let block = self.live(id)?;
        if !block.access_in_bounds(offset, len) {
            return Err(MemError::OutOfBounds {
                block: id,
                offset,
                len,
                size: block.size,
            });
        }
        let start = offset as usize;
        Ok(block.bytes[start..start + len as usize].to_vec())
    }

    /// Writes `bytes` at `offset` of a live block
    pub fn write(&mut self, id: BlockId, offset: u64, bytes: &[Byte]) -> Result<(), MemError> {
        let len = bytes.len() as u64;
        let size = self.live(id)?.size;
        let block = self.blocks.get_mut(&id).ok_or(MemError::NoSuchBlock(id))?;
        if !block.access_in_bounds(offset, len) {
            return Err(MemError::OutOfBounds {
                block: id,
                offset,
                len,
                size,
            });
        }
        let start = offset as usize;
        block.bytes[start..start + bytes.len()].clone_from_slice(bytes);
        Ok(())
    }

    /// Concrete address of `offset` within a block (alive or dead), modulo MEMSZ
    pub fn address_of(&self, id: BlockId, offset: u64) -> Option<u64> {
        let block = self.blocks.get(&id)?;
        Some(block.base.wrapping_add(offset) % self.config.memsz)
    }

    /// The live block whose actual range contains `[addr, addr + len)`.
    ///
    /// Disjointness makes the answer unique.
    pub fn live_block_containing(&self, addr: u64, len: u64) -> Option<BlockId> {
        self.live_blocks()
            .find(|b| b.range().contains(addr, len.max(1)))
            .map(|b| b.id)
    }

    /// Checks disjointness, non-empty ranges and id freshness
    pub fn check_invariants(&self) -> Result<(), MemError> {
        let violated = |msg: String| Err(MemError::InvariantViolated(msg));

        for (id, block) in &self.blocks {
            if *id != block.id {
                return violated(format!("block {} stored under {}", block.id, id));
            }
            if id.0 >= self.fresh_id {
                return violated(format!("{} is not below fresh id {}", id, self.fresh_id));
            }
            if block.size == 0 {
                return violated(format!("{} has an empty range", id));
            }
            if block.bytes.len() as u64 != block.size {
                return violated(format!("{} holds {} bytes for size {}", id, block.bytes.len(), block.size));
            }
            if !block.candidates.contains(&block.base) {
                return violated(format!("{} base 0x{:x} is not a reserved twin", id, block.base));
            }
            if block.is_alive() {
                if let Some(r) = block.reserved_ranges().find(|r| !self.fits(r, block.align)) {
                    return violated(format!("{} reserves [0x{:x}, 0x{:x}) outside memory", id, r.start, r.end()));
                }
            }
            if block.born >= self.clock || block.died.is_some_and(|d| d >= self.clock || d < block.born) {
                return violated(format!("{} has inconsistent lifetime", id));
            }
        }

        if !all_disjoint(&self.reserved_ranges()) {
            return violated("live blocks overlap".to_string());
        }
        Ok(())
    }

    /// Equality ignoring the clock and lifetime ticks, but not liveness
    pub fn eq_modulo_clock(&self, other: &Memory) -> bool {
        self.config == other.config
            && self.fresh_id == other.fresh_id
            && self.blocks.len() == other.blocks.len()
            && self
                .blocks
                .values()
                .zip(other.blocks.values())
                .all(|(a, b)| a.eq_modulo_clock(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Memory {
        Memory::new(MemConfig {
            memsz: 64,
            sysalign: 8,
            max_candidates: 2,
        })
        .unwrap()
    }

    #[test]
    fn test_propose_first_fit() {
        let mem = small();
        assert_eq!(mem.propose_candidates(8, 8, 3), vec![8, 16, 24]);
        assert_eq!(mem.propose_candidates(12, 8, 3), vec![8, 24, 40]);
        assert!(mem.propose_candidates(64, 8, 3).is_empty());
    }

    #[test]
    fn test_allocate_reserves_twins() {
        let mut mem = small();
        let cands = mem.propose_candidates(8, 8, 2);
        let id = mem
            .allocate(AllocRequest::new(BlockKind::Heap, 8, 8, cands).with_pick(1))
            .unwrap();
        let block = mem.get(id).unwrap();
        assert_eq!(block.base, 16);
        assert_eq!(block.candidates.len(), 2);
        // Both twins stay reserved for as long as the block lives.
        assert_eq!(mem.propose_candidates(8, 8, 1), vec![24]);
        mem.check_invariants().unwrap();
    }

    #[test]
    fn test_allocate_rejects_overlap() {
        let mut mem = small();
        mem.allocate(AllocRequest::new(BlockKind::Heap, 8, 8, vec![8]))
            .unwrap();
        let err = mem
            .allocate(AllocRequest::new(BlockKind::Heap, 8, 8, vec![8, 12]))
            .unwrap_err();
        assert_eq!(err, MemError::OutOfMemory { size: 8 });
    }

    #[test]
    fn test_oversized_allocation_is_out_of_memory() {
        let mut mem = small();
        let size = u64::MAX / 2;
        let err = mem
            .allocate(AllocRequest::new(BlockKind::Heap, size, 8, vec![8]))
            .unwrap_err();
        assert_eq!(err, MemError::OutOfMemory { size });
        assert_eq!(mem.fresh_id(), BlockId(0));
    }

    #[test]
    fn test_new_rejects_bad_config() {
        let base = MemConfig::default();
        for config in [
            MemConfig { memsz: 0, ..base },
            MemConfig { memsz: MAX_MEMSZ + 1, ..base },
            MemConfig { sysalign: 6, ..base },
            MemConfig { memsz: 8, sysalign: 8, ..base },
            MemConfig { max_candidates: 0, ..base },
        ] {
            assert!(matches!(
                Memory::new(config),
                Err(crate::Error::InvalidOptions(_))
            ));
        }
        assert!(Memory::new(MemConfig { memsz: MAX_MEMSZ, ..base }).is_ok());
    }

    #[test]
    fn test_allocate_filters_bad_candidates() {
        let mut mem = small();
        let id = mem
            .allocate(AllocRequest::new(BlockKind::Heap, 8, 8, vec![0, 4, 60, 32]))
            .unwrap();
        assert_eq!(mem.get(id).unwrap().base, 32);
    }

    #[test]
    fn test_zero_size_rejected() {
        let mut mem = small();
        assert_eq!(
            mem.allocate(AllocRequest::new(BlockKind::Heap, 0, 8, vec![8])),
            Err(MemError::EmptyRange)
        );
    }

    #[test]
    fn test_free_keeps_record_and_never_reuses_ids() {
        let mut mem = small();
        let a = mem
            .allocate(AllocRequest::new(BlockKind::Heap, 8, 8, vec![8]))
            .unwrap();
        mem.free(a).unwrap();
        assert_eq!(mem.free(a), Err(MemError::DeadBlock(a)));
        assert!(mem.get(a).is_some());

        let b = mem
            .allocate(AllocRequest::new(BlockKind::Heap, 8, 8, vec![8]))
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(mem.get(b).unwrap().base, 8);
        assert_eq!(mem.read(a, 0, 1), Err(MemError::DeadBlock(a)));
        mem.check_invariants().unwrap();
    }

    #[test]
    fn test_read_write_bounds() {
        let mut mem = small();
        let id = mem
            .allocate(AllocRequest::new(BlockKind::Heap, 4, 8, vec![8]))
            .unwrap();
        mem.write(id, 2, &[Byte::from_u8(7), Byte::from_u8(9)])
            .unwrap();
        let bytes = mem.read(id, 2, 2).unwrap();
        assert_eq!(bytes[1].as_u8(), Some(9));
        assert!(matches!(
            mem.read(id, 3, 2),
            Err(MemError::OutOfBounds { .. })
        ));
        assert!(matches!(
            mem.write(id, 4, &[Byte::from_u8(0)]),
            Err(MemError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_live_block_containing() {
        let mut mem = small();
        let id = mem
            .allocate(AllocRequest::new(BlockKind::Heap, 8, 8, vec![16]))
            .unwrap();
        assert_eq!(mem.live_block_containing(20, 4), Some(id));
        assert_eq!(mem.live_block_containing(20, 5), None);
        assert_eq!(mem.address_of(id, 3), Some(19));
        mem.free(id).unwrap();
        assert_eq!(mem.live_block_containing(20, 1), None);
    }
}
