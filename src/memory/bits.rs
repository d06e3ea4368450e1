//! Bits and bytes: the smallest units of storage
//!
//! A bit is either concrete, one bit of a stored pointer, or poison. Keeping
//! pointer bits symbolic is what lets a load tell a genuine pointer apart
//! from bytes that merely have the same numeric value.

use crate::value::Pointer;
use serde::{Deserialize, Serialize};

/// Number of bits per byte
pub const BITS_PER_BYTE: usize = 8;

/// One bit of storage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Bit {
    /// Concrete bit
    Val(bool),
    /// Bit `index` (0 = least significant) of a stored pointer
    Ptr(Pointer, u32),
    /// Poison bit
    Poison,
}

/// Eight bits, least significant first
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Byte {
    bits: [Bit; BITS_PER_BYTE],
}

impl Byte {
    /// Byte from explicit bits
    pub fn new(bits: [Bit; BITS_PER_BYTE]) -> Self {
        Self { bits }
    }

    /// Fully poisoned byte (fresh allocations start out like this)
    pub fn poison() -> Self {
        Self {
            bits: std::array::from_fn(|_| Bit::Poison),
        }
    }

    /// Concrete byte
    pub fn from_u8(value: u8) -> Self {
        Self {
            bits: std::array::from_fn(|i| Bit::Val((value >> i) & 1 == 1)),
        }
    }

    /// The bits of this byte
    pub fn bits(&self) -> &[Bit; BITS_PER_BYTE] {
        &self.bits
    }

    /// Concrete value, if every bit is concrete
    pub fn as_u8(&self) -> Option<u8> {
        self.bits
            .iter()
            .enumerate()
            .try_fold(0u8, |acc, (i, bit)| match bit {
                Bit::Val(true) => Some(acc | (1 << i)),
                Bit::Val(false) => Some(acc),
                _ => None,
            })
    }

    /// Returns true if any bit is poison
    pub fn has_poison(&self) -> bool {
        self.bits.iter().any(|b| matches!(b, Bit::Poison))
    }
}
