//! First-class IR types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of a pointer in bytes
pub const PTR_SIZE: u64 = 4;

/// Size of a pointer in bits
pub const PTR_BITS: u32 = (PTR_SIZE * 8) as u32;

/// Widest integer type the interpreter handles
pub const MAX_INT_BITS: u32 = 64;

/// IR type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ty {
    /// Integer of the given bit width (1..=64)
    Int(u32),
    /// Pointer to the given pointee type
    Ptr(Box<Ty>),
}

impl Ty {
    /// Integer type of the given width
    pub fn int(bits: u32) -> Self {
        Ty::Int(bits)
    }

    /// `i1`
    pub fn i1() -> Self {
        Ty::Int(1)
    }

    /// `i8`
    pub fn i8() -> Self {
        Ty::Int(8)
    }

    /// `i32`
    pub fn i32() -> Self {
        Ty::Int(32)
    }

    /// `i64`
    pub fn i64() -> Self {
        Ty::Int(64)
    }

    /// Pointer to `pointee`
    pub fn ptr(pointee: Ty) -> Self {
        Ty::Ptr(Box::new(pointee))
    }

    /// Returns true for pointer types
    pub fn is_ptr(&self) -> bool {
        matches!(self, Ty::Ptr(_))
    }

    /// Returns true for integer types
    pub fn is_int(&self) -> bool {
        matches!(self, Ty::Int(_))
    }

    /// The pointee of a pointer type
    pub fn pointee(&self) -> Option<&Ty> {
        match self {
            Ty::Ptr(inner) => Some(inner),
            Ty::Int(_) => None,
        }
    }

    /// Width in bits of a value of this type
    pub fn bitwidth(&self) -> u32 {
        match self {
            Ty::Int(bits) => *bits,
            Ty::Ptr(_) => PTR_BITS,
        }
    }

    /// Store size in bytes (bit width rounded up to whole bytes)
    pub fn size_of(&self) -> u64 {
        (u64::from(self.bitwidth()) + 7) / 8
    }

    /// Integer widths must be in `1..=64`; pointee types are checked recursively
    pub fn is_valid(&self) -> bool {
        match self {
            Ty::Int(bits) => (1..=MAX_INT_BITS).contains(bits),
            Ty::Ptr(inner) => inner.is_valid(),
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Int(bits) => write!(f, "i{}", bits),
            Ty::Ptr(inner) => write!(f, "{}*", inner),
        }
    }
}
