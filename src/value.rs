//! Runtime values and provenance-carrying pointers

use crate::ir::Ty;
use crate::memory::BlockId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Pointer with provenance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pointer {
    /// Offset relative to a block. The offset may exceed the block size;
    /// only dereferencing checks bounds.
    Logical {
        /// Block the pointer was derived from
        block: BlockId,
        /// Byte offset from the block base
        offset: u64,
    },
    /// Concrete address, produced by `inttoptr` and arithmetic on it
    Physical {
        /// Address in `[0, MEMSZ)`
        addr: u64,
        /// Addresses an `inbounds` computation passed through; a dereference
        /// requires all of them to lie in the accessed block
        candidates: BTreeSet<u64>,
        /// Block the address was attributed to when cast, if unique
        owner: Option<BlockId>,
    },
    /// The null pointer (address 0)
    Null,
}

impl Pointer {
    /// Logical pointer into `block` at `offset`
    pub fn logical(block: BlockId, offset: u64) -> Self {
        Pointer::Logical { block, offset }
    }

    /// Physical pointer without inbounds history
    pub fn physical(addr: u64, owner: Option<BlockId>) -> Self {
        Pointer::Physical {
            addr,
            candidates: BTreeSet::new(),
            owner,
        }
    }

    /// Returns true for the null pointer
    pub fn is_null(&self) -> bool {
        matches!(self, Pointer::Null)
    }

    /// The block a logical pointer refers to
    pub fn block(&self) -> Option<BlockId> {
        match self {
            Pointer::Logical { block, .. } => Some(*block),
            Pointer::Physical { owner, .. } => *owner,
            Pointer::Null => None,
        }
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pointer::Logical { block, offset } => write!(f, "({}, +{})", block, offset),
            Pointer::Physical { addr, owner, .. } => match owner {
                Some(owner) => write!(f, "0x{:x}@{}", addr, owner),
                None => write!(f, "0x{:x}", addr),
            },
            Pointer::Null => write!(f, "null"),
        }
    }
}

/// Runtime value
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    /// Integer of `width` bits; bits above `width` are always zero
    Num {
        /// Bit width
        width: u32,
        /// Raw bits
        bits: u64,
    },
    /// Pointer
    Ptr(Pointer),
    /// Poison, propagates until consumed by a branch or a memory access
    Poison,
}

/// All-ones mask of `width` bits
pub fn mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Interprets the low `width` bits of `bits` as a two's complement integer
pub fn sign_extend(bits: u64, width: u32) -> i64 {
    if width == 0 {
        return 0;
    }
    if width >= 64 {
        return bits as i64;
    }
    let shift = 64 - width;
    ((bits << shift) as i64) >> shift
}

impl Value {
    /// Integer value, truncated to `width`
    pub fn num(width: u32, bits: u64) -> Self {
        Value::Num {
            width,
            bits: bits & mask(width),
        }
    }

    /// Integer value from a signed number, truncated to `width`
    pub fn from_i64(width: u32, value: i64) -> Self {
        Value::num(width, value as u64)
    }

    /// `i1` value
    pub fn bool(b: bool) -> Self {
        Value::num(1, u64::from(b))
    }

    /// Pointer value
    pub fn ptr(pointer: Pointer) -> Self {
        Value::Ptr(pointer)
    }

    /// Null pointer value
    pub fn null() -> Self {
        Value::Ptr(Pointer::Null)
    }

    /// Width and bits of an integer
    pub fn as_num(&self) -> Option<(u32, u64)> {
        match self {
            Value::Num { width, bits } => Some((*width, *bits)),
            _ => None,
        }
    }

    /// Signed interpretation of an integer
    pub fn as_signed(&self) -> Option<i64> {
        self.as_num().map(|(width, bits)| sign_extend(bits, width))
    }

    /// Pointer payload
    pub fn as_ptr(&self) -> Option<&Pointer> {
        match self {
            Value::Ptr(p) => Some(p),
            _ => None,
        }
    }

    /// Returns true for poison
    pub fn is_poison(&self) -> bool {
        matches!(self, Value::Poison)
    }

    /// Poison inhabits every type; integers need a matching width
    pub fn has_type(&self, ty: &Ty) -> bool {
        match (self, ty) {
            (Value::Poison, _) => true,
            (Value::Num { width, .. }, Ty::Int(bits)) => width == bits,
            (Value::Ptr(_), Ty::Ptr(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Num { width, bits } => write!(f, "i{} {}", width, bits),
            Value::Ptr(p) => write!(f, "ptr {}", p),
            Value::Poison => write!(f, "poison"),
        }
    }
}
