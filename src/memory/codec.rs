//! Value ⇄ byte conversion
//!
//! Integers are stored little-endian with concrete bits. Pointers other than
//! null are stored symbolically, bit `i` of the stored bytes being
//! `Bit::Ptr(p, i)`, so loading them back with a pointer type recovers the
//! exact provenance.

use super::bits::{Bit, Byte, BITS_PER_BYTE};
use crate::ir::{Ty, PTR_BITS};
use crate::value::{Pointer, Value};

/// Encodes `value` as `ty.size_of()` bytes.
///
/// Poison, and any value whose shape does not match `ty`, becomes fully
/// poisoned bytes. Padding bits above an integer's width are zero.
pub fn encode(value: &Value, ty: &Ty) -> Vec<Byte> {
    let size = ty.size_of() as usize;
    let nbits = size * BITS_PER_BYTE;

    let bits: Vec<Bit> = match (value, ty) {
        (Value::Num { width, bits }, Ty::Int(w)) if width == w => (0..nbits)
            .map(|i| Bit::Val(i < 64 && (bits >> i) & 1 == 1))
            .collect(),
        (Value::Ptr(Pointer::Null), Ty::Ptr(_)) => vec![Bit::Val(false); nbits],
        (Value::Ptr(p), Ty::Ptr(_)) => (0..nbits as u32)
            .map(|i| {
                if i < PTR_BITS {
                    Bit::Ptr(p.clone(), i)
                } else {
                    Bit::Val(false)
                }
            })
            .collect(),
        _ => vec![Bit::Poison; nbits],
    };

    bits.chunks(BITS_PER_BYTE)
        .map(|chunk| Byte::new(std::array::from_fn(|i| chunk[i].clone())))
        .collect()
}

/// Decodes bytes loaded at type `ty`.
///
/// Any poison bit yields poison. Under a pointer type, the bytes must either
/// hold one pointer's bits in order or be fully concrete (null for zero, a
/// physical address otherwise); any mixture is poison. Under an integer
/// type, pointer bits are poison.
pub fn decode(bytes: &[Byte], ty: &Ty) -> Value {
    let bits: Vec<&Bit> = bytes.iter().flat_map(|b| b.bits().iter()).collect();
    if bits.iter().any(|b| matches!(b, Bit::Poison)) {
        return Value::Poison;
    }

    match ty {
        Ty::Int(width) => match concrete(&bits) {
            Some(n) => Value::num(*width, n),
            None => Value::Poison,
        },
        Ty::Ptr(_) => {
            if let Some(n) = concrete(&bits) {
                return if n == 0 {
                    Value::null()
                } else {
                    Value::ptr(Pointer::physical(n, None))
                };
            }
            match symbolic(&bits) {
                Some(p) => Value::ptr(p),
                None => Value::Poison,
            }
        }
    }
}

fn concrete(bits: &[&Bit]) -> Option<u64> {
    bits.iter().enumerate().try_fold(0u64, |acc, (i, bit)| match bit {
        Bit::Val(true) if i < 64 => Some(acc | (1u64 << i)),
        Bit::Val(_) => Some(acc),
        _ => None,
    })
}

fn symbolic(bits: &[&Bit]) -> Option<Pointer> {
    let first = match bits.first() {
        Some(Bit::Ptr(p, 0)) => p,
        _ => return None,
    };
    let consistent = bits.iter().enumerate().all(|(i, bit)| match bit {
        Bit::Ptr(p, idx) => p == first && *idx as usize == i,
        Bit::Val(false) => i >= PTR_BITS as usize,
        _ => false,
    });
    consistent.then(|| first.clone())
}
