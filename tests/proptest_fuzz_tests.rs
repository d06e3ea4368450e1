//! Property-based tests for the memory model and the interpreter
//!
//! These tests use proptest to generate random inputs and verify that:
//! 1. Random allocate/free sequences keep every memory invariant
//! 2. Stored bytes decode back according to the poison rules
//! 3. Integer arithmetic matches wrapping machine arithmetic
//! 4. Address-independent programs behave the same under any placement
//! 5. Every swap the commute table approves refines the original order

use provir::ir::{
    BinOp, FunctionBuilder, FunctionDef, FunctionId, ICmpPred, Module, Operand, Pc, Reg, Ty,
};
use provir::memory::range::{all_disjoint, no_empty_range};
use provir::memory::{codec, AllocRequest, BlockId, BlockKind, Byte, MemConfig, Memory};
use provir::runtime::{explore, nstep, run, Config, FirstFit, Outcome};
use provir::transform::{compare, validate_swap, AddressPolicy};
use provir::value::mask;
use provir::{ExecOptions, Pointer, Value};
use proptest::prelude::*;
use std::collections::HashSet;

// =============================================================================
// STRATEGY GENERATORS
// =============================================================================

#[derive(Debug, Clone)]
enum MemOp {
    Alloc { size: u64, pick: usize, stack: bool },
    Free { victim: usize },
}

fn mem_op() -> impl Strategy<Value = MemOp> {
    prop_oneof![
        3 => (1u64..200, 0usize..4, any::<bool>())
            .prop_map(|(size, pick, stack)| MemOp::Alloc { size, pick, stack }),
        1 => (0usize..32).prop_map(|victim| MemOp::Free { victim }),
    ]
}

fn arith_op() -> impl Strategy<Value = BinOp> {
    prop_oneof![
        Just(BinOp::Add),
        Just(BinOp::Sub),
        Just(BinOp::Mul),
        Just(BinOp::And),
        Just(BinOp::Or),
        Just(BinOp::Xor),
    ]
}

fn policy() -> impl Strategy<Value = AddressPolicy> {
    prop_oneof![
        Just(AddressPolicy::First),
        Just(AddressPolicy::Last),
        (0usize..6).prop_map(AddressPolicy::Index),
    ]
}

fn width() -> impl Strategy<Value = u32> {
    prop_oneof![Just(8u32), Just(16), Just(32), Just(64)]
}

/// Live state built before the pair under test
#[derive(Debug, Clone)]
struct Prefix {
    counts: [i64; 3],
    stores: Vec<(usize, i64)>,
    freed: [bool; 3],
}

fn prefix() -> impl Strategy<Value = Prefix> {
    (
        [1i64..=4, 1i64..=4, 1i64..=4],
        prop::collection::vec((0usize..3, any::<i32>()), 0..4),
        [any::<bool>(), any::<bool>(), any::<bool>()],
    )
        .prop_map(|(counts, stores, freed)| Prefix {
            counts,
            stores: stores.into_iter().map(|(k, v)| (k, i64::from(v))).collect(),
            freed,
        })
}

/// One instruction of the pair; pointer operands index the prefix blocks,
/// with 3 standing for null where null is allowed
#[derive(Debug, Clone)]
enum PairOp {
    Arith { op: BinOp, rhs: i64 },
    CmpInt { pred: ICmpPred, rhs: i64 },
    CmpPtr { pred: ICmpPred, lhs: usize, rhs: usize },
    Select { cond: bool, lhs: usize, rhs: usize },
    Gep { inbounds: bool, ptr: usize, idx: i64 },
    Psub { lhs: usize, rhs: usize },
    PtrToInt { ptr: usize },
    IntToPtr { addr: Option<i64> },
    Bitcast { ptr: usize },
    Load { ptr: usize, pointer: bool },
    Store { ptr: usize, val: i64 },
    Malloc { count: i64 },
    Alloca { count: i64 },
    Free { ptr: usize },
    Call,
}

fn any_binop() -> impl Strategy<Value = BinOp> {
    prop::sample::select(vec![
        BinOp::Add,
        BinOp::Sub,
        BinOp::Mul,
        BinOp::UDiv,
        BinOp::SDiv,
        BinOp::URem,
        BinOp::SRem,
        BinOp::And,
        BinOp::Or,
        BinOp::Xor,
        BinOp::Shl,
        BinOp::LShr,
        BinOp::AShr,
    ])
}

fn any_int_pred() -> impl Strategy<Value = ICmpPred> {
    prop::sample::select(vec![
        ICmpPred::Eq,
        ICmpPred::Ne,
        ICmpPred::Ult,
        ICmpPred::Ule,
        ICmpPred::Ugt,
        ICmpPred::Uge,
        ICmpPred::Slt,
        ICmpPred::Sle,
        ICmpPred::Sgt,
        ICmpPred::Sge,
    ])
}

fn ptr_pred() -> impl Strategy<Value = ICmpPred> {
    prop::sample::select(vec![
        ICmpPred::Eq,
        ICmpPred::Ne,
        ICmpPred::Ult,
        ICmpPred::Ule,
        ICmpPred::Ugt,
        ICmpPred::Uge,
    ])
}

fn value_op() -> impl Strategy<Value = PairOp> {
    prop_oneof![
        (any_binop(), -2i64..3).prop_map(|(op, rhs)| PairOp::Arith { op, rhs }),
        (any_int_pred(), -2i64..64).prop_map(|(pred, rhs)| PairOp::CmpInt { pred, rhs }),
        (ptr_pred(), 0usize..4, 0usize..4)
            .prop_map(|(pred, lhs, rhs)| PairOp::CmpPtr { pred, lhs, rhs }),
        (any::<bool>(), 0usize..4, 0usize..4)
            .prop_map(|(cond, lhs, rhs)| PairOp::Select { cond, lhs, rhs }),
        (any::<bool>(), 0usize..3, -2i64..6)
            .prop_map(|(inbounds, ptr, idx)| PairOp::Gep { inbounds, ptr, idx }),
        (0usize..3, 0usize..3).prop_map(|(lhs, rhs)| PairOp::Psub { lhs, rhs }),
        (0usize..3).prop_map(|ptr| PairOp::PtrToInt { ptr }),
        prop::option::of(0i64..128).prop_map(|addr| PairOp::IntToPtr { addr }),
        (0usize..3).prop_map(|ptr| PairOp::Bitcast { ptr }),
    ]
}

fn memory_op() -> impl Strategy<Value = PairOp> {
    prop_oneof![
        (0usize..3, any::<bool>()).prop_map(|(ptr, pointer)| PairOp::Load { ptr, pointer }),
        (0usize..3, any::<i32>()).prop_map(|(ptr, val)| PairOp::Store {
            ptr,
            val: i64::from(val)
        }),
        (0i64..=300).prop_map(|count| PairOp::Malloc { count }),
        (1i64..=300).prop_map(|count| PairOp::Alloca { count }),
        (0usize..3).prop_map(|ptr| PairOp::Free { ptr }),
        Just(PairOp::Call),
    ]
}

fn pair_op() -> impl Strategy<Value = PairOp> {
    prop_oneof![value_op(), memory_op()]
}

fn emit(fb: &mut FunctionBuilder, op: &PairOp, blocks: &[Reg], addr: Reg, callee: FunctionId) {
    let i32ptr = Ty::ptr(Ty::i32());
    let block = |i: usize| Operand::Reg(blocks[i]);
    let nullable = |i: usize| blocks.get(i).map_or(Operand::null(), |r| Operand::Reg(*r));
    match op {
        PairOp::Arith { op, rhs } => {
            fb.binop(*op, Ty::i32(), Operand::Reg(addr), Operand::int(32, *rhs)).unwrap();
        }
        PairOp::CmpInt { pred, rhs } => {
            fb.icmp(*pred, Ty::i32(), Operand::Reg(addr), Operand::int(32, *rhs)).unwrap();
        }
        PairOp::CmpPtr { pred, lhs, rhs } => {
            fb.icmp(*pred, i32ptr, nullable(*lhs), nullable(*rhs)).unwrap();
        }
        PairOp::Select { cond, lhs, rhs } => {
            let cond = Operand::int(1, i64::from(*cond));
            fb.select(cond, i32ptr, nullable(*lhs), nullable(*rhs)).unwrap();
        }
        PairOp::Gep { inbounds, ptr, idx } => {
            fb.gep(*inbounds, Ty::i32(), block(*ptr), Operand::int(32, *idx)).unwrap();
        }
        PairOp::Psub { lhs, rhs } => {
            fb.psub(i32ptr, block(*lhs), block(*rhs)).unwrap();
        }
        PairOp::PtrToInt { ptr } => {
            fb.ptrtoint(block(*ptr), Ty::i32()).unwrap();
        }
        PairOp::IntToPtr { addr: constant } => {
            let val = constant.map_or(Operand::Reg(addr), |a| Operand::int(32, a));
            fb.inttoptr(val, i32ptr).unwrap();
        }
        PairOp::Bitcast { ptr } => {
            fb.bitcast(i32ptr, block(*ptr), Ty::ptr(Ty::i8())).unwrap();
        }
        PairOp::Load { pointer: true, .. } => {
            fb.load(i32ptr, block(1)).unwrap();
        }
        PairOp::Load { ptr, .. } => {
            fb.load(Ty::i32(), block(*ptr)).unwrap();
        }
        PairOp::Store { ptr, val } => {
            fb.store(Ty::i32(), Operand::int(32, *val), block(*ptr)).unwrap();
        }
        PairOp::Malloc { count } => {
            fb.malloc(Ty::i32(), Operand::int(32, *count)).unwrap();
        }
        PairOp::Alloca { count } => {
            fb.alloca(Ty::i32(), Operand::int(32, *count)).unwrap();
        }
        PairOp::Free { ptr } => {
            fb.free(block(*ptr)).unwrap();
        }
        PairOp::Call => {
            fb.call(callee, vec![]).unwrap();
        }
    }
}

/// `main` runs the prefix, then the pair, then returns 0. Also returns the
/// length of the prefix.
fn reorder_program(prefix: &Prefix, pair: [&PairOp; 2]) -> (Module, FunctionId, usize) {
    let mut module = Module::new();
    let mut zero = FunctionBuilder::new("zero", Ty::i32());
    zero.block("entry");
    zero.ret(Operand::int(32, 0)).unwrap();
    let callee = module.add_function(zero.build().unwrap());

    let mut fb = FunctionBuilder::new("main", Ty::i32());
    fb.block("entry");
    let blocks: Vec<Reg> = prefix
        .counts
        .iter()
        .map(|&n| fb.malloc(Ty::i32(), Operand::int(32, n)).unwrap())
        .collect();
    let addr = fb.ptrtoint(Operand::Reg(blocks[0]), Ty::i32()).unwrap();
    for &(k, v) in &prefix.stores {
        fb.store(Ty::i32(), Operand::int(32, v), Operand::Reg(blocks[k])).unwrap();
    }
    // The second block doubles as a slot holding the first block's address.
    fb.store(Ty::i32(), Operand::Reg(addr), Operand::Reg(blocks[1])).unwrap();
    let mut len = blocks.len() + prefix.stores.len() + 2;
    for (k, _) in prefix.freed.iter().enumerate().filter(|(_, f)| **f) {
        fb.free(Operand::Reg(blocks[k])).unwrap();
        len += 1;
    }

    for op in pair {
        emit(&mut fb, op, &blocks, addr, callee);
    }
    fb.ret(Operand::int(32, 0)).unwrap();
    let main = module.add_function(fb.build().unwrap());
    (module, main, len)
}

fn single(def: FunctionDef) -> (Module, Config) {
    let mut module = Module::new();
    let main = module.add_function(def);
    let config = Config::new(&module, main, vec![], ExecOptions::default().mem_config()).unwrap();
    (module, config)
}

fn expected(op: BinOp, w: u32, a: u64, b: u64) -> u64 {
    let v = match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::Mul => a.wrapping_mul(b),
        BinOp::And => a & b,
        BinOp::Or => a | b,
        _ => a ^ b,
    };
    v & mask(w)
}

// =============================================================================
// MEMORY FUZZ TESTS
// =============================================================================

proptest! {
    /// Live reservations never overlap and never contain address zero
    #[test]
    fn allocation_keeps_invariants(ops in prop::collection::vec(mem_op(), 1..40)) {
        let config = MemConfig { memsz: 4096, ..MemConfig::default() };
        let mut mem = Memory::new(config).unwrap();
        let mut ids: Vec<BlockId> = Vec::new();
        let mut seen = HashSet::new();

        for op in ops {
            match op {
                MemOp::Alloc { size, pick, stack } => {
                    let candidates = mem.propose_candidates(size, config.sysalign, config.max_candidates);
                    if candidates.is_empty() {
                        continue;
                    }
                    let pick = pick % candidates.len();
                    let kind = if stack { BlockKind::Stack } else { BlockKind::Heap };
                    let before = mem.fresh_id();
                    let id = mem
                        .allocate(AllocRequest::new(kind, size, config.sysalign, candidates).with_pick(pick))
                        .unwrap();
                    prop_assert_eq!(id, before);
                    prop_assert!(seen.insert(id), "block id {} reused", id);
                    ids.push(id);
                }
                MemOp::Free { victim } => {
                    if ids.is_empty() {
                        continue;
                    }
                    let id = ids.remove(victim % ids.len());
                    mem.free(id).unwrap();
                    prop_assert!(mem.free(id).is_err());
                }
            }

            prop_assert!(mem.check_invariants().is_ok());
            let reserved: Vec<_> = mem.live_blocks().flat_map(|b| b.reserved_ranges()).collect();
            prop_assert!(all_disjoint(&reserved));
            prop_assert!(no_empty_range(&reserved));
            prop_assert!(reserved.iter().all(|r| r.start > 0 && r.end() <= config.memsz));
        }
    }

    /// Proposed candidates are aligned, in range and pairwise disjoint
    #[test]
    fn candidates_are_disjoint(sizes in prop::collection::vec(1u64..300, 1..10), next in 1u64..300) {
        let config = MemConfig { memsz: 8192, ..MemConfig::default() };
        let mut mem = Memory::new(config).unwrap();
        for size in sizes {
            let candidates = mem.propose_candidates(size, config.sysalign, config.max_candidates);
            if candidates.is_empty() {
                break;
            }
            mem.allocate(AllocRequest::new(BlockKind::Heap, size, config.sysalign, candidates)).unwrap();
        }

        let proposed = mem.propose_candidates(next, config.sysalign, config.max_candidates);
        prop_assert!(proposed.len() <= config.max_candidates);
        let ranges: Vec<_> = proposed
            .iter()
            .map(|&base| provir::memory::AddrRange::new(base, next))
            .collect();
        prop_assert!(all_disjoint(&ranges));
        for (base, range) in proposed.iter().zip(&ranges) {
            prop_assert_eq!(base % config.sysalign, 0);
            prop_assert!(*base > 0 && range.end() <= config.memsz);
            for block in mem.live_blocks() {
                prop_assert!(block.reserved_ranges().all(|r| !r.overlaps(range)));
            }
        }
    }
}

// =============================================================================
// CODEC FUZZ TESTS
// =============================================================================

proptest! {
    /// Integers decode to themselves at their own width
    #[test]
    fn integers_decode_exactly(w in 1u32..=64, bits in any::<u64>()) {
        let value = Value::num(w, bits);
        let ty = Ty::int(w);
        prop_assert_eq!(codec::decode(&codec::encode(&value, &ty), &ty), value);
    }

    /// Overwriting any byte of a stored pointer destroys it
    #[test]
    fn clobbered_pointer_is_poison(offset in 0u64..64, byte in 0usize..4, fill in any::<u8>()) {
        let ty = Ty::ptr(Ty::i8());
        let p = Value::ptr(Pointer::logical(BlockId(3), offset));
        let mut bytes = codec::encode(&p, &ty);
        prop_assert_eq!(codec::decode(&bytes, &ty), p);
        prop_assert_eq!(codec::decode(&bytes, &Ty::i32()), Value::Poison);

        bytes[byte] = Byte::from_u8(fill);
        prop_assert_eq!(codec::decode(&bytes, &ty), Value::Poison);
    }
}

// =============================================================================
// INTERPRETER FUZZ TESTS
// =============================================================================

proptest! {
    /// Arithmetic matches wrapping machine arithmetic, deterministically
    #[test]
    fn arithmetic_matches_machine(op in arith_op(), w in width(), a in any::<u64>(), b in any::<u64>()) {
        let ty = Ty::int(w);
        let mut fb = FunctionBuilder::new("main", ty.clone());
        fb.block("entry");
        let r = fb.binop(op, ty, Operand::int(w, a as i64), Operand::int(w, b as i64)).unwrap();
        fb.ret(Operand::Reg(r)).unwrap();
        let (module, config) = single(fb.build().unwrap());

        let first = run(&module, &config, &mut FirstFit, 10);
        let second = run(&module, &config, &mut FirstFit, 10);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(first.outcome, Outcome::Finished(Value::num(w, expected(op, w, a, b))));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Two pointers to the same offset of one block always compare equal
    #[test]
    fn same_offset_compares_equal(size in 1i64..32, offset in 0i64..32, freed in any::<bool>()) {
        let offset = offset % (size + 1);
        let i8ptr = Ty::ptr(Ty::i8());
        let mut fb = FunctionBuilder::new("main", Ty::i1());
        fb.block("entry");
        let p = fb.malloc(Ty::i8(), Operand::int(32, size)).unwrap();
        let a = fb.gep(true, Ty::i8(), Operand::Reg(p), Operand::int(32, offset)).unwrap();
        let b = fb.gep(false, Ty::i8(), Operand::Reg(p), Operand::int(32, offset)).unwrap();
        if freed {
            fb.free(Operand::Reg(p)).unwrap();
        }
        let c = fb.icmp(ICmpPred::Eq, i8ptr, Operand::Reg(a), Operand::Reg(b)).unwrap();
        fb.ret(Operand::Reg(c)).unwrap();
        let (module, config) = single(fb.build().unwrap());

        let (traces, capped) = explore(&module, &config, 16, 256);
        prop_assert!(!capped);
        prop_assert!(traces.iter().any(|t| t.outcome == Outcome::Finished(Value::bool(true))));
        prop_assert!(traces.iter().all(|t| t.outcome != Outcome::Finished(Value::bool(false))));
    }

    /// Programs that never look at addresses agree under any placement
    #[test]
    fn placement_is_unobservable(
        count in 1i64..8,
        index in 0i64..8,
        stored in any::<i32>(),
        left in policy(),
        right in policy(),
    ) {
        let index = index % count;
        let mut fb = FunctionBuilder::new("main", Ty::i32());
        fb.block("entry");
        let pad = fb.alloca(Ty::i8(), Operand::int(32, 3)).unwrap();
        let p = fb.malloc(Ty::i32(), Operand::int(32, count)).unwrap();
        let q = fb.gep(true, Ty::i32(), Operand::Reg(p), Operand::int(32, index)).unwrap();
        fb.store(Ty::i32(), Operand::int(32, i64::from(stored)), Operand::Reg(q)).unwrap();
        fb.store(Ty::i8(), Operand::int(8, 1), Operand::Reg(pad)).unwrap();
        let v = fb.load(Ty::i32(), Operand::Reg(q)).unwrap();
        fb.free(Operand::Reg(p)).unwrap();
        fb.ret(Operand::Reg(v)).unwrap();
        let (module, config) = single(fb.build().unwrap());

        let verdict = compare(&module, &config, (left, right), &mut FirstFit, 100);
        prop_assert!(verdict.is_equivalent(), "{:?}", verdict);
    }
}

// =============================================================================
// REORDERING FUZZ TESTS
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// A swap approved by the commute table never adds behavior
    #[test]
    fn approved_swaps_refine(prefix in prefix(), first in pair_op(), second in pair_op()) {
        let (module, main, len) = reorder_program(&prefix, [&first, &second]);
        let opts = ExecOptions::default().with_memsz(1024);
        let config = Config::new(&module, main, vec![], opts.mem_config()).unwrap();
        let state = match nstep(&module, &config, len, &mut FirstFit).outcome {
            Outcome::Running(state) => state,
            other => {
                return Err(TestCaseError::fail(format!("prefix stopped with {:?}", other)));
            }
        };
        prop_assert_eq!(state.pc(), Some(Pc::new(0, len)));

        let report = validate_swap(&module, &state, 4096).unwrap();
        prop_assert!(!report.capped);
        if report.verdict.is_valid() {
            prop_assert!(
                report.refines,
                "{:?}; {:?} approved but not a refinement",
                first,
                second
            );
        }
    }
}

// =============================================================================
// SPECIFIC REGRESSION TESTS
// =============================================================================

#[test]
fn regression_single_byte_blocks_stay_disjoint() {
    let config = MemConfig {
        memsz: 64,
        sysalign: 1,
        max_candidates: 8,
    };
    let mut mem = Memory::new(config).unwrap();
    let candidates = mem.propose_candidates(1, 1, 8);
    assert_eq!(candidates, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    mem.allocate(AllocRequest::new(BlockKind::Heap, 1, 1, candidates).with_pick(7))
        .unwrap();
    assert_eq!(mem.propose_candidates(1, 1, 2), vec![9, 10]);
}
