//! Tests for instruction reordering: the static check and dynamic
//! validation of a swap from a concrete state

use provir::ir::{
    BinOp, FunctionBuilder, FunctionDef, FunctionId, ICmpPred, InstrCategory, Module, Operand, Pc, Reg, Ty,
};
use provir::runtime::{nstep, run, Config, FirstFit, Outcome};
use provir::transform::{reorderable_pairs, swap_at, validate_swap, ReorderVerdict};
use provir::{Error, ExecOptions, Value};

fn reg(r: Reg) -> Operand {
    Operand::Reg(r)
}

fn options() -> ExecOptions {
    ExecOptions::default().with_memsz(1024)
}

fn module_of(def: FunctionDef) -> (Module, FunctionId) {
    let mut module = Module::new();
    let id = module.add_function(def);
    (module, id)
}

/// Configuration after executing the first `n` steps with first-fit choices
fn advanced(module: &Module, main: FunctionId, n: usize) -> Config {
    let config = Config::new(module, main, vec![], options().mem_config()).unwrap();
    match nstep(module, &config, n, &mut FirstFit).outcome {
        Outcome::Running(state) => *state,
        other => panic!("expected a running state, got {:?}", other),
    }
}

/// `p = malloc i8 8; q = gep i8 p, 4; r = malloc i32 4; d = psub i8* p, q; ret d`
fn pointer_difference() -> FunctionDef {
    let i8ptr = Ty::ptr(Ty::i8());
    let mut fb = FunctionBuilder::new("main", Ty::i32());
    fb.block("entry");
    let p = fb.malloc(Ty::i8(), Operand::int(32, 8)).unwrap();
    let q = fb.gep(true, Ty::i8(), reg(p), Operand::int(32, 4)).unwrap();
    fb.malloc(Ty::i32(), Operand::int(32, 4)).unwrap();
    let d = fb.psub(i8ptr, reg(p), reg(q)).unwrap();
    fb.ret(reg(d)).unwrap();
    fb.build().unwrap()
}

/// Two live blocks followed by `pair`
fn two_blocks(pair: impl FnOnce(&mut FunctionBuilder, Reg, Reg) -> Reg) -> FunctionDef {
    let mut fb = FunctionBuilder::new("main", Ty::i1());
    fb.block("entry");
    let p = fb.malloc(Ty::i32(), Operand::int(32, 1)).unwrap();
    let q = fb.malloc(Ty::i32(), Operand::int(32, 1)).unwrap();
    let result = pair(&mut fb, p, q);
    fb.ret(reg(result)).unwrap();
    fb.build().unwrap()
}

// ====================
// Static Check
// ====================

#[test]
fn test_reorderable_pairs() {
    let def = pointer_difference();
    // The first malloc feeds the gep; every later pair is independent.
    assert_eq!(reorderable_pairs(&def), vec![Pc::new(0, 1), Pc::new(0, 2)]);
}

#[test]
fn test_swap_at_bounds() {
    let def = pointer_difference();
    assert!(swap_at(&def, Pc::new(0, 3)).is_none());
    assert!(swap_at(&def, Pc::new(1, 0)).is_none());

    let swapped = swap_at(&def, Pc::new(0, 2)).unwrap();
    assert_eq!(
        swapped.blocks[0].instructions[2].category(),
        InstrCategory::Psub
    );
    assert_eq!(
        swapped.blocks[0].instructions[3].category(),
        InstrCategory::Malloc
    );
}

// ====================
// Dynamic Validation
// ====================

#[test]
fn test_pointer_difference_survives_swap() {
    let def = pointer_difference();
    let swapped = swap_at(&def, Pc::new(0, 2)).unwrap();

    for func in [def, swapped] {
        let (module, main) = module_of(func);
        let config = Config::new(&module, main, vec![], options().mem_config()).unwrap();
        let trace = run(&module, &config, &mut FirstFit, 100);
        assert_eq!(trace.outcome, Outcome::Finished(Value::from_i64(32, -4)));
    }
}

#[test]
fn test_validate_swap_malloc_psub() {
    let (module, main) = module_of(pointer_difference());
    let config = advanced(&module, main, 2);
    assert_eq!(config.pc(), Some(Pc::new(0, 2)));

    let report = validate_swap(&module, &config, 1024).unwrap();
    assert_eq!(report.verdict, ReorderVerdict::Valid);
    assert!(report.refines);
    assert!(report.equivalent);
    assert!(!report.capped);
    // null plus every proposed placement of the moved allocation
    assert_eq!(report.source.len(), report.target.len());
    assert_eq!(report.source.len(), 1 + options().max_candidates);
}

#[test]
fn test_compare_may_move_ahead_of_free() {
    let def = two_blocks(|fb, p, q| {
        fb.free(reg(p)).unwrap();
        fb.icmp(ICmpPred::Eq, Ty::ptr(Ty::i32()), reg(p), reg(q)).unwrap()
    });
    let (module, main) = module_of(def);
    let config = advanced(&module, main, 2);

    let report = validate_swap(&module, &config, 1024).unwrap();
    assert_eq!(report.verdict, ReorderVerdict::Valid);
    // The dangling comparison may go either way; the moved one cannot.
    assert_eq!(report.source.len(), 2);
    assert_eq!(report.target.len(), 1);
    assert!(report.refines);
    assert!(!report.equivalent);
}

#[test]
fn test_compare_may_not_move_after_free() {
    let def = two_blocks(|fb, p, q| {
        let c = fb.icmp(ICmpPred::Eq, Ty::ptr(Ty::i32()), reg(p), reg(q)).unwrap();
        fb.free(reg(p)).unwrap();
        c
    });
    let (module, main) = module_of(def);
    let config = advanced(&module, main, 2);

    let report = validate_swap(&module, &config, 1024).unwrap();
    assert_eq!(
        report.verdict,
        ReorderVerdict::NotCommutable {
            first: InstrCategory::ICmpPtr,
            second: InstrCategory::Free,
        }
    );
    assert!(!report.refines);
}

#[test]
fn test_load_store_same_address_rejected() {
    let mut fb = FunctionBuilder::new("main", Ty::i32());
    fb.block("entry");
    let p = fb.malloc(Ty::i32(), Operand::int(32, 1)).unwrap();
    fb.store(Ty::i32(), Operand::int(32, 0), reg(p)).unwrap();
    let v = fb.load(Ty::i32(), reg(p)).unwrap();
    fb.store(Ty::i32(), Operand::int(32, 5), reg(p)).unwrap();
    fb.ret(reg(v)).unwrap();
    let (module, main) = module_of(fb.build().unwrap());
    let config = advanced(&module, main, 2);

    let report = validate_swap(&module, &config, 1024).unwrap();
    assert!(!report.verdict.is_valid());
    assert!(!report.refines);
    assert!(!report.equivalent);
}

#[test]
fn test_stores_to_distinct_blocks_commute_dynamically() {
    let def = two_blocks(|fb, p, q| {
        fb.store(Ty::i32(), Operand::int(32, 1), reg(p)).unwrap();
        fb.store(Ty::i32(), Operand::int(32, 2), reg(q)).unwrap();
        fb.icmp(ICmpPred::Eq, Ty::ptr(Ty::i32()), reg(p), reg(q)).unwrap()
    });
    let (module, main) = module_of(def);
    let config = advanced(&module, main, 2);

    let report = validate_swap(&module, &config, 1024).unwrap();
    // The table is conservative about store pairs.
    assert!(!report.verdict.is_valid());
    assert!(report.equivalent);
}

/// `slot = malloc i32* 1; store i32 40, slot; x = load i32*, slot; malloc i32 1; ret x`
fn load_before_malloc() -> FunctionDef {
    let mut fb = FunctionBuilder::new("main", Ty::ptr(Ty::i32()));
    fb.block("entry");
    let slot = fb.malloc(Ty::ptr(Ty::i32()), Operand::int(32, 1)).unwrap();
    fb.store(Ty::i32(), Operand::int(32, 40), reg(slot)).unwrap();
    let x = fb.load(Ty::ptr(Ty::i32()), reg(slot)).unwrap();
    fb.malloc(Ty::i32(), Operand::int(32, 1)).unwrap();
    fb.ret(reg(x)).unwrap();
    fb.build().unwrap()
}

#[test]
fn test_pointer_load_may_move_after_malloc() {
    let (module, main) = module_of(load_before_malloc());
    let config = advanced(&module, main, 2);
    assert_eq!(config.pc(), Some(Pc::new(0, 2)));

    // One placement of the new block covers address 40.
    let report = validate_swap(&module, &config, 1024).unwrap();
    assert_eq!(report.verdict, ReorderVerdict::Valid);
    assert!(report.refines);
    assert!(report.equivalent);
}

#[test]
fn test_pointer_load_may_move_ahead_of_free() {
    let mut fb = FunctionBuilder::new("main", Ty::ptr(Ty::i32()));
    fb.block("entry");
    let blk = fb.malloc(Ty::i32(), Operand::int(32, 1)).unwrap();
    let slot = fb.malloc(Ty::i32(), Operand::int(32, 1)).unwrap();
    let a = fb.ptrtoint(reg(blk), Ty::i32()).unwrap();
    fb.store(Ty::i32(), reg(a), reg(slot)).unwrap();
    fb.free(reg(blk)).unwrap();
    let x = fb.load(Ty::ptr(Ty::i32()), reg(slot)).unwrap();
    fb.ret(reg(x)).unwrap();
    let (module, main) = module_of(fb.build().unwrap());
    let config = advanced(&module, main, 4);
    assert_eq!(config.pc(), Some(Pc::new(0, 4)));

    let report = validate_swap(&module, &config, 1024).unwrap();
    assert_eq!(report.verdict, ReorderVerdict::Valid);
    assert!(report.refines);
    assert!(report.equivalent);
}

#[test]
fn test_undefined_behavior_is_absorbing() {
    let mut fb = FunctionBuilder::new("main", Ty::i32());
    fb.block("entry");
    let x = fb
        .binop(BinOp::UDiv, Ty::i32(), Operand::int(32, 1), Operand::int(32, 0))
        .unwrap();
    fb.malloc(Ty::i8(), Operand::int(32, 1)).unwrap();
    fb.ret(reg(x)).unwrap();
    let (module, main) = module_of(fb.build().unwrap());
    let config = Config::new(&module, main, vec![], options().mem_config()).unwrap();

    let report = validate_swap(&module, &config, 1024).unwrap();
    assert_eq!(report.source.len(), 1);
    assert!(report.source[0].outcome.goes_wrong());
    // Every placement of the moved allocation still ends in the division.
    assert!(report.target.iter().all(|t| t.outcome.goes_wrong()));
    assert!(report.refines);
    assert!(report.equivalent);
}

#[test]
fn test_division_may_not_overtake_failing_alloca() {
    let mut fb = FunctionBuilder::new("main", Ty::i32());
    fb.block("entry");
    fb.alloca(Ty::i8(), Operand::int(32, 2048)).unwrap();
    let x = fb
        .binop(BinOp::UDiv, Ty::i32(), Operand::int(32, 1), Operand::int(32, 0))
        .unwrap();
    fb.ret(reg(x)).unwrap();
    let (module, main) = module_of(fb.build().unwrap());
    let config = Config::new(&module, main, vec![], options().mem_config()).unwrap();

    let report = validate_swap(&module, &config, 1024).unwrap();
    assert_eq!(report.verdict, ReorderVerdict::MayTrap);
    assert_eq!(report.source.len(), 1);
    assert_eq!(report.source[0].outcome, Outcome::OutOfMemory);
    assert!(report.target.iter().all(|t| t.outcome.goes_wrong()));
    assert!(!report.refines);
}

#[test]
fn test_validate_swap_needs_a_pair() {
    let mut fb = FunctionBuilder::new("main", Ty::i32());
    fb.block("entry");
    fb.malloc(Ty::i8(), Operand::int(32, 1)).unwrap();
    fb.ret(Operand::int(32, 0)).unwrap();
    let (module, main) = module_of(fb.build().unwrap());
    let config = Config::new(&module, main, vec![], options().mem_config()).unwrap();

    assert!(matches!(
        validate_swap(&module, &config, 1024),
        Err(Error::NoInstructionPair { .. })
    ));
}
