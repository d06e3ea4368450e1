//! Reordering of adjacent instructions
//!
//! Swapping `i1; i2` into `i2; i1` is allowed when there is no data
//! dependency between them, the pair is well-formed, and the ordered pair of
//! instruction categories is in the commute table. A division never moves
//! ahead of an `alloca`, which can run out of memory without a null result.
//! [`validate_swap`] checks a proposed swap by exploring both orders from a
//! concrete state.

use crate::ir::{FunctionDef, InstrCategory, Instruction, ModuleTable, Overlay, Pc, Reg};
use crate::runtime::{nstep_all, refines, Config, Trace};
use crate::{Error, Result};
use std::fmt;

/// Result of the static swap check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderVerdict {
    /// The swap preserves behavior
    Valid,
    /// The second instruction reads what the first defines
    DataDependency,
    /// The pair defines a register twice or reads its own result
    IllFormed,
    /// The categories do not commute in this order
    NotCommutable {
        /// Category of the first instruction
        first: InstrCategory,
        /// Category of the second instruction
        second: InstrCategory,
    },
    /// A trapping instruction would overtake an `alloca`
    MayTrap,
}

impl ReorderVerdict {
    /// Returns true for [`ReorderVerdict::Valid`]
    pub fn is_valid(&self) -> bool {
        matches!(self, ReorderVerdict::Valid)
    }
}

impl fmt::Display for ReorderVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReorderVerdict::Valid => write!(f, "valid"),
            ReorderVerdict::DataDependency => write!(f, "data dependency"),
            ReorderVerdict::IllFormed => write!(f, "ill-formed pair"),
            ReorderVerdict::NotCommutable { first, second } => {
                write!(f, "{:?} does not commute with a following {:?}", first, second)
            }
            ReorderVerdict::MayTrap => write!(f, "trapping instruction ahead of alloca"),
        }
    }
}

/// Returns true if `i2` reads the register `i1` defines
pub fn has_data_dependency(i1: &Instruction, i2: &Instruction) -> bool {
    i1.def().is_some_and(|d| i2.uses().contains(&d))
}

/// Returns true if the pair defines distinct registers, neither reads its
/// own result, and `i1` does not read what `i2` defines
pub fn program_wellformed(i1: &Instruction, i2: &Instruction) -> bool {
    let (d1, d2) = (i1.def(), i2.def());
    let distinct = match (d1, d2) {
        (Some(a), Some(b)) => a != b,
        _ => true,
    };
    let self_use = |i: &Instruction, d: Option<Reg>| d.is_some_and(|d| i.uses().contains(&d));
    distinct && !self_use(i1, d1) && !self_use(i2, d2) && !self_use(i1, d2)
}

/// May `first; second` be executed as `second; first`?
///
/// Pure computations commute with everything but calls. Instructions that
/// observe block liveness (`inttoptr`, pointer comparisons) do not move
/// across allocation changes, except that a pointer comparison may move
/// ahead of a `free`. Memory accesses may move ahead of an allocation and
/// after a `free`, never the other way round.
pub fn may_commute(first: InstrCategory, second: InstrCategory) -> bool {
    use InstrCategory::*;

    let pure = |c: InstrCategory| {
        matches!(
            c,
            BinOp | ICmpInt | Select | Gep | Psub | PtrToInt | Bitcast
        )
    };
    let alloc = |c: InstrCategory| matches!(c, Malloc | Alloca);

    match (first, second) {
        (Call, _) | (_, Call) => false,
        (a, b) if pure(a) || pure(b) => true,

        (IntToPtr, b) | (b, IntToPtr) if alloc(b) || b == Free => false,
        (IntToPtr, _) | (_, IntToPtr) => true,

        (Free, ICmpPtr) => true,
        (ICmpPtr, Free) => false,
        (ICmpPtr, _) | (_, ICmpPtr) => true,

        (Load, Load) => true,
        (Load, Store) | (Store, Load) | (Store, Store) => false,

        (Load, b) | (Store, b) if alloc(b) => true,
        (a, Load) | (a, Store) if alloc(a) => false,
        (Free, Load) | (Free, Store) => true,
        (Load, Free) | (Store, Free) => false,

        (Free, Free) => true,
        _ => false,
    }
}

/// Instructions that can go wrong on well-typed operands without touching
/// memory
fn may_trap(inst: &Instruction) -> bool {
    matches!(inst, Instruction::BinOp { op, .. } if op.is_division())
}

/// Static check of swapping `i1; i2`
pub fn check_swap(i1: &Instruction, i2: &Instruction) -> ReorderVerdict {
    if !program_wellformed(i1, i2) {
        return ReorderVerdict::IllFormed;
    }
    if has_data_dependency(i1, i2) {
        return ReorderVerdict::DataDependency;
    }
    let (first, second) = (i1.category(), i2.category());
    if !may_commute(first, second) {
        return ReorderVerdict::NotCommutable { first, second };
    }
    if first == InstrCategory::Alloca && may_trap(i2) {
        return ReorderVerdict::MayTrap;
    }
    ReorderVerdict::Valid
}

/// Program counters of every adjacent pair `check_swap` accepts
pub fn reorderable_pairs(func: &FunctionDef) -> Vec<Pc> {
    let mut pairs = Vec::new();
    for (b, block) in func.blocks.iter().enumerate() {
        for (i, pair) in block.instructions.windows(2).enumerate() {
            if check_swap(&pair[0], &pair[1]).is_valid() {
                pairs.push(Pc::new(b, i));
            }
        }
    }
    pairs
}

/// Copy of `func` with the instructions at `pc` and the one after swapped
pub fn swap_at(func: &FunctionDef, pc: Pc) -> Option<FunctionDef> {
    let block = func.blocks.get(pc.block)?;
    if pc.inst + 1 >= block.instructions.len() {
        return None;
    }
    let mut swapped = func.clone();
    swapped.blocks[pc.block].instructions.swap(pc.inst, pc.inst + 1);
    Some(swapped)
}

/// Outcome of checking a swap against concrete executions
#[derive(Debug, Clone)]
pub struct ReorderReport {
    /// Static verdict for the pair
    pub verdict: ReorderVerdict,
    /// Two-step traces of the original order
    pub source: Vec<Trace>,
    /// Two-step traces of the swapped order
    pub target: Vec<Trace>,
    /// Every swapped behavior is allowed by the original order
    pub refines: bool,
    /// The behaviors coincide in both directions
    pub equivalent: bool,
    /// Exploration stopped at the trace limit
    pub capped: bool,
}

/// Explores both orders of the two instructions at the current pc.
///
/// The innermost frame must be positioned at the first instruction of an
/// adjacent pair.
pub fn validate_swap<M: ModuleTable + ?Sized>(
    module: &M,
    config: &Config,
    limit: usize,
) -> Result<ReorderReport> {
    let pc = config
        .pc()
        .ok_or_else(|| Error::ill_formed("empty call stack"))?;
    let fid = config
        .current_function()
        .ok_or_else(|| Error::ill_formed("frame not in call table"))?;
    let func = module
        .lookup_function(fid)
        .ok_or(Error::UnknownFunction(fid))?;
    let next = Pc::new(pc.block, pc.inst + 1);
    let (i1, i2) = match (func.instruction_at(pc), func.instruction_at(next)) {
        (Some(i1), Some(i2)) => (i1, i2),
        _ => return Err(Error::NoInstructionPair { pc }),
    };
    let verdict = check_swap(i1, i2);
    let swapped = swap_at(func, pc).ok_or(Error::NoInstructionPair { pc })?;

    let (source, source_capped) = nstep_all(module, config, 2, limit);
    let overlay = Overlay::new(module, fid, swapped);
    let (target, target_capped) = nstep_all(&overlay, config, 2, limit);

    let forward = target.iter().all(|t| refines(t, &source));
    let backward = source.iter().all(|s| refines(s, &target));
    tracing::debug!(
        "swap at {}: {} (refines: {}, equivalent: {})",
        pc,
        verdict,
        forward,
        forward && backward
    );

    Ok(ReorderReport {
        verdict,
        source,
        target,
        refines: forward,
        equivalent: forward && backward,
        capped: source_capped || target_capped,
    })
}
