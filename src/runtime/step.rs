//! Small-step interpreter
//!
//! [`step`] executes the code at the innermost frame's program counter and
//! returns the successor configuration or a terminal outcome. The input
//! configuration is never modified. Where several successors are legal the
//! oracle picks one; [`successors`] enumerates all of them.

use super::oracle::{Choice, ChoiceOracle, ChoicePoint, FirstFit, Recording, Scripted};
use super::state::{CallId, Config, Frame};
use crate::error::{StuckReason, UndefinedBehavior};
use crate::ir::{
    BinOp, CodeAt, Constant, FunctionDef, FunctionId, ICmpPred, Instruction, ModuleTable,
    Operand, Pc, Reg, Terminator, Ty, MAX_INT_BITS, PTR_BITS,
};
use crate::memory::{codec, AllocRequest, BlockId, BlockKind, MemError, Memory};
use crate::value::{sign_extend, Pointer, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Observable event produced by a step
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Event {
    /// Nothing observable happened
    Silent,
}

impl Event {
    /// Returns true if the event belongs in a trace
    pub fn is_observable(&self) -> bool {
        !matches!(self, Event::Silent)
    }
}

/// Result of one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    /// The step completed
    Success(Event, Box<Config>),
    /// An allocation could not be placed
    OutOfMemory,
    /// Undefined behavior
    GoesWrong(UndefinedBehavior),
    /// The entry function returned
    Finished(Value),
    /// The configuration is ill-formed
    Stuck(StuckReason),
}

/// Why a step did not produce a successor
#[derive(Debug)]
enum Halt {
    Finished(Value),
    OutOfMemory,
    Wrong(UndefinedBehavior),
    Stuck(StuckReason),
}

impl From<UndefinedBehavior> for Halt {
    fn from(ub: UndefinedBehavior) -> Self {
        Halt::Wrong(ub)
    }
}

impl From<StuckReason> for Halt {
    fn from(reason: StuckReason) -> Self {
        Halt::Stuck(reason)
    }
}

impl From<MemError> for Halt {
    fn from(err: MemError) -> Self {
        Halt::Stuck(StuckReason::Memory(err))
    }
}

type Exec<T> = std::result::Result<T, Halt>;

fn type_mismatch(msg: impl Into<String>) -> Halt {
    Halt::Wrong(UndefinedBehavior::TypeMismatch(msg.into()))
}

/// Executes one instruction or terminator
pub fn step<M: ModuleTable + ?Sized>(
    module: &M,
    config: &Config,
    oracle: &mut dyn ChoiceOracle,
) -> StepResult {
    let mut next = config.clone();
    match exec(module, &mut next, oracle) {
        Ok(event) => StepResult::Success(event, Box::new(next)),
        Err(Halt::Finished(v)) => StepResult::Finished(v),
        Err(Halt::OutOfMemory) => StepResult::OutOfMemory,
        Err(Halt::Wrong(ub)) => {
            tracing::debug!("goes wrong: {}", ub);
            StepResult::GoesWrong(ub)
        }
        Err(Halt::Stuck(reason)) => StepResult::Stuck(reason),
    }
}

/// Every legal result of one step, one per answer to its choice point
pub fn successors<M: ModuleTable + ?Sized>(module: &M, config: &Config) -> Vec<StepResult> {
    let mut probe = Recording::new(FirstFit);
    let first = step(module, config, &mut probe);
    let point = match probe.log().first() {
        Some((point, _)) => point.clone(),
        None => return vec![first],
    };

    point
        .options()
        .into_iter()
        .map(|choice| step(module, config, &mut Scripted::new([choice])))
        .collect()
}

fn exec<M: ModuleTable + ?Sized>(
    module: &M,
    cfg: &mut Config,
    oracle: &mut dyn ChoiceOracle,
) -> Exec<Event> {
    let frame = cfg.top().ok_or(StuckReason::EmptyStack)?;
    let fid = *cfg
        .call_table
        .get(&frame.call_id)
        .ok_or(StuckReason::UnknownCall)?;
    let func = module
        .lookup_function(fid)
        .ok_or(StuckReason::UnknownFunction(fid))?;
    let pc = frame.pc;

    match func.code_at(pc).ok_or(StuckReason::InvalidPc(pc))? {
        CodeAt::Instruction(inst) => {
            tracing::trace!("{} {} {}: {}", frame.call_id, fid, pc, inst);
            exec_instruction(module, cfg, inst, pc, oracle)?;
        }
        CodeAt::Terminator(term) => {
            tracing::trace!("{} {} {}: {}", frame.call_id, fid, pc, term);
            exec_terminator(func, cfg, term, pc)?;
        }
    }
    Ok(Event::Silent)
}

fn top_mut(cfg: &mut Config) -> Exec<&mut Frame> {
    Ok(cfg.top_mut().ok_or(StuckReason::EmptyStack)?)
}

fn eval(cfg: &Config, op: &Operand) -> Exec<Value> {
    match op {
        Operand::Const(Constant::Int { width, bits }) => Ok(Value::num(*width, *bits)),
        Operand::Const(Constant::Null) => Ok(Value::null()),
        Operand::Const(Constant::Poison) => Ok(Value::Poison),
        Operand::Reg(reg) => {
            let frame = cfg.top().ok_or(StuckReason::EmptyStack)?;
            Ok(frame
                .read(*reg)
                .cloned()
                .ok_or(StuckReason::UndefinedRegister(*reg))?)
        }
    }
}

fn int_width(ty: &Ty) -> Exec<u32> {
    match ty {
        Ty::Int(w) if (1..=MAX_INT_BITS).contains(w) => Ok(*w),
        _ => Err(type_mismatch(format!("expected an integer type, got {}", ty))),
    }
}

/// Integer operand of width `w`; `None` for poison
fn int_operand(v: &Value, w: u32) -> Exec<Option<u64>> {
    match v {
        Value::Num { width, bits } if *width == w => Ok(Some(*bits)),
        Value::Poison => Ok(None),
        other => Err(type_mismatch(format!("expected i{}, got {}", w, other))),
    }
}

/// Pointer operand; `None` for poison
fn ptr_operand(v: Value) -> Exec<Option<Pointer>> {
    match v {
        Value::Ptr(p) => Ok(Some(p)),
        Value::Poison => Ok(None),
        other => Err(type_mismatch(format!("expected a pointer, got {}", other))),
    }
}

fn exec_instruction<M: ModuleTable + ?Sized>(
    module: &M,
    cfg: &mut Config,
    inst: &Instruction,
    pc: Pc,
    oracle: &mut dyn ChoiceOracle,
) -> Exec<()> {
    let result = match inst {
        Instruction::BinOp {
            op, ty, lhs, rhs, ..
        } => {
            let w = int_width(ty)?;
            let l = int_operand(&eval(cfg, lhs)?, w)?;
            let r = int_operand(&eval(cfg, rhs)?, w)?;
            Some(binop(*op, w, l, r)?)
        }
        Instruction::ICmp {
            pred, ty, lhs, rhs, ..
        } => {
            let l = eval(cfg, lhs)?;
            let r = eval(cfg, rhs)?;
            Some(match ty {
                Ty::Int(_) => {
                    let w = int_width(ty)?;
                    icmp_int(*pred, w, int_operand(&l, w)?, int_operand(&r, w)?)
                }
                Ty::Ptr(_) => icmp_ptr(&cfg.memory, *pred, l, r, oracle)?,
            })
        }
        Instruction::Select {
            cond,
            ty,
            on_true,
            on_false,
            ..
        } => {
            let c = int_operand(&eval(cfg, cond)?, 1)?;
            let t = eval(cfg, on_true)?;
            let f = eval(cfg, on_false)?;
            if !t.has_type(ty) || !f.has_type(ty) {
                return Err(type_mismatch(format!("select arms are not {}", ty)));
            }
            Some(match c {
                None => Value::Poison,
                Some(1) => t,
                Some(_) => f,
            })
        }
        Instruction::Gep {
            inbounds,
            ty,
            ptr,
            idx,
            ..
        } => {
            let p = ptr_operand(eval(cfg, ptr)?)?;
            let i = match eval(cfg, idx)? {
                Value::Num { width, bits } => Some(sign_extend(bits, width)),
                Value::Poison => None,
                other => return Err(type_mismatch(format!("gep index {}", other))),
            };
            Some(match (p, i) {
                (Some(p), Some(i)) => {
                    let delta = i128::from(i) * i128::from(ty.size_of());
                    gep(&cfg.memory, p, delta, *inbounds)
                }
                _ => Value::Poison,
            })
        }
        Instruction::Psub { ty, lhs, rhs, .. } => {
            let elem = ty
                .pointee()
                .ok_or_else(|| type_mismatch(format!("psub on non-pointer type {}", ty)))?;
            let l = ptr_operand(eval(cfg, lhs)?)?;
            let r = ptr_operand(eval(cfg, rhs)?)?;
            Some(match (l, r) {
                (Some(l), Some(r)) => psub(&cfg.memory, &l, &r, elem.size_of()),
                _ => Value::Poison,
            })
        }
        Instruction::PtrToInt { ptr, ty, .. } => {
            let w = int_width(ty)?;
            Some(match ptr_operand(eval(cfg, ptr)?)? {
                Some(p) => Value::num(w, address(&cfg.memory, &p)?),
                None => Value::Poison,
            })
        }
        Instruction::IntToPtr { val, ty, .. } => {
            if !ty.is_ptr() {
                return Err(type_mismatch(format!("inttoptr to {}", ty)));
            }
            Some(match eval(cfg, val)? {
                Value::Num { bits, .. } => int_to_ptr(&cfg.memory, bits),
                Value::Poison => Value::Poison,
                other => return Err(type_mismatch(format!("inttoptr of {}", other))),
            })
        }
        Instruction::Bitcast { from, val, to, .. } => {
            let v = eval(cfg, val)?;
            let compatible = match (from, to) {
                (Ty::Int(a), Ty::Int(b)) => a == b,
                (Ty::Ptr(_), Ty::Ptr(_)) => true,
                _ => false,
            };
            if !compatible || !v.has_type(from) {
                return Err(type_mismatch(format!("bitcast {} {} to {}", from, v, to)));
            }
            Some(v)
        }
        Instruction::Load { ty, ptr, .. } => {
            let p = eval(cfg, ptr)?;
            let (block, offset) = resolve(&cfg.memory, p, ty.size_of())?;
            let bytes = cfg.memory.read(block, offset, ty.size_of())?;
            Some(match codec::decode(&bytes, ty) {
                Value::Ptr(Pointer::Physical { addr, .. }) => loaded_ptr(&cfg.memory, addr),
                v => v,
            })
        }
        Instruction::Store { ty, val, ptr } => {
            let v = eval(cfg, val)?;
            if !v.has_type(ty) {
                return Err(type_mismatch(format!("store of {} as {}", v, ty)));
            }
            let p = eval(cfg, ptr)?;
            let (block, offset) = resolve(&cfg.memory, p, ty.size_of())?;
            cfg.memory.write(block, offset, &codec::encode(&v, ty))?;
            None
        }
        Instruction::Malloc { ty, count, .. } => {
            let size = alloc_size(cfg, ty, count)?;
            Some(malloc(&mut cfg.memory, size, oracle)?)
        }
        Instruction::Alloca { ty, count, .. } => {
            let size = alloc_size(cfg, ty, count)?.map(|s| s.max(1));
            let block = alloca(&mut cfg.memory, size, oracle)?;
            top_mut(cfg)?.stack_blocks.push(block);
            Some(Value::ptr(Pointer::logical(block, 0)))
        }
        Instruction::Free { ptr } => {
            let p = eval(cfg, ptr)?;
            free(&mut cfg.memory, p)?;
            None
        }
        Instruction::Call { dst, callee, args } => {
            return call(module, cfg, *dst, *callee, args, pc);
        }
    };

    let frame = top_mut(cfg)?;
    if let (Some(dst), Some(value)) = (inst.def(), result) {
        frame.registers.insert(dst, value);
    }
    frame.pc = Pc::new(pc.block, pc.inst + 1);
    Ok(())
}

fn binop(op: BinOp, w: u32, l: Option<u64>, r: Option<u64>) -> Exec<Value> {
    if op.is_division() {
        let r = r.ok_or(UndefinedBehavior::PoisonDivisor)?;
        if r == 0 {
            return Err(UndefinedBehavior::DivisionByZero.into());
        }
        let Some(l) = l else {
            return Ok(Value::Poison);
        };
        let (ls, rs) = (sign_extend(l, w), sign_extend(r, w));
        let min = sign_extend(1u64 << (w - 1), w);
        if matches!(op, BinOp::SDiv | BinOp::SRem) && ls == min && rs == -1 {
            return Err(UndefinedBehavior::DivisionOverflow.into());
        }
        return Ok(match op {
            BinOp::UDiv => Value::num(w, l / r),
            BinOp::URem => Value::num(w, l % r),
            BinOp::SDiv => Value::from_i64(w, ls.wrapping_div(rs)),
            _ => Value::from_i64(w, ls.wrapping_rem(rs)),
        });
    }

    let (Some(l), Some(r)) = (l, r) else {
        return Ok(Value::Poison);
    };
    Ok(match op {
        BinOp::Add => Value::num(w, l.wrapping_add(r)),
        BinOp::Sub => Value::num(w, l.wrapping_sub(r)),
        BinOp::Mul => Value::num(w, l.wrapping_mul(r)),
        BinOp::And => Value::num(w, l & r),
        BinOp::Or => Value::num(w, l | r),
        BinOp::Xor => Value::num(w, l ^ r),
        BinOp::Shl | BinOp::LShr | BinOp::AShr if r >= u64::from(w) => Value::Poison,
        BinOp::Shl => Value::num(w, l << r),
        BinOp::LShr => Value::num(w, l >> r),
        BinOp::AShr => Value::from_i64(w, sign_extend(l, w) >> r),
        BinOp::UDiv | BinOp::SDiv | BinOp::URem | BinOp::SRem => Value::Poison,
    })
}

fn icmp_int(pred: ICmpPred, w: u32, l: Option<u64>, r: Option<u64>) -> Value {
    let (Some(l), Some(r)) = (l, r) else {
        return Value::Poison;
    };
    let (ls, rs) = (sign_extend(l, w), sign_extend(r, w));
    Value::bool(match pred {
        ICmpPred::Eq => l == r,
        ICmpPred::Ne => l != r,
        ICmpPred::Ult => l < r,
        ICmpPred::Ule => l <= r,
        ICmpPred::Ugt => l > r,
        ICmpPred::Uge => l >= r,
        ICmpPred::Slt => ls < rs,
        ICmpPred::Sle => ls <= rs,
        ICmpPred::Sgt => ls > rs,
        ICmpPred::Sge => ls >= rs,
    })
}

/// Concrete address of a pointer; logical pointers use their block's base
fn address(mem: &Memory, p: &Pointer) -> Exec<u64> {
    match p {
        Pointer::Null => Ok(0),
        Pointer::Physical { addr, .. } => Ok(*addr),
        Pointer::Logical { block, offset } => Ok(mem
            .address_of(*block, *offset)
            .ok_or(MemError::NoSuchBlock(*block))?),
    }
}

/// Returns true if the block is alive and `offset` is strictly inside it
fn live_inbounds(mem: &Memory, block: BlockId, offset: u64) -> bool {
    mem.get(block)
        .is_some_and(|b| b.is_alive() && b.in_bounds(offset))
}

fn live_address(mem: &Memory, block: BlockId, offset: u64) -> Option<u64> {
    mem.get(block)
        .filter(|b| b.is_alive())
        .and_then(|_| mem.address_of(block, offset))
}

/// `p == q`, or `None` when only concrete addresses could tell
fn ptr_eq(mem: &Memory, p: &Pointer, q: &Pointer) -> Option<bool> {
    use Pointer::*;
    match (p, q) {
        (Null, Null) => Some(true),
        (
            Logical { block: b1, offset: o1 },
            Logical { block: b2, offset: o2 },
        ) => {
            if b1 == b2 {
                Some(o1 == o2)
            } else if live_inbounds(mem, *b1, *o1) && live_inbounds(mem, *b2, *o2) {
                Some(false)
            } else {
                None
            }
        }
        (Logical { block, offset }, Null) | (Null, Logical { block, offset }) => {
            live_inbounds(mem, *block, *offset).then_some(false)
        }
        (Logical { block, offset }, Physical { addr, .. })
        | (Physical { addr, .. }, Logical { block, offset }) => {
            live_address(mem, *block, *offset).map(|a| a == *addr)
        }
        (Physical { addr: a, .. }, Physical { addr: b, .. }) => Some(a == b),
        (Physical { addr, .. }, Null) | (Null, Physical { addr, .. }) => Some(*addr == 0),
    }
}

/// `p <=u q`, or `None` when only concrete addresses could tell
fn ptr_ule(mem: &Memory, p: &Pointer, q: &Pointer) -> Option<bool> {
    use Pointer::*;
    match (p, q) {
        (Null, _) => Some(true),
        (Logical { block, offset }, Null) => live_inbounds(mem, *block, *offset).then_some(false),
        (Physical { addr, .. }, Null) => Some(*addr == 0),
        (
            Logical { block: b1, offset: o1 },
            Logical { block: b2, offset: o2 },
        ) => (b1 == b2).then_some(o1 <= o2),
        (Logical { block, offset }, Physical { addr, .. }) => {
            live_address(mem, *block, *offset).map(|a| a <= *addr)
        }
        (Physical { addr, .. }, Logical { block, offset }) => {
            live_address(mem, *block, *offset).map(|a| *addr <= a)
        }
        (Physical { addr: a, .. }, Physical { addr: b, .. }) => Some(a <= b),
    }
}

fn icmp_ptr(
    mem: &Memory,
    pred: ICmpPred,
    l: Value,
    r: Value,
    oracle: &mut dyn ChoiceOracle,
) -> Exec<Value> {
    if pred.is_signed() {
        return Err(type_mismatch("signed comparison of pointers"));
    }
    let (Some(p), Some(q)) = (ptr_operand(l)?, ptr_operand(r)?) else {
        return Ok(Value::Poison);
    };

    let decided = match pred {
        ICmpPred::Eq => ptr_eq(mem, &p, &q),
        ICmpPred::Ne => ptr_eq(mem, &p, &q).map(|b| !b),
        ICmpPred::Ule => ptr_ule(mem, &p, &q),
        ICmpPred::Uge => ptr_ule(mem, &q, &p),
        ICmpPred::Ult => ptr_ule(mem, &q, &p).map(|b| !b),
        ICmpPred::Ugt => ptr_ule(mem, &p, &q).map(|b| !b),
        ICmpPred::Slt | ICmpPred::Sle | ICmpPred::Sgt | ICmpPred::Sge => None,
    };
    if let Some(b) = decided {
        return Ok(Value::bool(b));
    }

    let point = ChoicePoint::PointerCompare { pred };
    match oracle.choose(&point) {
        Choice::Compare(b) => Ok(Value::bool(b)),
        other => {
            tracing::warn!("oracle answered {:?} to {:?}", other, point);
            Err(StuckReason::InvalidChoice.into())
        }
    }
}

fn gep(mem: &Memory, p: Pointer, delta: i128, inbounds: bool) -> Value {
    let memsz = i128::from(mem.config().memsz);
    let wrap = |v: i128| v.rem_euclid(memsz) as u64;
    match p {
        Pointer::Null if delta == 0 => Value::null(),
        Pointer::Null if inbounds => Value::Poison,
        Pointer::Null => match wrap(delta) {
            0 => Value::null(),
            addr => Value::ptr(Pointer::physical(addr, None)),
        },
        Pointer::Logical { block, offset } => {
            let new = i128::from(offset) + delta;
            if !inbounds {
                return Value::ptr(Pointer::logical(block, wrap(new)));
            }
            let Some(size) = mem.get(block).map(|b| i128::from(b.size)) else {
                return Value::Poison;
            };
            if i128::from(offset) <= size && (0..=size).contains(&new) {
                Value::ptr(Pointer::logical(block, new as u64))
            } else {
                Value::Poison
            }
        }
        Pointer::Physical {
            addr,
            mut candidates,
            owner,
        } => {
            let new = i128::from(addr) + delta;
            if !inbounds {
                return Value::ptr(Pointer::Physical {
                    addr: wrap(new),
                    candidates,
                    owner,
                });
            }
            if !(0..memsz).contains(&new) {
                return Value::Poison;
            }
            candidates.insert(addr);
            candidates.insert(new as u64);
            Value::ptr(Pointer::Physical {
                addr: new as u64,
                candidates,
                owner,
            })
        }
    }
}

fn psub(mem: &Memory, l: &Pointer, r: &Pointer, elem_size: u64) -> Value {
    let diff = match (l, r) {
        (
            Pointer::Logical { block: b1, offset: o1 },
            Pointer::Logical { block: b2, offset: o2 },
        ) => {
            if b1 != b2 {
                return Value::Poison;
            }
            i128::from(*o1) - i128::from(*o2)
        }
        _ => match (address(mem, l), address(mem, r)) {
            (Ok(a), Ok(b)) => i128::from(a) - i128::from(b),
            _ => return Value::Poison,
        },
    };
    let elem = i128::from(elem_size.max(1));
    if diff % elem != 0 {
        return Value::Poison;
    }
    Value::num(PTR_BITS, (diff / elem) as u64)
}

/// `inttoptr`: zero is null, anything else a physical pointer owned by the
/// live block containing it, if any
fn int_to_ptr(mem: &Memory, bits: u64) -> Value {
    let addr = bits % mem.config().memsz;
    if addr == 0 {
        return Value::null();
    }
    Value::ptr(Pointer::physical(addr, mem.live_block_containing(addr, 1)))
}

/// Concrete pointer bytes read from memory. The owner is left open and
/// fixed only when the pointer is dereferenced.
fn loaded_ptr(mem: &Memory, bits: u64) -> Value {
    match bits % mem.config().memsz {
        0 => Value::null(),
        addr => Value::ptr(Pointer::physical(addr, None)),
    }
}

/// Block and offset accessed by `len` bytes at pointer `p`
fn resolve(mem: &Memory, p: Value, len: u64) -> Exec<(BlockId, u64)> {
    let p = ptr_operand(p)?.ok_or(UndefinedBehavior::PoisonAddress)?;
    match p {
        Pointer::Null => Err(UndefinedBehavior::NullDereference.into()),
        Pointer::Logical { block, offset } => {
            let b = mem.get(block).ok_or(MemError::NoSuchBlock(block))?;
            if !b.is_alive() {
                return Err(UndefinedBehavior::UseAfterFree(block).into());
            }
            if !b.access_in_bounds(offset, len) {
                return Err(UndefinedBehavior::OutOfBounds { block, offset, len }.into());
            }
            Ok((block, offset))
        }
        Pointer::Physical {
            addr,
            candidates,
            owner,
        } => {
            let block = mem
                .live_block_containing(addr, len)
                .ok_or(UndefinedBehavior::NoBlockAtAddress(addr))?;
            if owner.is_some_and(|o| o != block) {
                return Err(UndefinedBehavior::ProvenanceMismatch(block).into());
            }
            let b = mem.get(block).ok_or(MemError::NoSuchBlock(block))?;
            let offset = addr - b.base;
            if candidates.iter().any(|c| *c < b.base || *c > b.base + b.size) {
                return Err(UndefinedBehavior::OutOfBounds { block, offset, len }.into());
            }
            Ok((block, offset))
        }
    }
}

fn alloc_size(cfg: &Config, ty: &Ty, count: &Operand) -> Exec<Option<u64>> {
    match eval(cfg, count)? {
        Value::Num { bits, .. } => Ok(bits.checked_mul(ty.size_of())),
        Value::Poison => Err(UndefinedBehavior::PoisonSize.into()),
        other => Err(type_mismatch(format!("allocation count {}", other))),
    }
}

/// Candidates for a request; an overflowing size has none
fn candidates_for(mem: &Memory, size: Option<u64>) -> Vec<u64> {
    let config = *mem.config();
    size.map(|s| mem.propose_candidates(s, config.sysalign, config.max_candidates))
        .unwrap_or_default()
}

fn place(
    mem: &mut Memory,
    kind: BlockKind,
    size: Option<u64>,
    candidates: Vec<u64>,
    pick: usize,
) -> Exec<BlockId> {
    let size = match size {
        Some(size) if !candidates.is_empty() => size,
        _ => return Err(Halt::OutOfMemory),
    };
    if pick >= candidates.len() {
        return Err(StuckReason::InvalidChoice.into());
    }
    let align = mem.config().sysalign;
    Ok(mem.allocate(AllocRequest::new(kind, size, align, candidates).with_pick(pick))?)
}

fn malloc(mem: &mut Memory, size: Option<u64>, oracle: &mut dyn ChoiceOracle) -> Exec<Value> {
    if size == Some(0) {
        return Ok(Value::null());
    }
    let candidates = candidates_for(mem, size);
    let point = ChoicePoint::Malloc {
        size: size.unwrap_or(u64::MAX),
        candidates: candidates.clone(),
    };
    match oracle.choose(&point) {
        Choice::Null => Ok(Value::null()),
        Choice::Place(i) => {
            let block = place(mem, BlockKind::Heap, size, candidates, i)?;
            Ok(Value::ptr(Pointer::logical(block, 0)))
        }
        other => {
            tracing::warn!("oracle answered {:?} to {:?}", other, point);
            Err(StuckReason::InvalidChoice.into())
        }
    }
}

fn alloca(mem: &mut Memory, size: Option<u64>, oracle: &mut dyn ChoiceOracle) -> Exec<BlockId> {
    let candidates = candidates_for(mem, size);
    let point = ChoicePoint::Alloca {
        size: size.unwrap_or(u64::MAX),
        candidates: candidates.clone(),
    };
    match oracle.choose(&point) {
        Choice::Place(i) => place(mem, BlockKind::Stack, size, candidates, i),
        other => {
            tracing::warn!("oracle answered {:?} to {:?}", other, point);
            Err(StuckReason::InvalidChoice.into())
        }
    }
}

fn free(mem: &mut Memory, p: Value) -> Exec<()> {
    let p = ptr_operand(p)?.ok_or(UndefinedBehavior::PoisonAddress)?;
    let invalid = |msg: &str| Halt::Wrong(UndefinedBehavior::InvalidFree(msg.to_string()));
    let (block, offset) = match p {
        Pointer::Logical { block, offset } => (block, offset),
        Pointer::Null => return Err(invalid("null pointer")),
        Pointer::Physical { .. } => return Err(invalid("physical pointer")),
    };
    let b = mem.get(block).ok_or_else(|| invalid("unknown block"))?;
    if !b.is_alive() {
        return Err(UndefinedBehavior::DoubleFree(block).into());
    }
    if offset != 0 {
        return Err(invalid("interior pointer"));
    }
    if b.kind == BlockKind::Stack {
        return Err(invalid("stack block"));
    }
    mem.free(block)?;
    Ok(())
}

fn call<M: ModuleTable + ?Sized>(
    module: &M,
    cfg: &mut Config,
    dst: Option<Reg>,
    callee: FunctionId,
    args: &[Operand],
    pc: Pc,
) -> Exec<()> {
    let func = module
        .lookup_function(callee)
        .ok_or(StuckReason::UnknownFunction(callee))?;
    if func.params.len() != args.len() {
        return Err(StuckReason::ArityMismatch {
            callee,
            expected: func.params.len(),
            got: args.len(),
        }
        .into());
    }

    let mut registers = BTreeMap::new();
    for ((reg, ty), arg) in func.params.iter().zip(args) {
        let v = eval(cfg, arg)?;
        if !v.has_type(ty) {
            return Err(type_mismatch(format!("argument {} is not {}", v, ty)));
        }
        registers.insert(*reg, v);
    }

    top_mut(cfg)?.pc = Pc::new(pc.block, pc.inst + 1);
    let call_id = CallId(cfg.next_call_id);
    cfg.next_call_id += 1;
    cfg.call_table.insert(call_id, callee);
    let mut frame = Frame::new(call_id, func.entry_pc(), registers);
    frame.ret_dest = dst;
    cfg.stack.push(frame);
    Ok(())
}

fn exec_terminator(func: &FunctionDef, cfg: &mut Config, term: &Terminator, pc: Pc) -> Exec<()> {
    match term {
        Terminator::Br(label) => jump(func, cfg, pc, label),
        Terminator::CondBr {
            cond,
            on_true,
            on_false,
        } => match eval(cfg, cond)? {
            Value::Num { width: 1, bits } => {
                jump(func, cfg, pc, if bits == 1 { on_true } else { on_false })
            }
            Value::Poison => Err(UndefinedBehavior::PoisonBranch.into()),
            other => Err(type_mismatch(format!("branch on {}", other))),
        },
        Terminator::Ret(val) => {
            let v = eval(cfg, val)?;
            if !v.has_type(&func.ret_ty) {
                return Err(type_mismatch(format!("return of {} as {}", v, func.ret_ty)));
            }
            ret(cfg, v)
        }
        Terminator::Unreachable => Err(UndefinedBehavior::Unreachable.into()),
    }
}

/// Moves to `label`, evaluating its phi nodes simultaneously
fn jump(func: &FunctionDef, cfg: &mut Config, pc: Pc, label: &str) -> Exec<()> {
    let target = func
        .block_index(label)
        .ok_or_else(|| StuckReason::UnknownLabel(label.to_string()))?;
    let from = func
        .blocks
        .get(pc.block)
        .map(|b| b.label.as_str())
        .ok_or(StuckReason::InvalidPc(pc))?;

    let mut values = Vec::new();
    for phi in &func.blocks[target].phis {
        let (op, _) = phi
            .incoming
            .iter()
            .find(|(_, pred)| pred == from)
            .ok_or(StuckReason::MissingPhiIncoming(phi.dst))?;
        let v = eval(cfg, op)?;
        if !v.has_type(&phi.ty) {
            return Err(type_mismatch(format!("phi {} receives {}", phi.dst, v)));
        }
        values.push((phi.dst, v));
    }

    let frame = top_mut(cfg)?;
    frame.registers.extend(values);
    frame.pc = Pc::new(target, 0);
    Ok(())
}

fn ret(cfg: &mut Config, v: Value) -> Exec<()> {
    let frame = cfg.stack.pop().ok_or(StuckReason::EmptyStack)?;
    for block in &frame.stack_blocks {
        cfg.memory.free(*block)?;
    }
    cfg.call_table.remove(&frame.call_id);

    match cfg.top_mut() {
        None => Err(Halt::Finished(v)),
        Some(caller) => {
            if let Some(dst) = frame.ret_dest {
                caller.registers.insert(dst, v);
            }
            Ok(())
        }
    }
}
