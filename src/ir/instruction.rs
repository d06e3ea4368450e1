//! IR instruction definitions

use super::program::FunctionId;
use super::types::Ty;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Virtual register (SSA name, unique per function)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Reg(pub u32);

impl Reg {
    /// Creates a register with the given ID
    pub fn new(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%r{}", self.0)
    }
}

/// Constant operand
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Constant {
    /// Integer constant; `bits` is truncated to `width` when evaluated
    Int {
        /// Bit width
        width: u32,
        /// Raw bits
        bits: u64,
    },
    /// Null pointer
    Null,
    /// Poison of any type
    Poison,
}

/// Instruction operand
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    /// Register read
    Reg(Reg),
    /// Immediate constant
    Const(Constant),
}

impl Operand {
    /// Integer immediate of the given width
    pub fn int(width: u32, value: i64) -> Self {
        Operand::Const(Constant::Int {
            width,
            bits: value as u64,
        })
    }

    /// Null pointer immediate
    pub fn null() -> Self {
        Operand::Const(Constant::Null)
    }

    /// Poison immediate
    pub fn poison() -> Self {
        Operand::Const(Constant::Poison)
    }

    /// The register read by this operand, if any
    pub fn reg(&self) -> Option<Reg> {
        match self {
            Operand::Reg(r) => Some(*r),
            Operand::Const(_) => None,
        }
    }
}

impl From<Reg> for Operand {
    fn from(reg: Reg) -> Self {
        Operand::Reg(reg)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "{}", r),
            Operand::Const(Constant::Int { bits, .. }) => write!(f, "{}", bits),
            Operand::Const(Constant::Null) => write!(f, "null"),
            Operand::Const(Constant::Poison) => write!(f, "poison"),
        }
    }
}

/// Integer binary operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOp {
    /// Wrapping addition
    Add,
    /// Wrapping subtraction
    Sub,
    /// Wrapping multiplication
    Mul,
    /// Unsigned division
    UDiv,
    /// Signed division
    SDiv,
    /// Unsigned remainder
    URem,
    /// Signed remainder
    SRem,
    /// Bitwise and
    And,
    /// Bitwise or
    Or,
    /// Bitwise xor
    Xor,
    /// Shift left
    Shl,
    /// Logical shift right
    LShr,
    /// Arithmetic shift right
    AShr,
}

impl BinOp {
    /// Division and remainder need a non-poison, non-zero divisor
    pub fn is_division(self) -> bool {
        matches!(self, BinOp::UDiv | BinOp::SDiv | BinOp::URem | BinOp::SRem)
    }

    fn mnemonic(self) -> &'static str {
        match self {
            BinOp::Add => "add",
            BinOp::Sub => "sub",
            BinOp::Mul => "mul",
            BinOp::UDiv => "udiv",
            BinOp::SDiv => "sdiv",
            BinOp::URem => "urem",
            BinOp::SRem => "srem",
            BinOp::And => "and",
            BinOp::Or => "or",
            BinOp::Xor => "xor",
            BinOp::Shl => "shl",
            BinOp::LShr => "lshr",
            BinOp::AShr => "ashr",
        }
    }
}

/// Comparison predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ICmpPred {
    /// Equal
    Eq,
    /// Not equal
    Ne,
    /// Unsigned less than
    Ult,
    /// Unsigned less or equal
    Ule,
    /// Unsigned greater than
    Ugt,
    /// Unsigned greater or equal
    Uge,
    /// Signed less than
    Slt,
    /// Signed less or equal
    Sle,
    /// Signed greater than
    Sgt,
    /// Signed greater or equal
    Sge,
}

impl ICmpPred {
    /// Returns true for the signed predicates
    pub fn is_signed(self) -> bool {
        matches!(
            self,
            ICmpPred::Slt | ICmpPred::Sle | ICmpPred::Sgt | ICmpPred::Sge
        )
    }

    fn mnemonic(self) -> &'static str {
        match self {
            ICmpPred::Eq => "eq",
            ICmpPred::Ne => "ne",
            ICmpPred::Ult => "ult",
            ICmpPred::Ule => "ule",
            ICmpPred::Ugt => "ugt",
            ICmpPred::Uge => "uge",
            ICmpPred::Slt => "slt",
            ICmpPred::Sle => "sle",
            ICmpPred::Sgt => "sgt",
            ICmpPred::Sge => "sge",
        }
    }
}

/// Non-terminator instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    /// dst = op ty lhs, rhs
    BinOp {
        /// Destination register
        dst: Reg,
        /// Operator
        op: BinOp,
        /// Integer operand type
        ty: Ty,
        /// Left operand
        lhs: Operand,
        /// Right operand
        rhs: Operand,
    },
    /// dst = icmp pred ty lhs, rhs (result is i1)
    ICmp {
        /// Destination register
        dst: Reg,
        /// Predicate
        pred: ICmpPred,
        /// Operand type (integer or pointer)
        ty: Ty,
        /// Left operand
        lhs: Operand,
        /// Right operand
        rhs: Operand,
    },
    /// dst = select i1 cond, ty on_true, ty on_false
    Select {
        /// Destination register
        dst: Reg,
        /// i1 condition
        cond: Operand,
        /// Type of both arms
        ty: Ty,
        /// Value when cond is 1
        on_true: Operand,
        /// Value when cond is 0
        on_false: Operand,
    },
    /// dst = gep [inbounds] ty, ptr, idx (offset by idx * sizeof(ty))
    Gep {
        /// Destination register
        dst: Reg,
        /// Whether the result must stay within the pointee block
        inbounds: bool,
        /// Element type
        ty: Ty,
        /// Base pointer
        ptr: Operand,
        /// Signed element index
        idx: Operand,
    },
    /// dst = psub ty lhs, rhs (pointer difference in elements of ty's pointee)
    Psub {
        /// Destination register
        dst: Reg,
        /// Pointer type of both operands
        ty: Ty,
        /// Minuend
        lhs: Operand,
        /// Subtrahend
        rhs: Operand,
    },
    /// dst = ptrtoint ptr to ty
    PtrToInt {
        /// Destination register
        dst: Reg,
        /// Pointer operand
        ptr: Operand,
        /// Integer result type
        ty: Ty,
    },
    /// dst = inttoptr val to ty
    IntToPtr {
        /// Destination register
        dst: Reg,
        /// Integer operand
        val: Operand,
        /// Pointer result type
        ty: Ty,
    },
    /// dst = bitcast from val to ty
    Bitcast {
        /// Destination register
        dst: Reg,
        /// Source type
        from: Ty,
        /// Operand
        val: Operand,
        /// Result type
        to: Ty,
    },
    /// dst = load ty, ptr
    Load {
        /// Destination register
        dst: Reg,
        /// Loaded type
        ty: Ty,
        /// Address
        ptr: Operand,
    },
    /// store ty val, ptr
    Store {
        /// Stored type
        ty: Ty,
        /// Stored value
        val: Operand,
        /// Address
        ptr: Operand,
    },
    /// dst = malloc ty, count
    Malloc {
        /// Destination register
        dst: Reg,
        /// Element type
        ty: Ty,
        /// Element count
        count: Operand,
    },
    /// dst = alloca ty, count (released when the frame returns)
    Alloca {
        /// Destination register
        dst: Reg,
        /// Element type
        ty: Ty,
        /// Element count
        count: Operand,
    },
    /// free ptr
    Free {
        /// Pointer returned by malloc
        ptr: Operand,
    },
    /// [dst =] call callee(args)
    Call {
        /// Destination register for the return value
        dst: Option<Reg>,
        /// Called function
        callee: FunctionId,
        /// Arguments, bound to the callee's parameters in order
        args: Vec<Operand>,
    },
}

/// Coarse instruction kind used by the reordering rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstrCategory {
    /// Integer arithmetic
    BinOp,
    /// Integer comparison
    ICmpInt,
    /// Pointer comparison
    ICmpPtr,
    /// Select
    Select,
    /// Pointer offset computation
    Gep,
    /// Pointer subtraction
    Psub,
    /// Pointer to integer cast
    PtrToInt,
    /// Integer to pointer cast
    IntToPtr,
    /// Bit-preserving cast
    Bitcast,
    /// Memory read
    Load,
    /// Memory write
    Store,
    /// Heap allocation
    Malloc,
    /// Stack allocation
    Alloca,
    /// Heap deallocation
    Free,
    /// Function call
    Call,
}

impl Instruction {
    /// Register defined by this instruction
    pub fn def(&self) -> Option<Reg> {
        match self {
            Instruction::BinOp { dst, .. }
            | Instruction::ICmp { dst, .. }
            | Instruction::Select { dst, .. }
            | Instruction::Gep { dst, .. }
            | Instruction::Psub { dst, .. }
            | Instruction::PtrToInt { dst, .. }
            | Instruction::IntToPtr { dst, .. }
            | Instruction::Bitcast { dst, .. }
            | Instruction::Load { dst, .. }
            | Instruction::Malloc { dst, .. }
            | Instruction::Alloca { dst, .. } => Some(*dst),
            Instruction::Call { dst, .. } => *dst,
            Instruction::Store { .. } | Instruction::Free { .. } => None,
        }
    }

    /// Operands read by this instruction, in order
    pub fn operands(&self) -> Vec<&Operand> {
        match self {
            Instruction::BinOp { lhs, rhs, .. }
            | Instruction::ICmp { lhs, rhs, .. }
            | Instruction::Psub { lhs, rhs, .. } => vec![lhs, rhs],
            Instruction::Select {
                cond,
                on_true,
                on_false,
                ..
            } => vec![cond, on_true, on_false],
            Instruction::Gep { ptr, idx, .. } => vec![ptr, idx],
            Instruction::PtrToInt { ptr, .. } => vec![ptr],
            Instruction::IntToPtr { val, .. } | Instruction::Bitcast { val, .. } => vec![val],
            Instruction::Load { ptr, .. } => vec![ptr],
            Instruction::Store { val, ptr, .. } => vec![val, ptr],
            Instruction::Malloc { count, .. } | Instruction::Alloca { count, .. } => vec![count],
            Instruction::Free { ptr } => vec![ptr],
            Instruction::Call { args, .. } => args.iter().collect(),
        }
    }

    /// Registers read by this instruction
    pub fn uses(&self) -> Vec<Reg> {
        self.operands().into_iter().filter_map(Operand::reg).collect()
    }

    /// Reordering category
    pub fn category(&self) -> InstrCategory {
        match self {
            Instruction::BinOp { .. } => InstrCategory::BinOp,
            Instruction::ICmp { ty, .. } if ty.is_ptr() => InstrCategory::ICmpPtr,
            Instruction::ICmp { .. } => InstrCategory::ICmpInt,
            Instruction::Select { .. } => InstrCategory::Select,
            Instruction::Gep { .. } => InstrCategory::Gep,
            Instruction::Psub { .. } => InstrCategory::Psub,
            Instruction::PtrToInt { .. } => InstrCategory::PtrToInt,
            Instruction::IntToPtr { .. } => InstrCategory::IntToPtr,
            Instruction::Bitcast { .. } => InstrCategory::Bitcast,
            Instruction::Load { .. } => InstrCategory::Load,
            Instruction::Store { .. } => InstrCategory::Store,
            Instruction::Malloc { .. } => InstrCategory::Malloc,
            Instruction::Alloca { .. } => InstrCategory::Alloca,
            Instruction::Free { .. } => InstrCategory::Free,
            Instruction::Call { .. } => InstrCategory::Call,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::BinOp {
                dst,
                op,
                ty,
                lhs,
                rhs,
            } => write!(f, "{} = {} {} {}, {}", dst, op.mnemonic(), ty, lhs, rhs),
            Instruction::ICmp {
                dst,
                pred,
                ty,
                lhs,
                rhs,
            } => write!(
                f,
                "{} = icmp {} {} {}, {}",
                dst,
                pred.mnemonic(),
                ty,
                lhs,
                rhs
            ),
            Instruction::Select {
                dst,
                cond,
                ty,
                on_true,
                on_false,
            } => write!(
                f,
                "{} = select i1 {}, {} {}, {}",
                dst, cond, ty, on_true, on_false
            ),
            Instruction::Gep {
                dst,
                inbounds,
                ty,
                ptr,
                idx,
            } => write!(
                f,
                "{} = gep {}{}, {}, {}",
                dst,
                if *inbounds { "inbounds " } else { "" },
                ty,
                ptr,
                idx
            ),
            Instruction::Psub { dst, ty, lhs, rhs } => {
                write!(f, "{} = psub {} {}, {}", dst, ty, lhs, rhs)
            }
            Instruction::PtrToInt { dst, ptr, ty } => {
                write!(f, "{} = ptrtoint {} to {}", dst, ptr, ty)
            }
            Instruction::IntToPtr { dst, val, ty } => {
                write!(f, "{} = inttoptr {} to {}", dst, val, ty)
            }
            Instruction::Bitcast { dst, from, val, to } => {
                write!(f, "{} = bitcast {} {} to {}", dst, from, val, to)
            }
            Instruction::Load { dst, ty, ptr } => write!(f, "{} = load {}, {}", dst, ty, ptr),
            Instruction::Store { ty, val, ptr } => write!(f, "store {} {}, {}", ty, val, ptr),
            Instruction::Malloc { dst, ty, count } => {
                write!(f, "{} = malloc {}, {}", dst, ty, count)
            }
            Instruction::Alloca { dst, ty, count } => {
                write!(f, "{} = alloca {}, {}", dst, ty, count)
            }
            Instruction::Free { ptr } => write!(f, "free {}", ptr),
            Instruction::Call { dst, callee, args } => {
                if let Some(dst) = dst {
                    write!(f, "{} = ", dst)?;
                }
                write!(f, "call {}(", callee)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Phi node at the head of a basic block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phi {
    /// Destination register
    pub dst: Reg,
    /// Type of the merged value
    pub ty: Ty,
    /// (value, predecessor label) pairs
    pub incoming: Vec<(Operand, String)>,
}

/// Block terminator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Terminator {
    /// Unconditional branch
    Br(String),
    /// Branch on an i1 condition
    CondBr {
        /// i1 condition
        cond: Operand,
        /// Target when cond is 1
        on_true: String,
        /// Target when cond is 0
        on_false: String,
    },
    /// Return a value to the caller
    Ret(Operand),
    /// Reaching this is undefined behavior
    Unreachable,
}

impl Terminator {
    /// Registers read by this terminator
    pub fn uses(&self) -> Vec<Reg> {
        match self {
            Terminator::CondBr { cond, .. } => cond.reg().into_iter().collect(),
            Terminator::Ret(val) => val.reg().into_iter().collect(),
            Terminator::Br(_) | Terminator::Unreachable => Vec::new(),
        }
    }

    /// Labels this terminator may jump to
    pub fn successors(&self) -> Vec<&str> {
        match self {
            Terminator::Br(label) => vec![label.as_str()],
            Terminator::CondBr {
                on_true, on_false, ..
            } => vec![on_true.as_str(), on_false.as_str()],
            Terminator::Ret(_) | Terminator::Unreachable => Vec::new(),
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Br(label) => write!(f, "br {}", label),
            Terminator::CondBr {
                cond,
                on_true,
                on_false,
            } => write!(f, "br {}, {}, {}", cond, on_true, on_false),
            Terminator::Ret(val) => write!(f, "ret {}", val),
            Terminator::Unreachable => write!(f, "unreachable"),
        }
    }
}
