//! # Intermediate Representation
//!
//! A small LLVM-like IR: typed SSA registers, straight-line instructions,
//! phi nodes and terminators grouped into basic blocks.
//!
//! ## Module Structure
//!
//! ```text
//! ir/
//! ├── mod.rs          # This file - module definition and re-exports
//! ├── types.rs        # Ty (iN, pointers), pointer size
//! ├── instruction.rs  # Reg, Operand, Instruction, Phi, Terminator
//! ├── program.rs      # BasicBlock, FunctionDef, Module, ModuleTable
//! └── builder.rs      # FunctionBuilder
//! ```
//!
//! The interpreter only reads functions through [`ModuleTable`], so any
//! external loader can supply them.

mod builder;
mod instruction;
mod program;
mod types;

pub use builder::FunctionBuilder;
pub use instruction::{
    BinOp, Constant, ICmpPred, InstrCategory, Instruction, Operand, Phi, Reg, Terminator,
};
pub use program::{BasicBlock, CodeAt, FunctionDef, FunctionId, Module, ModuleTable, Overlay, Pc};
pub use types::{Ty, MAX_INT_BITS, PTR_BITS, PTR_SIZE};
