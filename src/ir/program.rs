//! Functions, basic blocks and the module table

use super::instruction::{Instruction, Phi, Reg, Terminator};
use super::types::Ty;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Function identifier within a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FunctionId(pub u32);

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@f{}", self.0)
    }
}

/// Program counter: basic block index and position inside that block.
///
/// `inst == block.instructions.len()` addresses the block's terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pc {
    /// Index of the basic block in [`FunctionDef::blocks`]
    pub block: usize,
    /// Index of the instruction inside the block
    pub inst: usize,
}

impl Pc {
    /// Creates a program counter
    pub fn new(block: usize, inst: usize) -> Self {
        Self { block, inst }
    }
}

impl fmt::Display for Pc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}:{}", self.block, self.inst)
    }
}

/// Basic block in the control flow graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    /// Label identifying this basic block
    pub label: String,
    /// Phi nodes, evaluated on entry
    pub phis: Vec<Phi>,
    /// Straight-line instructions
    pub instructions: Vec<Instruction>,
    /// Block terminator
    pub terminator: Terminator,
}

/// What a program counter points at
#[derive(Debug, Clone, Copy)]
pub enum CodeAt<'a> {
    /// A straight-line instruction
    Instruction(&'a Instruction),
    /// The terminator of the block
    Terminator(&'a Terminator),
}

/// A function's control-flow graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDef {
    /// Human-readable name
    pub name: String,
    /// Parameters, bound in order on call
    pub params: Vec<(Reg, Ty)>,
    /// Return type
    pub ret_ty: Ty,
    /// Basic blocks; the first one is the entry
    pub blocks: Vec<BasicBlock>,
}

impl FunctionDef {
    /// Program counter of the first instruction of the entry block
    pub fn entry_pc(&self) -> Pc {
        Pc::new(0, 0)
    }

    /// Index of the block with the given label
    pub fn block_index(&self, label: &str) -> Option<usize> {
        self.blocks.iter().position(|b| b.label == label)
    }

    /// Code at `pc`, instruction or terminator
    pub fn code_at(&self, pc: Pc) -> Option<CodeAt<'_>> {
        let block = self.blocks.get(pc.block)?;
        match pc.inst.cmp(&block.instructions.len()) {
            std::cmp::Ordering::Less => Some(CodeAt::Instruction(&block.instructions[pc.inst])),
            std::cmp::Ordering::Equal => Some(CodeAt::Terminator(&block.terminator)),
            std::cmp::Ordering::Greater => None,
        }
    }

    /// Straight-line instruction at `pc`
    pub fn instruction_at(&self, pc: Pc) -> Option<&Instruction> {
        match self.code_at(pc)? {
            CodeAt::Instruction(inst) => Some(inst),
            CodeAt::Terminator(_) => None,
        }
    }

    /// Program counter after `pc` within the same block (None at a terminator)
    pub fn next_pc(&self, pc: Pc) -> Option<Pc> {
        let block = self.blocks.get(pc.block)?;
        if pc.inst < block.instructions.len() {
            Some(Pc::new(pc.block, pc.inst + 1))
        } else {
            None
        }
    }

    /// Returns true if `pc` addresses an instruction or a terminator
    pub fn is_valid_pc(&self, pc: Pc) -> bool {
        self.code_at(pc).is_some()
    }

    /// Iterates over every straight-line instruction with its program counter
    pub fn instructions(&self) -> impl Iterator<Item = (Pc, &Instruction)> {
        self.blocks.iter().enumerate().flat_map(|(b, block)| {
            block
                .instructions
                .iter()
                .enumerate()
                .map(move |(i, inst)| (Pc::new(b, i), inst))
        })
    }
}

/// Read-only access to the functions of a program
pub trait ModuleTable {
    /// Looks up a function by ID
    fn lookup_function(&self, id: FunctionId) -> Option<&FunctionDef>;
}

/// In-memory module: a table of functions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    functions: BTreeMap<FunctionId, FunctionDef>,
}

impl Module {
    /// Creates an empty module
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a function under the next free ID
    pub fn add_function(&mut self, def: FunctionDef) -> FunctionId {
        let id = FunctionId(
            self.functions
                .keys()
                .next_back()
                .map(|last| last.0 + 1)
                .unwrap_or(0),
        );
        self.functions.insert(id, def);
        id
    }

    /// Iterates over all functions
    pub fn functions(&self) -> impl Iterator<Item = (FunctionId, &FunctionDef)> {
        self.functions.iter().map(|(id, def)| (*id, def))
    }
}

impl ModuleTable for Module {
    fn lookup_function(&self, id: FunctionId) -> Option<&FunctionDef> {
        self.functions.get(&id)
    }
}

/// A module with one function replaced, leaving the base untouched
pub struct Overlay<'a, M: ModuleTable + ?Sized> {
    base: &'a M,
    id: FunctionId,
    def: FunctionDef,
}

impl<'a, M: ModuleTable + ?Sized> Overlay<'a, M> {
    /// Shadows function `id` of `base` with `def`
    pub fn new(base: &'a M, id: FunctionId, def: FunctionDef) -> Self {
        Self { base, id, def }
    }
}

impl<M: ModuleTable + ?Sized> ModuleTable for Overlay<'_, M> {
    fn lookup_function(&self, id: FunctionId) -> Option<&FunctionDef> {
        if id == self.id {
            Some(&self.def)
        } else {
            self.base.lookup_function(id)
        }
    }
}
