//! Machine state: frames, the call stack and the full configuration

use crate::ir::{FunctionId, ModuleTable, Pc, Reg};
use crate::memory::{BlockId, MemConfig, Memory};
use crate::value::Value;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of one activation of a function
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "call#{}", self.0)
    }
}

/// One activation record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Activation ID, key into the call table
    pub call_id: CallId,
    /// Next code to execute
    pub pc: Pc,
    /// Register file
    pub registers: BTreeMap<Reg, Value>,
    /// Caller register receiving the return value
    pub ret_dest: Option<Reg>,
    /// `alloca` blocks released on return
    pub stack_blocks: Vec<BlockId>,
}

impl Frame {
    /// Fresh frame at `pc` with the given registers
    pub fn new(call_id: CallId, pc: Pc, registers: BTreeMap<Reg, Value>) -> Self {
        Self {
            call_id,
            pc,
            registers,
            ret_dest: None,
            stack_blocks: Vec::new(),
        }
    }

    /// Value of a register
    pub fn read(&self, reg: Reg) -> Option<&Value> {
        self.registers.get(&reg)
    }
}

/// Complete machine state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Memory
    pub memory: Memory,
    /// Call stack, innermost frame last
    pub stack: Vec<Frame>,
    /// Function executing in each live activation
    pub call_table: BTreeMap<CallId, FunctionId>,
    /// ID the next call receives
    pub next_call_id: u64,
}

impl Config {
    /// Initial state calling `entry` with `args` on an empty memory
    pub fn new<M: ModuleTable + ?Sized>(
        module: &M,
        entry: FunctionId,
        args: Vec<Value>,
        mem: MemConfig,
    ) -> Result<Self> {
        Self::with_memory(module, entry, args, Memory::new(mem)?)
    }

    /// Initial state calling `entry` with `args` on a prepared memory
    pub fn with_memory<M: ModuleTable + ?Sized>(
        module: &M,
        entry: FunctionId,
        args: Vec<Value>,
        memory: Memory,
    ) -> Result<Self> {
        let func = module
            .lookup_function(entry)
            .ok_or(Error::UnknownFunction(entry))?;
        if func.params.len() != args.len() {
            return Err(Error::ArityMismatch {
                function: entry,
                expected: func.params.len(),
                got: args.len(),
            });
        }
        for ((reg, ty), arg) in func.params.iter().zip(&args) {
            if !arg.has_type(ty) {
                return Err(Error::ill_formed(format!(
                    "argument {} for {} is not of type {}",
                    arg, reg, ty
                )));
            }
        }

        let registers = func
            .params
            .iter()
            .map(|(reg, _)| *reg)
            .zip(args)
            .collect();
        let call_id = CallId(0);
        let mut call_table = BTreeMap::new();
        call_table.insert(call_id, entry);

        Ok(Self {
            memory,
            stack: vec![Frame::new(call_id, func.entry_pc(), registers)],
            call_table,
            next_call_id: 1,
        })
    }

    /// Innermost frame
    pub fn top(&self) -> Option<&Frame> {
        self.stack.last()
    }

    /// Innermost frame, mutably
    pub fn top_mut(&mut self) -> Option<&mut Frame> {
        self.stack.last_mut()
    }

    /// Function executing in the innermost frame
    pub fn current_function(&self) -> Option<FunctionId> {
        self.top()
            .and_then(|f| self.call_table.get(&f.call_id))
            .copied()
    }

    /// Program counter of the innermost frame
    pub fn pc(&self) -> Option<Pc> {
        self.top().map(|f| f.pc)
    }

    /// Equality ignoring program counters and clock ticks
    pub fn eq_wopc(&self, other: &Config) -> bool {
        self.memory.eq_modulo_clock(&other.memory)
            && self.call_table == other.call_table
            && self.next_call_id == other.next_call_id
            && self.stack.len() == other.stack.len()
            && self.stack.iter().zip(&other.stack).all(|(a, b)| {
                a.call_id == b.call_id
                    && a.registers == b.registers
                    && a.ret_dest == b.ret_dest
                    && a.stack_blocks == b.stack_blocks
            })
    }
}
