//! Error types for provir

use crate::ir::{FunctionId, Pc, Reg};
use crate::memory::{BlockId, MemError};
use thiserror::Error;

/// API-level errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // Construction errors
    /// Structurally invalid function
    ///
    /// **Triggered by:** duplicate labels, missing terminators, branches to
    /// unknown labels or registers defined twice
    #[error("Invalid function '{function}': {reason}")]
    InvalidFunction {
        /// Function name
        function: String,
        /// What is wrong with it
        reason: String,
    },

    /// Unknown function ID
    #[error("Unknown function: {0}")]
    UnknownFunction(FunctionId),

    /// Wrong number of arguments for an entry function
    #[error("Function {function} expects {expected} arguments, got {got}")]
    ArityMismatch {
        /// Called function
        function: FunctionId,
        /// Number of parameters
        expected: usize,
        /// Number of arguments supplied
        got: usize,
    },

    // Configuration errors
    /// Options out of range
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    /// Options could not be parsed
    #[error("Failed to parse options: {0}")]
    OptionsParse(String),

    // Runtime errors
    /// Memory operation failed
    #[error(transparent)]
    Memory(#[from] MemError),

    /// Configuration is not well-formed
    #[error("Ill-formed configuration: {0}")]
    IllFormed(String),

    /// The current pc is not followed by two adjacent instructions
    #[error("No adjacent instruction pair at {pc}")]
    NoInstructionPair {
        /// Program counter of the top frame
        pc: Pc,
    },
}

/// Result type for provir operations
pub type Result<T> = std::result::Result<T, Error>;

/// Why a program went wrong (undefined behavior)
#[derive(Error, Debug, Clone, PartialEq, Eq, Hash)]
pub enum UndefinedBehavior {
    /// Dereference or free of a poison pointer
    #[error("poison used as an address")]
    PoisonAddress,

    /// Branch on poison
    #[error("branch on poison")]
    PoisonBranch,

    /// Division or remainder with a poison divisor
    #[error("poison divisor")]
    PoisonDivisor,

    /// Division or remainder by zero
    #[error("division by zero")]
    DivisionByZero,

    /// Signed division overflow (`MIN / -1`)
    #[error("signed division overflow")]
    DivisionOverflow,

    /// Allocation size is poison
    #[error("poison allocation size")]
    PoisonSize,

    /// Dereference of null
    #[error("null dereference")]
    NullDereference,

    /// Access to a freed block
    #[error("use of freed block {0}")]
    UseAfterFree(BlockId),

    /// Access outside a block
    #[error("out-of-bounds access of {len} bytes at offset {offset} of {block}")]
    OutOfBounds {
        /// Accessed block
        block: BlockId,
        /// Offset of the access
        offset: u64,
        /// Length of the access
        len: u64,
    },

    /// Physical address not covered by any live block
    #[error("no live block at address 0x{0:x}")]
    NoBlockAtAddress(u64),

    /// Physical pointer used to access a block other than its owner
    #[error("pointer provenance does not match accessed block {0}")]
    ProvenanceMismatch(BlockId),

    /// Free of a pointer not returned by malloc
    #[error("invalid free: {0}")]
    InvalidFree(String),

    /// Free of an already freed block
    #[error("double free of {0}")]
    DoubleFree(BlockId),

    /// Operand of the wrong type
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// `unreachable` executed
    #[error("unreachable executed")]
    Unreachable,
}

/// Why the interpreter cannot make progress.
///
/// These indicate an ill-formed program or configuration rather than a
/// program behavior.
#[derive(Error, Debug, Clone, PartialEq, Eq, Hash)]
pub enum StuckReason {
    /// The call stack is empty
    #[error("empty call stack")]
    EmptyStack,

    /// A frame's call ID is not in the call table
    #[error("call ID not in the call table")]
    UnknownCall,

    /// Function lookup failed
    #[error("unknown function {0}")]
    UnknownFunction(FunctionId),

    /// The program counter does not address code
    #[error("invalid program counter {0}")]
    InvalidPc(Pc),

    /// Register read before being defined
    #[error("undefined register {0}")]
    UndefinedRegister(Reg),

    /// Branch to a label the function does not have
    #[error("unknown label '{0}'")]
    UnknownLabel(String),

    /// Phi node without an entry for the incoming edge
    #[error("phi {0} has no incoming value for the taken edge")]
    MissingPhiIncoming(Reg),

    /// Call with the wrong number of arguments
    #[error("call to {callee} with {got} arguments, expected {expected}")]
    ArityMismatch {
        /// Called function
        callee: FunctionId,
        /// Number of parameters
        expected: usize,
        /// Number of arguments supplied
        got: usize,
    },

    /// The oracle answered with a choice outside the offered options
    #[error("oracle choice not offered at this point")]
    InvalidChoice,

    /// Memory rejected an operation the interpreter had validated
    #[error("memory error: {0}")]
    Memory(MemError),
}

impl Error {
    /// Create an invalid-options error
    pub fn invalid_options(msg: impl Into<String>) -> Self {
        Error::InvalidOptions(msg.into())
    }

    /// Create an ill-formedness error
    pub fn ill_formed(msg: impl Into<String>) -> Self {
        Error::IllFormed(msg.into())
    }
}
