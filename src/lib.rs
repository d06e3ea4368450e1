#![warn(missing_docs)]
//! # provir - Provenance-Aware IR Semantics
//!
//! An executable semantics for a small LLVM-like IR over a memory model that
//! tracks pointer *provenance*: which allocation a pointer was derived from.
//! Casting pointers to integers and comparing dangling pointers are
//! non-deterministic rather than undefined, and the crate provides checkers
//! that decide whether local transformations preserve behavior under that
//! model.
//!
//! ## Features
//!
//! - **Block memory** - byte-level storage with symbolic pointer bits,
//!   never-reused block IDs and disjoint twin reservations
//! - **Small-step interpreter** - one step at a time, with every
//!   non-deterministic decision delegated to a [`runtime::ChoiceOracle`]
//! - **Exhaustive exploration** - all successors of a step, all traces of a
//!   bounded run
//! - **Reordering checker** - static commute table plus dynamic validation
//!   of a swap from a concrete state
//! - **Twin execution** - lock-step comparison of two allocator placements
//!
//! ## Quick Start
//!
//! ```rust
//! use provir::ir::{BinOp, FunctionBuilder, Module, Operand, Ty};
//! use provir::runtime::{run, Config, FirstFit, Outcome};
//! use provir::{ExecOptions, Value};
//!
//! # fn main() -> provir::Result<()> {
//! let mut fb = FunctionBuilder::new("main", Ty::i32());
//! fb.block("entry");
//! let p = fb.malloc(Ty::i32(), Operand::int(32, 2))?;
//! let q = fb.gep(true, Ty::i32(), Operand::Reg(p), Operand::int(32, 1))?;
//! fb.store(Ty::i32(), Operand::int(32, 7), Operand::Reg(q))?;
//! let v = fb.load(Ty::i32(), Operand::Reg(q))?;
//! let w = fb.binop(BinOp::Mul, Ty::i32(), Operand::Reg(v), Operand::int(32, 6))?;
//! fb.free(Operand::Reg(p))?;
//! fb.ret(Operand::Reg(w))?;
//!
//! let mut module = Module::new();
//! let main = module.add_function(fb.build()?);
//!
//! let opts = ExecOptions::default();
//! let config = Config::new(&module, main, vec![], opts.mem_config())?;
//! let trace = run(&module, &config, &mut FirstFit, opts.step_budget);
//! assert_eq!(trace.outcome, Outcome::Finished(Value::num(32, 42)));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! FunctionBuilder → Module ─┐
//!                           ├→ step ─→ nstep / run / explore ─→ Trace
//! Config (Memory, Stack) ───┘                                    │
//!                                  reorder::validate_swap ←──────┤
//!                                  twin::compare ←───────────────┘
//! ```
//!
//! ### Main Components
//!
//! - [`ir`] - types, instructions, functions and the module table
//! - [`memory`] - blocks, bytes, the value codec and the allocator
//! - [`value`] - runtime values and provenance-carrying pointers
//! - [`runtime`] - configurations, the interpreter and traces
//! - [`transform`] - reordering and twin-execution checkers
//! - [`ExecOptions`] - address-space size, alignment and budgets
//!
//! ## Logging
//!
//! The crate emits [`tracing`] events (`trace` per step, `debug` for
//! allocation and checker verdicts) and installs no subscriber.

/// Version of the provir crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod error;
pub mod ir;
pub mod memory;
pub mod options;
pub mod runtime;
pub mod transform;
pub mod value;

// Re-export main types
pub use error::{Error, Result, StuckReason, UndefinedBehavior};
pub use memory::{MemConfig, Memory};
pub use options::ExecOptions;
pub use runtime::{Config, Outcome, StepResult, Trace};
pub use value::{Pointer, Value};
