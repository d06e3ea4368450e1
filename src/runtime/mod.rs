//! # Runtime
//!
//! Executable semantics for the IR over the provenance-tracking memory.
//!
//! ## Module Structure
//!
//! ```text
//! runtime/
//! ├── mod.rs      # This file - module definition and re-exports
//! ├── state.rs    # Frame, Config, CallId
//! ├── oracle.rs   # ChoicePoint, Choice, ChoiceOracle and stock oracles
//! ├── step.rs     # step, successors: one transition
//! ├── exec.rs     # nstep, run, explore: traces and their equivalence
//! └── wf.rs       # configuration well-formedness
//! ```
//!
//! ## Example
//!
//! ```rust
//! use provir::ir::{FunctionBuilder, Module, Operand, Ty};
//! use provir::memory::MemConfig;
//! use provir::runtime::{run, Config, FirstFit, Outcome};
//! use provir::Value;
//!
//! let mut fb = FunctionBuilder::new("main", Ty::i32());
//! fb.block("entry");
//! let p = fb.malloc(Ty::i32(), Operand::int(32, 1))?;
//! fb.store(Ty::i32(), Operand::int(32, 42), Operand::Reg(p))?;
//! let v = fb.load(Ty::i32(), Operand::Reg(p))?;
//! fb.free(Operand::Reg(p))?;
//! fb.ret(Operand::Reg(v))?;
//!
//! let mut module = Module::new();
//! let main = module.add_function(fb.build()?);
//! let config = Config::new(&module, main, vec![], MemConfig::default())?;
//! let trace = run(&module, &config, &mut FirstFit, 100);
//! assert_eq!(trace.outcome, Outcome::Finished(Value::num(32, 42)));
//! # Ok::<(), provir::Error>(())
//! ```

mod exec;
mod oracle;
mod state;
mod step;
pub mod wf;

pub use exec::{explore, nstep, nstep_all, nstep_eq, refines, run, Outcome, Trace};
pub use oracle::{Choice, ChoiceOracle, ChoicePoint, FirstFit, Recording, Scripted};
pub use state::{CallId, Config, Frame};
pub use step::{step, successors, Event, StepResult};
