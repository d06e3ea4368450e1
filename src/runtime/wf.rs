//! Well-formedness of configurations
//!
//! A configuration is well-formed when its memory satisfies the block
//! invariants, every frame runs a known function at a valid program counter,
//! and every reachable pointer stays inside the address space and refers to
//! blocks that were actually allocated. Interpreter steps preserve this.

use super::state::Config;
use crate::ir::{ModuleTable, MAX_INT_BITS, PTR_BITS};
use crate::memory::{Bit, BlockKind, Memory};
use crate::value::{mask, Pointer, Value};
use crate::{Error, Result};
use std::collections::BTreeSet;

/// Returns true if `p` is within the address space and names existing blocks
pub fn pointer_wf(mem: &Memory, p: &Pointer) -> bool {
    let memsz = mem.config().memsz;
    match p {
        Pointer::Null => true,
        Pointer::Logical { block, offset } => *offset < memsz && mem.get(*block).is_some(),
        Pointer::Physical {
            addr,
            candidates,
            owner,
        } => {
            *addr < memsz
                && candidates.iter().all(|c| *c < memsz)
                && owner.map_or(true, |o| mem.get(o).is_some())
        }
    }
}

/// Returns true if `v` is a well-formed value
pub fn value_wf(mem: &Memory, v: &Value) -> bool {
    match v {
        Value::Num { width, bits } => {
            (1..=MAX_INT_BITS).contains(width) && bits & !mask(*width) == 0
        }
        Value::Ptr(p) => pointer_wf(mem, p),
        Value::Poison => true,
    }
}

/// Checks every well-formedness condition of `config`
pub fn check_config<M: ModuleTable + ?Sized>(module: &M, config: &Config) -> Result<()> {
    let mem = &config.memory;
    mem.check_invariants()?;

    if config.stack.is_empty() {
        return Err(Error::ill_formed("empty call stack"));
    }

    let mut seen = BTreeSet::new();
    for frame in &config.stack {
        if !seen.insert(frame.call_id) {
            return Err(Error::ill_formed(format!("{} appears twice", frame.call_id)));
        }
        if frame.call_id.0 >= config.next_call_id {
            return Err(Error::ill_formed(format!(
                "{} is not below the next call id",
                frame.call_id
            )));
        }
        let fid = config
            .call_table
            .get(&frame.call_id)
            .ok_or_else(|| Error::ill_formed(format!("{} not in call table", frame.call_id)))?;
        let func = module
            .lookup_function(*fid)
            .ok_or(Error::UnknownFunction(*fid))?;
        if !func.is_valid_pc(frame.pc) {
            return Err(Error::ill_formed(format!(
                "{} is not a valid pc of {}",
                frame.pc, func.name
            )));
        }
        if let Some((reg, _)) = frame.registers.iter().find(|(_, v)| !value_wf(mem, v)) {
            return Err(Error::ill_formed(format!("{} holds an ill-formed value", reg)));
        }
        for id in &frame.stack_blocks {
            let ok = mem
                .get(*id)
                .is_some_and(|b| b.kind == BlockKind::Stack && b.is_alive());
            if !ok {
                return Err(Error::ill_formed(format!("{} is not a live stack block", id)));
            }
        }
    }

    if config.call_table.keys().copied().collect::<BTreeSet<_>>() != seen {
        return Err(Error::ill_formed("call table does not match the stack"));
    }

    for block in mem.blocks() {
        let bad = block.bytes.iter().flat_map(|b| b.bits().iter()).any(|bit| match bit {
            Bit::Ptr(p, idx) => !pointer_wf(mem, p) || *idx >= PTR_BITS,
            _ => false,
        });
        if bad {
            return Err(Error::ill_formed(format!("{} stores an ill-formed pointer", block.id)));
        }
    }
    Ok(())
}
