//! Programmatic construction of functions
//!
//! Text parsing is not part of this crate; tests, benchmarks and harnesses
//! build functions through [`FunctionBuilder`], which hands out fresh SSA
//! registers and checks the structural shape of the result.

use super::instruction::{BinOp, ICmpPred, Instruction, Operand, Phi, Reg, Terminator};
use super::program::{BasicBlock, FunctionDef, FunctionId};
use super::types::Ty;
use crate::{Error, Result};
use std::collections::HashSet;

/// Block under construction
#[derive(Debug)]
struct OpenBlock {
    label: String,
    phis: Vec<Phi>,
    instructions: Vec<Instruction>,
    terminator: Option<Terminator>,
}

/// Incremental function builder
#[derive(Debug)]
pub struct FunctionBuilder {
    name: String,
    params: Vec<(Reg, Ty)>,
    ret_ty: Ty,
    blocks: Vec<OpenBlock>,
    next_reg: u32,
}

impl FunctionBuilder {
    /// Starts a function with the given name and return type
    pub fn new(name: &str, ret_ty: Ty) -> Self {
        Self {
            name: name.to_string(),
            params: Vec::new(),
            ret_ty,
            blocks: Vec::new(),
            next_reg: 0,
        }
    }

    /// Allocates a fresh register
    pub fn fresh(&mut self) -> Reg {
        let reg = Reg(self.next_reg);
        self.next_reg += 1;
        reg
    }

    /// Declares the next parameter
    pub fn param(&mut self, ty: Ty) -> Reg {
        let reg = self.fresh();
        self.params.push((reg, ty));
        reg
    }

    /// Opens a new basic block; later instructions go into it
    pub fn block(&mut self, label: &str) -> &mut Self {
        self.blocks.push(OpenBlock {
            label: label.to_string(),
            phis: Vec::new(),
            instructions: Vec::new(),
            terminator: None,
        });
        self
    }

    fn current(&mut self) -> Result<&mut OpenBlock> {
        let name = self.name.clone();
        match self.blocks.last_mut() {
            Some(block) if block.terminator.is_none() => Ok(block),
            Some(block) => Err(Error::InvalidFunction {
                function: name,
                reason: format!("block '{}' is already terminated", block.label),
            }),
            None => Err(Error::InvalidFunction {
                function: name,
                reason: "no open block".to_string(),
            }),
        }
    }

    /// Appends a raw instruction
    pub fn push(&mut self, inst: Instruction) -> Result<()> {
        self.current()?.instructions.push(inst);
        Ok(())
    }

    fn push_def(&mut self, make: impl FnOnce(Reg) -> Instruction) -> Result<Reg> {
        let dst = self.fresh();
        self.push(make(dst))?;
        Ok(dst)
    }

    /// Appends a phi node to the current block
    pub fn phi(&mut self, ty: Ty, incoming: Vec<(Operand, &str)>) -> Result<Reg> {
        let dst = self.fresh();
        let incoming = incoming
            .into_iter()
            .map(|(op, label)| (op, label.to_string()))
            .collect();
        self.current()?.phis.push(Phi { dst, ty, incoming });
        Ok(dst)
    }

    /// `dst = op ty lhs, rhs`
    pub fn binop(&mut self, op: BinOp, ty: Ty, lhs: Operand, rhs: Operand) -> Result<Reg> {
        self.push_def(|dst| Instruction::BinOp {
            dst,
            op,
            ty,
            lhs,
            rhs,
        })
    }

    /// `dst = icmp pred ty lhs, rhs`
    pub fn icmp(&mut self, pred: ICmpPred, ty: Ty, lhs: Operand, rhs: Operand) -> Result<Reg> {
        self.push_def(|dst| Instruction::ICmp {
            dst,
            pred,
            ty,
            lhs,
            rhs,
        })
    }

    /// `dst = select cond, ty on_true, on_false`
    pub fn select(
        &mut self,
        cond: Operand,
        ty: Ty,
        on_true: Operand,
        on_false: Operand,
    ) -> Result<Reg> {
        self.push_def(|dst| Instruction::Select {
            dst,
            cond,
            ty,
            on_true,
            on_false,
        })
    }

    /// `dst = gep [inbounds] ty, ptr, idx`
    pub fn gep(&mut self, inbounds: bool, ty: Ty, ptr: Operand, idx: Operand) -> Result<Reg> {
        self.push_def(|dst| Instruction::Gep {
            dst,
            inbounds,
            ty,
            ptr,
            idx,
        })
    }

    /// `dst = psub ty lhs, rhs`
    pub fn psub(&mut self, ty: Ty, lhs: Operand, rhs: Operand) -> Result<Reg> {
        self.push_def(|dst| Instruction::Psub { dst, ty, lhs, rhs })
    }

    /// `dst = ptrtoint ptr to ty`
    pub fn ptrtoint(&mut self, ptr: Operand, ty: Ty) -> Result<Reg> {
        self.push_def(|dst| Instruction::PtrToInt { dst, ptr, ty })
    }

    /// `dst = inttoptr val to ty`
    pub fn inttoptr(&mut self, val: Operand, ty: Ty) -> Result<Reg> {
        self.push_def(|dst| Instruction::IntToPtr { dst, val, ty })
    }

    /// `dst = bitcast from val to to`
    pub fn bitcast(&mut self, from: Ty, val: Operand, to: Ty) -> Result<Reg> {
        self.push_def(|dst| Instruction::Bitcast { dst, from, val, to })
    }

    /// `dst = load ty, ptr`
    pub fn load(&mut self, ty: Ty, ptr: Operand) -> Result<Reg> {
        self.push_def(|dst| Instruction::Load { dst, ty, ptr })
    }

    /// `store ty val, ptr`
    pub fn store(&mut self, ty: Ty, val: Operand, ptr: Operand) -> Result<()> {
        self.push(Instruction::Store { ty, val, ptr })
    }

    /// `dst = malloc ty, count`
    pub fn malloc(&mut self, ty: Ty, count: Operand) -> Result<Reg> {
        self.push_def(|dst| Instruction::Malloc { dst, ty, count })
    }

    /// `dst = alloca ty, count`
    pub fn alloca(&mut self, ty: Ty, count: Operand) -> Result<Reg> {
        self.push_def(|dst| Instruction::Alloca { dst, ty, count })
    }

    /// `free ptr`
    pub fn free(&mut self, ptr: Operand) -> Result<()> {
        self.push(Instruction::Free { ptr })
    }

    /// `dst = call callee(args)`
    pub fn call(&mut self, callee: FunctionId, args: Vec<Operand>) -> Result<Reg> {
        self.push_def(|dst| Instruction::Call {
            dst: Some(dst),
            callee,
            args,
        })
    }

    /// Terminates the current block
    pub fn terminate(&mut self, terminator: Terminator) -> Result<()> {
        self.current()?.terminator = Some(terminator);
        Ok(())
    }

    /// `br label`
    pub fn br(&mut self, label: &str) -> Result<()> {
        self.terminate(Terminator::Br(label.to_string()))
    }

    /// `br cond, on_true, on_false`
    pub fn cond_br(&mut self, cond: Operand, on_true: &str, on_false: &str) -> Result<()> {
        self.terminate(Terminator::CondBr {
            cond,
            on_true: on_true.to_string(),
            on_false: on_false.to_string(),
        })
    }

    /// `ret val`
    pub fn ret(&mut self, val: Operand) -> Result<()> {
        self.terminate(Terminator::Ret(val))
    }

    /// `unreachable`
    pub fn unreachable(&mut self) -> Result<()> {
        self.terminate(Terminator::Unreachable)
    }

    /// Finishes the function, checking labels, terminators, types and single definitions
    pub fn build(self) -> Result<FunctionDef> {
        let invalid = |reason: String| Error::InvalidFunction {
            function: self.name.clone(),
            reason,
        };

        if self.blocks.is_empty() {
            return Err(invalid("function has no blocks".to_string()));
        }

        let mut labels = HashSet::new();
        for block in &self.blocks {
            if !labels.insert(block.label.as_str()) {
                return Err(invalid(format!("duplicate label '{}'", block.label)));
            }
        }

        let mut defined: HashSet<Reg> = self.params.iter().map(|(r, _)| *r).collect();
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for block in &self.blocks {
            let terminator = block
                .terminator
                .clone()
                .ok_or_else(|| invalid(format!("block '{}' has no terminator", block.label)))?;

            for target in terminator.successors() {
                if !labels.contains(target) {
                    return Err(invalid(format!("branch to unknown label '{}'", target)));
                }
            }

            for phi in &block.phis {
                if !phi.ty.is_valid() {
                    return Err(invalid(format!("phi {} has invalid type", phi.dst)));
                }
                if !defined.insert(phi.dst) {
                    return Err(invalid(format!("{} defined twice", phi.dst)));
                }
            }
            for inst in &block.instructions {
                if let Some(dst) = inst.def() {
                    if !defined.insert(dst) {
                        return Err(invalid(format!("{} defined twice", dst)));
                    }
                }
            }

            blocks.push(BasicBlock {
                label: block.label.clone(),
                phis: block.phis.clone(),
                instructions: block.instructions.clone(),
                terminator,
            });
        }

        Ok(FunctionDef {
            name: self.name,
            params: self.params,
            ret_ty: self.ret_ty,
            blocks,
        })
    }
}
