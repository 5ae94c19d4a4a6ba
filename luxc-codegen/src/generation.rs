//! CFG to bytecode flattening
//!
//! Each SSA value gets a frame register (parameters are pinned to
//! registers `0..n_params`), constants are materialized with `ldc` at
//! their uses, and blocks are laid out in index order with jump targets
//! backpatched once every block's offset is known.
//!
//! Phi nodes are destructed on the incoming edges: the moves for an
//! edge are emitted in the predecessor, just before its jump. A
//! conditional branch whose taken and fall-through edges need different
//! moves gets a small stub in the instruction stream for the second
//! edge, so edges are effectively split at emission time. Move groups
//! are resolved as parallel moves; register cycles are broken with one
//! scratch register per function.

use crate::ops::{FuncInfo, Op, Program, Reg};
use luxc_common::{BlockId, CompilerError, ValueId};
use luxc_ir::{Function, Instruction, Module, Terminator, Value};
use std::collections::{HashMap, HashSet};

/// Compile an IR module to a bytecode program
pub fn generate(module: &Module) -> Result<Program, CompilerError> {
    let mut program = Program {
        code: Vec::new(),
        globals: module.globals.clone(),
        functions: Vec::new(),
    };
    for func in &module.functions {
        let info = FunctionGen::new(module, func).generate(&mut program.code)?;
        log::debug!(
            "codegen `{}`: {} ops, {} regs",
            info.name,
            program.code.len() - info.entry,
            info.n_regs
        );
        program.functions.push(info);
    }
    Ok(program)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MoveSrc {
    Reg(Reg),
    Const(i32),
}

struct FunctionGen<'a> {
    module: &'a Module,
    func: &'a Function,
    regs: HashMap<ValueId, Reg>,
    next_reg: Reg,
    offsets: Vec<usize>,
    fixups: Vec<(usize, BlockId)>,
}

impl<'a> FunctionGen<'a> {
    fn new(module: &'a Module, func: &'a Function) -> Self {
        // Pre-assign a register to every defined value so operands can
        // be resolved regardless of block order (loop-carried phi
        // inputs name values from later blocks).
        let mut regs = HashMap::new();
        let mut next_reg: Reg = 0;
        for i in 0..func.params.len() {
            regs.insert(i as ValueId, next_reg);
            next_reg += 1;
        }
        for block in &func.blocks {
            for inst in &block.instructions {
                if let Some(result) = inst.result() {
                    regs.insert(result, next_reg);
                    next_reg += 1;
                }
            }
        }
        Self {
            module,
            func,
            regs,
            next_reg,
            offsets: vec![0; func.blocks.len()],
            fixups: Vec::new(),
        }
    }

    fn generate(mut self, code: &mut Vec<Op>) -> Result<FuncInfo, CompilerError> {
        let entry = code.len();

        let func = self.func;
        for block in &func.blocks {
            self.offsets[block.id as usize] = code.len();
            for inst in &block.instructions {
                self.emit_instruction(inst, code)?;
            }
            self.emit_terminator(block.id, &block.terminator, code)?;
        }

        for &(index, block) in &self.fixups {
            let target = self.offsets[block as usize];
            match &mut code[index] {
                Op::Jmp { target: t } | Op::Jz { target: t, .. } => *t = target,
                other => {
                    return Err(self.invariant(format!("fixup points at non-jump op {}", other)))
                }
            }
        }

        Ok(FuncInfo {
            name: self.func.name.clone(),
            entry,
            n_params: self.func.params.len(),
            n_locals: self.func.locals.len(),
            n_regs: self.next_reg as usize,
        })
    }

    fn emit_instruction(
        &mut self,
        inst: &Instruction,
        code: &mut Vec<Op>,
    ) -> Result<(), CompilerError> {
        match inst {
            Instruction::Binary { result, op, lhs, rhs } => {
                let lhs = self.operand_reg(lhs, code)?;
                let rhs = self.operand_reg(rhs, code)?;
                let dst = self.result_reg(*result)?;
                code.push(Op::Bin {
                    op: *op,
                    dst,
                    lhs,
                    rhs,
                });
            }
            Instruction::Compare { result, op, lhs, rhs } => {
                let lhs = self.operand_reg(lhs, code)?;
                let rhs = self.operand_reg(rhs, code)?;
                let dst = self.result_reg(*result)?;
                code.push(Op::Cmp {
                    op: *op,
                    dst,
                    lhs,
                    rhs,
                });
            }
            Instruction::LoadGlobal { result, slot } => {
                let dst = self.result_reg(*result)?;
                code.push(Op::Ldg { dst, slot: *slot });
            }
            Instruction::StoreGlobal { slot, value } => {
                let src = self.operand_reg(value, code)?;
                code.push(Op::Stg { slot: *slot, src });
            }
            Instruction::LoadLocal { result, slot } => {
                let dst = self.result_reg(*result)?;
                code.push(Op::Ldl { dst, slot: *slot });
            }
            Instruction::StoreLocal { slot, value } => {
                let src = self.operand_reg(value, code)?;
                code.push(Op::Stl { slot: *slot, src });
            }
            Instruction::Phi { .. } => {
                // Destructed on the incoming edges.
            }
            Instruction::Call { result, callee, args } => {
                let func = self
                    .module
                    .function_index(callee)
                    .ok_or_else(|| self.invariant(format!("call to unknown function `{}`", callee)))?;
                let mut arg_regs = Vec::with_capacity(args.len());
                for arg in args {
                    arg_regs.push(self.operand_reg(arg, code)?);
                }
                let dst = self.result_reg(*result)?;
                code.push(Op::Call {
                    dst,
                    func,
                    args: arg_regs,
                });
            }
            Instruction::Fence => code.push(Op::Fence),
        }
        Ok(())
    }

    fn emit_terminator(
        &mut self,
        block: BlockId,
        terminator: &Terminator,
        code: &mut Vec<Op>,
    ) -> Result<(), CompilerError> {
        match terminator {
            Terminator::Branch(target) => {
                let moves = self.edge_moves(block, *target)?;
                self.emit_moves(moves, code)?;
                self.fixups.push((code.len(), *target));
                code.push(Op::Jmp { target: 0 });
            }
            Terminator::CondBranch {
                cond,
                then_block,
                else_block,
            } => {
                let cond = self.operand_reg(cond, code)?;
                let then_moves = self.edge_moves(block, *then_block)?;
                let else_moves = self.edge_moves(block, *else_block)?;

                if else_moves.is_empty() {
                    self.fixups.push((code.len(), *else_block));
                    code.push(Op::Jz { cond, target: 0 });
                    self.emit_moves(then_moves, code)?;
                    self.fixups.push((code.len(), *then_block));
                    code.push(Op::Jmp { target: 0 });
                } else {
                    // The else edge needs moves of its own: give it a
                    // stub right after the taken path's jump.
                    let jz_at = code.len();
                    code.push(Op::Jz { cond, target: 0 });
                    self.emit_moves(then_moves, code)?;
                    self.fixups.push((code.len(), *then_block));
                    code.push(Op::Jmp { target: 0 });

                    let stub = code.len();
                    if let Op::Jz { target, .. } = &mut code[jz_at] {
                        *target = stub;
                    }
                    self.emit_moves(else_moves, code)?;
                    self.fixups.push((code.len(), *else_block));
                    code.push(Op::Jmp { target: 0 });
                }
            }
            Terminator::Return(value) => {
                let src = match value {
                    Some(value) => Some(self.operand_reg(value, code)?),
                    None => None,
                };
                code.push(Op::Ret { src });
            }
        }
        Ok(())
    }

    /// Moves required on the edge `from -> to`, one per phi in `to`
    fn edge_moves(&self, from: BlockId, to: BlockId) -> Result<Vec<(Reg, MoveSrc)>, CompilerError> {
        let mut moves = Vec::new();
        for inst in &self.func.blocks[to as usize].instructions {
            let Instruction::Phi { result, incoming } = inst else {
                // Phis are grouped at the block head.
                break;
            };
            let Some((value, _)) = incoming.iter().find(|(_, pred)| *pred == from) else {
                return Err(self.invariant(format!(
                    "phi %{} in bb{} has no input for predecessor bb{}",
                    result, to, from
                )));
            };
            let dst = self.result_reg(*result)?;
            match value {
                Value::Temp(id) => {
                    let src = self.value_reg(*id)?;
                    if src != dst {
                        moves.push((dst, MoveSrc::Reg(src)));
                    }
                }
                Value::Const(c) => moves.push((dst, MoveSrc::Const(*c))),
                // An undef input marks a path on which the value is
                // never used; the register keeps whatever it holds.
                Value::Undef => {}
            }
        }
        Ok(moves)
    }

    /// Emit a parallel move group, breaking register cycles with a
    /// scratch register
    fn emit_moves(
        &mut self,
        mut pending: Vec<(Reg, MoveSrc)>,
        code: &mut Vec<Op>,
    ) -> Result<(), CompilerError> {
        while !pending.is_empty() {
            let safe = pending.iter().position(|&(dst, _)| {
                !pending
                    .iter()
                    .any(|&(_, src)| src == MoveSrc::Reg(dst))
            });
            match safe {
                Some(i) => {
                    let (dst, src) = pending.remove(i);
                    match src {
                        MoveSrc::Reg(src) => code.push(Op::Mov { dst, src }),
                        MoveSrc::Const(value) => code.push(Op::Ldc { dst, value }),
                    }
                }
                None => {
                    // Every destination is still read by another move:
                    // a cycle. Park one of the contested registers in
                    // the scratch register to cut it.
                    let dsts: HashSet<Reg> = pending.iter().map(|&(dst, _)| dst).collect();
                    let contested = pending.iter().find_map(|&(_, src)| match src {
                        MoveSrc::Reg(r) if dsts.contains(&r) => Some(r),
                        _ => None,
                    });
                    let Some(contested) = contested else {
                        return Err(
                            self.invariant("parallel move group wedged with no cycle".to_string())
                        );
                    };
                    let scratch = self.next_reg;
                    self.next_reg += 1;
                    code.push(Op::Mov {
                        dst: scratch,
                        src: contested,
                    });
                    for (_, src) in &mut pending {
                        if *src == MoveSrc::Reg(contested) {
                            *src = MoveSrc::Reg(scratch);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn operand_reg(&mut self, value: &Value, code: &mut Vec<Op>) -> Result<Reg, CompilerError> {
        match value {
            Value::Temp(id) => self.value_reg(*id),
            Value::Const(c) => {
                let dst = self.next_reg;
                self.next_reg += 1;
                code.push(Op::Ldc { dst, value: *c });
                Ok(dst)
            }
            Value::Undef => Err(self.invariant("undef operand survived to codegen".to_string())),
        }
    }

    fn value_reg(&self, id: ValueId) -> Result<Reg, CompilerError> {
        self.regs
            .get(&id)
            .copied()
            .ok_or_else(|| self.invariant(format!("use of %{} which has no definition", id)))
    }

    fn result_reg(&self, id: ValueId) -> Result<Reg, CompilerError> {
        self.value_reg(id)
    }

    fn invariant(&self, message: String) -> CompilerError {
        CompilerError::invariant(
            format!("codegen `{}`: {}", self.func.name, message),
            self.func.to_string(),
        )
    }
}
