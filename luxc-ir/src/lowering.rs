//! AST to CFG lowering
//!
//! Builds the pre-SSA IR for each function: named variables become
//! load/store of local slots (or global slots when the name is declared
//! at module scope), expressions become three-address instructions, and
//! structured control flow becomes explicit blocks and branches.
//!
//! The builder keeps exactly one open block at a time. A `return`
//! statement seals the open block and opens a fresh one, so statements
//! after it lower into a block nothing branches to; a final pruning pass
//! drops unreachable blocks and renumbers the rest.

use crate::ir::{BasicBlock, Function, Instruction, Module, Terminator, Value};
use luxc_common::{BinaryOp, BlockId, CompareOp, CompilerError, LocalId};
use luxc_frontend::ast::{Expr, Program, Stmt};
use std::collections::HashSet;

/// Lower a parsed program to an IR module
pub fn lower_program(program: &Program) -> Result<Module, CompilerError> {
    let mut module = Module::new();

    for name in program.globals() {
        if module.global_index(name).is_some() {
            return Err(CompilerError::parse(
                format!("duplicate global declaration `{}`", name),
                luxc_common::SourceLocation::dummy(),
            ));
        }
        module.globals.push(name.to_string());
    }

    let mut function_names: HashSet<String> = HashSet::new();
    for def in program.functions() {
        if !function_names.insert(def.name.clone()) {
            return Err(CompilerError::parse(
                format!("duplicate function definition `{}`", def.name),
                def.span.start.clone(),
            ));
        }
    }

    for def in program.functions() {
        let mut seen = HashSet::new();
        for param in &def.params {
            if !seen.insert(param.as_str()) {
                return Err(CompilerError::parse(
                    format!("duplicate parameter `{}` in function `{}`", param, def.name),
                    def.span.start.clone(),
                ));
            }
        }

        let lowerer = FunctionLowerer::new(&module, &function_names, def.name.clone(), def.params.clone());
        let func = lowerer.lower(&def.body)?;
        log::debug!(
            "lowered function `{}`: {} blocks, {} instructions",
            func.name,
            func.blocks.len(),
            func.instruction_count()
        );
        module.functions.push(func);
    }

    Ok(module)
}

struct FunctionLowerer<'a> {
    module: &'a Module,
    function_names: &'a HashSet<String>,
    func: Function,
    current: BlockId,
}

impl<'a> FunctionLowerer<'a> {
    fn new(
        module: &'a Module,
        function_names: &'a HashSet<String>,
        name: String,
        params: Vec<String>,
    ) -> Self {
        let mut func = Function::new(name, params);
        func.blocks.push(BasicBlock::new(0));

        // Parameters arrive as values 0..n; spill them to their local
        // slots so the body can treat them like any other variable.
        for i in 0..func.params.len() {
            func.blocks[0].instructions.push(Instruction::StoreLocal {
                slot: i as LocalId,
                value: Value::Temp(i as u32),
            });
        }

        Self {
            module,
            function_names,
            func,
            current: 0,
        }
    }

    fn lower(mut self, body: &[Stmt]) -> Result<Function, CompilerError> {
        self.lower_suite(body)?;
        // The open block keeps its placeholder `ret`, which is exactly
        // the implicit return at the end of the function.
        prune_unreachable(&mut self.func);
        Ok(self.func)
    }

    // -- block plumbing --

    fn new_block(&mut self) -> BlockId {
        let id = self.func.blocks.len() as BlockId;
        self.func.blocks.push(BasicBlock::new(id));
        id
    }

    fn emit(&mut self, inst: Instruction) {
        self.func.blocks[self.current as usize].instructions.push(inst);
    }

    fn seal(&mut self, terminator: Terminator) {
        self.func.blocks[self.current as usize].terminator = terminator;
    }

    // -- name resolution --
    //
    // A name declared `= Number()` at module scope is always the global
    // slot, even when a function assigns to it; everything else is a
    // function-local slot created on first mention.

    fn local_slot(&mut self, name: &str) -> LocalId {
        match self.func.locals.iter().position(|l| l == name) {
            Some(i) => i as LocalId,
            None => {
                self.func.locals.push(name.to_string());
                (self.func.locals.len() - 1) as LocalId
            }
        }
    }

    fn load_name(&mut self, name: &str) -> Value {
        if let Some(slot) = self.module.global_index(name) {
            let result = self.func.new_value();
            self.emit(Instruction::LoadGlobal { result, slot });
            Value::Temp(result)
        } else {
            let slot = self.local_slot(name);
            let result = self.func.new_value();
            self.emit(Instruction::LoadLocal { result, slot });
            Value::Temp(result)
        }
    }

    fn store_name(&mut self, name: &str, value: Value) {
        if let Some(slot) = self.module.global_index(name) {
            self.emit(Instruction::StoreGlobal { slot, value });
        } else {
            let slot = self.local_slot(name);
            self.emit(Instruction::StoreLocal { slot, value });
        }
    }

    // -- statements --

    fn lower_suite(&mut self, stmts: &[Stmt]) -> Result<(), CompilerError> {
        for stmt in stmts {
            self.lower_stmt(stmt)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), CompilerError> {
        match stmt {
            Stmt::Assign { target, value, .. } => {
                let value = self.lower_expr(value)?;
                self.store_name(target, value);
            }

            Stmt::AugAssign { target, op, value, .. } => {
                let old = self.load_name(target);
                let rhs = self.lower_expr(value)?;
                let result = self.func.new_value();
                self.emit(Instruction::Binary {
                    result,
                    op: *op,
                    lhs: old,
                    rhs,
                });
                self.store_name(target, Value::Temp(result));
            }

            Stmt::If {
                test,
                then_body,
                else_body,
                ..
            } => {
                let cond = self.lower_expr(test)?;
                let then_block = self.new_block();
                let else_block = if else_body.is_empty() {
                    None
                } else {
                    Some(self.new_block())
                };
                let join = self.new_block();

                self.seal(Terminator::CondBranch {
                    cond,
                    then_block,
                    else_block: else_block.unwrap_or(join),
                });

                self.current = then_block;
                self.lower_suite(then_body)?;
                self.seal(Terminator::Branch(join));

                if let Some(else_block) = else_block {
                    self.current = else_block;
                    self.lower_suite(else_body)?;
                    self.seal(Terminator::Branch(join));
                }

                // If both arms return, the join has no predecessors and
                // pruning removes it along with anything lowered after.
                self.current = join;
            }

            Stmt::While { test, body, .. } => {
                let header = self.new_block();
                self.seal(Terminator::Branch(header));
                self.current = header;

                let cond = self.lower_expr(test)?;
                let body_block = self.new_block();
                let exit_block = self.new_block();
                self.seal(Terminator::CondBranch {
                    cond,
                    then_block: body_block,
                    else_block: exit_block,
                });

                self.current = body_block;
                self.lower_suite(body)?;
                self.seal(Terminator::Branch(header));

                self.current = exit_block;
            }

            Stmt::For { var, count, body, .. } => {
                // The iteration count is evaluated once, before the loop.
                let limit = self.lower_expr(count)?;
                let var_slot = self.local_slot(var);
                self.emit(Instruction::StoreLocal {
                    slot: var_slot,
                    value: Value::Const(0),
                });

                let header = self.new_block();
                self.seal(Terminator::Branch(header));
                self.current = header;

                let cur = self.func.new_value();
                self.emit(Instruction::LoadLocal {
                    result: cur,
                    slot: var_slot,
                });
                let cond = self.func.new_value();
                self.emit(Instruction::Compare {
                    result: cond,
                    op: CompareOp::Lt,
                    lhs: Value::Temp(cur),
                    rhs: limit,
                });
                let body_block = self.new_block();
                let exit_block = self.new_block();
                self.seal(Terminator::CondBranch {
                    cond: Value::Temp(cond),
                    then_block: body_block,
                    else_block: exit_block,
                });

                self.current = body_block;
                self.lower_suite(body)?;

                let old = self.func.new_value();
                self.emit(Instruction::LoadLocal {
                    result: old,
                    slot: var_slot,
                });
                let next = self.func.new_value();
                self.emit(Instruction::Binary {
                    result: next,
                    op: BinaryOp::Add,
                    lhs: Value::Temp(old),
                    rhs: Value::Const(1),
                });
                self.emit(Instruction::StoreLocal {
                    slot: var_slot,
                    value: Value::Temp(next),
                });
                self.seal(Terminator::Branch(header));

                self.current = exit_block;
            }

            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => Some(self.lower_expr(expr)?),
                    None => None,
                };
                self.seal(Terminator::Return(value));
                // Anything lowered after this lands in an unreachable
                // block and is pruned.
                self.current = self.new_block();
            }

            Stmt::Fence { .. } => {
                self.emit(Instruction::Fence);
            }

            Stmt::Expr { expr, .. } => {
                self.lower_expr(expr)?;
            }

            Stmt::Pass { .. } => {}
        }
        Ok(())
    }

    // -- expressions --

    fn lower_expr(&mut self, expr: &Expr) -> Result<Value, CompilerError> {
        match expr {
            Expr::Int { value, .. } => Ok(Value::Const(*value)),

            Expr::Name { name, .. } => Ok(self.load_name(name)),

            Expr::Binary { op, lhs, rhs, .. } => {
                let lhs = self.lower_expr(lhs)?;
                let rhs = self.lower_expr(rhs)?;
                let result = self.func.new_value();
                self.emit(Instruction::Binary {
                    result,
                    op: *op,
                    lhs,
                    rhs,
                });
                Ok(Value::Temp(result))
            }

            Expr::Compare { op, lhs, rhs, .. } => {
                let lhs = self.lower_expr(lhs)?;
                let rhs = self.lower_expr(rhs)?;
                let result = self.func.new_value();
                self.emit(Instruction::Compare {
                    result,
                    op: *op,
                    lhs,
                    rhs,
                });
                Ok(Value::Temp(result))
            }

            Expr::Call { callee, args, .. } => {
                // `Number()` is the global declaration form, not a
                // callable; inside an expression it has no lowering.
                if callee == "Number" {
                    return Err(CompilerError::unsupported(
                        self.func.name.clone(),
                        "`Number()` outside a module-level declaration",
                    ));
                }
                if !self.function_names.contains(callee) {
                    return Err(CompilerError::undefined(
                        self.func.name.clone(),
                        callee.clone(),
                    ));
                }
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.lower_expr(arg)?);
                }
                let result = self.func.new_value();
                self.emit(Instruction::Call {
                    result,
                    callee: callee.clone(),
                    args: arg_values,
                });
                Ok(Value::Temp(result))
            }
        }
    }
}

/// Drop blocks unreachable from the entry and renumber the survivors
fn prune_unreachable(func: &mut Function) {
    let n = func.blocks.len();
    let mut reachable = vec![false; n];
    let mut stack = vec![0usize];
    reachable[0] = true;
    while let Some(b) = stack.pop() {
        for succ in func.blocks[b].terminator.successors() {
            if !reachable[succ as usize] {
                reachable[succ as usize] = true;
                stack.push(succ as usize);
            }
        }
    }
    if reachable.iter().all(|&r| r) {
        return;
    }

    let mut remap = vec![0 as BlockId; n];
    let mut next: BlockId = 0;
    for (i, &r) in reachable.iter().enumerate() {
        if r {
            remap[i] = next;
            next += 1;
        }
    }

    func.blocks.retain(|b| reachable[b.id as usize]);
    for block in &mut func.blocks {
        block.id = remap[block.id as usize];
        block.terminator.retarget(|t| remap[t as usize]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luxc_frontend::parse_source;
    use pretty_assertions::assert_eq;

    fn lower(source: &str) -> Module {
        let program = parse_source(source, "test.lux").expect("parse failed");
        lower_program(&program).expect("lowering failed")
    }

    #[test]
    fn test_global_assignment() {
        let module = lower("a = Number()\ndef init(p):\n    a = 5\n");
        assert_eq!(module.globals, vec!["a"]);
        let func = module.function("init").unwrap();
        assert_eq!(func.blocks.len(), 1);
        // param spill, then the store
        assert_eq!(
            func.blocks[0].instructions[1],
            Instruction::StoreGlobal {
                slot: 0,
                value: Value::Const(5)
            }
        );
    }

    #[test]
    fn test_aug_assign_loads_then_stores() {
        let module = lower("a = Number()\ndef init(p):\n    a += 2\n");
        let func = module.function("init").unwrap();
        let insts = &func.blocks[0].instructions;
        assert!(matches!(insts[1], Instruction::LoadGlobal { slot: 0, .. }));
        assert!(matches!(
            insts[2],
            Instruction::Binary {
                op: BinaryOp::Add,
                ..
            }
        ));
        assert!(matches!(insts[3], Instruction::StoreGlobal { slot: 0, .. }));
    }

    #[test]
    fn test_if_else_shape() {
        let module = lower(
            "a = Number()\ndef init(p):\n    if p > 0:\n        a = 1\n    else:\n        a = 2\n",
        );
        let func = module.function("init").unwrap();
        // entry, then, else, join
        assert_eq!(func.blocks.len(), 4);
        match &func.blocks[0].terminator {
            Terminator::CondBranch {
                then_block,
                else_block,
                ..
            } => {
                assert_ne!(then_block, else_block);
            }
            other => panic!("unexpected terminator {:?}", other),
        }
        assert_eq!(func.blocks[1].terminator, Terminator::Branch(3));
        assert_eq!(func.blocks[2].terminator, Terminator::Branch(3));
    }

    #[test]
    fn test_if_without_else_branches_to_join() {
        let module = lower("a = Number()\ndef init(p):\n    if p > 0:\n        a = 1\n    a = 2\n");
        let func = module.function("init").unwrap();
        // entry, then, join
        assert_eq!(func.blocks.len(), 3);
        match &func.blocks[0].terminator {
            Terminator::CondBranch { else_block, .. } => assert_eq!(*else_block, 2),
            other => panic!("unexpected terminator {:?}", other),
        }
    }

    #[test]
    fn test_while_loop_shape() {
        let module = lower(
            "i = Number()\ndef init(p):\n    while i > 0:\n        i -= 1\n",
        );
        let func = module.function("init").unwrap();
        // entry, header, body, exit
        assert_eq!(func.blocks.len(), 4);
        assert_eq!(func.blocks[0].terminator, Terminator::Branch(1));
        assert_eq!(func.blocks[2].terminator, Terminator::Branch(1));
    }

    #[test]
    fn test_for_loop_counts_from_zero() {
        let module = lower("a = Number()\ndef init(p):\n    for x in 3:\n        a += 1\n");
        let func = module.function("init").unwrap();
        // x initialized to 0 in the entry block
        assert!(func.blocks[0].instructions.iter().any(|i| matches!(
            i,
            Instruction::StoreLocal {
                value: Value::Const(0),
                ..
            }
        )));
        // header compares with Lt against the limit
        assert!(func.blocks[1].instructions.iter().any(|i| matches!(
            i,
            Instruction::Compare {
                op: CompareOp::Lt,
                rhs: Value::Const(3),
                ..
            }
        )));
    }

    #[test]
    fn test_return_prunes_trailing_code() {
        let module = lower("a = Number()\ndef init(p):\n    return 1\n    a = 9\n");
        let func = module.function("init").unwrap();
        assert_eq!(func.blocks.len(), 1);
        assert_eq!(
            func.blocks[0].terminator,
            Terminator::Return(Some(Value::Const(1)))
        );
        assert!(!func.blocks[0]
            .instructions
            .iter()
            .any(|i| matches!(i, Instruction::StoreGlobal { .. })));
    }

    #[test]
    fn test_both_arms_return_prunes_join() {
        let module = lower(
            "def init(p):\n    if p > 0:\n        return 1\n    else:\n        return 2\n",
        );
        let func = module.function("init").unwrap();
        // entry, then, else; the join is unreachable and pruned
        assert_eq!(func.blocks.len(), 3);
        for block in &func.blocks {
            func.verify().unwrap();
            assert!(block.terminator.successors().iter().all(|&s| s < 3));
        }
    }

    #[test]
    fn test_params_spilled_to_slots() {
        let module = lower("def init(p):\n    return p\n");
        let func = module.function("init").unwrap();
        assert_eq!(
            func.blocks[0].instructions[0],
            Instruction::StoreLocal {
                slot: 0,
                value: Value::Temp(0)
            }
        );
        assert!(matches!(
            func.blocks[0].instructions[1],
            Instruction::LoadLocal { slot: 0, .. }
        ));
    }

    #[test]
    fn test_fence_statement() {
        let module = lower("a = Number()\ndef init(p):\n    a = 1\n    fence()\n");
        let func = module.function("init").unwrap();
        assert!(func.blocks[0]
            .instructions
            .iter()
            .any(|i| matches!(i, Instruction::Fence)));
    }

    #[test]
    fn test_call_lowering_and_unknown_callee() {
        let module = lower("def helper(x):\n    return x\ndef init(p):\n    helper(p)\n");
        let func = module.function("init").unwrap();
        assert!(func.blocks[0]
            .instructions
            .iter()
            .any(|i| matches!(i, Instruction::Call { .. })));

        let program = parse_source("def init(p):\n    missing(p)\n", "test.lux").unwrap();
        let err = lower_program(&program).unwrap_err();
        assert!(matches!(err, CompilerError::UndefinedVariable { .. }));
    }

    #[test]
    fn test_number_in_expression_rejected() {
        let program =
            parse_source("def init(p):\n    a = Number() + 1\n", "test.lux").unwrap();
        let err = lower_program(&program).unwrap_err();
        assert!(matches!(err, CompilerError::UnsupportedConstruct { .. }));
    }

    #[test]
    fn test_duplicate_global_rejected() {
        let program =
            parse_source("a = Number()\na = Number()\ndef init(p):\n    pass\n", "test.lux")
                .unwrap();
        assert!(lower_program(&program).is_err());
    }

    #[test]
    fn test_lowered_ir_verifies() {
        let module = lower(
            "a = Number()\nb = Number()\ndef init(p):\n    for x in 10:\n        if x > 5:\n            a += x\n        else:\n            b += 1\n",
        );
        for func in &module.functions {
            func.verify().unwrap();
        }
    }
}
