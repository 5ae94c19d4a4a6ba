//! Intermediate Representation for the Lux compiler
//!
//! A per-function control-flow graph of basic blocks holding simple
//! three-address instructions. Before SSA construction, function-local
//! variables are named storage slots accessed through `LoadLocal`/
//! `StoreLocal`; SSA promotes them to value dataflow with phis. Module
//! globals always stay in `LoadGlobal`/`StoreGlobal` form: they are the
//! only state an external observer can see, and keeping them as explicit
//! memory operations is what makes the `Fence` barrier meaningful.

use luxc_common::{BinaryOp, BlockId, CompareOp, GlobalId, LocalId, ValueId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An operand: either a literal constant or a reference to an
/// instruction's result. Values are immutable once defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    /// Result of the instruction that defined this id
    Temp(ValueId),
    /// Literal constant
    Const(i32),
    /// No definition reaches this use (only ever appears transiently
    /// during SSA construction; a surviving direct use is an error)
    Undef,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Temp(id) => write!(f, "%{}", id),
            Value::Const(v) => write!(f, "{}", v),
            Value::Undef => write!(f, "undef"),
        }
    }
}

/// IR instruction. Value-producing variants carry a `result` id that is
/// unique within the function once SSA construction has run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instruction {
    /// result = op lhs, rhs
    Binary {
        result: ValueId,
        op: BinaryOp,
        lhs: Value,
        rhs: Value,
    },

    /// result = op lhs, rhs (yields 1 or 0)
    Compare {
        result: ValueId,
        op: CompareOp,
        lhs: Value,
        rhs: Value,
    },

    /// result = load module-global slot
    LoadGlobal { result: ValueId, slot: GlobalId },

    /// store value to module-global slot
    StoreGlobal { slot: GlobalId, value: Value },

    /// result = load function-local slot (pre-SSA only)
    LoadLocal { result: ValueId, slot: LocalId },

    /// store value to function-local slot (pre-SSA only)
    StoreLocal { slot: LocalId, value: Value },

    /// Merge-point pseudo-instruction: one incoming value per
    /// predecessor edge, in predecessor order.
    Phi {
        result: ValueId,
        incoming: Vec<(Value, BlockId)>,
    },

    /// result = call callee(args)
    Call {
        result: ValueId,
        callee: String,
        args: Vec<Value>,
    },

    /// Full ordering barrier: no load or store may move across it in
    /// either direction, by any pass.
    Fence,
}

impl Instruction {
    /// The value id this instruction defines, if any
    pub fn result(&self) -> Option<ValueId> {
        match self {
            Instruction::Binary { result, .. }
            | Instruction::Compare { result, .. }
            | Instruction::LoadGlobal { result, .. }
            | Instruction::LoadLocal { result, .. }
            | Instruction::Phi { result, .. }
            | Instruction::Call { result, .. } => Some(*result),
            Instruction::StoreGlobal { .. } | Instruction::StoreLocal { .. } | Instruction::Fence => {
                None
            }
        }
    }

    /// Whether this instruction is free of side effects and memory reads
    pub fn is_pure(&self) -> bool {
        matches!(self, Instruction::Binary { .. } | Instruction::Compare { .. })
    }

    /// Apply `f` to every operand value of this instruction.
    /// Phi incoming values are included.
    pub fn visit_values_mut(&mut self, mut f: impl FnMut(&mut Value)) {
        match self {
            Instruction::Binary { lhs, rhs, .. } | Instruction::Compare { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            Instruction::StoreGlobal { value, .. } | Instruction::StoreLocal { value, .. } => {
                f(value);
            }
            Instruction::Phi { incoming, .. } => {
                for (value, _) in incoming {
                    f(value);
                }
            }
            Instruction::Call { args, .. } => {
                for arg in args {
                    f(arg);
                }
            }
            Instruction::LoadGlobal { .. } | Instruction::LoadLocal { .. } | Instruction::Fence => {}
        }
    }

    /// Apply `f` to every operand value of this instruction (read-only)
    pub fn visit_values(&self, mut f: impl FnMut(&Value)) {
        match self {
            Instruction::Binary { lhs, rhs, .. } | Instruction::Compare { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            Instruction::StoreGlobal { value, .. } | Instruction::StoreLocal { value, .. } => {
                f(value);
            }
            Instruction::Phi { incoming, .. } => {
                for (value, _) in incoming {
                    f(value);
                }
            }
            Instruction::Call { args, .. } => {
                for arg in args {
                    f(arg);
                }
            }
            Instruction::LoadGlobal { .. } | Instruction::LoadLocal { .. } | Instruction::Fence => {}
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Binary { result, op, lhs, rhs } => {
                write!(f, "%{} = {} {}, {}", result, op, lhs, rhs)
            }
            Instruction::Compare { result, op, lhs, rhs } => {
                write!(f, "%{} = cmp.{} {}, {}", result, op, lhs, rhs)
            }
            Instruction::LoadGlobal { result, slot } => write!(f, "%{} = ldg @{}", result, slot),
            Instruction::StoreGlobal { slot, value } => write!(f, "stg @{}, {}", slot, value),
            Instruction::LoadLocal { result, slot } => write!(f, "%{} = ldl ${}", result, slot),
            Instruction::StoreLocal { slot, value } => write!(f, "stl ${}, {}", slot, value),
            Instruction::Phi { result, incoming } => {
                write!(f, "%{} = phi", result)?;
                for (i, (value, block)) in incoming.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " [{}, bb{}]", value, block)?;
                }
                Ok(())
            }
            Instruction::Call { result, callee, args } => {
                write!(f, "%{} = call {}(", result, callee)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Instruction::Fence => write!(f, "fence"),
        }
    }
}

/// Every block ends in exactly one terminator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Terminator {
    /// Unconditional branch
    Branch(BlockId),

    /// Branch to `then_block` when `cond` is nonzero, else `else_block`
    CondBranch {
        cond: Value,
        then_block: BlockId,
        else_block: BlockId,
    },

    /// Return from the function
    Return(Option<Value>),
}

impl Terminator {
    /// Apply `f` to the condition / return operand, if present
    pub fn visit_values_mut(&mut self, mut f: impl FnMut(&mut Value)) {
        match self {
            Terminator::CondBranch { cond, .. } => f(cond),
            Terminator::Return(Some(value)) => f(value),
            Terminator::Branch(_) | Terminator::Return(None) => {}
        }
    }

    /// Successor block ids, in branch order (then before else)
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Branch(target) => vec![*target],
            Terminator::CondBranch {
                then_block,
                else_block,
                ..
            } => {
                if then_block == else_block {
                    vec![*then_block]
                } else {
                    vec![*then_block, *else_block]
                }
            }
            Terminator::Return(_) => Vec::new(),
        }
    }

    /// Rewrite every successor id through `f`
    pub fn retarget(&mut self, mut f: impl FnMut(BlockId) -> BlockId) {
        match self {
            Terminator::Branch(target) => *target = f(*target),
            Terminator::CondBranch {
                then_block,
                else_block,
                ..
            } => {
                *then_block = f(*then_block);
                *else_block = f(*else_block);
            }
            Terminator::Return(_) => {}
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Branch(target) => write!(f, "br bb{}", target),
            Terminator::CondBranch {
                cond,
                then_block,
                else_block,
            } => write!(f, "br {}, bb{}, bb{}", cond, then_block, else_block),
            Terminator::Return(Some(value)) => write!(f, "ret {}", value),
            Terminator::Return(None) => write!(f, "ret"),
        }
    }
}

/// A basic block: instructions plus one terminator. Blocks are addressed
/// by their index within the function; predecessor/successor edges are
/// derived from terminators by the analysis module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub id: BlockId,
    pub instructions: Vec<Instruction>,
    pub terminator: Terminator,
}

impl BasicBlock {
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            instructions: Vec::new(),
            // Placeholder until lowering installs the real terminator.
            terminator: Terminator::Return(None),
        }
    }
}

/// A function: parameters, local slot table, and a CFG with block 0 as
/// the entry. Parameter values occupy value ids `0..params.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    /// Names of local slots; the first `params.len()` entries are the
    /// parameters themselves.
    pub locals: Vec<String>,
    pub blocks: Vec<BasicBlock>,
    /// Next unassigned value id
    pub next_value: ValueId,
}

impl Function {
    pub fn new(name: String, params: Vec<String>) -> Self {
        let locals = params.clone();
        let next_value = params.len() as ValueId;
        Self {
            name,
            params,
            locals,
            blocks: Vec::new(),
            next_value,
        }
    }

    pub fn new_value(&mut self) -> ValueId {
        let id = self.next_value;
        self.next_value += 1;
        id
    }

    pub fn entry(&self) -> BlockId {
        0
    }

    /// Total instruction count across all blocks (terminators excluded).
    /// Used by idempotence checks and pass statistics.
    pub fn instruction_count(&self) -> usize {
        self.blocks.iter().map(|b| b.instructions.len()).sum()
    }

    /// Check structural invariants: terminator targets in range, phi
    /// arity matching the predecessor count. Returns a human-readable
    /// description of the first violation found.
    pub fn verify(&self) -> Result<(), String> {
        let n = self.blocks.len() as BlockId;
        for block in &self.blocks {
            for target in block.terminator.successors() {
                if target >= n {
                    return Err(format!(
                        "bb{}: terminator targets bb{} but function has {} blocks",
                        block.id, target, n
                    ));
                }
            }
        }

        // Predecessor sets (dedicated analysis not used here to keep
        // verify self-contained).
        let mut preds: Vec<Vec<BlockId>> = vec![Vec::new(); self.blocks.len()];
        for block in &self.blocks {
            for succ in block.terminator.successors() {
                if !preds[succ as usize].contains(&block.id) {
                    preds[succ as usize].push(block.id);
                }
            }
        }

        for block in &self.blocks {
            for inst in &block.instructions {
                if let Instruction::Phi { result, incoming } = inst {
                    let expected = preds[block.id as usize].len();
                    if incoming.len() != expected {
                        return Err(format!(
                            "bb{}: phi %{} has {} incoming values but block has {} predecessors",
                            block.id,
                            result,
                            incoming.len(),
                            expected
                        ));
                    }
                    for (_, pred) in incoming {
                        if !preds[block.id as usize].contains(pred) {
                            return Err(format!(
                                "bb{}: phi %{} names bb{} which is not a predecessor",
                                block.id, result, pred
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Rewrite every operand in the function through the substitution
    /// `f`, chasing chains until a fixed point per operand.
    pub fn rewrite_values(&mut self, subst: &std::collections::HashMap<ValueId, Value>) {
        let resolve = |value: &mut Value| {
            let mut guard = 0;
            while let Value::Temp(id) = value {
                match subst.get(id) {
                    Some(next) => {
                        *value = *next;
                        guard += 1;
                        // Substitution chains are acyclic; the guard only
                        // protects against a buggy pass feeding us a cycle.
                        if guard > 1024 {
                            break;
                        }
                    }
                    None => break,
                }
            }
        };
        for block in &mut self.blocks {
            for inst in &mut block.instructions {
                inst.visit_values_mut(resolve);
            }
            block.terminator.visit_values_mut(resolve);
        }
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn {}(", self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: %{}", param, i)?;
        }
        writeln!(f, ")")?;
        for block in &self.blocks {
            writeln!(f, "bb{}:", block.id)?;
            for inst in &block.instructions {
                writeln!(f, "  {}", inst)?;
            }
            writeln!(f, "  {}", block.terminator)?;
        }
        Ok(())
    }
}

/// A compiled module: named global slots plus functions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Global slot names, in declaration order; the index is the slot id
    pub globals: Vec<String>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn new() -> Self {
        Self {
            globals: Vec::new(),
            functions: Vec::new(),
        }
    }

    pub fn global_index(&self, name: &str) -> Option<GlobalId> {
        self.globals
            .iter()
            .position(|g| g == name)
            .map(|i| i as GlobalId)
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn function_index(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|f| f.name == name)
    }
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, name) in self.globals.iter().enumerate() {
            writeln!(f, "global @{} = {}", i, name)?;
        }
        for func in &self.functions {
            writeln!(f)?;
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_display() {
        assert_eq!(format!("{}", Value::Temp(3)), "%3");
        assert_eq!(format!("{}", Value::Const(-7)), "-7");
    }

    #[test]
    fn test_result_and_purity() {
        let add = Instruction::Binary {
            result: 5,
            op: BinaryOp::Add,
            lhs: Value::Const(1),
            rhs: Value::Const(2),
        };
        assert_eq!(add.result(), Some(5));
        assert!(add.is_pure());

        let store = Instruction::StoreGlobal {
            slot: 0,
            value: Value::Const(1),
        };
        assert_eq!(store.result(), None);
        assert!(!store.is_pure());
    }

    #[test]
    fn test_verify_detects_phi_arity_mismatch() {
        let mut func = Function::new("f".to_string(), vec![]);
        let mut b0 = BasicBlock::new(0);
        b0.terminator = Terminator::Branch(1);
        let mut b1 = BasicBlock::new(1);
        // Two incoming entries but only one predecessor.
        b1.instructions.push(Instruction::Phi {
            result: 0,
            incoming: vec![(Value::Const(1), 0), (Value::Const(2), 0)],
        });
        b1.terminator = Terminator::Return(None);
        func.blocks.push(b0);
        func.blocks.push(b1);
        assert!(func.verify().is_err());
    }

    #[test]
    fn test_rewrite_values_chases_chains() {
        let mut func = Function::new("f".to_string(), vec![]);
        let mut b0 = BasicBlock::new(0);
        b0.instructions.push(Instruction::StoreGlobal {
            slot: 0,
            value: Value::Temp(7),
        });
        b0.terminator = Terminator::Return(None);
        func.blocks.push(b0);

        let mut subst = std::collections::HashMap::new();
        subst.insert(7, Value::Temp(3));
        subst.insert(3, Value::Const(9));
        func.rewrite_values(&subst);

        match &func.blocks[0].instructions[0] {
            Instruction::StoreGlobal { value, .. } => assert_eq!(*value, Value::Const(9)),
            other => panic!("unexpected instruction {:?}", other),
        }
    }
}
