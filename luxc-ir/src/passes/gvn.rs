//! Global value numbering
//!
//! Eliminates redundant pure computations with a dominator-scoped
//! hash table: an arithmetic or comparison whose operands match an
//! expression already computed in a dominating block reuses that
//! result. Commutative operators are keyed with their operands in a
//! canonical order so `p + q` and `q + p` number the same.
//!
//! Global loads are also value-numbered, but only within a single
//! block: between blocks another path may have stored the slot, so
//! cross-block reuse of a loaded global is never assumed. Within a
//! block a store forwards its value to later loads of the same slot.
//! A call conservatively kills all global availability (the callee may
//! store any slot); a fence kills everything by definition.

use crate::analysis::Cfg;
use crate::ir::{Function, Instruction, Value};
use luxc_common::{BinaryOp, CompareOp, GlobalId, ValueId};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ExprKey {
    Binary(BinaryOp, Value, Value),
    Compare(CompareOp, Value, Value),
}

pub fn run(func: &mut Function) {
    let cfg = Cfg::build(func);

    // Dominator-tree children, visited in block order.
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); func.blocks.len()];
    for &block in &cfg.rpo {
        let b = block as usize;
        let idom = cfg.idom[b];
        if idom != usize::MAX && idom != b {
            children[idom].push(b);
        }
    }

    let mut state = Gvn {
        children,
        table: HashMap::new(),
        subst: HashMap::new(),
        eliminated: 0,
    };
    if !func.blocks.is_empty() {
        state.walk(func, 0);
    }
    func.rewrite_values(&state.subst);

    log::debug!(
        "gvn `{}`: {} redundant instructions removed",
        func.name,
        state.eliminated
    );
}

struct Gvn {
    children: Vec<Vec<usize>>,
    /// Expression -> leader value, scoped to the dominator subtree
    table: HashMap<ExprKey, Value>,
    subst: HashMap<ValueId, Value>,
    eliminated: usize,
}

impl Gvn {
    fn walk(&mut self, func: &mut Function, block: usize) {
        let mut inserted: Vec<ExprKey> = Vec::new();
        // Block-local global-slot availability: slot -> known value.
        let mut avail: HashMap<GlobalId, Value> = HashMap::new();

        let old_instructions = std::mem::take(&mut func.blocks[block].instructions);
        let mut kept = Vec::with_capacity(old_instructions.len());
        for mut inst in old_instructions {
            inst.visit_values_mut(|v| *v = resolve(&self.subst, *v));
            match inst {
                Instruction::Binary { result, op, lhs, rhs } => {
                    let (lhs, rhs) = canonicalize(op.is_commutative(), lhs, rhs);
                    let key = ExprKey::Binary(op, lhs, rhs);
                    match self.table.get(&key) {
                        Some(&leader) => {
                            self.subst.insert(result, leader);
                            self.eliminated += 1;
                        }
                        None => {
                            self.table.insert(key, Value::Temp(result));
                            inserted.push(key);
                            kept.push(Instruction::Binary { result, op, lhs, rhs });
                        }
                    }
                }
                Instruction::Compare { result, op, lhs, rhs } => {
                    let (lhs, rhs) = canonicalize(op.is_commutative(), lhs, rhs);
                    let key = ExprKey::Compare(op, lhs, rhs);
                    match self.table.get(&key) {
                        Some(&leader) => {
                            self.subst.insert(result, leader);
                            self.eliminated += 1;
                        }
                        None => {
                            self.table.insert(key, Value::Temp(result));
                            inserted.push(key);
                            kept.push(Instruction::Compare { result, op, lhs, rhs });
                        }
                    }
                }
                Instruction::LoadGlobal { result, slot } => match avail.get(&slot) {
                    Some(&known) => {
                        self.subst.insert(result, known);
                        self.eliminated += 1;
                    }
                    None => {
                        avail.insert(slot, Value::Temp(result));
                        kept.push(inst);
                    }
                },
                Instruction::StoreGlobal { slot, value } => {
                    avail.insert(slot, value);
                    kept.push(Instruction::StoreGlobal { slot, value });
                }
                Instruction::Call { .. } => {
                    avail.clear();
                    kept.push(inst);
                }
                Instruction::Fence => {
                    avail.clear();
                    kept.push(inst);
                }
                Instruction::Phi { .. }
                | Instruction::LoadLocal { .. }
                | Instruction::StoreLocal { .. } => kept.push(inst),
            }
        }
        func.blocks[block].instructions = kept;

        let child_list = self.children[block].clone();
        for child in child_list {
            self.walk(func, child);
        }

        // Leave scope: expressions from this block are not available to
        // blocks this one does not dominate.
        for key in inserted {
            self.table.remove(&key);
        }
    }
}

/// Put commutative operands in a canonical order
fn canonicalize(commutative: bool, lhs: Value, rhs: Value) -> (Value, Value) {
    if commutative && rank(&rhs) < rank(&lhs) {
        (rhs, lhs)
    } else {
        (lhs, rhs)
    }
}

fn rank(value: &Value) -> (u8, i64) {
    match value {
        Value::Const(c) => (0, *c as i64),
        Value::Temp(id) => (1, *id as i64),
        Value::Undef => (2, 0),
    }
}

fn resolve(subst: &HashMap<ValueId, Value>, mut value: Value) -> Value {
    let mut guard = 0;
    while let Value::Temp(id) = value {
        match subst.get(&id) {
            Some(&next) => {
                value = next;
                guard += 1;
                if guard > 1024 {
                    break;
                }
            }
            None => break,
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lowering::lower_program;
    use crate::passes::ssa;
    use luxc_frontend::parse_source;

    fn optimized(source: &str) -> Function {
        let program = parse_source(source, "test.lux").expect("parse failed");
        let mut module = lower_program(&program).expect("lowering failed");
        let mut func = module.functions.remove(0);
        ssa::run(&mut func).expect("ssa failed");
        run(&mut func);
        func.verify().expect("gvn output must verify");
        func
    }

    fn count(func: &Function, pred: impl Fn(&Instruction) -> bool) -> usize {
        func.blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .filter(|i| pred(i))
            .count()
    }

    #[test]
    fn test_redundant_add_eliminated() {
        let func = optimized(
            "a = Number()\ndef init(p):\n    x = p + 1\n    y = p + 1\n    a = x + y\n",
        );
        // one p+1 and one x+y remain
        assert_eq!(count(&func, |i| matches!(i, Instruction::Binary { .. })), 2);
    }

    #[test]
    fn test_commutative_operands_number_the_same() {
        let func = optimized(
            "a = Number()\nb = Number()\ndef init(p):\n    a = p + 2\n    b = 2 + p\n",
        );
        assert_eq!(count(&func, |i| matches!(i, Instruction::Binary { .. })), 1);
    }

    #[test]
    fn test_subtraction_is_not_commutative() {
        let func = optimized(
            "a = Number()\nb = Number()\ndef init(p):\n    a = p - 2\n    b = 2 - p\n",
        );
        assert_eq!(count(&func, |i| matches!(i, Instruction::Binary { .. })), 2);
    }

    #[test]
    fn test_dominating_expression_reused_in_branch() {
        let func = optimized(
            "a = Number()\ndef init(p):\n    x = p * 3\n    if p > 0:\n        a = p * 3\n",
        );
        assert_eq!(count(&func, |i| matches!(i, Instruction::Binary { .. })), 1);
    }

    #[test]
    fn test_sibling_branches_do_not_share() {
        let func = optimized(
            "a = Number()\nb = Number()\ndef init(p):\n    if p > 0:\n        a = p * 3\n    else:\n        b = p * 3\n",
        );
        // neither arm dominates the other
        assert_eq!(count(&func, |i| matches!(i, Instruction::Binary { .. })), 2);
    }

    #[test]
    fn test_global_load_reused_within_block() {
        let func = optimized("a = Number()\nb = Number()\ndef init(p):\n    b = a + a\n");
        assert_eq!(
            count(&func, |i| matches!(i, Instruction::LoadGlobal { .. })),
            1
        );
    }

    #[test]
    fn test_store_forwards_to_later_load() {
        let func = optimized("a = Number()\nb = Number()\ndef init(p):\n    a = 5\n    b = a\n");
        assert_eq!(
            count(&func, |i| matches!(i, Instruction::LoadGlobal { .. })),
            0
        );
        assert!(func.blocks[0].instructions.contains(&Instruction::StoreGlobal {
            slot: 1,
            value: Value::Const(5),
        }));
    }

    #[test]
    fn test_call_kills_global_availability() {
        let func = optimized(
            "a = Number()\nb = Number()\ndef init(p):\n    a = 5\n    helper(p)\n    b = a\ndef helper(x):\n    a = x\n",
        );
        assert_eq!(
            count(&func, |i| matches!(i, Instruction::LoadGlobal { .. })),
            1
        );
    }

    #[test]
    fn test_fence_kills_global_availability() {
        let func = optimized(
            "a = Number()\nb = Number()\ndef init(p):\n    a = 5\n    fence()\n    b = a\n",
        );
        assert_eq!(
            count(&func, |i| matches!(i, Instruction::LoadGlobal { .. })),
            1
        );
    }

    #[test]
    fn test_loads_not_reused_across_blocks() {
        let func = optimized(
            "a = Number()\nb = Number()\ndef init(p):\n    b = a\n    if p > 0:\n        b = a\n",
        );
        assert_eq!(
            count(&func, |i| matches!(i, Instruction::LoadGlobal { .. })),
            2
        );
    }

    #[test]
    fn test_idempotent() {
        let source = "a = Number()\ndef init(p):\n    x = p + 1\n    y = p + 1\n    a = x * y\n";
        let mut func = optimized(source);
        let before = func.instruction_count();
        run(&mut func);
        assert_eq!(func.instruction_count(), before);
    }
}
