//! Load/store scheduling
//!
//! Cleans up redundant memory traffic inside each basic block. A block
//! is cut into regions at every call and fence; within one region:
//!
//! - a load of a slot whose value is already known (from an earlier
//!   store or load in the region) is replaced by that value;
//! - a store that is overwritten by a later store to the same slot,
//!   with no memory read of the slot in between, is deleted.
//!
//! Globals and locals are tracked in separate namespaces. A call ends
//! the region for globals only: the callee may read or write any
//! global, but can never touch this frame's locals. A fence ends the
//! region for everything: its whole purpose is that stores on either
//! side of it stay on their side. Nothing is ever carried across block
//! boundaries.

use crate::ir::{Function, Instruction, Value};
use luxc_common::{GlobalId, LocalId, ValueId};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Global(GlobalId),
    Local(LocalId),
}

pub fn run(func: &mut Function) {
    let mut subst: HashMap<ValueId, Value> = HashMap::new();
    let mut forwarded = 0usize;
    let mut dead_stores = 0usize;

    for block in &mut func.blocks {
        let old = std::mem::take(&mut block.instructions);
        // Tombstoned so dead stores can be deleted in place.
        let mut kept: Vec<Option<Instruction>> = Vec::with_capacity(old.len());
        let mut avail: HashMap<Slot, Value> = HashMap::new();
        let mut last_store: HashMap<Slot, usize> = HashMap::new();

        for mut inst in old {
            inst.visit_values_mut(|v| *v = resolve(&subst, *v));
            match inst {
                Instruction::LoadGlobal { result, slot } => {
                    load(Slot::Global(slot), result, inst, &mut avail, &mut kept, &mut subst, &mut forwarded);
                }
                Instruction::LoadLocal { result, slot } => {
                    load(Slot::Local(slot), result, inst, &mut avail, &mut kept, &mut subst, &mut forwarded);
                }
                Instruction::StoreGlobal { slot, value } => {
                    store(Slot::Global(slot), value, inst, &mut avail, &mut last_store, &mut kept, &mut dead_stores);
                }
                Instruction::StoreLocal { slot, value } => {
                    store(Slot::Local(slot), value, inst, &mut avail, &mut last_store, &mut kept, &mut dead_stores);
                }
                Instruction::Call { .. } => {
                    avail.retain(|slot, _| matches!(slot, Slot::Local(_)));
                    last_store.retain(|slot, _| matches!(slot, Slot::Local(_)));
                    kept.push(Some(inst));
                }
                Instruction::Fence => {
                    avail.clear();
                    last_store.clear();
                    kept.push(Some(inst));
                }
                Instruction::Binary { .. }
                | Instruction::Compare { .. }
                | Instruction::Phi { .. } => kept.push(Some(inst)),
            }
        }
        block.instructions = kept.into_iter().flatten().collect();
    }

    func.rewrite_values(&subst);

    if forwarded > 0 || dead_stores > 0 {
        log::debug!(
            "lssched `{}`: {} loads forwarded, {} dead stores removed",
            func.name,
            forwarded,
            dead_stores
        );
    }
}

fn load(
    slot: Slot,
    result: ValueId,
    inst: Instruction,
    avail: &mut HashMap<Slot, Value>,
    kept: &mut Vec<Option<Instruction>>,
    subst: &mut HashMap<ValueId, Value>,
    forwarded: &mut usize,
) {
    match avail.get(&slot) {
        Some(&known) => {
            subst.insert(result, known);
            *forwarded += 1;
        }
        None => {
            avail.insert(slot, Value::Temp(result));
            kept.push(Some(inst));
        }
    }
}

fn store(
    slot: Slot,
    value: Value,
    inst: Instruction,
    avail: &mut HashMap<Slot, Value>,
    last_store: &mut HashMap<Slot, usize>,
    kept: &mut Vec<Option<Instruction>>,
    dead_stores: &mut usize,
) {
    // Any load of this slot since the previous store was forwarded from
    // `avail` rather than kept, so the previous store in this region is
    // unobservable once overwritten.
    if let Some(&index) = last_store.get(&slot) {
        kept[index] = None;
        *dead_stores += 1;
    }
    avail.insert(slot, value);
    last_store.insert(slot, kept.len());
    kept.push(Some(inst));
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

    fn lowered(source: &str) -> Function {
        let program = parse_source(source, "test.lux").expect("parse failed");
        let mut module = lower_program(&program).expect("lowering failed");
        module.functions.remove(0)
    }

    fn scheduled(source: &str) -> Function {
        let mut func = lowered(source);
        ssa::run(&mut func).expect("ssa failed");
        run(&mut func);
        func.verify().expect("lssched output must verify");
        func
    }

    fn count(func: &Function, pred: impl Fn(&Instruction) -> bool) -> usize {
        func.blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .filter(|i| pred(i))
            .count()
    }

    fn global_stores(func: &Function) -> usize {
        count(func, |i| matches!(i, Instruction::StoreGlobal { .. }))
    }

    #[test]
    fn test_store_forwards_to_load() {
        let func = scheduled("a = Number()\nb = Number()\ndef init(p):\n    a = 5\n    b = a\n");
        assert_eq!(count(&func, |i| matches!(i, Instruction::LoadGlobal { .. })), 0);
        assert!(func.blocks[0].instructions.contains(&Instruction::StoreGlobal {
            slot: 1,
            value: Value::Const(5),
        }));
    }

    #[test]
    fn test_overwritten_store_removed() {
        let func = scheduled("a = Number()\ndef init(p):\n    a = 1\n    a = 2\n");
        assert_eq!(global_stores(&func), 1);
        assert!(func.blocks[0].instructions.contains(&Instruction::StoreGlobal {
            slot: 0,
            value: Value::Const(2),
        }));
    }

    #[test]
    fn test_increment_pair_coalesces_to_one_store() {
        let func = scheduled("a = Number()\ndef init(p):\n    a += 1\n    a += 1\n");
        assert_eq!(global_stores(&func), 1);
        // the initial load survives; the second one was forwarded
        assert_eq!(count(&func, |i| matches!(i, Instruction::LoadGlobal { .. })), 1);
    }

    #[test]
    fn test_fence_keeps_both_stores() {
        let func = scheduled("a = Number()\ndef init(p):\n    a = 1\n    fence()\n    a = 2\n");
        assert_eq!(global_stores(&func), 2);
    }

    #[test]
    fn test_fence_blocks_load_forwarding() {
        let func = scheduled("a = Number()\nb = Number()\ndef init(p):\n    a = 1\n    fence()\n    b = a\n");
        assert_eq!(count(&func, |i| matches!(i, Instruction::LoadGlobal { .. })), 1);
    }

    #[test]
    fn test_call_keeps_preceding_global_store() {
        let func = scheduled(
            "a = Number()\ndef init(p):\n    a = 1\n    helper(p)\n    a = 2\ndef helper(x):\n    x = x\n",
        );
        assert_eq!(global_stores(&func), 2);
    }

    #[test]
    fn test_call_does_not_end_local_region() {
        // Without SSA the locals stay in memory form; the callee cannot
        // observe them, so forwarding crosses the call.
        let mut func = lowered(
            "a = Number()\ndef init(p):\n    x = 1\n    helper(p)\n    a = x\ndef helper(y):\n    a = y\n",
        );
        run(&mut func);
        assert_eq!(
            count(&func, |i| matches!(i, Instruction::LoadLocal { .. })),
            0
        );
        assert!(func.blocks[0].instructions.contains(&Instruction::StoreGlobal {
            slot: 0,
            value: Value::Const(1),
        }));
    }

    #[test]
    fn test_dead_local_store_removed_without_ssa() {
        let mut func = lowered("a = Number()\ndef init(p):\n    x = 1\n    x = 2\n    a = x\n");
        run(&mut func);
        // param spill plus the surviving x = 2
        assert_eq!(
            count(&func, |i| matches!(i, Instruction::StoreLocal { .. })),
            2
        );
    }

    #[test]
    fn test_nothing_crosses_block_boundaries() {
        let func = scheduled(
            "a = Number()\nb = Number()\ndef init(p):\n    a = 1\n    if p > 0:\n        b = a\n",
        );
        // the load of `a` in the branch cannot use the entry-block store
        assert_eq!(count(&func, |i| matches!(i, Instruction::LoadGlobal { .. })), 1);
    }

    #[test]
    fn test_idempotent() {
        let mut func = scheduled("a = Number()\ndef init(p):\n    a += 1\n    a += 1\n");
        let before = func.instruction_count();
        run(&mut func);
        assert_eq!(func.instruction_count(), before);
    }
}
