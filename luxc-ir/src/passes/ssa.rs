//! SSA construction
//!
//! Promotes function-local slots from `LoadLocal`/`StoreLocal` memory
//! form to pure value dataflow with phi nodes. Global slots are left in
//! memory form on purpose: they are the externally observable state and
//! must stay as explicit loads and stores for the barrier semantics of
//! `fence` to mean anything.
//!
//! The construction is the classic optimistic scheme: walk the CFG in
//! reverse postorder tracking the reaching definition of every slot,
//! place a phi for every slot at each join block, fill the phi inputs
//! from predecessor exit states once all blocks are walked, then shrink
//! trivial phis to a fixed point. A load whose definition resolves all
//! the way to `undef` means the variable is read before any assignment
//! reaches it, which is a compile error naming the variable.

use crate::analysis::Cfg;
use crate::ir::{Function, Instruction, Value};
use luxc_common::{CompilerError, LocalId, ValueId};
use std::collections::HashMap;

struct PlacedPhi {
    block: usize,
    result: ValueId,
    incoming: Vec<Value>,
}

pub fn run(func: &mut Function) -> Result<(), CompilerError> {
    let cfg = Cfg::build(func);
    let num_slots = func.locals.len();

    // Per-block slot state at block exit, indexed by slot.
    let mut exit_defs: Vec<Option<Vec<Value>>> = vec![None; func.blocks.len()];
    // result id -> what it resolves to (load results and shrunk phis)
    let mut subst: HashMap<ValueId, Value> = HashMap::new();
    // phi key: (block, slot) in placement order
    let mut phis: Vec<PlacedPhi> = Vec::new();
    // every load, for the read-before-write check at the end
    let mut loads: Vec<(ValueId, LocalId)> = Vec::new();

    let rpo = cfg.rpo.clone();
    for &block_id in &rpo {
        let b = block_id as usize;

        let mut defs: Vec<Value> = if cfg.preds[b].is_empty() {
            // Entry: parameters are pre-defined values, everything else
            // has no definition yet.
            let mut defs = vec![Value::Undef; num_slots];
            for (i, def) in defs.iter_mut().enumerate().take(func.params.len()) {
                *def = Value::Temp(i as ValueId);
            }
            defs
        } else if cfg.preds[b].len() == 1 {
            // A single predecessor dominates this block, so it has
            // already been walked.
            match &exit_defs[cfg.preds[b][0] as usize] {
                Some(defs) => defs.clone(),
                None => vec![Value::Undef; num_slots],
            }
        } else {
            // Join block: a phi per slot, shrunk later if redundant.
            // Back-edge predecessors have not been walked yet, so the
            // inputs are filled in a second pass.
            let mut defs = Vec::with_capacity(num_slots);
            for _ in 0..num_slots {
                let result = func.new_value();
                phis.push(PlacedPhi {
                    block: b,
                    result,
                    incoming: Vec::new(),
                });
                defs.push(Value::Temp(result));
            }
            defs
        };

        let old_instructions = std::mem::take(&mut func.blocks[b].instructions);
        let mut kept = Vec::with_capacity(old_instructions.len());
        for inst in old_instructions {
            match inst {
                Instruction::LoadLocal { result, slot } => {
                    subst.insert(result, defs[slot as usize]);
                    loads.push((result, slot));
                }
                Instruction::StoreLocal { slot, value } => {
                    defs[slot as usize] = resolve(&subst, value);
                }
                other => kept.push(other),
            }
        }
        func.blocks[b].instructions = kept;
        exit_defs[b] = Some(defs);
    }

    // Fill phi inputs from predecessor exit states, one per predecessor
    // edge in predecessor order.
    {
        let mut phi_iter = phis.iter_mut();
        for &block_id in &rpo {
            let b = block_id as usize;
            if cfg.preds[b].len() < 2 {
                continue;
            }
            for slot in 0..num_slots {
                let phi = match phi_iter.next() {
                    Some(phi) => phi,
                    None => break,
                };
                debug_assert_eq!(phi.block, b);
                for &pred in &cfg.preds[b] {
                    let value = match &exit_defs[pred as usize] {
                        Some(defs) => defs[slot],
                        None => Value::Undef,
                    };
                    phi.incoming.push(resolve(&subst, value));
                }
            }
        }
    }

    // Shrink trivial phis to a fixed point. A phi whose inputs, after
    // substitution, are all the same value (ignoring self-references and
    // undef) is just that value.
    let mut eliminated = vec![false; phis.len()];
    let mut changed = true;
    while changed {
        changed = false;
        for (i, phi) in phis.iter().enumerate() {
            if eliminated[i] {
                continue;
            }
            let mut unique: Option<Value> = None;
            let mut trivial = true;
            for &value in &phi.incoming {
                let value = resolve(&subst, value);
                if value == Value::Temp(phi.result) || value == Value::Undef {
                    continue;
                }
                match unique {
                    None => unique = Some(value),
                    Some(u) if u == value => {}
                    Some(_) => {
                        trivial = false;
                        break;
                    }
                }
            }
            if trivial {
                subst.insert(phi.result, unique.unwrap_or(Value::Undef));
                eliminated[i] = true;
                changed = true;
            }
        }
    }

    // Read-before-write check: a load whose chain bottoms out at undef
    // has no reaching definition on at least the straight-line path.
    for (result, slot) in &loads {
        if resolve(&subst, Value::Temp(*result)) == Value::Undef {
            return Err(CompilerError::undefined(
                func.name.clone(),
                func.locals[*slot as usize].clone(),
            ));
        }
    }

    // Materialize the surviving phis at the front of their blocks.
    let shrunk = eliminated.iter().filter(|&&e| e).count();
    for (i, phi) in phis.into_iter().enumerate().rev() {
        if eliminated[i] {
            continue;
        }
        let incoming = phi
            .incoming
            .iter()
            .zip(&cfg.preds[phi.block])
            .map(|(&value, &pred)| (resolve(&subst, value), pred))
            .collect();
        func.blocks[phi.block].instructions.insert(
            0,
            Instruction::Phi {
                result: phi.result,
                incoming,
            },
        );
    }

    func.rewrite_values(&subst);

    log::debug!(
        "ssa `{}`: {} loads promoted, {} phis shrunk",
        func.name,
        loads.len(),
        shrunk
    );
    Ok(())
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
    use crate::ir::Terminator;
    use crate::lowering::lower_program;
    use luxc_frontend::parse_source;

    fn ssa(source: &str) -> Function {
        let program = parse_source(source, "test.lux").expect("parse failed");
        let mut module = lower_program(&program).expect("lowering failed");
        let mut func = module.functions.remove(0);
        run(&mut func).expect("ssa failed");
        func.verify().expect("ssa output must verify");
        func
    }

    fn has_local_ops(func: &Function) -> bool {
        func.blocks.iter().any(|b| {
            b.instructions.iter().any(|i| {
                matches!(
                    i,
                    Instruction::LoadLocal { .. } | Instruction::StoreLocal { .. }
                )
            })
        })
    }

    fn phi_count(func: &Function) -> usize {
        func.blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .filter(|i| matches!(i, Instruction::Phi { .. }))
            .count()
    }

    #[test]
    fn test_straight_line_needs_no_phis() {
        let func = ssa("a = Number()\ndef init(p):\n    x = 3\n    a = x + p\n");
        assert!(!has_local_ops(&func));
        assert_eq!(phi_count(&func), 0);
        // a = x + p became a binary on the constant and the parameter
        assert!(func.blocks[0].instructions.iter().any(|i| matches!(
            i,
            Instruction::Binary {
                lhs: Value::Const(3),
                rhs: Value::Temp(0),
                ..
            }
        )));
    }

    #[test]
    fn test_diamond_gets_one_phi() {
        let func = ssa(
            "a = Number()\ndef init(p):\n    if p > 0:\n        x = 1\n    else:\n        x = 2\n    a = x\n",
        );
        assert!(!has_local_ops(&func));
        assert_eq!(phi_count(&func), 1);
        // phi lives in the join block and feeds the global store
        let join = func.blocks.last().unwrap();
        assert!(matches!(join.instructions[0], Instruction::Phi { .. }));
        assert!(matches!(
            join.instructions[1],
            Instruction::StoreGlobal { slot: 0, .. }
        ));
    }

    #[test]
    fn test_same_value_both_arms_shrinks_phi() {
        let func = ssa(
            "a = Number()\ndef init(p):\n    if p > 0:\n        x = 7\n    else:\n        x = 7\n    a = x\n",
        );
        assert_eq!(phi_count(&func), 0);
        let join = func.blocks.last().unwrap();
        assert!(join.instructions.contains(&Instruction::StoreGlobal {
            slot: 0,
            value: Value::Const(7),
        }));
    }

    #[test]
    fn test_loop_counter_phi_survives() {
        let func = ssa("a = Number()\ndef init(p):\n    x = 0\n    while x < 10:\n        x += 1\n    a = x\n");
        assert!(!has_local_ops(&func));
        // exactly the loop-carried counter phi in the header
        assert_eq!(phi_count(&func), 1);
        let header = &func.blocks[1];
        match &header.instructions[0] {
            Instruction::Phi { incoming, .. } => {
                assert_eq!(incoming.len(), 2);
                assert!(incoming.contains(&(Value::Const(0), 0)));
            }
            other => panic!("expected phi at header, found {:?}", other),
        }
    }

    #[test]
    fn test_read_before_write_is_an_error() {
        let program = parse_source("a = Number()\ndef init(p):\n    a = y\n", "test.lux").unwrap();
        let mut module = lower_program(&program).unwrap();
        let err = run(&mut module.functions[0]).unwrap_err();
        assert_eq!(
            err,
            CompilerError::undefined("init", "y"),
        );
    }

    #[test]
    fn test_partial_definition_in_one_arm_is_allowed() {
        // x defined only when p > 0, and only read on that same path
        let func = ssa(
            "a = Number()\ndef init(p):\n    if p > 0:\n        x = 1\n        a = x\n",
        );
        assert!(!has_local_ops(&func));
    }

    #[test]
    fn test_globals_stay_in_memory_form() {
        let func = ssa("a = Number()\ndef init(p):\n    a = 1\n    a += 2\n");
        let global_ops = func.blocks[0]
            .instructions
            .iter()
            .filter(|i| {
                matches!(
                    i,
                    Instruction::LoadGlobal { .. } | Instruction::StoreGlobal { .. }
                )
            })
            .count();
        assert_eq!(global_ops, 3);
    }

    #[test]
    fn test_param_flows_into_return() {
        let func = ssa("def init(p):\n    return p\n");
        assert_eq!(
            func.blocks[0].terminator,
            Terminator::Return(Some(Value::Temp(0)))
        );
    }
}
