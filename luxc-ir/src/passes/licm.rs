//! Loop-invariant code motion
//!
//! Hoists computations whose value cannot change across iterations into
//! a preheader block that runs once before the loop. Three rules keep
//! it sound:
//!
//! - only pure, non-trapping arithmetic and comparisons are hoisted
//!   (division and modulo stay put: hoisting one above the loop could
//!   trap on an iteration count of zero);
//! - a global load is hoisted only when the loop contains no store to
//!   that slot and no call or fence at all;
//! - only instructions in blocks that dominate every back edge are
//!   considered, so nothing guarded by a conditional inside the loop
//!   moves.
//!
//! Stores are never hoisted. Loops whose header has more than one entry
//! edge from outside are left untouched; `run_strict` reports them as
//! invalid loop forms instead.
//!
//! Hoisting one loop inserts a block and rewires edges, so the CFG
//! analyses are rebuilt from scratch after every loop; each header is
//! processed at most once per run.

use crate::analysis::{find_natural_loops, Cfg, NaturalLoop};
use crate::ir::{BasicBlock, Function, Instruction, Terminator, Value};
use luxc_common::{BlockId, CompilerError, GlobalId, ValueId};
use std::collections::HashSet;

pub fn run(func: &mut Function) {
    // Unanalyzable loops are skipped in this mode, so no error is possible.
    let _ = run_impl(func, false);
}

/// Like `run`, but reports a loop whose form blocks analysis instead of
/// silently leaving it untouched.
pub fn run_strict(func: &mut Function) -> Result<usize, CompilerError> {
    run_impl(func, true)
}

fn run_impl(func: &mut Function, strict: bool) -> Result<usize, CompilerError> {
    let mut processed: HashSet<BlockId> = HashSet::new();
    let mut hoisted_total = 0;

    loop {
        let cfg = Cfg::build(func);
        let loops = find_natural_loops(&cfg);
        // Innermost first; find_natural_loops orders by body size.
        let next = loops.into_iter().find(|l| !processed.contains(&l.header));
        let Some(lp) = next else { break };
        processed.insert(lp.header);
        hoisted_total += hoist_loop(func, &cfg, &lp, strict)?;
    }

    if hoisted_total > 0 {
        log::debug!("licm `{}`: {} instructions hoisted", func.name, hoisted_total);
    }
    Ok(hoisted_total)
}

fn hoist_loop(
    func: &mut Function,
    cfg: &Cfg,
    lp: &NaturalLoop,
    strict: bool,
) -> Result<usize, CompilerError> {
    let outside: Vec<BlockId> = cfg.preds[lp.header as usize]
        .iter()
        .copied()
        .filter(|p| !lp.body.contains(p))
        .collect();
    if outside.len() != 1 {
        if strict {
            return Err(CompilerError::invalid_loop(
                func.name.clone(),
                format!("loop at bb{} has {} entry edges", lp.header, outside.len()),
            ));
        }
        log::debug!(
            "licm `{}`: loop at bb{} has {} entry edges, skipping",
            func.name,
            lp.header,
            outside.len()
        );
        return Ok(0);
    }
    let outside = outside[0];

    // Values defined anywhere in the loop, and loop-wide memory facts.
    let mut defined: HashSet<ValueId> = HashSet::new();
    let mut stored_slots: HashSet<GlobalId> = HashSet::new();
    let mut has_call_or_fence = false;
    for &b in &lp.body {
        for inst in &func.blocks[b as usize].instructions {
            if let Some(result) = inst.result() {
                defined.insert(result);
            }
            match inst {
                Instruction::StoreGlobal { slot, .. } => {
                    stored_slots.insert(*slot);
                }
                Instruction::Call { .. } | Instruction::Fence => has_call_or_fence = true,
                _ => {}
            }
        }
    }

    // Blocks that run on every iteration.
    let eligible: Vec<BlockId> = lp
        .body
        .iter()
        .copied()
        .filter(|&b| lp.latches.iter().all(|&latch| cfg.dominates(b, latch)))
        .collect();

    // Grow the invariant set to a fixed point: an instruction is
    // invariant once all its operands come from outside the loop or
    // from already-invariant instructions.
    let mut invariant: HashSet<ValueId> = HashSet::new();
    let mut changed = true;
    while changed {
        changed = false;
        for &b in &eligible {
            for inst in &func.blocks[b as usize].instructions {
                let Some(result) = inst.result() else { continue };
                if invariant.contains(&result) {
                    continue;
                }
                let hoistable = match inst {
                    Instruction::Binary { op, lhs, rhs, .. } if !op.can_trap() => {
                        operand_invariant(lhs, &defined, &invariant)
                            && operand_invariant(rhs, &defined, &invariant)
                    }
                    Instruction::Compare { lhs, rhs, .. } => {
                        operand_invariant(lhs, &defined, &invariant)
                            && operand_invariant(rhs, &defined, &invariant)
                    }
                    Instruction::LoadGlobal { slot, .. } => {
                        !has_call_or_fence && !stored_slots.contains(slot)
                    }
                    _ => false,
                };
                if hoistable {
                    invariant.insert(result);
                    changed = true;
                }
            }
        }
    }
    if invariant.is_empty() {
        return Ok(0);
    }

    // Extract in dominance order so hoisted instructions still precede
    // their hoisted uses.
    let mut order = eligible;
    order.sort_by_key(|&b| cfg.rpo_number[b as usize]);
    let mut hoisted: Vec<Instruction> = Vec::new();
    for &b in &order {
        let old = std::mem::take(&mut func.blocks[b as usize].instructions);
        let mut kept = Vec::with_capacity(old.len());
        for inst in old {
            if inst.result().is_some_and(|r| invariant.contains(&r)) {
                hoisted.push(inst);
            } else {
                kept.push(inst);
            }
        }
        func.blocks[b as usize].instructions = kept;
    }
    let count = hoisted.len();

    // New preheader on the unique entry edge.
    let preheader = func.blocks.len() as BlockId;
    let mut block = BasicBlock::new(preheader);
    block.instructions = hoisted;
    block.terminator = Terminator::Branch(lp.header);
    func.blocks.push(block);

    func.blocks[outside as usize]
        .terminator
        .retarget(|t| if t == lp.header { preheader } else { t });
    for inst in &mut func.blocks[lp.header as usize].instructions {
        if let Instruction::Phi { incoming, .. } = inst {
            for (_, pred) in incoming {
                if *pred == outside {
                    *pred = preheader;
                }
            }
        }
    }

    Ok(count)
}

fn operand_invariant(value: &Value, defined: &HashSet<ValueId>, invariant: &HashSet<ValueId>) -> bool {
    match value {
        Value::Const(_) | Value::Undef => true,
        Value::Temp(id) => !defined.contains(id) || invariant.contains(id),
    }
}
