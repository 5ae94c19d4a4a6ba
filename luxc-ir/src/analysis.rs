//! CFG analyses shared by the optimization passes
//!
//! Predecessor/successor edges, reverse postorder, immediate dominators
//! (Cooper-Harvey-Kennedy), and natural-loop detection from back edges.
//! Blocks are addressed by index into the function's block arena, so the
//! analyses are plain integer vectors rebuilt per pass run; the IR
//! itself never stores derived graph state.

use crate::ir::Function;
use luxc_common::BlockId;
use std::collections::BTreeSet;

const UNDEF: usize = usize::MAX;

/// Derived CFG information for one function
pub struct Cfg {
    pub preds: Vec<Vec<BlockId>>,
    pub succs: Vec<Vec<BlockId>>,
    /// Reverse postorder over reachable blocks, starting at the entry
    pub rpo: Vec<BlockId>,
    /// rpo_number[b] = position of b in `rpo`, or `usize::MAX` if
    /// unreachable
    pub rpo_number: Vec<usize>,
    /// idom[b] = immediate dominator of b (entry's idom is itself);
    /// `usize::MAX` for unreachable blocks
    pub idom: Vec<usize>,
}

impl Cfg {
    /// Build all CFG analyses for `func`
    pub fn build(func: &Function) -> Self {
        let n = func.blocks.len();
        let mut preds: Vec<Vec<BlockId>> = vec![Vec::new(); n];
        let mut succs: Vec<Vec<BlockId>> = vec![Vec::new(); n];

        for block in &func.blocks {
            for succ in block.terminator.successors() {
                // successors() already dedupes a CondBranch with equal
                // arms, so each edge appears once on both sides.
                succs[block.id as usize].push(succ);
                preds[succ as usize].push(block.id);
            }
        }

        let rpo = reverse_postorder(n, &succs);
        let mut rpo_number = vec![UNDEF; n];
        for (order, &block) in rpo.iter().enumerate() {
            rpo_number[block as usize] = order;
        }

        let idom = compute_idom(n, &preds, &rpo, &rpo_number);

        Self {
            preds,
            succs,
            rpo,
            rpo_number,
            idom,
        }
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.rpo_number[block as usize] != UNDEF
    }

    /// Does `a` dominate `b`? (Every block dominates itself.)
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let a = a as usize;
        let mut cursor = b as usize;
        loop {
            if cursor == a {
                return true;
            }
            let up = self.idom[cursor];
            if up == UNDEF || up == cursor {
                // Reached the entry without meeting `a`.
                return cursor == a;
            }
            cursor = up;
        }
    }
}

/// Reverse postorder over reachable blocks (iterative DFS)
fn reverse_postorder(num_blocks: usize, succs: &[Vec<BlockId>]) -> Vec<BlockId> {
    if num_blocks == 0 {
        return Vec::new();
    }
    let mut visited = vec![false; num_blocks];
    let mut postorder = Vec::with_capacity(num_blocks);
    // Explicit stack of (block, next-successor-index) frames.
    let mut stack: Vec<(usize, usize)> = vec![(0, 0)];
    visited[0] = true;

    while let Some(frame) = stack.last_mut() {
        let block = frame.0;
        if frame.1 < succs[block].len() {
            let succ = succs[block][frame.1] as usize;
            frame.1 += 1;
            if !visited[succ] {
                visited[succ] = true;
                stack.push((succ, 0));
            }
        } else {
            postorder.push(block as BlockId);
            stack.pop();
        }
    }

    postorder.reverse();
    postorder
}

/// Immediate dominators via the Cooper-Harvey-Kennedy iterative algorithm
fn compute_idom(
    num_blocks: usize,
    preds: &[Vec<BlockId>],
    rpo: &[BlockId],
    rpo_number: &[usize],
) -> Vec<usize> {
    let mut idom = vec![UNDEF; num_blocks];
    if rpo.is_empty() {
        return idom;
    }
    let entry = rpo[0] as usize;
    idom[entry] = entry;

    let mut changed = true;
    while changed {
        changed = false;
        for &b in rpo.iter().skip(1) {
            let b = b as usize;
            let mut new_idom = UNDEF;
            for &p in &preds[b] {
                let p = p as usize;
                if idom[p] == UNDEF {
                    continue;
                }
                new_idom = if new_idom == UNDEF {
                    p
                } else {
                    intersect(p, new_idom, &idom, rpo_number)
                };
            }
            if new_idom != UNDEF && idom[b] != new_idom {
                idom[b] = new_idom;
                changed = true;
            }
        }
    }
    idom
}

/// Walk two dominator-tree fingers up to their common ancestor
fn intersect(mut finger1: usize, mut finger2: usize, idom: &[usize], rpo_number: &[usize]) -> usize {
    while finger1 != finger2 {
        while rpo_number[finger1] > rpo_number[finger2] {
            finger1 = idom[finger1];
        }
        while rpo_number[finger2] > rpo_number[finger1] {
            finger2 = idom[finger2];
        }
    }
    finger1
}

/// A natural loop: a header plus every block that can reach one of the
/// back edges without leaving through the header.
#[derive(Debug, Clone)]
pub struct NaturalLoop {
    pub header: BlockId,
    /// Sources of the back edges into `header`
    pub latches: Vec<BlockId>,
    /// All blocks in the loop, including the header (ordered for
    /// deterministic traversal)
    pub body: BTreeSet<BlockId>,
}

/// Find natural loops from back edges (an edge B→H where H dominates B).
/// Loops sharing a header are merged into one.
pub fn find_natural_loops(cfg: &Cfg) -> Vec<NaturalLoop> {
    let mut loops: Vec<NaturalLoop> = Vec::new();

    for &block in &cfg.rpo {
        for &succ in &cfg.succs[block as usize] {
            if !cfg.dominates(succ, block) {
                continue;
            }
            // Back edge block→succ; collect the loop body by walking
            // predecessors backward from the latch, stopping at the header.
            let header = succ;
            let mut body: BTreeSet<BlockId> = BTreeSet::new();
            body.insert(header);
            let mut stack = vec![block];
            while let Some(b) = stack.pop() {
                if body.insert(b) {
                    for &p in &cfg.preds[b as usize] {
                        stack.push(p);
                    }
                }
            }

            if let Some(existing) = loops.iter_mut().find(|l| l.header == header) {
                existing.latches.push(block);
                existing.body.extend(body);
            } else {
                loops.push(NaturalLoop {
                    header,
                    latches: vec![block],
                    body,
                });
            }
        }
    }

    // Innermost first, so nested loops are processed before the loops
    // that contain them.
    loops.sort_by_key(|l| l.body.len());
    loops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, Function, Terminator, Value};

    /// entry(0) -> header(1) -> body(2) -> header; header -> exit(3)
    fn loop_func() -> Function {
        let mut func = Function::new("f".to_string(), vec![]);
        let mut b0 = BasicBlock::new(0);
        b0.terminator = Terminator::Branch(1);
        let mut b1 = BasicBlock::new(1);
        b1.terminator = Terminator::CondBranch {
            cond: Value::Const(1),
            then_block: 2,
            else_block: 3,
        };
        let mut b2 = BasicBlock::new(2);
        b2.terminator = Terminator::Branch(1);
        let mut b3 = BasicBlock::new(3);
        b3.terminator = Terminator::Return(None);
        func.blocks = vec![b0, b1, b2, b3];
        func
    }

    #[test]
    fn test_preds_succs() {
        let func = loop_func();
        let cfg = Cfg::build(&func);
        assert_eq!(cfg.succs[0], vec![1]);
        assert_eq!(cfg.succs[1], vec![2, 3]);
        assert_eq!(cfg.preds[1], vec![0, 2]);
        assert_eq!(cfg.preds[3], vec![1]);
    }

    #[test]
    fn test_dominators() {
        let func = loop_func();
        let cfg = Cfg::build(&func);
        assert!(cfg.dominates(0, 3));
        assert!(cfg.dominates(1, 2));
        assert!(cfg.dominates(1, 3));
        assert!(!cfg.dominates(2, 3));
        assert!(cfg.dominates(2, 2));
    }

    #[test]
    fn test_natural_loop_detection() {
        let func = loop_func();
        let cfg = Cfg::build(&func);
        let loops = find_natural_loops(&cfg);
        assert_eq!(loops.len(), 1);
        assert_eq!(loops[0].header, 1);
        assert_eq!(loops[0].latches, vec![2]);
        assert!(loops[0].body.contains(&1));
        assert!(loops[0].body.contains(&2));
        assert!(!loops[0].body.contains(&0));
        assert!(!loops[0].body.contains(&3));
    }

    #[test]
    fn test_diamond_dominators() {
        // 0 -> 1, 0 -> 2, 1 -> 3, 2 -> 3
        let mut func = Function::new("f".to_string(), vec![]);
        let mut b0 = BasicBlock::new(0);
        b0.terminator = Terminator::CondBranch {
            cond: Value::Const(1),
            then_block: 1,
            else_block: 2,
        };
        let mut b1 = BasicBlock::new(1);
        b1.terminator = Terminator::Branch(3);
        let mut b2 = BasicBlock::new(2);
        b2.terminator = Terminator::Branch(3);
        let mut b3 = BasicBlock::new(3);
        b3.terminator = Terminator::Return(None);
        func.blocks = vec![b0, b1, b2, b3];

        let cfg = Cfg::build(&func);
        assert_eq!(cfg.idom[3], 0);
        assert!(cfg.dominates(0, 3));
        assert!(!cfg.dominates(1, 3));
        assert!(!cfg.dominates(2, 3));
        assert!(find_natural_loops(&cfg).is_empty());
    }
}
