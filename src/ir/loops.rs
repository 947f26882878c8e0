//! Natural loop detection and loop scope queries.
//!
//! Loops are detected per function from dominator information and arranged
//! into a forest by nesting. Each loop records its header, its preheader and
//! latch when they are unique, its body and its exit edges. The analysis
//! layers above only ever peel loops that are *well formed*: a unique
//! preheader and a unique latch, so that iteration entry and the
//! back edge are unambiguous.
//!
//! # Algorithm
//!
//! 1. Compute immediate dominators per function with the iterative
//!    Cooper-Harvey-Kennedy scheme over reverse postorder.
//! 2. Find back edges `latch -> header` where the header dominates the latch.
//! 3. Grow each natural loop body backwards from its latches, stopping at the
//!    header; merge loops sharing a header.
//! 4. Derive preheader (the unique non-body predecessor of the header), exit
//!    edges, and nesting (parent = smallest strictly containing loop).

use std::collections::{HashMap, HashSet};

use crate::ir::{BlockId, FuncId, LoopId};

/// A natural loop.
#[derive(Debug, Clone)]
pub struct LoopInfo {
    /// This loop's id.
    pub id: LoopId,
    /// The containing function.
    pub func: FuncId,
    /// The loop header: the unique entry block dominated targets branch back to.
    pub header: BlockId,
    /// The unique predecessor of the header outside the body, if there is
    /// exactly one.
    pub preheader: Option<BlockId>,
    /// The unique source of a back edge to the header, if there is exactly one.
    pub latch: Option<BlockId>,
    /// All back-edge sources.
    pub latches: Vec<BlockId>,
    /// Every block in the loop, the header included.
    pub body: HashSet<BlockId>,
    /// Edges `(from inside, to outside)` leaving the loop.
    pub exit_edges: Vec<(BlockId, BlockId)>,
    /// The innermost loop strictly containing this one.
    pub parent: Option<LoopId>,
    /// Loops immediately nested in this one.
    pub children: Vec<LoopId>,
    /// Nesting depth, `1` for a top-level loop.
    pub depth: usize,
}

impl LoopInfo {
    /// Whether iteration contexts can be built for this loop: both the
    /// preheader and the latch must be unique.
    #[must_use]
    pub const fn is_well_formed(&self) -> bool {
        self.preheader.is_some() && self.latch.is_some()
    }

    /// Whether the block belongs to this loop.
    #[must_use]
    pub fn contains(&self, block: BlockId) -> bool {
        self.body.contains(&block)
    }
}

/// All loops of a program, with a per-block innermost-loop index.
#[derive(Debug, Default)]
pub struct LoopForest {
    infos: Vec<LoopInfo>,
    /// Innermost loop per block, indexed by block id.
    block_scope: Vec<Option<LoopId>>,
}

impl LoopForest {
    /// Looks up a loop by id.
    #[must_use]
    pub fn info(&self, id: LoopId) -> &LoopInfo {
        &self.infos[id.0]
    }

    /// The innermost loop containing a block, if any.
    #[must_use]
    pub fn loop_of(&self, block: BlockId) -> Option<LoopId> {
        self.block_scope.get(block.0).copied().flatten()
    }

    /// Iterates over all loops.
    pub fn iter(&self) -> impl Iterator<Item = &LoopInfo> {
        self.infos.iter()
    }

    /// Detects all loops of a program.
    ///
    /// `functions` supplies `(id, entry, blocks)` per function, `succ` the
    /// terminator successors, and `preds` the precomputed predecessor lists.
    pub(crate) fn compute(
        num_blocks: usize,
        functions: &[(FuncId, BlockId, Vec<BlockId>)],
        succ: impl Fn(BlockId) -> Vec<BlockId>,
        preds: &[Vec<BlockId>],
    ) -> Self {
        let mut infos: Vec<LoopInfo> = Vec::new();

        for (func, entry, blocks) in functions {
            let doms = Dominators::compute(*entry, blocks, &succ);

            // Back edges, grouped by header.
            let mut latches_by_header: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
            for &block in blocks {
                if !doms.is_reachable(block) {
                    continue;
                }
                for target in succ(block) {
                    if doms.dominates(target, block) {
                        latches_by_header.entry(target).or_default().push(block);
                    }
                }
            }

            let mut headers: Vec<BlockId> = latches_by_header.keys().copied().collect();
            headers.sort();

            for header in headers {
                let latches = &latches_by_header[&header];
                let mut body: HashSet<BlockId> = HashSet::new();
                body.insert(header);
                let mut stack: Vec<BlockId> = latches.clone();
                while let Some(block) = stack.pop() {
                    if body.insert(block) {
                        for &pred in &preds[block.0] {
                            stack.push(pred);
                        }
                    }
                }

                let outside_preds: Vec<BlockId> = preds[header.0]
                    .iter()
                    .copied()
                    .filter(|p| !body.contains(p))
                    .collect();
                let preheader = match outside_preds.as_slice() {
                    [single] => Some(*single),
                    _ => None,
                };
                let latch = match latches.as_slice() {
                    [single] => Some(*single),
                    _ => None,
                };

                let mut exit_edges: Vec<(BlockId, BlockId)> = Vec::new();
                let mut sorted_body: Vec<BlockId> = body.iter().copied().collect();
                sorted_body.sort();
                for &block in &sorted_body {
                    for target in succ(block) {
                        if !body.contains(&target) {
                            exit_edges.push((block, target));
                        }
                    }
                }

                infos.push(LoopInfo {
                    id: LoopId(infos.len()),
                    func: *func,
                    header,
                    preheader,
                    latch,
                    latches: latches.clone(),
                    body,
                    exit_edges,
                    parent: None,
                    children: Vec::new(),
                    depth: 1,
                });
            }
        }

        // Nesting: the parent is the smallest loop strictly containing the header
        // and whole body.
        for i in 0..infos.len() {
            let mut parent: Option<LoopId> = None;
            let mut parent_size = usize::MAX;
            for j in 0..infos.len() {
                if i == j || infos[i].func != infos[j].func {
                    continue;
                }
                if infos[j].body.len() > infos[i].body.len()
                    && infos[j].body.contains(&infos[i].header)
                    && infos[j].body.len() < parent_size
                {
                    parent = Some(LoopId(j));
                    parent_size = infos[j].body.len();
                }
            }
            infos[i].parent = parent;
        }
        for i in 0..infos.len() {
            if let Some(parent) = infos[i].parent {
                infos[parent.0].children.push(LoopId(i));
            }
            let mut depth = 1;
            let mut cursor = infos[i].parent;
            while let Some(p) = cursor {
                depth += 1;
                cursor = infos[p.0].parent;
            }
            infos[i].depth = depth;
        }

        // Innermost loop per block.
        let mut block_scope: Vec<Option<LoopId>> = vec![None; num_blocks];
        for (slot, scope) in block_scope.iter_mut().enumerate() {
            let block = BlockId(slot);
            let mut best: Option<LoopId> = None;
            let mut best_size = usize::MAX;
            for info in &infos {
                if info.body.contains(&block) && info.body.len() < best_size {
                    best = Some(info.id);
                    best_size = info.body.len();
                }
            }
            *scope = best;
        }

        Self { infos, block_scope }
    }
}

/// Immediate dominators for one function, Cooper-Harvey-Kennedy style.
struct Dominators {
    /// Reverse-postorder number per block, `usize::MAX` when unreachable.
    rpo_num: HashMap<BlockId, usize>,
    /// Immediate dominator per block.
    idom: HashMap<BlockId, BlockId>,
    entry: BlockId,
}

impl Dominators {
    fn compute(entry: BlockId, blocks: &[BlockId], succ: &impl Fn(BlockId) -> Vec<BlockId>) -> Self {
        // Depth-first postorder, then reverse.
        let block_set: HashSet<BlockId> = blocks.iter().copied().collect();
        let mut postorder: Vec<BlockId> = Vec::new();
        let mut visited: HashSet<BlockId> = HashSet::new();
        let mut stack: Vec<(BlockId, Vec<BlockId>)> = vec![(entry, succ(entry))];
        visited.insert(entry);
        while let Some((block, pending)) = stack.last_mut() {
            if let Some(next) = pending.pop() {
                if block_set.contains(&next) && visited.insert(next) {
                    stack.push((next, succ(next)));
                }
            } else {
                postorder.push(*block);
                stack.pop();
            }
        }
        let rpo: Vec<BlockId> = postorder.into_iter().rev().collect();
        let rpo_num: HashMap<BlockId, usize> =
            rpo.iter().enumerate().map(|(n, &b)| (b, n)).collect();

        // Predecessor lists restricted to reachable blocks.
        let mut preds: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
        for &block in &rpo {
            for target in succ(block) {
                if rpo_num.contains_key(&target) {
                    preds.entry(target).or_default().push(block);
                }
            }
        }

        let mut idom: HashMap<BlockId, BlockId> = HashMap::new();
        idom.insert(entry, entry);
        let mut changed = true;
        while changed {
            changed = false;
            for &block in rpo.iter().skip(1) {
                let Some(block_preds) = preds.get(&block) else {
                    continue;
                };
                let mut new_idom: Option<BlockId> = None;
                for &pred in block_preds {
                    if !idom.contains_key(&pred) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => Self::intersect(&idom, &rpo_num, pred, current),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if idom.get(&block) != Some(&new_idom) {
                        idom.insert(block, new_idom);
                        changed = true;
                    }
                }
            }
        }

        Self {
            rpo_num,
            idom,
            entry,
        }
    }

    fn intersect(
        idom: &HashMap<BlockId, BlockId>,
        rpo_num: &HashMap<BlockId, usize>,
        a: BlockId,
        b: BlockId,
    ) -> BlockId {
        let mut a = a;
        let mut b = b;
        while a != b {
            while rpo_num[&a] > rpo_num[&b] {
                a = idom[&a];
            }
            while rpo_num[&b] > rpo_num[&a] {
                b = idom[&b];
            }
        }
        a
    }

    fn is_reachable(&self, block: BlockId) -> bool {
        self.rpo_num.contains_key(&block)
    }

    /// Whether `a` dominates `b`.
    fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        let mut cursor = b;
        loop {
            if cursor == a {
                return true;
            }
            if cursor == self.entry {
                return false;
            }
            match self.idom.get(&cursor) {
                Some(&next) if next != cursor => cursor = next,
                _ => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A diamond with a self-contained loop on one side:
    ///
    /// ```text
    ///   b0 -> b1 -> b2 -> b3
    ///          ^----/
    /// ```
    ///
    /// b1 is the header, b2 the latch, b0 the preheader, b2 -> b3 the exit.
    fn simple_loop() -> (Vec<(FuncId, BlockId, Vec<BlockId>)>, Vec<Vec<BlockId>>) {
        let functions = vec![(
            FuncId(0),
            BlockId(0),
            vec![BlockId(0), BlockId(1), BlockId(2), BlockId(3)],
        )];
        let preds = vec![
            vec![],
            vec![BlockId(0), BlockId(2)],
            vec![BlockId(1)],
            vec![BlockId(2)],
        ];
        (functions, preds)
    }

    fn simple_succ(block: BlockId) -> Vec<BlockId> {
        match block.0 {
            0 => vec![BlockId(1)],
            1 => vec![BlockId(2)],
            2 => vec![BlockId(1), BlockId(3)],
            _ => vec![],
        }
    }

    #[test]
    fn test_detects_simple_loop() {
        let (functions, preds) = simple_loop();
        let forest = LoopForest::compute(4, &functions, simple_succ, &preds);
        let loops: Vec<&LoopInfo> = forest.iter().collect();
        assert_eq!(loops.len(), 1);
        let l = loops[0];
        assert_eq!(l.header, BlockId(1));
        assert_eq!(l.preheader, Some(BlockId(0)));
        assert_eq!(l.latch, Some(BlockId(2)));
        assert!(l.is_well_formed());
        assert_eq!(l.exit_edges, vec![(BlockId(2), BlockId(3))]);
        assert_eq!(forest.loop_of(BlockId(1)), Some(l.id));
        assert_eq!(forest.loop_of(BlockId(2)), Some(l.id));
        assert_eq!(forest.loop_of(BlockId(0)), None);
        assert_eq!(forest.loop_of(BlockId(3)), None);
    }

    /// Two nested loops:
    ///
    /// ```text
    ///   b0 -> b1 -> b2 -> b3 -> b4
    ///          ^     ^----/
    ///          \---------/      (b3 -> b1 outer latch)
    /// ```
    fn nested_succ(block: BlockId) -> Vec<BlockId> {
        match block.0 {
            0 => vec![BlockId(1)],
            1 => vec![BlockId(2)],
            2 => vec![BlockId(3)],
            3 => vec![BlockId(2), BlockId(1), BlockId(4)],
            _ => vec![],
        }
    }

    #[test]
    fn test_nested_loops() {
        let functions = vec![(
            FuncId(0),
            BlockId(0),
            vec![BlockId(0), BlockId(1), BlockId(2), BlockId(3), BlockId(4)],
        )];
        let preds = vec![
            vec![],
            vec![BlockId(0), BlockId(3)],
            vec![BlockId(1), BlockId(3)],
            vec![BlockId(2)],
            vec![BlockId(3)],
        ];
        let forest = LoopForest::compute(5, &functions, nested_succ, &preds);
        let outer = forest.iter().find(|l| l.header == BlockId(1)).unwrap();
        let inner = forest.iter().find(|l| l.header == BlockId(2)).unwrap();
        assert_eq!(inner.parent, Some(outer.id));
        assert_eq!(outer.parent, None);
        assert_eq!(inner.depth, 2);
        assert_eq!(outer.depth, 1);
        assert!(outer.children.contains(&inner.id));
        // Innermost scope wins for shared blocks.
        assert_eq!(forest.loop_of(BlockId(2)), Some(inner.id));
        assert_eq!(forest.loop_of(BlockId(1)), Some(outer.id));
    }

    #[test]
    fn test_multi_latch_not_well_formed() {
        // b1 has back edges from b2 and b3.
        let functions = vec![(
            FuncId(0),
            BlockId(0),
            vec![BlockId(0), BlockId(1), BlockId(2), BlockId(3), BlockId(4)],
        )];
        let succ = |block: BlockId| -> Vec<BlockId> {
            match block.0 {
                0 => vec![BlockId(1)],
                1 => vec![BlockId(2), BlockId(3)],
                2 => vec![BlockId(1)],
                3 => vec![BlockId(1), BlockId(4)],
                _ => vec![],
            }
        };
        let preds = vec![
            vec![],
            vec![BlockId(0), BlockId(2), BlockId(3)],
            vec![BlockId(1)],
            vec![BlockId(1)],
            vec![BlockId(3)],
        ];
        let forest = LoopForest::compute(5, &functions, succ, &preds);
        let l = forest.iter().next().unwrap();
        assert_eq!(l.latch, None);
        assert!(!l.is_well_formed());
        assert_eq!(l.latches.len(), 2);
    }
}
