//! The speculation context tree.
//!
//! Contexts form a tree rooted at an un-inlined function. A context is either
//! the hypothetical inlining of one call site or one concrete iteration of a
//! peeled loop. Every context owns the state the analysis derives under its
//! assumptions: the improvement map, the dead-value set, per-block liveness
//! flags, dead edges, its child contexts and the blocked-work records waiting
//! on progress inside it.
//!
//! ```text
//!            root: main
//!           /          \
//!   inline f @ i4    PeelAttempt(L1)
//!        |           /     |      \
//!   inline g @ i9  iter0  iter1  iter2 [Final]
//! ```
//!
//! Iterations of one loop are grouped into a [`PeelAttempt`], an ordered,
//! append-only set. The set is *final* exactly when its last iteration has
//! been proven final; reads across the loop exit are only meaningful then.

use std::collections::{HashMap, HashSet};

use crate::analysis::{CtxId, LatticeValue, PeelId};
use crate::ir::{BlockId, FuncId, InstrId, LoopId, StaticRef};

bitflags::bitflags! {
    /// Per-block liveness flags inside one context.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct BlockStatus: u8 {
        /// Proven unreachable under this context's assumptions.
        const DEAD = 1 << 0;
        /// Proven to execute whenever the context is entered.
        const CERTAIN = 1 << 1;
    }
}

/// How much is known about whether a loop iteration is the last one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationStatus {
    /// The back edge has not been disproven; a later iteration may exist.
    Unknown,
    /// A later iteration exists, so this one is definitely not last.
    NonFinal,
    /// The back edge out of this iteration is dead; this iteration is last.
    Final,
}

/// What kind of speculation a context performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    /// The hypothetical inlining of one call site, or the analysis root.
    Inline {
        /// The call being inlined: caller context and call instruction.
        /// `None` at the root.
        call_site: Option<(CtxId, InstrId)>,
    },
    /// One concrete iteration of a peeled loop.
    Iteration {
        /// The owning iteration set.
        peel: PeelId,
        /// Zero-based iteration index.
        index: usize,
    },
}

/// One node of the speculation tree.
#[derive(Debug)]
pub struct ContextNode {
    /// This node's id.
    pub id: CtxId,
    /// The parent context; `None` at the root.
    pub parent: Option<CtxId>,
    /// The function whose code this context analyzes.
    pub function: FuncId,
    /// Inline or iteration payload.
    pub kind: ContextKind,
    /// The loop this context's code sits in: the peeled loop for iterations,
    /// `None` for inline contexts (which analyze a function top level).
    pub loop_scope: Option<LoopId>,
    /// Iteration finality; only meaningful for iteration contexts.
    pub iter_status: IterationStatus,
    /// Resolved values, set-once.
    pub(crate) improved: HashMap<StaticRef, LatticeValue>,
    /// Values proven to have no live dynamic users.
    pub(crate) dead_values: HashSet<StaticRef>,
    /// Per-block liveness flags; absent means undetermined.
    pub(crate) block_status: HashMap<BlockId, BlockStatus>,
    /// Edges proven never taken under this context.
    pub(crate) dead_edges: HashSet<(BlockId, BlockId)>,
    /// Inline children, keyed by call instruction.
    pub(crate) inline_children: HashMap<InstrId, CtxId>,
    /// Peel attempts, keyed by the peeled loop.
    pub(crate) peel_children: HashMap<LoopId, PeelId>,
    /// Loads waiting for more of this context's CFG to settle.
    pub(crate) cfg_blocked_loads: Vec<(CtxId, InstrId)>,
    /// Loads blocked on a specific instruction of this context resolving.
    pub(crate) inst_blocked_loads: HashMap<InstrId, Vec<(CtxId, InstrId)>>,
    /// Resource promotions waiting for more of this context's CFG to settle.
    pub(crate) cfg_blocked_promotions: Vec<(CtxId, InstrId)>,
}

impl ContextNode {
    fn new(id: CtxId, parent: Option<CtxId>, function: FuncId, kind: ContextKind) -> Self {
        Self {
            id,
            parent,
            function,
            kind,
            loop_scope: None,
            iter_status: IterationStatus::Unknown,
            improved: HashMap::new(),
            dead_values: HashSet::new(),
            block_status: HashMap::new(),
            dead_edges: HashSet::new(),
            inline_children: HashMap::new(),
            peel_children: HashMap::new(),
            cfg_blocked_loads: Vec::new(),
            inst_blocked_loads: HashMap::new(),
            cfg_blocked_promotions: Vec::new(),
        }
    }

    /// The block's liveness flags, `Default` (neither dead nor certain) when
    /// not yet determined.
    #[must_use]
    pub fn block_status(&self, block: BlockId) -> BlockStatus {
        self.block_status.get(&block).copied().unwrap_or_default()
    }

    /// Whether the block is proven unreachable in this context.
    #[must_use]
    pub fn block_is_dead(&self, block: BlockId) -> bool {
        self.block_status(block).contains(BlockStatus::DEAD)
    }

    /// Whether the block is proven to always execute in this context.
    #[must_use]
    pub fn block_is_certain(&self, block: BlockId) -> bool {
        self.block_status(block).contains(BlockStatus::CERTAIN)
    }

    /// Whether the edge can be ignored: explicitly killed or sourced in a
    /// dead block.
    #[must_use]
    pub fn edge_is_dead(&self, from: BlockId, to: BlockId) -> bool {
        self.dead_edges.contains(&(from, to)) || self.block_is_dead(from)
    }

    /// The resolved entry for a value local to this context, if any.
    #[must_use]
    pub fn improvement(&self, value: StaticRef) -> Option<LatticeValue> {
        self.improved.get(&value).copied()
    }

    /// Whether the value was proven dead in this context.
    #[must_use]
    pub fn value_is_marked_dead(&self, value: StaticRef) -> bool {
        self.dead_values.contains(&value)
    }

    /// The inline child for a call instruction, if one was created.
    #[must_use]
    pub fn inline_child(&self, call: InstrId) -> Option<CtxId> {
        self.inline_children.get(&call).copied()
    }

    /// The peel attempt for a loop, if one was created.
    #[must_use]
    pub fn peel_child(&self, loop_id: LoopId) -> Option<PeelId> {
        self.peel_children.get(&loop_id).copied()
    }
}

/// An ordered, append-only set of iteration contexts for one peeled loop.
#[derive(Debug)]
pub struct PeelAttempt {
    /// This attempt's id.
    pub id: PeelId,
    /// The loop being peeled.
    pub loop_id: LoopId,
    /// The context that owns the loop.
    pub parent: CtxId,
    /// Iteration contexts in order; never removed or reordered.
    pub iterations: Vec<CtxId>,
}

/// Arena of all context nodes and peel attempts.
#[derive(Debug, Default)]
pub struct ContextTree {
    nodes: Vec<ContextNode>,
    peels: Vec<PeelAttempt>,
}

impl ContextTree {
    /// Creates an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a node.
    #[must_use]
    pub fn node(&self, id: CtxId) -> &ContextNode {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: CtxId) -> &mut ContextNode {
        &mut self.nodes[id.0]
    }

    /// Looks up a peel attempt.
    #[must_use]
    pub fn peel(&self, id: PeelId) -> &PeelAttempt {
        &self.peels[id.0]
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Iterates over all nodes.
    pub fn iter(&self) -> impl Iterator<Item = &ContextNode> {
        self.nodes.iter()
    }

    /// Allocates a root context for a function.
    pub(crate) fn alloc_root(&mut self, function: FuncId) -> CtxId {
        let id = CtxId(self.nodes.len());
        self.nodes.push(ContextNode::new(
            id,
            None,
            function,
            ContextKind::Inline { call_site: None },
        ));
        id
    }

    /// Allocates an inline child for a call site and registers it with the
    /// caller.
    pub(crate) fn alloc_inline(&mut self, caller: CtxId, call: InstrId, callee: FuncId) -> CtxId {
        let id = CtxId(self.nodes.len());
        self.nodes.push(ContextNode::new(
            id,
            Some(caller),
            callee,
            ContextKind::Inline {
                call_site: Some((caller, call)),
            },
        ));
        self.nodes[caller.0].inline_children.insert(call, id);
        id
    }

    /// Allocates an empty peel attempt for a loop and registers it with its
    /// owner.
    pub(crate) fn alloc_peel(&mut self, parent: CtxId, loop_id: LoopId) -> PeelId {
        let id = PeelId(self.peels.len());
        self.peels.push(PeelAttempt {
            id,
            loop_id,
            parent,
            iterations: Vec::new(),
        });
        self.nodes[parent.0].peel_children.insert(loop_id, id);
        id
    }

    /// Appends the next iteration context to a peel attempt.
    ///
    /// The previous last iteration, if any, is downgraded from `Unknown` to
    /// `NonFinal`: a successor iteration now exists.
    pub(crate) fn push_iteration(&mut self, peel: PeelId) -> CtxId {
        let (parent, loop_id, index, prev) = {
            let attempt = &self.peels[peel.0];
            (
                attempt.parent,
                attempt.loop_id,
                attempt.iterations.len(),
                attempt.iterations.last().copied(),
            )
        };
        if let Some(prev) = prev {
            self.nodes[prev.0].iter_status = IterationStatus::NonFinal;
        }
        let function = self.nodes[parent.0].function;
        let id = CtxId(self.nodes.len());
        let mut node = ContextNode::new(
            id,
            Some(parent),
            function,
            ContextKind::Iteration { peel, index },
        );
        node.loop_scope = Some(loop_id);
        self.nodes.push(node);
        self.peels[peel.0].iterations.push(id);
        id
    }

    /// Whether the iteration set is complete: non-empty and its last
    /// iteration proven final.
    #[must_use]
    pub fn peel_is_final(&self, peel: PeelId) -> bool {
        self.peels[peel.0]
            .iterations
            .last()
            .is_some_and(|&last| self.nodes[last.0].iter_status == IterationStatus::Final)
    }

    /// The last iteration of a set, if it has any.
    #[must_use]
    pub fn last_iteration(&self, peel: PeelId) -> Option<CtxId> {
        self.peels[peel.0].iterations.last().copied()
    }

    /// The iteration following `ctx` in its set, if already materialized.
    #[must_use]
    pub fn next_iteration(&self, ctx: CtxId) -> Option<CtxId> {
        match self.nodes[ctx.0].kind {
            ContextKind::Iteration { peel, index } => {
                self.peels[peel.0].iterations.get(index + 1).copied()
            }
            ContextKind::Inline { .. } => None,
        }
    }

    /// The iteration preceding `ctx` in its set.
    #[must_use]
    pub fn prev_iteration(&self, ctx: CtxId) -> Option<CtxId> {
        match self.nodes[ctx.0].kind {
            ContextKind::Iteration { peel, index } if index > 0 => {
                self.peels[peel.0].iterations.get(index - 1).copied()
            }
            _ => None,
        }
    }

    /// Walks from `ctx` up through iteration contexts to the inline context
    /// that owns the enclosing function body.
    #[must_use]
    pub fn function_root(&self, ctx: CtxId) -> CtxId {
        let mut cursor = ctx;
        loop {
            match self.nodes[cursor.0].kind {
                ContextKind::Inline { .. } => return cursor,
                ContextKind::Iteration { .. } => match self.nodes[cursor.0].parent {
                    Some(parent) => cursor = parent,
                    None => return cursor,
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_growth_downgrades_previous() {
        let mut tree = ContextTree::new();
        let root = tree.alloc_root(FuncId(0));
        let peel = tree.alloc_peel(root, LoopId(0));
        let it0 = tree.push_iteration(peel);
        assert_eq!(tree.node(it0).iter_status, IterationStatus::Unknown);
        let it1 = tree.push_iteration(peel);
        assert_eq!(tree.node(it0).iter_status, IterationStatus::NonFinal);
        assert_eq!(tree.node(it1).iter_status, IterationStatus::Unknown);
        assert!(!tree.peel_is_final(peel));
        tree.node_mut(it1).iter_status = IterationStatus::Final;
        assert!(tree.peel_is_final(peel));
        assert_eq!(tree.last_iteration(peel), Some(it1));
    }

    #[test]
    fn test_iteration_navigation() {
        let mut tree = ContextTree::new();
        let root = tree.alloc_root(FuncId(0));
        let peel = tree.alloc_peel(root, LoopId(0));
        let it0 = tree.push_iteration(peel);
        let it1 = tree.push_iteration(peel);
        assert_eq!(tree.next_iteration(it0), Some(it1));
        assert_eq!(tree.next_iteration(it1), None);
        assert_eq!(tree.prev_iteration(it1), Some(it0));
        assert_eq!(tree.prev_iteration(it0), None);
        assert_eq!(tree.function_root(it1), root);
    }

    #[test]
    fn test_inline_child_registration() {
        let mut tree = ContextTree::new();
        let root = tree.alloc_root(FuncId(0));
        let child = tree.alloc_inline(root, InstrId(5), FuncId(1));
        assert_eq!(tree.node(root).inline_child(InstrId(5)), Some(child));
        assert_eq!(tree.node(child).parent, Some(root));
        assert_eq!(tree.node(child).function, FuncId(1));
        assert_eq!(tree.function_root(child), child);
    }

    #[test]
    fn test_block_status_defaults() {
        let mut tree = ContextTree::new();
        let root = tree.alloc_root(FuncId(0));
        let node = tree.node(root);
        assert!(!node.block_is_dead(BlockId(0)));
        assert!(!node.block_is_certain(BlockId(0)));
        assert!(!node.edge_is_dead(BlockId(0), BlockId(1)));
    }
}
