//! Per-context CFG liveness.
//!
//! Blocks start undetermined and are refined monotonically to *dead* (proven
//! unreachable under the context's assumptions) or *certain* (proven to
//! execute whenever the context is entered). Refinement flows along edges:
//! a block is dead when every incoming edge is dead, and certain when some
//! certain predecessor has it as its only live successor. A block proven
//! both at once keeps only dead.
//!
//! # Algorithm
//!
//! `check_block` recomputes one block's flags from its predecessor edges and,
//! when a flag is newly set, pushes consequences outward: dead blocks kill
//! their outgoing edges, drop their improvements and release loads blocked
//! on this context's CFG, while certain blocks expand call children, attempt
//! resource promotion and release blocked promotions. Edges are routed by
//! loop scope: the latch-to-header and loop-exit edges of a peeled iteration
//! grow or finalize the iteration set instead of looping back, and edges
//! belonging to a child loop are re-dispatched into every existing iteration.
//! Predecessors inside a completed child loop report their flags through the
//! loop's final iteration, so certainty survives crossing a peeled region.

use crate::analysis::{
    BlockStatus, ContextKind, CtxId, IterationStatus, PeelId, WorkQueue,
};
use crate::ir::{BlockId, Op, StaticRef};

/// Ceiling on materialized iterations per loop. A loop whose trip count the
/// analysis cannot bound would otherwise grow its iteration set forever; a
/// capped set simply stays open and exit reads keep failing conservatively.
const MAX_PEEL_ITERATIONS: usize = 64;

impl<'p> crate::analysis::Speculation<'p> {
    /// Whether a block's flags are still refinable in a context.
    #[must_use]
    pub fn should_check_block(&self, ctx: CtxId, block: BlockId) -> bool {
        let node = self.tree.node(ctx);
        !(node.block_is_dead(block) || node.block_is_certain(block))
    }

    /// Recomputes liveness flags for one block in one context.
    pub fn check_block(&mut self, ctx: CtxId, block: BlockId, q: &mut dyn WorkQueue) {
        if !self.should_check_block(ctx, block) {
            return;
        }
        let program = self.program();

        let mut is_dead = true;
        let mut is_certain = true;
        if block == self.entry_block(ctx) {
            is_dead = false;
        } else {
            for &pred in program.predecessors(block) {
                if self.tree.node(ctx).edge_is_dead(pred, block) {
                    continue;
                }
                is_dead = false;
                // A predecessor inside a completed child loop reports its
                // flags through that loop's final iteration.
                let Some(view) = self.pred_flag_ctx(ctx, pred, block) else {
                    is_certain = false;
                    continue;
                };
                let view_node = self.tree.node(view);
                if !view_node.block_is_certain(pred) {
                    is_certain = false;
                    continue;
                }
                for succ in program.successors(pred) {
                    if succ != block && !view_node.edge_is_dead(pred, succ) {
                        is_certain = false;
                        break;
                    }
                }
            }
        }

        // A block proven unreachable cannot also be proven to always run.
        if is_dead && is_certain {
            is_certain = false;
        }
        if !is_dead && !is_certain {
            // No new flag; still give unqueued phis a chance to resolve.
            self.queue_block_phis(ctx, block, q);
            return;
        }

        if is_dead {
            let node = self.tree.node_mut(ctx);
            node.block_status.insert(block, BlockStatus::DEAD);
            // Improvements derived for an unreachable block are meaningless.
            for &instr in &program.block(block).instrs {
                node.improved.remove(&StaticRef::Instruction(instr));
            }
        } else {
            self.tree
                .node_mut(ctx)
                .block_status
                .insert(block, BlockStatus::CERTAIN);
            self.consider_certain_calls(ctx, block, q);
        }

        if is_dead {
            self.flush_cfg_blocked_loads(ctx, q);
        } else {
            self.flush_cfg_blocked_promotions(ctx, q);
        }

        for succ in program.successors(block) {
            if is_dead {
                self.tree.node_mut(ctx).dead_edges.insert((block, succ));
            }
            self.check_edge(ctx, block, succ, q);
        }

        if !is_dead {
            self.queue_block_phis(ctx, block, q);
        }
    }

    /// The context whose flags are authoritative for `pred` when deciding
    /// `block`'s certainty in `ctx`.
    ///
    /// A predecessor at this context's own scope answers for itself. A
    /// predecessor inside a child loop answers through the final iteration of
    /// a completed peel, provided the `pred -> block` exit edge is dead in
    /// every earlier iteration; otherwise (open set, never peeled, or an exit
    /// taken from more than one iteration) there is no single authoritative
    /// view and the caller must stay conservative.
    fn pred_flag_ctx(&self, ctx: CtxId, pred: BlockId, block: BlockId) -> Option<CtxId> {
        let program = self.program();
        let my_scope = self.tree.node(ctx).loop_scope;
        let pred_scope = program.loop_of(pred);
        if pred_scope == my_scope || !program.scope_contains(my_scope, pred_scope) {
            return Some(ctx);
        }
        let child = program.immediate_child_scope(my_scope, pred_scope?)?;
        let peel = self.tree.node(ctx).peel_child(child)?;
        if !self.tree.peel_is_final(peel) {
            return None;
        }
        let iterations = &self.tree.peel(peel).iterations;
        let (&last, earlier) = iterations.split_last()?;
        if earlier
            .iter()
            .any(|&iter| !self.tree.node(iter).edge_is_dead(pred, block))
        {
            return None;
        }
        Some(last)
    }

    fn queue_block_phis(&self, ctx: CtxId, block: BlockId, q: &mut dyn WorkQueue) {
        for &instr in &self.program().block(block).instrs {
            if matches!(self.program().instr(instr).op, Op::Phi { .. }) {
                q.queue_try_evaluate(ctx, StaticRef::Instruction(instr));
            }
        }
    }

    /// A certain block's calls definitely happen: expand inline children, or
    /// hand unexpandable calls to the resource recognizer.
    fn consider_certain_calls(&mut self, ctx: CtxId, block: BlockId, q: &mut dyn WorkQueue) {
        let program = self.program();
        for &instr in &program.block(block).instrs {
            if !matches!(program.instr(instr).op, Op::Call { .. }) {
                continue;
            }
            if self.get_or_create_inline_child(ctx, instr, q).is_none()
                && self.recognizes_resource(instr)
            {
                q.queue_promote_resource(ctx, instr);
            }
        }
    }

    /// Re-queues loads that were waiting on this context's CFG. Only a dead
    /// transition can change a backward walk's answer: a clobbering path may
    /// now be gone.
    fn flush_cfg_blocked_loads(&mut self, ctx: CtxId, q: &mut dyn WorkQueue) {
        let node = self.tree.node_mut(ctx);
        for (load_ctx, load) in std::mem::take(&mut node.cfg_blocked_loads) {
            q.queue_check_load(load_ctx, load);
        }
    }

    /// Re-queues promotions that were waiting on a block of this context
    /// turning certain.
    fn flush_cfg_blocked_promotions(&mut self, ctx: CtxId, q: &mut dyn WorkQueue) {
        let node = self.tree.node_mut(ctx);
        for (call_ctx, call) in std::mem::take(&mut node.cfg_blocked_promotions) {
            q.queue_promote_resource(call_ctx, call);
        }
    }

    /// Records that a load attempt should retry once `ctx`'s CFG settles
    /// further.
    pub(crate) fn block_load_on_cfg(&mut self, ctx: CtxId, load_ctx: CtxId, load: crate::ir::InstrId) {
        self.tree
            .node_mut(ctx)
            .cfg_blocked_loads
            .push((load_ctx, load));
    }

    /// Routes an edge to the context responsible for it.
    pub fn check_edge(&mut self, ctx: CtxId, from: BlockId, to: BlockId, q: &mut dyn WorkQueue) {
        let program = self.program();
        let edge_scope = program.edge_scope(from, to);
        let my_scope = self.tree.node(ctx).loop_scope;
        if edge_scope == my_scope || program.scope_contains(edge_scope, my_scope) {
            self.check_local_edge(ctx, from, to, q);
        } else if program.scope_contains(my_scope, edge_scope) {
            self.check_variant_edge(ctx, from, to, q);
        }
    }

    fn check_local_edge(&mut self, ctx: CtxId, from: BlockId, to: BlockId, q: &mut dyn WorkQueue) {
        if !self.check_loop_special_edge(ctx, from, to, q) {
            q.queue_check_block(ctx, to);
        }
    }

    /// An edge scoped to a loop nested below this context: re-dispatch into
    /// every materialized iteration, or handle here when the loop was never
    /// peeled.
    fn check_variant_edge(&mut self, ctx: CtxId, from: BlockId, to: BlockId, q: &mut dyn WorkQueue) {
        let program = self.program();
        let my_scope = self.tree.node(ctx).loop_scope;
        let Some(edge_loop) = program.edge_scope(from, to) else {
            return;
        };
        let Some(child) = program.immediate_child_scope(my_scope, edge_loop) else {
            return;
        };
        match self.tree.node(ctx).peel_child(child) {
            Some(peel) => {
                let iterations = self.tree.peel(peel).iterations.clone();
                for iteration in iterations {
                    self.check_edge(iteration, from, to, q);
                }
            }
            None => self.check_local_edge(ctx, from, to, q),
        }
    }

    /// Handles edges with loop-boundary meaning. Returns `true` when the edge
    /// was consumed here.
    fn check_loop_special_edge(
        &mut self,
        ctx: CtxId,
        from: BlockId,
        to: BlockId,
        q: &mut dyn WorkQueue,
    ) -> bool {
        let program = self.program();
        let node = self.tree.node(ctx);

        // Iteration contexts own their loop's back edge and exits.
        if let (ContextKind::Iteration { peel, .. }, Some(my_loop)) = (node.kind, node.loop_scope) {
            let info = program.loop_info(my_loop);
            let latch_to_header = info.latch == Some(from) && to == info.header;
            if latch_to_header {
                if node.edge_is_dead(from, to) {
                    self.finalize_iteration(ctx, peel, q);
                } else if self.tree.next_iteration(ctx).is_none()
                    && self.tree.node(ctx).iter_status == IterationStatus::Unknown
                    && self.tree.peel(peel).iterations.len() < MAX_PEEL_ITERATIONS
                {
                    self.create_next_iteration(peel, q);
                }
                return true;
            }
            if !info.contains(to) {
                // Exit target liveness belongs to the owner of the loop.
                if !node.edge_is_dead(from, to) {
                    let parent = self.tree.peel(peel).parent;
                    q.queue_check_block(parent, to);
                }
                return true;
            }
            // Other in-loop edges fall through: a nested loop's entry edge
            // is the same preheader case any owner handles.
        }

        // Entering a child loop through its preheader starts (or kills) a
        // peel attempt.
        if let Some(target_loop) = program.loop_of(to) {
            let info = program.loop_info(target_loop);
            if info.header == to
                && info.preheader == Some(from)
                && Some(target_loop) != self.tree.node(ctx).loop_scope
            {
                if self.tree.node(ctx).edge_is_dead(from, to) {
                    self.kill_unentered_loop(ctx, target_loop, q);
                } else {
                    self.get_or_create_peel(ctx, target_loop, q);
                }
                return true;
            }
        }
        false
    }

    /// The loop's entry edge is dead: nothing in it runs, and nothing leaves
    /// it either.
    fn kill_unentered_loop(
        &mut self,
        ctx: CtxId,
        loop_id: crate::ir::LoopId,
        q: &mut dyn WorkQueue,
    ) {
        let info = self.program().loop_info(loop_id);
        let exit_edges = info.exit_edges.clone();
        let header = info.header;
        {
            let node = self.tree.node_mut(ctx);
            for &edge in &exit_edges {
                node.dead_edges.insert(edge);
            }
        }
        q.queue_check_block(ctx, header);
        for (_, target) in exit_edges {
            q.queue_check_block(ctx, target);
        }
    }

    /// The back edge out of this iteration is dead: the iteration set is
    /// complete. Exit edges dead in *every* iteration die in the parent, and
    /// exit targets and exit confluences become evaluatable there.
    fn finalize_iteration(&mut self, ctx: CtxId, peel: PeelId, q: &mut dyn WorkQueue) {
        self.tree.node_mut(ctx).iter_status = IterationStatus::Final;

        let program = self.program();
        let (parent, loop_id, iterations) = {
            let attempt = self.tree.peel(peel);
            (attempt.parent, attempt.loop_id, attempt.iterations.clone())
        };
        let exit_edges = program.loop_info(loop_id).exit_edges.clone();

        for &(from, to) in &exit_edges {
            let dead_everywhere = iterations
                .iter()
                .all(|&iter| self.tree.node(iter).edge_is_dead(from, to));
            if dead_everywhere {
                self.tree.node_mut(parent).dead_edges.insert((from, to));
            }
            q.queue_check_block(parent, to);
            for &instr in &program.block(to).instrs {
                if matches!(program.instr(instr).op, Op::Phi { .. }) {
                    q.queue_try_evaluate(parent, StaticRef::Instruction(instr));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::analysis::{RecordingQueue, Speculation, WorkItem};
    use crate::ir::{Op, Operand, ProgramBuilder, TypeKind};

    /// entry -> (then | else) -> merge, with a constant-true branch.
    #[test]
    fn test_entry_is_certain_and_branch_targets_follow() {
        let mut b = ProgramBuilder::new();
        let f = b.function("f", &[], TypeKind::Void);
        let entry = b.block(f);
        let then_b = b.block(f);
        let else_b = b.block(f);
        let merge = b.block(f);
        b.push(
            entry,
            TypeKind::Void,
            Op::Branch {
                cond: Operand::boolean(true),
                on_true: then_b,
                on_false: else_b,
            },
        );
        b.push(then_b, TypeKind::Void, Op::Jump { target: merge });
        b.push(else_b, TypeKind::Void, Op::Jump { target: merge });
        b.push(merge, TypeKind::Void, Op::Return { value: None });
        let program = b.finish().unwrap();

        let mut spec = Speculation::new(&program);
        let mut q = RecordingQueue::new();
        let root = spec.analyze_root(f, &mut q).unwrap();
        spec.check_block(root, entry, &mut q);

        let node = spec.tree().node(root);
        assert!(node.block_is_certain(entry));
        assert!(!node.block_is_dead(entry));
        // Successor checks were queued.
        assert!(q.items.contains(&WorkItem::CheckBlock {
            ctx: root,
            block: then_b
        }));
    }

    /// A block whose only predecessor edge is dead becomes dead, and its
    /// improvements are purged.
    #[test]
    fn test_dead_block_purges_improvements() {
        let mut b = ProgramBuilder::new();
        let f = b.function("f", &[], TypeKind::Void);
        let entry = b.block(f);
        let doomed = b.block(f);
        let merge = b.block(f);
        b.push(
            entry,
            TypeKind::Void,
            Op::Branch {
                cond: Operand::boolean(false),
                on_true: doomed,
                on_false: merge,
            },
        );
        let stray = b.push(doomed, TypeKind::Ptr, Op::Alloca);
        b.push(doomed, TypeKind::Void, Op::Jump { target: merge });
        b.push(merge, TypeKind::Void, Op::Return { value: None });
        let program = b.finish().unwrap();

        let mut spec = Speculation::new(&program);
        let mut q = RecordingQueue::new();
        let root = spec.analyze_root(f, &mut q).unwrap();
        spec.set_replacement(
            root,
            crate::ir::StaticRef::Instruction(stray),
            crate::analysis::LatticeValue::Constant(crate::ir::ConstValue::I32(1)),
        )
        .unwrap();

        // Kill the only edge into `doomed` by hand, then recheck it.
        spec.tree.node_mut(root).dead_edges.insert((entry, doomed));
        spec.check_block(root, doomed, &mut q);

        let node = spec.tree().node(root);
        assert!(node.block_is_dead(doomed));
        assert!(!node.block_is_certain(doomed));
        assert_eq!(
            node.improvement(crate::ir::StaticRef::Instruction(stray)),
            None
        );
    }

    /// Dead status wins over certain when both would be derivable.
    #[test]
    fn test_dead_and_certain_suppression() {
        let mut b = ProgramBuilder::new();
        let f = b.function("f", &[], TypeKind::Void);
        let entry = b.block(f);
        let only = b.block(f);
        b.push(entry, TypeKind::Void, Op::Jump { target: only });
        b.push(only, TypeKind::Void, Op::Return { value: None });
        let program = b.finish().unwrap();

        let mut spec = Speculation::new(&program);
        let mut q = RecordingQueue::new();
        let root = spec.analyze_root(f, &mut q).unwrap();
        // Entry is certain and `only` is its sole successor; killing the edge
        // at the same time makes `only` derive both dead and certain.
        spec.check_block(root, entry, &mut q);
        spec.tree.node_mut(root).dead_edges.insert((entry, only));
        spec.check_block(root, only, &mut q);

        let node = spec.tree().node(root);
        assert!(node.block_is_dead(only));
        assert!(!node.block_is_certain(only));
    }

    /// A certain transition releases parked promotions; parked loads wait
    /// for a dead transition instead.
    #[test]
    fn test_cfg_flush_splits_by_transition() {
        let mut b = ProgramBuilder::new();
        let f = b.function("f", &[], TypeKind::Void);
        let entry = b.block(f);
        let side = b.block(f);
        let jump = b.push(entry, TypeKind::Void, Op::Jump { target: side });
        let ret = b.push(side, TypeKind::Void, Op::Return { value: None });
        let program = b.finish().unwrap();

        let mut spec = Speculation::new(&program);
        let mut q = RecordingQueue::new();
        let root = spec.analyze_root(f, &mut q).unwrap();
        spec.block_load_on_cfg(root, root, jump);
        spec.tree.node_mut(root).cfg_blocked_promotions.push((root, ret));

        q.items.clear();
        spec.check_block(root, entry, &mut q);
        assert!(q.items.contains(&WorkItem::PromoteResource { ctx: root, call: ret }));
        assert!(!q.items.iter().any(|item| matches!(item, WorkItem::CheckLoad { .. })));

        spec.tree.node_mut(root).dead_edges.insert((entry, side));
        spec.check_block(root, side, &mut q);
        assert!(q.items.contains(&WorkItem::CheckLoad { ctx: root, load: jump }));
    }

    /// A live preheader-to-header edge seen from inside an outer iteration
    /// starts a peel attempt for the inner loop.
    #[test]
    fn test_iteration_context_peels_nested_loop() {
        let mut b = ProgramBuilder::new();
        let f = b.function("f", &[("c", TypeKind::Bool)], TypeKind::Void);
        let entry = b.block(f);
        let oheader = b.block(f);
        let ipre = b.block(f);
        let iheader = b.block(f);
        let ibody = b.block(f);
        let olatch = b.block(f);
        let oexit = b.block(f);
        b.push(entry, TypeKind::Void, Op::Jump { target: oheader });
        b.push(
            oheader,
            TypeKind::Void,
            Op::Branch {
                cond: Operand::arg(f, 0),
                on_true: ipre,
                on_false: oexit,
            },
        );
        b.push(ipre, TypeKind::Void, Op::Jump { target: iheader });
        b.push(
            iheader,
            TypeKind::Void,
            Op::Branch {
                cond: Operand::arg(f, 0),
                on_true: ibody,
                on_false: olatch,
            },
        );
        b.push(ibody, TypeKind::Void, Op::Jump { target: iheader });
        b.push(olatch, TypeKind::Void, Op::Jump { target: oheader });
        b.push(oexit, TypeKind::Void, Op::Return { value: None });
        let program = b.finish().unwrap();

        let outer = program.loop_of(oheader).unwrap();
        let inner = program.loop_of(iheader).unwrap();

        let mut spec = Speculation::new(&program);
        let mut q = RecordingQueue::new();
        let root = spec.analyze_root(f, &mut q).unwrap();
        let peel = spec.get_or_create_peel(root, outer, &mut q).unwrap();
        let iter0 = spec.tree().peel(peel).iterations[0];

        spec.check_edge(iter0, ipre, iheader, &mut q);
        assert!(spec.tree().node(iter0).peel_child(inner).is_some());
    }

    /// Checking a block twice queues no contradictory state: flags stick.
    #[test]
    fn test_check_block_idempotent() {
        let mut b = ProgramBuilder::new();
        let f = b.function("f", &[], TypeKind::Void);
        let entry = b.block(f);
        b.push(entry, TypeKind::Void, Op::Return { value: None });
        let program = b.finish().unwrap();

        let mut spec = Speculation::new(&program);
        let mut q = RecordingQueue::new();
        let root = spec.analyze_root(f, &mut q).unwrap();
        spec.check_block(root, entry, &mut q);
        let before = spec.tree().node(root).block_status(entry);
        spec.check_block(root, entry, &mut q);
        assert_eq!(spec.tree().node(root).block_status(entry), before);
    }
}
