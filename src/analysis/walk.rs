//! Context-aware instruction walkers.
//!
//! These traverse the *dynamic* instruction stream the speculation tree
//! implies, not the static CFG: crossing a call boundary continues in the
//! inlined child (and back out at the call site), crossing a peeled loop's
//! back edge continues in the adjacent iteration context, and leaving a loop
//! falls back to its owner. Both directions use a frontier of cursors plus a
//! visited set, so merges are walked once.
//!
//! The visitor steers with [`WalkStep`]: `Continue`, `StopPath` (this path
//! is satisfied), or `StopWalk` (the whole question is answered). Calls the
//! walker cannot see through are surfaced via
//! [`InstructionVisitor::blocked_by_unexpanded_call`]; answering `true`
//! aborts the walk.

use std::collections::HashSet;

use crate::analysis::{ContextKind, CtxId, Speculation};
use crate::ir::{BlockId, InstrId, Op};

/// Visitor verdict for one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkStep {
    /// Keep walking this path.
    Continue,
    /// This path is answered; abandon it but keep the others.
    StopPath,
    /// The whole walk is answered.
    StopWalk,
}

/// How a walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOutcome {
    /// Every path ran to its end (or was stopped per-path).
    Completed,
    /// The visitor answered `StopWalk`.
    Stopped,
    /// An unexpanded call blocked the walk.
    Blocked,
}

/// Steers a context-aware walk.
pub trait InstructionVisitor {
    /// Visits one instruction instance.
    fn visit(&mut self, spec: &Speculation<'_>, ctx: CtxId, instr: InstrId) -> WalkStep;

    /// Whether the walk should traverse into (or through) this call rather
    /// than treat it as an ordinary instruction.
    fn should_enter_call(&mut self, spec: &Speculation<'_>, ctx: CtxId, call: InstrId) -> bool {
        let _ = (spec, ctx, call);
        false
    }

    /// Called when a call the walk wanted to enter has no inlined child.
    /// Returning `true` aborts the walk; `false` steps over the call.
    fn blocked_by_unexpanded_call(
        &mut self,
        spec: &Speculation<'_>,
        ctx: CtxId,
        call: InstrId,
    ) -> bool {
        let _ = (spec, ctx, call);
        true
    }

    /// Called when a backward path runs out of program: the analysis root's
    /// entry was reached.
    fn reached_root_entry(&mut self, spec: &Speculation<'_>, ctx: CtxId) {
        let _ = (spec, ctx);
    }
}

/// A position in one context's instruction stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct Cursor {
    ctx: CtxId,
    block: BlockId,
    /// Backward: number of instructions left below this point.
    /// Forward: index of the next instruction to visit.
    pos: usize,
}

impl<'p> Speculation<'p> {
    /// Walks backward from `from` in `ctx`, visiting each reachable dynamic
    /// predecessor instruction once. With `skip_first` the starting
    /// instruction itself is not visited.
    pub fn walk_backward(
        &self,
        ctx: CtxId,
        from: InstrId,
        skip_first: bool,
        visitor: &mut dyn InstructionVisitor,
    ) -> WalkOutcome {
        let program = self.program();
        let start_block = program.instr(from).block;
        let start_pos = program.position_in_block(from) + usize::from(!skip_first);
        let mut frontier = vec![Cursor {
            ctx,
            block: start_block,
            pos: start_pos,
        }];
        let mut visited: HashSet<Cursor> = frontier.iter().copied().collect();

        while let Some(cursor) = frontier.pop() {
            let instrs = &program.block(cursor.block).instrs;
            let mut pos = cursor.pos;
            let mut stopped_path = false;
            while pos > 0 {
                pos -= 1;
                let instr = instrs[pos];
                if matches!(program.instr(instr).op, Op::Call { .. })
                    && visitor.should_enter_call(self, cursor.ctx, instr)
                {
                    match self.tree.node(cursor.ctx).inline_child(instr) {
                        Some(child) => {
                            // Continue from the end of each live return block;
                            // the child's entry routes back to the call site.
                            self.queue_return_blocks_bw(child, &mut frontier, &mut visited);
                            stopped_path = true;
                        }
                        None => {
                            if visitor.blocked_by_unexpanded_call(self, cursor.ctx, instr) {
                                return WalkOutcome::Blocked;
                            }
                            continue;
                        }
                    }
                    break;
                }
                match visitor.visit(self, cursor.ctx, instr) {
                    WalkStep::Continue => {}
                    WalkStep::StopPath => {
                        stopped_path = true;
                        break;
                    }
                    WalkStep::StopWalk => return WalkOutcome::Stopped,
                }
            }
            if !stopped_path {
                self.queue_predecessors_bw(cursor.ctx, cursor.block, visitor, &mut frontier, &mut visited);
            }
        }
        WalkOutcome::Completed
    }

    fn queue_return_blocks_bw(
        &self,
        child: CtxId,
        frontier: &mut Vec<Cursor>,
        visited: &mut HashSet<Cursor>,
    ) {
        let program = self.program();
        let node = self.tree.node(child);
        for &block in &program.function(node.function).blocks {
            if node.block_is_dead(block) {
                continue;
            }
            if matches!(program.terminator(block).op, Op::Return { .. }) {
                push_cursor(
                    Cursor {
                        ctx: child,
                        block,
                        pos: program.block(block).instrs.len(),
                    },
                    frontier,
                    visited,
                );
            }
        }
    }

    fn queue_predecessors_bw(
        &self,
        ctx: CtxId,
        block: BlockId,
        visitor: &mut dyn InstructionVisitor,
        frontier: &mut Vec<Cursor>,
        visited: &mut HashSet<Cursor>,
    ) {
        let program = self.program();
        let node = self.tree.node(ctx);

        if block == self.entry_block(ctx) {
            match node.kind {
                ContextKind::Inline { call_site: None } => {
                    visitor.reached_root_entry(self, ctx);
                }
                ContextKind::Inline {
                    call_site: Some((caller, call)),
                } => {
                    // Resume in the caller, just above the call.
                    push_cursor(
                        Cursor {
                            ctx: caller,
                            block: program.instr(call).block,
                            pos: program.position_in_block(call),
                        },
                        frontier,
                        visited,
                    );
                }
                ContextKind::Iteration { peel, index } => {
                    let info = program.loop_info(self.tree.peel(peel).loop_id);
                    let (source_ctx, source_block) = if index == 0 {
                        let Some(preheader) = info.preheader else { return };
                        (self.tree.peel(peel).parent, preheader)
                    } else {
                        let (Some(prev), Some(latch)) =
                            (self.tree.prev_iteration(ctx), info.latch)
                        else {
                            return;
                        };
                        (prev, latch)
                    };
                    push_cursor(
                        Cursor {
                            ctx: source_ctx,
                            block: source_block,
                            pos: program.block(source_block).instrs.len(),
                        },
                        frontier,
                        visited,
                    );
                }
            }
            return;
        }

        let my_scope = node.loop_scope;
        for &pred in program.predecessors(block) {
            if node.edge_is_dead(pred, block) {
                continue;
            }
            let pred_scope = program.loop_of(pred);
            let target_ctx = if pred_scope != my_scope
                && program.scope_contains(my_scope, pred_scope)
            {
                // Stepping back across a loop exit: a completed set resumes
                // in its last iteration, anything else stays generic.
                let completed = pred_scope
                    .and_then(|p| program.immediate_child_scope(my_scope, p))
                    .and_then(|child| self.tree.node(ctx).peel_child(child))
                    .filter(|&peel| self.tree.peel_is_final(peel))
                    .and_then(|peel| self.tree.last_iteration(peel));
                completed.unwrap_or(ctx)
            } else {
                ctx
            };
            push_cursor(
                Cursor {
                    ctx: target_ctx,
                    block: pred,
                    pos: program.block(pred).instrs.len(),
                },
                frontier,
                visited,
            );
        }
    }

    /// Walks forward from `from` in `ctx`, visiting each reachable dynamic
    /// successor instruction once.
    pub fn walk_forward(
        &self,
        ctx: CtxId,
        from: InstrId,
        skip_first: bool,
        visitor: &mut dyn InstructionVisitor,
    ) -> WalkOutcome {
        let program = self.program();
        let start_block = program.instr(from).block;
        let start_pos = program.position_in_block(from) + usize::from(skip_first);
        let mut frontier = vec![Cursor {
            ctx,
            block: start_block,
            pos: start_pos,
        }];
        let mut visited: HashSet<Cursor> = frontier.iter().copied().collect();

        while let Some(cursor) = frontier.pop() {
            let instrs = &program.block(cursor.block).instrs;
            let mut pos = cursor.pos;
            let mut stopped_path = false;
            while pos < instrs.len() {
                let instr = instrs[pos];
                pos += 1;
                if matches!(program.instr(instr).op, Op::Call { .. })
                    && visitor.should_enter_call(self, cursor.ctx, instr)
                {
                    match self.tree.node(cursor.ctx).inline_child(instr) {
                        Some(child) => {
                            let entry = self.entry_block(child);
                            push_cursor(
                                Cursor {
                                    ctx: child,
                                    block: entry,
                                    pos: 0,
                                },
                                &mut frontier,
                                &mut visited,
                            );
                            stopped_path = true;
                        }
                        None => {
                            if visitor.blocked_by_unexpanded_call(self, cursor.ctx, instr) {
                                return WalkOutcome::Blocked;
                            }
                            continue;
                        }
                    }
                    break;
                }
                match visitor.visit(self, cursor.ctx, instr) {
                    WalkStep::Continue => {}
                    WalkStep::StopPath => {
                        stopped_path = true;
                        break;
                    }
                    WalkStep::StopWalk => return WalkOutcome::Stopped,
                }
            }
            if !stopped_path {
                self.queue_successors_fw(cursor.ctx, cursor.block, &mut frontier, &mut visited);
            }
        }
        WalkOutcome::Completed
    }

    fn queue_successors_fw(
        &self,
        ctx: CtxId,
        block: BlockId,
        frontier: &mut Vec<Cursor>,
        visited: &mut HashSet<Cursor>,
    ) {
        let program = self.program();
        let node = self.tree.node(ctx);
        let terminator = program.terminator(block);

        // Returning from an inlined body resumes after the call site.
        if matches!(terminator.op, Op::Return { .. }) {
            if let ContextKind::Inline {
                call_site: Some((caller, call)),
            } = node.kind
            {
                push_cursor(
                    Cursor {
                        ctx: caller,
                        block: program.instr(call).block,
                        pos: program.position_in_block(call) + 1,
                    },
                    frontier,
                    visited,
                );
            }
            return;
        }

        let my_scope = node.loop_scope;
        for succ in program.successors(block) {
            if node.edge_is_dead(block, succ) {
                continue;
            }
            // Our loop's back edge: the next instruction runs in the next
            // iteration, or nowhere when the set is still open at the end.
            if let (ContextKind::Iteration { .. }, Some(my_loop)) = (node.kind, my_scope) {
                let info = program.loop_info(my_loop);
                if succ == info.header && info.latch == Some(block) {
                    if let Some(next) = self.tree.next_iteration(ctx) {
                        push_cursor(
                            Cursor {
                                ctx: next,
                                block: succ,
                                pos: 0,
                            },
                            frontier,
                            visited,
                        );
                    }
                    continue;
                }
                if !info.contains(succ) {
                    // Leaving the loop: fall to the owner.
                    let mut target = self.tree.node(ctx).parent;
                    while let Some(t) = target {
                        let tnode = self.tree.node(t);
                        if program.scope_contains(tnode.loop_scope, program.loop_of(succ)) {
                            push_cursor(
                                Cursor {
                                    ctx: t,
                                    block: succ,
                                    pos: 0,
                                },
                                frontier,
                                visited,
                            );
                            break;
                        }
                        target = tnode.parent;
                    }
                    continue;
                }
            }
            // Entering a peeled child loop starts at iteration zero.
            let entering = program.loop_of(succ).and_then(|l| {
                let info = program.loop_info(l);
                (info.header == succ && info.preheader == Some(block))
                    .then(|| self.tree.node(ctx).peel_child(l))
                    .flatten()
            });
            if let Some(peel) = entering {
                if let Some(&first) = self.tree.peel(peel).iterations.first() {
                    push_cursor(
                        Cursor {
                            ctx: first,
                            block: succ,
                            pos: 0,
                        },
                        frontier,
                        visited,
                    );
                    continue;
                }
            }
            push_cursor(
                Cursor {
                    ctx,
                    block: succ,
                    pos: 0,
                },
                frontier,
                visited,
            );
        }
    }
}

fn push_cursor(cursor: Cursor, frontier: &mut Vec<Cursor>, visited: &mut HashSet<Cursor>) {
    if visited.insert(cursor) {
        frontier.push(cursor);
    }
}
