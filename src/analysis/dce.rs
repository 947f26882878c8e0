//! Dead-value reasoning.
//!
//! A value is dead in a context when no dynamic user instance is live: every
//! enumerated user is itself dead, already improved away, or consumes the
//! value only through formal arguments that are themselves dead. Killing a
//! value fans out to its operands through the mirror of the use routing: a
//! loop-header phi's operands live in the owner (iteration zero) or the
//! previous iteration, an argument's operand is the caller's actual.
//!
//! Side-effecting instructions are never eliminated. A call whose *result*
//! is dead still runs, but its callee no longer needs to produce a value, so
//! the callee's live returns are queued to die.

use crate::analysis::{ContextKind, CtxId, WorkQueue};
use crate::ir::{Callee, InstrId, Op, Operand, StaticRef};

impl<'p> crate::analysis::Speculation<'p> {
    /// Whether dead-value reasoning applies to a value at all.
    ///
    /// Allocations, stores and plain control flow are not values; calls only
    /// qualify once expanded (their result then comes from the child) or
    /// promoted to a token.
    #[must_use]
    pub fn should_die(&self, ctx: CtxId, value: StaticRef) -> bool {
        let StaticRef::Instruction(instr) = value else {
            return true;
        };
        match &self.program().instr(instr).op {
            Op::Call { .. } => {
                let node = self.tree.node(ctx);
                node.inline_child(instr).is_some()
                    || node
                        .improvement(value)
                        .is_some_and(|lv| lv.as_token().is_some())
            }
            Op::Alloca
            | Op::Store { .. }
            | Op::Branch { .. }
            | Op::Jump { .. }
            | Op::Switch { .. } => false,
            _ => true,
        }
    }

    /// Whether a value is already out of the picture locally: marked dead,
    /// sitting in a dead block, or replaced by an improvement.
    #[must_use]
    pub fn local_value_is_dead(&self, ctx: CtxId, value: StaticRef) -> bool {
        let node = self.tree.node(ctx);
        if node.value_is_marked_dead(value) || node.improvement(value).is_some() {
            return true;
        }
        match value {
            StaticRef::Instruction(instr) => node.block_is_dead(self.program().instr(instr).block),
            StaticRef::Argument(..) => false,
        }
    }

    /// Whether a value has no live dynamic user, short-circuiting on the
    /// first live one. A *users missed* enumeration forces "live".
    #[must_use]
    pub fn value_is_dead(&self, ctx: CtxId, value: StaticRef) -> bool {
        if let StaticRef::Instruction(instr) = value {
            if let Op::Return { .. } = self.program().instr(instr).op {
                // A return is dead exactly when the inlined call it feeds has
                // a dead result. Root returns are the analysis output.
                let root = self.tree.function_root(ctx);
                return match self.tree.node(root).kind {
                    ContextKind::Inline {
                        call_site: Some((caller, call)),
                    } => self.value_is_dead(caller, StaticRef::Instruction(call)),
                    _ => false,
                };
            }
        }
        let (users, missed) = self.collect_users(ctx, value);
        if missed {
            return false;
        }
        !users
            .iter()
            .any(|&(user_ctx, user)| self.user_is_live(user_ctx, user, value))
    }

    /// One user instance keeps a value alive unless the user itself is gone,
    /// or it is an expanded call consuming the value only through dead
    /// formals.
    fn user_is_live(&self, user_ctx: CtxId, user: InstrId, used: StaticRef) -> bool {
        if self.local_value_is_dead(user_ctx, StaticRef::Instruction(user)) {
            return false;
        }
        let program = self.program();
        if let Op::Call { callee, args } = &program.instr(user).op {
            if let Some(child) = self.tree.node(user_ctx).inline_child(user) {
                if let Callee::Indirect(target) = callee {
                    if target.as_value() == Some(used) {
                        return true;
                    }
                }
                let callee_fn = self.tree.node(child).function;
                return args.iter().enumerate().any(|(index, arg)| {
                    arg.as_value() == Some(used)
                        && !self
                            .local_value_is_dead(child, StaticRef::Argument(callee_fn, index as u32))
                });
            }
        }
        true
    }

    /// Attempts to mark a value dead, fanning out to its operands on success.
    pub fn try_kill_value(&mut self, ctx: CtxId, value: StaticRef, q: &mut dyn WorkQueue) {
        if self.tree.node(ctx).value_is_marked_dead(value) {
            return;
        }
        if let StaticRef::Instruction(instr) = value {
            if self.program().instr(instr).may_have_side_effects() {
                // Never eliminated; but an unused call result frees the
                // callee from producing one.
                if matches!(self.program().instr(instr).op, Op::Call { .. })
                    && self.value_is_dead(ctx, value)
                {
                    if let Some(child) = self.tree.node(ctx).inline_child(instr) {
                        self.queue_returns_dead(child, q);
                    }
                }
                return;
            }
        }
        if self.value_is_dead(ctx, value) {
            self.tree.node_mut(ctx).dead_values.insert(value);
            for (operand_ctx, operand) in self.walk_operands(ctx, value) {
                self.queue_die(operand_ctx, operand, q);
            }
        }
    }

    /// Queues a kill attempt when the value qualifies and is not already
    /// locally dead.
    pub(crate) fn queue_die(&self, ctx: CtxId, value: StaticRef, q: &mut dyn WorkQueue) {
        if self.should_die(ctx, value) && !self.local_value_is_dead(ctx, value) {
            q.queue_try_kill(ctx, value);
        }
    }

    /// Queues every live return of an inlined callee to die.
    pub(crate) fn queue_returns_dead(&self, child: CtxId, q: &mut dyn WorkQueue) {
        let program = self.program();
        let node = self.tree.node(child);
        for &block in &program.function(node.function).blocks {
            if node.block_is_dead(block) {
                continue;
            }
            let terminator = program.terminator(block);
            if matches!(terminator.op, Op::Return { .. }) {
                self.queue_die(child, StaticRef::Instruction(terminator.id), q);
            }
        }
    }

    /// The contexts and values a killed value's operands must be re-examined
    /// in: the mirror of the dynamic use routing.
    pub(crate) fn walk_operands(&self, ctx: CtxId, value: StaticRef) -> Vec<(CtxId, StaticRef)> {
        let program = self.program();
        match value {
            StaticRef::Argument(_, index) => {
                let root = self.tree.function_root(ctx);
                let ContextKind::Inline {
                    call_site: Some((caller, call)),
                } = self.tree.node(root).kind
                else {
                    return Vec::new();
                };
                let Op::Call { args, .. } = &program.instr(call).op else {
                    return Vec::new();
                };
                args.get(index as usize)
                    .and_then(Operand::as_value)
                    .map(|v| (caller, v))
                    .into_iter()
                    .collect()
            }
            StaticRef::Instruction(instr_id) => {
                let instr = program.instr(instr_id);
                let node = self.tree.node(ctx);
                // A loop-header phi's operands live outside this iteration.
                if let (ContextKind::Iteration { index, .. }, Some(my_loop)) =
                    (node.kind, node.loop_scope)
                {
                    let info = program.loop_info(my_loop);
                    if instr.block == info.header && matches!(instr.op, Op::Phi { .. }) {
                        let (source_ctx, pred) = if index == 0 {
                            let (Some(parent), Some(preheader)) = (node.parent, info.preheader)
                            else {
                                return Vec::new();
                            };
                            (parent, preheader)
                        } else {
                            let (Some(prev), Some(latch)) =
                                (self.tree.prev_iteration(ctx), info.latch)
                            else {
                                return Vec::new();
                            };
                            (prev, latch)
                        };
                        return instr
                            .phi_operand_for(pred)
                            .and_then(|op| op.as_value())
                            .map(|v| (source_ctx, v))
                            .into_iter()
                            .collect();
                    }
                }
                instr
                    .operands()
                    .iter()
                    .filter_map(Operand::as_value)
                    .filter_map(|v| self.walk_operand(ctx, v))
                    .collect()
            }
        }
    }

    /// Routes one operand to the context owning it.
    fn walk_operand(&self, ctx: CtxId, value: StaticRef) -> Option<(CtxId, StaticRef)> {
        let program = self.program();
        let my_scope = self.tree.node(ctx).loop_scope;
        let target = self.value_scope(value);
        if target != my_scope && program.scope_contains(my_scope, target) {
            // Defined in a loop nested below us; only a completed set has a
            // definite instance to examine.
            let child = program.immediate_child_scope(my_scope, target?)?;
            let peel = self.tree.node(ctx).peel_child(child)?;
            if !self.tree.peel_is_final(peel) {
                return None;
            }
            return self.tree.last_iteration(peel).map(|last| (last, value));
        }
        Some((self.value_home(ctx, value), value))
    }

    /// Seeds dead-value attempts for every qualifying value of every context
    /// built so far. Run once the value/liveness fixpoint has settled.
    pub fn seed_dead_value_sweep(&self, q: &mut dyn WorkQueue) {
        let program = self.program();
        for node in self.tree.iter() {
            let function = program.function(node.function);
            if matches!(node.kind, ContextKind::Inline { .. }) {
                for index in 0..function.params.len() {
                    self.queue_die(node.id, StaticRef::Argument(node.function, index as u32), q);
                }
            }
            for &block in &function.blocks {
                if program.loop_of(block) != node.loop_scope || node.block_is_dead(block) {
                    continue;
                }
                for &instr in &program.block(block).instrs {
                    self.queue_die(node.id, StaticRef::Instruction(instr), q);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::analysis::{RecordingQueue, Speculation};
    use crate::ir::{BinOp, Op, Operand, ProgramBuilder, StaticRef, TypeKind};

    /// A value with no users at all is dead; its operands are queued.
    #[test]
    fn test_unused_value_dies_and_fans_out() {
        let mut b = ProgramBuilder::new();
        let f = b.function("f", &[("x", TypeKind::I32)], TypeKind::Void);
        let entry = b.block(f);
        let dbl = b.push(
            entry,
            TypeKind::I32,
            Op::Binary {
                op: BinOp::Add,
                lhs: Operand::arg(f, 0),
                rhs: Operand::arg(f, 0),
            },
        );
        b.push(entry, TypeKind::Void, Op::Return { value: None });
        let program = b.finish().unwrap();

        let mut spec = Speculation::new(&program);
        let mut q = RecordingQueue::new();
        let root = spec.analyze_root(f, &mut q).unwrap();
        q.items.clear();
        let v = StaticRef::Instruction(dbl);
        assert!(spec.value_is_dead(root, v));
        spec.try_kill_value(root, v, &mut q);
        assert!(spec.tree().node(root).value_is_marked_dead(v));
        // The argument operand was queued to die in turn.
        assert!(q
            .items
            .iter()
            .any(|i| matches!(i, crate::analysis::WorkItem::TryKill { value, .. }
                if *value == StaticRef::Argument(f, 0))));
    }

    /// A used value is not dead, and killing it is refused.
    #[test]
    fn test_live_value_survives() {
        let mut b = ProgramBuilder::new();
        let f = b.function("f", &[("x", TypeKind::I32)], TypeKind::I32);
        let entry = b.block(f);
        let dbl = b.push(
            entry,
            TypeKind::I32,
            Op::Binary {
                op: BinOp::Add,
                lhs: Operand::arg(f, 0),
                rhs: Operand::arg(f, 0),
            },
        );
        b.push(
            entry,
            TypeKind::Void,
            Op::Return {
                value: Some(Operand::instr(dbl)),
            },
        );
        let program = b.finish().unwrap();

        let mut spec = Speculation::new(&program);
        let mut q = RecordingQueue::new();
        let root = spec.analyze_root(f, &mut q).unwrap();
        let v = StaticRef::Instruction(dbl);
        assert!(!spec.value_is_dead(root, v));
        spec.try_kill_value(root, v, &mut q);
        assert!(!spec.tree().node(root).value_is_marked_dead(v));
    }

    /// Stores and branches never qualify for dead-value reasoning.
    #[test]
    fn test_side_effecting_never_qualifies() {
        let mut b = ProgramBuilder::new();
        let f = b.function("f", &[], TypeKind::Void);
        let entry = b.block(f);
        let slot = b.push(entry, TypeKind::Ptr, Op::Alloca);
        let store = b.push(
            entry,
            TypeKind::Void,
            Op::Store {
                ptr: Operand::instr(slot),
                value: Operand::i32(1),
            },
        );
        b.push(entry, TypeKind::Void, Op::Return { value: None });
        let program = b.finish().unwrap();

        let mut spec = Speculation::new(&program);
        let mut q = RecordingQueue::new();
        let root = spec.analyze_root(f, &mut q).unwrap();
        assert!(!spec.should_die(root, StaticRef::Instruction(store)));
        assert!(!spec.should_die(root, StaticRef::Instruction(slot)));
        spec.try_kill_value(root, StaticRef::Instruction(store), &mut q);
        assert!(!spec
            .tree()
            .node(root)
            .value_is_marked_dead(StaticRef::Instruction(store)));
    }
}
