//! Dynamic use-graph propagation.
//!
//! When a value resolves, its *dynamic* users must hear about it. The static
//! def-use index names the using instructions; this module decides which
//! context each using instance lives in:
//!
//! - same scope: the user runs in the same context,
//! - the latch operand of a loop-header phi: the user is the *next*
//!   iteration's instance,
//! - a user nested in a child loop: one instance per materialized iteration
//!   (the header phi's external operand only reaches iteration zero),
//! - a user outside a peeled loop: the instance in the loop's owner, readable
//!   only once the iteration set is final.
//!
//! Instances that cannot be enumerated (an unpeeled loop, an open iteration
//! set) raise a *users missed* flag; dead-value reasoning treats that flag as
//! "assume a live user exists". Users are collected first and dispatched
//! after, so the tree is never mutated mid-walk.

use crate::analysis::{ContextKind, CtxId, IterationStatus, PeelId, WorkQueue};
use crate::ir::{Callee, InstrId, LoopId, Op, StaticRef, TypeKind};

impl<'p> crate::analysis::Speculation<'p> {
    /// Enumerates the dynamic instances of a value's users, plus a flag set
    /// when some instances could not be enumerated.
    #[must_use]
    pub(crate) fn collect_users(&self, ctx: CtxId, value: StaticRef) -> (Vec<(CtxId, InstrId)>, bool) {
        let program = self.program();
        let mut out: Vec<(CtxId, InstrId)> = Vec::new();
        let mut missed = false;
        let my_scope = self.tree.node(ctx).loop_scope;

        for &user in program.users_of(value) {
            let user_instr = program.instr(user);
            let user_scope = program.loop_of(user_instr.block);

            if user_scope == my_scope {
                if self.routes_to_next_iteration(ctx, user, value) {
                    match self.tree.next_iteration(ctx) {
                        Some(next) => out.push((next, user)),
                        // A final iteration's back edge is dead; the next
                        // instance never runs.
                        None => {
                            if self.tree.node(ctx).iter_status != IterationStatus::Final {
                                missed = true;
                            }
                        }
                    }
                } else {
                    out.push((ctx, user));
                }
                continue;
            }

            if program.scope_contains(my_scope, user_scope) {
                // Nested deeper than us: dispatch into the child iterations.
                let Some(user_loop) = user_scope else { continue };
                let Some(child) = program.immediate_child_scope(my_scope, user_loop) else {
                    continue;
                };
                match self.tree.node(ctx).peel_child(child) {
                    Some(peel) => {
                        self.visit_variant_users(peel, user, user_loop, &mut out, &mut missed);
                    }
                    None => missed = true,
                }
                continue;
            }

            // The user sits outside our loop: its instance lives in the
            // owner, and only a final iteration's values flow out.
            match self.tree.node(ctx).kind {
                ContextKind::Iteration { peel, .. } => {
                    let is_last = self.tree.last_iteration(peel) == Some(ctx);
                    if is_last && self.tree.peel_is_final(peel) {
                        out.push((self.tree.peel(peel).parent, user));
                    } else if is_last {
                        missed = true;
                    }
                    // Non-final iterations feed outside users only through
                    // the final iteration; nothing to do here.
                }
                ContextKind::Inline { .. } => missed = true,
            }
        }
        (out, missed)
    }

    /// Whether `user` consumes `value` as the latch operand of this
    /// iteration's loop-header phi, which means the consuming instance is in
    /// the following iteration.
    fn routes_to_next_iteration(&self, ctx: CtxId, user: InstrId, value: StaticRef) -> bool {
        let node = self.tree.node(ctx);
        let (ContextKind::Iteration { .. }, Some(my_loop)) = (node.kind, node.loop_scope) else {
            return false;
        };
        let program = self.program();
        let info = program.loop_info(my_loop);
        let user_instr = program.instr(user);
        if user_instr.block != info.header || !matches!(user_instr.op, Op::Phi { .. }) {
            return false;
        }
        let Some(latch) = info.latch else { return false };
        user_instr
            .phi_operand_for(latch)
            .and_then(|op| op.as_value())
            == Some(value)
    }

    /// Dispatches one user into every relevant iteration of a peel attempt,
    /// recursing for deeper nesting.
    fn visit_variant_users(
        &self,
        peel: PeelId,
        user: InstrId,
        user_loop: LoopId,
        out: &mut Vec<(CtxId, InstrId)>,
        missed: &mut bool,
    ) {
        let program = self.program();
        let attempt = self.tree.peel(peel);
        let loop_id = attempt.loop_id;
        let info = program.loop_info(loop_id);
        let user_instr = program.instr(user);

        if attempt.iterations.is_empty() {
            *missed = true;
            return;
        }

        // The header phi's out-of-loop operand only reaches iteration zero.
        if user_loop == loop_id
            && user_instr.block == info.header
            && matches!(user_instr.op, Op::Phi { .. })
        {
            out.push((attempt.iterations[0], user));
            return;
        }

        for &iteration in &attempt.iterations {
            if user_loop == loop_id {
                out.push((iteration, user));
                continue;
            }
            let Some(child) = program.immediate_child_scope(Some(loop_id), user_loop) else {
                continue;
            };
            match self.tree.node(iteration).peel_child(child) {
                Some(inner) => self.visit_variant_users(inner, user, user_loop, out, missed),
                None => *missed = true,
            }
        }
    }

    /// Pushes follow-on work to every dynamic user of a freshly resolved
    /// value.
    pub(crate) fn investigate_users(&mut self, ctx: CtxId, value: StaticRef, q: &mut dyn WorkQueue) {
        let (users, _missed) = self.collect_users(ctx, value);
        for (user_ctx, user) in users {
            self.queue_work_blocked_on(user_ctx, user, q);
            if self.should_try_evaluate(user_ctx, StaticRef::Instruction(user)) {
                self.queue_user_work(user_ctx, user, value, q);
            }
        }
    }

    /// Queues the work one user instance implies: argument evaluation across
    /// an inline boundary, call-site re-evaluation for returns, load
    /// forwarding for loads, plain re-evaluation otherwise (with a one-level
    /// chase through address computations).
    fn queue_user_work(
        &mut self,
        user_ctx: CtxId,
        user: InstrId,
        used: StaticRef,
        q: &mut dyn WorkQueue,
    ) {
        let program = self.program();
        match &program.instr(user).op {
            Op::Call { callee, args } => {
                if let Some(child) = self.get_or_create_inline_child(user_ctx, user, q) {
                    let Callee::Known(callee) = callee else { return };
                    let callee_fn = self.tree.node(child).function;
                    debug_assert_eq!(callee_fn, *callee);
                    for (index, arg) in args.iter().enumerate() {
                        if arg.as_value() == Some(used) {
                            q.queue_try_evaluate(
                                child,
                                StaticRef::Argument(callee_fn, index as u32),
                            );
                        }
                    }
                } else {
                    q.queue_try_evaluate(user_ctx, StaticRef::Instruction(user));
                }
            }
            Op::Return { .. } => {
                let root = self.tree.function_root(user_ctx);
                if let ContextKind::Inline {
                    call_site: Some((caller, call)),
                } = self.tree.node(root).kind
                {
                    q.queue_try_evaluate(caller, StaticRef::Instruction(call));
                }
            }
            Op::Load { .. } => q.queue_check_load(user_ctx, user),
            // A store's operands improving cannot resolve the store itself;
            // dependent loads were already flushed via the blocked-on hook.
            Op::Store { .. } => {}
            Op::Gep { .. } | Op::Cast { .. } if program.instr(user).ty == TypeKind::Ptr => {
                q.queue_try_evaluate(user_ctx, StaticRef::Instruction(user));
                // Address computations forward by identity, so their own
                // users may resolve now even though the gep never improves.
                self.investigate_users(user_ctx, StaticRef::Instruction(user), q);
            }
            _ => q.queue_try_evaluate(user_ctx, StaticRef::Instruction(user)),
        }
    }

    /// An instruction made progress; loads blocked on it get another try.
    pub(crate) fn queue_work_blocked_on(&mut self, ctx: CtxId, instr: InstrId, q: &mut dyn WorkQueue) {
        if self.program().instr(instr).may_write_memory() {
            self.flush_blocked_on_instr(ctx, instr, q);
        }
    }
}
