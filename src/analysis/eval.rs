//! Value evaluation.
//!
//! `try_evaluate` is the single entry point for resolving a value under a
//! context. Evaluation is prioritized: control instructions with constant
//! conditions prune edges first, calls pull their callee's unique live
//! return, confluences merge their live incoming values (with loop-header
//! and loop-exit special cases), resource tokens forward through
//! bit-preserving casts and fold against literals in comparisons, and
//! everything else falls to general constant folding. A memory read or a
//! side-effecting instruction never folds here; loads go through the
//! dependence oracle instead.
//!
//! A successful evaluation commits through the set-once improvement map and
//! immediately investigates the value's dynamic users.

use crate::analysis::{ContextKind, CtxId, LatticeValue, LoadResolution, ScopedValue, WorkQueue};
use crate::ir::{BlockId, CmpPred, ConstValue, FuncId, InstrId, Instruction, Op, Operand, StaticRef};
use crate::Result;

impl<'p> crate::analysis::Speculation<'p> {
    /// Whether evaluating a value in a context could still produce anything:
    /// unimproved, and not sitting in a dead block.
    #[must_use]
    pub fn should_try_evaluate(&self, ctx: CtxId, value: StaticRef) -> bool {
        let node = self.tree.node(ctx);
        if node.improvement(value).is_some() {
            return false;
        }
        match value {
            StaticRef::Instruction(instr) => {
                !node.block_is_dead(self.program().instr(instr).block)
            }
            StaticRef::Argument(..) => true,
        }
    }

    /// Attempts to resolve a value in a context, committing and propagating
    /// on success.
    ///
    /// # Errors
    /// Propagates the set-once violation from a conflicting improvement.
    pub fn try_evaluate(
        &mut self,
        ctx: CtxId,
        value: StaticRef,
        q: &mut dyn WorkQueue,
    ) -> Result<()> {
        if !self.should_try_evaluate(ctx, value) {
            return Ok(());
        }
        let improved = self.try_evaluate_result(ctx, value, q)?;
        if improved.is_resolved() && self.should_forward(&improved) {
            self.set_replacement(ctx, value, improved)?;
            if let StaticRef::Instruction(instr) = value {
                self.flush_blocked_on_instr(ctx, instr, q);
            }
            self.investigate_users(ctx, value, q);
        }
        Ok(())
    }

    fn try_evaluate_result(
        &mut self,
        ctx: CtxId,
        value: StaticRef,
        q: &mut dyn WorkQueue,
    ) -> Result<LatticeValue> {
        match value {
            StaticRef::Argument(function, index) => Ok(self.evaluate_argument(ctx, function, index)),
            StaticRef::Instruction(instr) => self.evaluate_instruction(ctx, instr, q),
        }
    }

    /// A formal argument resolves to whatever the caller passes at the
    /// inlined call site. Root arguments stay unknown.
    fn evaluate_argument(&self, ctx: CtxId, function: FuncId, index: u32) -> LatticeValue {
        let root = self.tree.function_root(ctx);
        let ContextKind::Inline {
            call_site: Some((caller, call)),
        } = self.tree.node(root).kind
        else {
            return LatticeValue::Unresolved;
        };
        debug_assert_eq!(self.tree.node(root).function, function);
        let Op::Call { args, .. } = &self.program().instr(call).op else {
            return LatticeValue::Unresolved;
        };
        match args.get(index as usize) {
            Some(actual) => self.resolve_operand(caller, actual),
            None => LatticeValue::Unresolved,
        }
    }

    fn evaluate_instruction(
        &mut self,
        ctx: CtxId,
        instr_id: InstrId,
        q: &mut dyn WorkQueue,
    ) -> Result<LatticeValue> {
        let instr = self.program().instr(instr_id);
        match &instr.op {
            Op::Branch { cond, on_true, on_false } => {
                if let Some(cond) = self.resolve_operand(ctx, cond).as_constant() {
                    let taken = if cond.as_bool() == Some(true) {
                        Some(*on_true)
                    } else if cond.as_bool() == Some(false) {
                        Some(*on_false)
                    } else {
                        None
                    };
                    if let Some(taken) = taken {
                        self.prune_terminator_edges(ctx, instr, taken, q);
                    }
                }
                Ok(LatticeValue::Unresolved)
            }
            Op::Switch { value, cases, default } => {
                if let Some(scrutinee) =
                    self.resolve_operand(ctx, value).as_constant().and_then(|c| c.as_i64())
                {
                    let taken = cases
                        .iter()
                        .find(|(case, _)| *case == scrutinee)
                        .map_or(*default, |(_, target)| *target);
                    self.prune_terminator_edges(ctx, instr, taken, q);
                }
                Ok(LatticeValue::Unresolved)
            }
            Op::Call { .. } => Ok(self.evaluate_call(ctx, instr_id)),
            Op::Phi { incoming } => Ok(self.evaluate_phi(ctx, instr, incoming)),
            Op::Select { cond, on_true, on_false } => {
                match self.resolve_operand(ctx, cond).as_constant().and_then(|c| c.as_bool()) {
                    Some(true) => Ok(self.resolve_operand(ctx, on_true)),
                    Some(false) => Ok(self.resolve_operand(ctx, on_false)),
                    None => Ok(LatticeValue::Unresolved),
                }
            }
            Op::Cast { src } => Ok(self.evaluate_cast(ctx, instr, src)),
            Op::Compare { pred, lhs, rhs } => Ok(self.evaluate_compare(ctx, *pred, lhs, rhs)),
            Op::Binary { op, lhs, rhs } => {
                let lhs = self.resolve_operand(ctx, lhs).as_constant();
                let rhs = self.resolve_operand(ctx, rhs).as_constant();
                match (lhs, rhs) {
                    (Some(a), Some(b)) => Ok(ConstValue::binary(*op, a, b)
                        .map_or(LatticeValue::Unresolved, LatticeValue::Constant)),
                    _ => Ok(LatticeValue::Unresolved),
                }
            }
            // Memory reads resolve through the dependence oracle; stores,
            // allocations, address computations and plain control flow carry
            // no foldable result.
            Op::Load { .. }
            | Op::Store { .. }
            | Op::Alloca
            | Op::Gep { .. }
            | Op::Jump { .. }
            | Op::Return { .. } => Ok(LatticeValue::Unresolved),
        }
    }

    /// Kills every outgoing edge except the taken one, then pushes liveness
    /// along all of them.
    fn prune_terminator_edges(
        &mut self,
        ctx: CtxId,
        instr: &Instruction,
        taken: BlockId,
        q: &mut dyn WorkQueue,
    ) {
        let block = instr.block;
        if self.tree.node(ctx).block_is_dead(block) {
            return;
        }
        let successors = instr.successors();
        {
            let node = self.tree.node_mut(ctx);
            for &succ in &successors {
                if succ != taken {
                    node.dead_edges.insert((block, succ));
                }
            }
        }
        for succ in successors {
            self.check_edge(ctx, block, succ, q);
        }
    }

    /// A call resolves to its inlined callee's unique live return value, or
    /// to a fresh resource token when the recognizer claims it.
    fn evaluate_call(&mut self, ctx: CtxId, call: InstrId) -> LatticeValue {
        if let Some(child) = self.tree.node(ctx).inline_child(call) {
            return self.try_get_return_value(child);
        }
        if self.recognizes_resource(call) {
            return LatticeValue::ResourceToken(ScopedValue::new(
                StaticRef::Instruction(call),
                ctx,
            ));
        }
        LatticeValue::Unresolved
    }

    /// The value an inlined callee returns, when exactly one return
    /// instruction is still live and its operand resolves.
    #[must_use]
    pub fn try_get_return_value(&self, child: CtxId) -> LatticeValue {
        let program = self.program();
        let node = self.tree.node(child);
        let function = program.function(node.function);
        let mut result = LatticeValue::Unresolved;
        let mut live_returns = 0usize;
        for &block in &function.blocks {
            let terminator = program.terminator(block);
            let Op::Return { value } = &terminator.op else {
                continue;
            };
            if node.block_is_dead(block) {
                continue;
            }
            live_returns += 1;
            if live_returns > 1 {
                return LatticeValue::Unresolved;
            }
            result = match value {
                Some(operand) => self.resolve_operand(child, operand),
                None => LatticeValue::Unresolved,
            };
        }
        result
    }

    /// Merges a confluence's live incoming values.
    ///
    /// Loop-header phis in an iteration context read straight through: from
    /// the preheader operand in the owner for iteration zero, from the
    /// previous iteration's latch operand afterwards. Operands defined in a
    /// child loop are only readable once that loop's iteration set is final,
    /// and then from its last iteration.
    fn evaluate_phi(
        &mut self,
        ctx: CtxId,
        instr: &Instruction,
        incoming: &[(BlockId, Operand)],
    ) -> LatticeValue {
        let program = self.program();
        let node = self.tree.node(ctx);
        let my_scope = node.loop_scope;

        if let (ContextKind::Iteration { peel, index }, Some(my_loop)) = (node.kind, my_scope) {
            let info = program.loop_info(my_loop);
            if instr.block == info.header {
                let (source_ctx, pred) = if index == 0 {
                    let Some(preheader) = info.preheader else {
                        return LatticeValue::Unresolved;
                    };
                    (self.tree.peel(peel).parent, preheader)
                } else {
                    let Some(latch) = info.latch else {
                        return LatticeValue::Unresolved;
                    };
                    let Some(prev) = self.tree.prev_iteration(ctx) else {
                        return LatticeValue::Unresolved;
                    };
                    (prev, latch)
                };
                return match instr.phi_operand_for(pred) {
                    Some(operand) => self.resolve_operand(source_ctx, &operand),
                    None => LatticeValue::Unresolved,
                };
            }
        }

        let mut merged: Option<LatticeValue> = None;
        let mut any_live = false;
        for &(pred, operand) in incoming {
            if self.tree.node(ctx).edge_is_dead(pred, instr.block) {
                continue;
            }
            any_live = true;
            let resolved = match self.phi_operand_source(ctx, &operand) {
                PhiSource::Here => self.resolve_operand(ctx, &operand),
                PhiSource::FinalIteration(last) => self.resolve_operand(last, &operand),
                PhiSource::OpenLoop => return LatticeValue::Unresolved,
            };
            if !resolved.is_resolved() {
                return LatticeValue::Unresolved;
            }
            merged = match merged {
                None => Some(resolved),
                Some(existing) if existing == resolved => Some(existing),
                Some(_) => return LatticeValue::Unresolved,
            };
        }
        if !any_live {
            return LatticeValue::Unresolved;
        }
        merged.unwrap_or(LatticeValue::Unresolved)
    }

    /// Decides where a phi operand must be read from, relative to `ctx`.
    fn phi_operand_source(&self, ctx: CtxId, operand: &Operand) -> PhiSource {
        let Some(value) = operand.as_value() else {
            return PhiSource::Here;
        };
        let my_scope = self.tree.node(ctx).loop_scope;
        let value_scope = self.value_scope(value);
        let Some(value_loop) = value_scope else {
            return PhiSource::Here;
        };
        if value_scope == my_scope || !self.program().scope_contains(my_scope, value_scope) {
            return PhiSource::Here;
        }
        // The operand lives in a loop nested below us: an exit read.
        let Some(child) = self.program().immediate_child_scope(my_scope, value_loop) else {
            return PhiSource::Here;
        };
        let Some(peel) = self.tree.node(ctx).peel_child(child) else {
            return PhiSource::OpenLoop;
        };
        if !self.tree.peel_is_final(peel) {
            return PhiSource::OpenLoop;
        }
        match self.tree.last_iteration(peel) {
            Some(last) => PhiSource::FinalIteration(last),
            None => PhiSource::OpenLoop,
        }
    }

    /// Casts forward resource tokens when the bit pattern survives, and fold
    /// literals otherwise.
    fn evaluate_cast(&mut self, ctx: CtxId, instr: &Instruction, src: &Operand) -> LatticeValue {
        let src_ty = match src {
            Operand::Literal(c) => c.type_kind(),
            Operand::Value(v) => self.program().type_of(*v),
        };
        match self.resolve_operand(ctx, src) {
            LatticeValue::ResourceToken(token) if src_ty.bit_compatible(instr.ty) => {
                LatticeValue::ResourceToken(token)
            }
            LatticeValue::Constant(c) => c
                .convert_to(instr.ty)
                .map_or(LatticeValue::Unresolved, LatticeValue::Constant),
            _ => LatticeValue::Unresolved,
        }
    }

    /// Comparisons: a resource token against a literal folds using only the
    /// guarantee that a live token is non-negative; otherwise fold literals.
    fn evaluate_compare(
        &mut self,
        ctx: CtxId,
        pred: CmpPred,
        lhs: &Operand,
        rhs: &Operand,
    ) -> LatticeValue {
        let lhs_v = self.resolve_operand(ctx, lhs);
        let rhs_v = self.resolve_operand(ctx, rhs);
        let token_fold = match (lhs_v, rhs_v) {
            (LatticeValue::ResourceToken(_), LatticeValue::Constant(c)) => {
                fold_token_compare(pred, c)
            }
            (LatticeValue::Constant(c), LatticeValue::ResourceToken(_)) => {
                fold_token_compare(pred.flipped(), c)
            }
            _ => None,
        };
        if let Some(result) = token_fold {
            return LatticeValue::Constant(ConstValue::Bool(result));
        }
        match (lhs_v.as_constant(), rhs_v.as_constant()) {
            (Some(a), Some(b)) => ConstValue::compare(pred, a, b)
                .map_or(LatticeValue::Unresolved, LatticeValue::Constant),
            _ => LatticeValue::Unresolved,
        }
    }

    /// Attempts to forward a store (or other unique definition) into a load.
    ///
    /// # Errors
    /// Propagates the set-once violation from a conflicting improvement.
    pub fn check_load(&mut self, ctx: CtxId, load: InstrId, q: &mut dyn WorkQueue) -> Result<()> {
        if !self.should_try_evaluate(ctx, StaticRef::Instruction(load)) {
            return Ok(());
        }
        match self.resolve_load_dependence(ctx, load) {
            LoadResolution::Forwarded(improved) => {
                if improved.is_resolved() && self.should_forward(&improved) {
                    self.set_replacement(ctx, StaticRef::Instruction(load), improved)?;
                    self.flush_blocked_on_instr(ctx, load, q);
                    self.investigate_users(ctx, StaticRef::Instruction(load), q);
                }
            }
            LoadResolution::BlockedOn { instr, ctx: blocking_ctx } => {
                self.tree
                    .node_mut(blocking_ctx)
                    .inst_blocked_loads
                    .entry(instr)
                    .or_default()
                    .push((ctx, load));
            }
            LoadResolution::BlockedOnCfg { ctx: blocking_ctx } => {
                self.block_load_on_cfg(blocking_ctx, ctx, load);
            }
            LoadResolution::Unresolved => {}
        }
        Ok(())
    }

    /// Attempts resource promotion for a call.
    ///
    /// # Errors
    /// Propagates the set-once violation from a conflicting improvement.
    pub fn try_promote_resource(
        &mut self,
        ctx: CtxId,
        call: InstrId,
        q: &mut dyn WorkQueue,
    ) -> Result<()> {
        self.try_evaluate(ctx, StaticRef::Instruction(call), q)
    }

    /// Re-queues loads blocked on a specific instruction of this context.
    pub(crate) fn flush_blocked_on_instr(
        &mut self,
        ctx: CtxId,
        instr: InstrId,
        q: &mut dyn WorkQueue,
    ) {
        if let Some(blocked) = self.tree.node_mut(ctx).inst_blocked_loads.remove(&instr) {
            for (load_ctx, load) in blocked {
                q.queue_check_load(load_ctx, load);
            }
        }
    }
}

/// Where a general phi operand is read from.
enum PhiSource {
    /// The phi's own context (covers same-scope and outer-scope operands).
    Here,
    /// The final iteration of a completed child iteration set.
    FinalIteration(CtxId),
    /// A child loop that is still open; the read fails conservatively.
    OpenLoop,
}

/// Folds `token pred literal` knowing only that the token is a non-negative
/// integer handle.
fn fold_token_compare(pred: CmpPred, literal: ConstValue) -> Option<bool> {
    let v = literal.as_i64()?;
    match pred {
        CmpPred::Eq if v < 0 => Some(false),
        CmpPred::Ne if v < 0 => Some(true),
        CmpPred::Lt if v <= 0 => Some(false),
        CmpPred::Le if v < 0 => Some(false),
        CmpPred::Gt if v < 0 => Some(true),
        CmpPred::Ge if v <= 0 => Some(true),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{RecordingQueue, Speculation};
    use crate::ir::{BinOp, ProgramBuilder, TypeKind};

    #[test]
    fn test_general_folding_of_literal_operands() {
        let mut b = ProgramBuilder::new();
        let f = b.function("f", &[], TypeKind::Void);
        let entry = b.block(f);
        let sum = b.push(
            entry,
            TypeKind::I32,
            Op::Binary {
                op: BinOp::Add,
                lhs: Operand::i32(2),
                rhs: Operand::i32(3),
            },
        );
        b.push(entry, TypeKind::Void, Op::Return { value: None });
        let program = b.finish().unwrap();

        let mut spec = Speculation::new(&program);
        let mut q = RecordingQueue::new();
        let root = spec.analyze_root(f, &mut q).unwrap();
        spec.try_evaluate(root, StaticRef::Instruction(sum), &mut q)
            .unwrap();
        assert_eq!(
            spec.resolve_value(root, StaticRef::Instruction(sum)),
            LatticeValue::Constant(ConstValue::I32(5))
        );
    }

    #[test]
    fn test_conflicting_overwrite_is_loud() {
        let mut b = ProgramBuilder::new();
        let f = b.function("f", &[], TypeKind::Void);
        let entry = b.block(f);
        let a = b.push(entry, TypeKind::Ptr, Op::Alloca);
        b.push(entry, TypeKind::Void, Op::Return { value: None });
        let program = b.finish().unwrap();

        let mut spec = Speculation::new(&program);
        let mut q = RecordingQueue::new();
        let root = spec.analyze_root(f, &mut q).unwrap();
        let v = StaticRef::Instruction(a);
        spec.set_replacement(root, v, LatticeValue::Constant(ConstValue::I32(1)))
            .unwrap();
        // Same value again: idempotent.
        spec.set_replacement(root, v, LatticeValue::Constant(ConstValue::I32(1)))
            .unwrap();
        // Different value: invariant violation.
        let err = spec
            .set_replacement(root, v, LatticeValue::Constant(ConstValue::I32(2)))
            .unwrap_err();
        assert!(matches!(err, crate::Error::InvariantViolation { .. }));
    }

    #[test]
    fn test_constant_branch_prunes_untaken_edge() {
        let mut b = ProgramBuilder::new();
        let f = b.function("f", &[], TypeKind::Void);
        let entry = b.block(f);
        let then_b = b.block(f);
        let else_b = b.block(f);
        let branch = b.push(
            entry,
            TypeKind::Void,
            Op::Branch {
                cond: Operand::boolean(true),
                on_true: then_b,
                on_false: else_b,
            },
        );
        b.push(then_b, TypeKind::Void, Op::Return { value: None });
        b.push(else_b, TypeKind::Void, Op::Return { value: None });
        let program = b.finish().unwrap();

        let mut spec = Speculation::new(&program);
        let mut q = RecordingQueue::new();
        let root = spec.analyze_root(f, &mut q).unwrap();
        spec.try_evaluate(root, StaticRef::Instruction(branch), &mut q)
            .unwrap();
        let node = spec.tree().node(root);
        assert!(node.edge_is_dead(entry, else_b));
        assert!(!node.edge_is_dead(entry, then_b));
    }

    #[test]
    fn test_token_compare_folds_against_negative() {
        assert_eq!(
            fold_token_compare(CmpPred::Ne, ConstValue::I32(-1)),
            Some(true)
        );
        assert_eq!(
            fold_token_compare(CmpPred::Eq, ConstValue::I32(-1)),
            Some(false)
        );
        assert_eq!(
            fold_token_compare(CmpPred::Ge, ConstValue::I32(0)),
            Some(true)
        );
        // A positive literal tells us nothing about a non-negative token.
        assert_eq!(fold_token_compare(CmpPred::Eq, ConstValue::I32(3)), None);
        assert_eq!(fold_token_compare(CmpPred::Lt, ConstValue::I32(7)), None);
    }

    /// A load the oracle blocks on a whole context's CFG is parked there and
    /// re-queued the next time that context's liveness makes progress.
    #[test]
    fn test_cfg_blocked_load_requeues_on_progress() {
        struct RegionBlocked;
        impl crate::analysis::DependenceOracle for RegionBlocked {
            fn resolve_load(
                &self,
                spec: &Speculation<'_>,
                _ctx: CtxId,
                _load: InstrId,
            ) -> LoadResolution {
                LoadResolution::BlockedOnCfg {
                    ctx: spec.root().unwrap(),
                }
            }
        }

        let mut b = ProgramBuilder::new();
        let f = b.function("f", &[], TypeKind::I32);
        let entry = b.block(f);
        let side = b.block(f);
        let slot = b.push(entry, TypeKind::Ptr, Op::Alloca);
        b.push(
            entry,
            TypeKind::Void,
            Op::Store {
                ptr: Operand::instr(slot),
                value: Operand::i32(1),
            },
        );
        let load = b.push(
            entry,
            TypeKind::I32,
            Op::Load {
                ptr: Operand::instr(slot),
            },
        );
        b.push(entry, TypeKind::Void, Op::Jump { target: side });
        b.push(
            side,
            TypeKind::Void,
            Op::Return {
                value: Some(Operand::instr(load)),
            },
        );
        let program = b.finish().unwrap();

        let mut spec = Speculation::with_collaborators(
            &program,
            Box::new(RegionBlocked),
            Box::new(crate::analysis::NoPromotion),
        );
        let mut q = RecordingQueue::new();
        let root = spec.analyze_root(f, &mut q).unwrap();
        spec.check_load(root, load, &mut q).unwrap();

        q.items.clear();
        // A block dying is the progress a stopped backward walk waits for.
        spec.tree.node_mut(root).dead_edges.insert((entry, side));
        spec.check_block(root, side, &mut q);
        assert!(q
            .items
            .contains(&crate::analysis::WorkItem::CheckLoad { ctx: root, load }));
    }

    #[test]
    fn test_select_with_constant_condition() {
        let mut b = ProgramBuilder::new();
        let f = b.function("f", &[], TypeKind::Void);
        let entry = b.block(f);
        let sel = b.push(
            entry,
            TypeKind::I32,
            Op::Select {
                cond: Operand::boolean(false),
                on_true: Operand::i32(10),
                on_false: Operand::i32(20),
            },
        );
        b.push(entry, TypeKind::Void, Op::Return { value: None });
        let program = b.finish().unwrap();

        let mut spec = Speculation::new(&program);
        let mut q = RecordingQueue::new();
        let root = spec.analyze_root(f, &mut q).unwrap();
        spec.try_evaluate(root, StaticRef::Instruction(sel), &mut q)
            .unwrap();
        assert_eq!(
            spec.resolve_value(root, StaticRef::Instruction(sel)),
            LatticeValue::Constant(ConstValue::I32(20))
        );
    }
}
