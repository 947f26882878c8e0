//! The speculation engine.
//!
//! [`Speculation`] owns the context tree and the collaborator seams, and
//! carries the cross-cutting value operations every phase shares: resolving
//! an operand under a context, committing an improvement (set-once), the
//! forwarding policy and the underlying-object chase. The phase algorithms
//! live in sibling modules (`liveness`, `eval`, `users`, `dce`, `walk`) as
//! further `impl` blocks on this type.

use crate::analysis::{
    ContextKind, ContextTree, CtxId, DependenceOracle, LatticeValue, PeelId, ResourceRecognizer,
    ScopedValue, WalkLoadResolver, WorkQueue,
};
use crate::ir::{BlockId, Callee, FuncId, InstrId, LoopId, Op, Operand, Program, StaticRef, TypeKind};
use crate::Result;

/// Gep/cast chains are acyclic in well-formed SSA; the cap guards against
/// pathological identity cycles in hand-built programs.
const MAX_OBJECT_CHASE: usize = 64;

/// The speculative analysis engine over one program.
pub struct Speculation<'p> {
    program: &'p Program,
    pub(crate) tree: ContextTree,
    root: Option<CtxId>,
    oracle: Box<dyn DependenceOracle>,
    recognizer: Box<dyn ResourceRecognizer>,
}

impl<'p> Speculation<'p> {
    /// Creates an engine with the default collaborators: walker-based load
    /// forwarding and no resource promotion.
    #[must_use]
    pub fn new(program: &'p Program) -> Self {
        Self::with_collaborators(
            program,
            Box::new(WalkLoadResolver),
            Box::new(crate::analysis::NoPromotion),
        )
    }

    /// Creates an engine with explicit collaborators.
    #[must_use]
    pub fn with_collaborators(
        program: &'p Program,
        oracle: Box<dyn DependenceOracle>,
        recognizer: Box<dyn ResourceRecognizer>,
    ) -> Self {
        Self {
            program,
            tree: ContextTree::new(),
            root: None,
            oracle,
            recognizer,
        }
    }

    /// The analyzed program.
    #[must_use]
    pub fn program(&self) -> &'p Program {
        self.program
    }

    /// The context tree built so far.
    #[must_use]
    pub fn tree(&self) -> &ContextTree {
        &self.tree
    }

    /// The root context, once [`Speculation::analyze_root`] has run.
    #[must_use]
    pub fn root(&self) -> Option<CtxId> {
        self.root
    }

    /// Creates the root context for a function and queues its initial work.
    ///
    /// # Errors
    /// Returns [`Error::InvalidIr`](crate::Error::InvalidIr) when called twice.
    pub fn analyze_root(&mut self, function: FuncId, q: &mut dyn WorkQueue) -> Result<CtxId> {
        if self.root.is_some() {
            return Err(crate::Error::InvalidIr(
                "analysis root already created".to_string(),
            ));
        }
        let root = self.tree.alloc_root(function);
        self.root = Some(root);
        self.queue_initial_work(root, q);
        Ok(root)
    }

    /// The block a context starts executing at: the function entry for inline
    /// contexts, the loop header for iterations.
    #[must_use]
    pub fn entry_block(&self, ctx: CtxId) -> BlockId {
        let node = self.tree.node(ctx);
        match node.loop_scope {
            Some(loop_id) => self.program.loop_info(loop_id).header,
            None => self.program.function(node.function).entry,
        }
    }

    /// The loop scope a static value naturally lives at.
    #[must_use]
    pub fn value_scope(&self, value: StaticRef) -> Option<LoopId> {
        match value {
            StaticRef::Instruction(i) => self.program.loop_of(self.program.instr(i).block),
            StaticRef::Argument(..) => None,
        }
    }

    /// The context that owns lattice entries for `value` when asked from
    /// `ctx`: walks out of iteration contexts until the value's scope is
    /// within the cursor's scope.
    #[must_use]
    pub fn value_home(&self, ctx: CtxId, value: StaticRef) -> CtxId {
        let target = self.value_scope(value);
        let mut cursor = ctx;
        loop {
            let node = self.tree.node(cursor);
            if !matches!(node.kind, ContextKind::Iteration { .. })
                || self.program.scope_contains(node.loop_scope, target)
            {
                return cursor;
            }
            match node.parent {
                Some(parent) => cursor = parent,
                None => return cursor,
            }
        }
    }

    /// The identity a value falls back to when nothing better is known.
    #[must_use]
    pub fn get_default(&self, ctx: CtxId, value: StaticRef) -> LatticeValue {
        LatticeValue::Identity(ScopedValue::new(value, ctx))
    }

    /// Resolves a value under a context: the improvement recorded at its home
    /// context, or its own identity there.
    #[must_use]
    pub fn resolve_value(&self, ctx: CtxId, value: StaticRef) -> LatticeValue {
        let home = self.value_home(ctx, value);
        self.tree
            .node(home)
            .improvement(value)
            .unwrap_or_else(|| self.get_default(home, value))
    }

    /// Resolves an operand under a context.
    #[must_use]
    pub fn resolve_operand(&self, ctx: CtxId, operand: &Operand) -> LatticeValue {
        match operand {
            Operand::Literal(c) => LatticeValue::Constant(*c),
            Operand::Value(v) => self.resolve_value(ctx, *v),
        }
    }

    /// Commits an improvement. Entries are set-once: re-deriving the same
    /// value is an idempotent no-op, a different value is an invariant
    /// violation.
    ///
    /// # Errors
    /// Returns [`Error::InvariantViolation`](crate::Error::InvariantViolation)
    /// on a conflicting overwrite.
    pub fn set_replacement(
        &mut self,
        ctx: CtxId,
        value: StaticRef,
        improved: LatticeValue,
    ) -> Result<()> {
        let node = self.tree.node_mut(ctx);
        if let Some(existing) = node.improved.get(&value) {
            if *existing == improved {
                return Ok(());
            }
            return Err(violation!(
                "conflicting improvement for {} in {}: {} vs {}",
                value,
                ctx,
                existing,
                improved
            ));
        }
        node.improved.insert(value, improved);
        Ok(())
    }

    /// The forwarding policy: which resolved entries may flow into users.
    ///
    /// Literals always forward. Tokens forward opaquely. An identity forwards
    /// only for pointer-typed values whose ultimate underlying object is an
    /// identified allocation; forwarding an arbitrary SSA name would claim
    /// knowledge the analysis does not have.
    #[must_use]
    pub fn should_forward(&self, improved: &LatticeValue) -> bool {
        match improved {
            LatticeValue::Constant(_) | LatticeValue::ResourceToken(_) => true,
            LatticeValue::Identity(sv) => {
                self.program.type_of(sv.value) == TypeKind::Ptr
                    && self.is_identified_object(self.ultimate_underlying_object(*sv))
            }
            LatticeValue::Unresolved => false,
        }
    }

    /// Chases address computations and casts back to the scoped value they
    /// ultimately derive from.
    #[must_use]
    pub fn ultimate_underlying_object(&self, start: ScopedValue) -> ScopedValue {
        let mut cursor = start;
        for _ in 0..MAX_OBJECT_CHASE {
            let StaticRef::Instruction(instr) = cursor.value else {
                return cursor;
            };
            let source = match &self.program.instr(instr).op {
                Op::Gep { base, .. } => base,
                Op::Cast { src } => src,
                _ => return cursor,
            };
            let Some(value) = source.as_value() else {
                return cursor;
            };
            match self.resolve_value(cursor.ctx, value) {
                LatticeValue::Identity(next) => cursor = next,
                _ => return cursor,
            }
        }
        cursor
    }

    /// Whether a scoped value is an identified memory object (an allocation).
    #[must_use]
    pub fn is_identified_object(&self, sv: ScopedValue) -> bool {
        matches!(sv.value, StaticRef::Instruction(i) if matches!(self.program.instr(i).op, Op::Alloca))
    }

    /// Queues the work a fresh context starts with: its entry block, an
    /// evaluation pass over every instruction at its scope, and a forwarding
    /// attempt for every load.
    pub(crate) fn queue_initial_work(&mut self, ctx: CtxId, q: &mut dyn WorkQueue) {
        let entry = self.entry_block(ctx);
        q.queue_check_block(ctx, entry);
        let node = self.tree.node(ctx);
        let function = self.program.function(node.function);
        for &block in &function.blocks {
            if self.program.loop_of(block) != node.loop_scope {
                continue;
            }
            for &instr in &self.program.block(block).instrs {
                q.queue_try_evaluate(ctx, StaticRef::Instruction(instr));
            }
        }
        for load in self.program.loads_in_scope(node.function, node.loop_scope) {
            q.queue_check_load(ctx, load);
        }
    }

    /// The inline child for a call, creating it when the callee is a known,
    /// non-variadic function defined at this context's scope.
    pub(crate) fn get_or_create_inline_child(
        &mut self,
        ctx: CtxId,
        call: InstrId,
        q: &mut dyn WorkQueue,
    ) -> Option<CtxId> {
        if let Some(existing) = self.tree.node(ctx).inline_child(call) {
            return Some(existing);
        }
        let instr = self.program.instr(call);
        let Op::Call {
            callee: Callee::Known(callee),
            args,
        } = &instr.op
        else {
            return None;
        };
        let callee_fn = self.program.function(*callee);
        if callee_fn.variadic || args.len() != callee_fn.params.len() {
            return None;
        }
        // Calls nested in an unpeeled loop belong to that loop's iterations.
        if self.program.loop_of(instr.block) != self.tree.node(ctx).loop_scope {
            return None;
        }
        let callee = *callee;
        let child = self.tree.alloc_inline(ctx, call, callee);
        self.queue_initial_work(child, q);
        for index in 0..self.program.function(callee).params.len() {
            q.queue_try_evaluate(child, StaticRef::Argument(callee, index as u32));
        }
        Some(child)
    }

    /// The peel attempt for a loop, creating it (with iteration zero) when
    /// the loop is well formed and an immediate child of this context's
    /// scope.
    pub(crate) fn get_or_create_peel(
        &mut self,
        ctx: CtxId,
        loop_id: LoopId,
        q: &mut dyn WorkQueue,
    ) -> Option<PeelId> {
        if let Some(existing) = self.tree.node(ctx).peel_child(loop_id) {
            return Some(existing);
        }
        let info = self.program.loop_info(loop_id);
        if !info.is_well_formed() {
            return None;
        }
        let node = self.tree.node(ctx);
        if info.func != node.function || info.parent != node.loop_scope {
            return None;
        }
        let peel = self.tree.alloc_peel(ctx, loop_id);
        self.create_next_iteration(peel, q);
        Some(peel)
    }

    /// Appends the next iteration to a peel attempt and queues its initial
    /// work.
    pub(crate) fn create_next_iteration(&mut self, peel: PeelId, q: &mut dyn WorkQueue) -> CtxId {
        let iteration = self.tree.push_iteration(peel);
        self.queue_initial_work(iteration, q);
        iteration
    }

    /// Whether the recognizer claims this call acquires a resource.
    pub(crate) fn recognizes_resource(&self, call: InstrId) -> bool {
        self.recognizer.recognizes(self.program, call)
    }

    /// Runs the configured dependence oracle for a load.
    pub(crate) fn resolve_load_dependence(
        &self,
        ctx: CtxId,
        load: InstrId,
    ) -> crate::analysis::LoadResolution {
        self.oracle.resolve_load(self, ctx, load)
    }
}
