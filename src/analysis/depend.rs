//! Store-to-load forwarding over the context-aware backward walker.
//!
//! [`WalkLoadResolver`] answers [`DependenceOracle`] questions by walking
//! backward from the load through the dynamic instruction stream, looking
//! for stores to the same identified object. Addresses are compared as
//! *(ultimate object, literal offset path)* pairs: equal pairs must alias,
//! distinct identified objects never alias, everything else may alias and
//! blocks the load on the offending instruction so it can retry when that
//! instruction resolves.

use crate::analysis::{
    CtxId, DependenceOracle, InstructionVisitor, LatticeValue, LoadResolution, ScopedValue,
    Speculation, WalkOutcome, WalkStep,
};
use crate::ir::{InstrId, Op, Operand, StaticRef};

/// Load forwarding built on the backward walker.
#[derive(Debug, Default, Clone, Copy)]
pub struct WalkLoadResolver;

/// An address as far as the analysis can see it: the object it derives from
/// and the literal offset path applied to it (`None` when any offset is
/// unknown).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AccessPath {
    pub object: ScopedValue,
    pub offsets: Option<Vec<i64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Alias {
    Must,
    May,
    No,
}

impl AccessPath {
    fn classify(&self, other: &Self, spec: &Speculation<'_>) -> Alias {
        if self.object == other.object {
            return match (&self.offsets, &other.offsets) {
                (Some(a), Some(b)) if a == b => Alias::Must,
                (Some(_), Some(_)) => Alias::No,
                _ => Alias::May,
            };
        }
        if spec.is_identified_object(self.object) && spec.is_identified_object(other.object) {
            return Alias::No;
        }
        Alias::May
    }
}

impl<'p> Speculation<'p> {
    /// Resolves a pointer operand to an access path, chasing address
    /// computations, casts and forwarded identities.
    pub(crate) fn access_path(&self, ctx: CtxId, operand: &Operand) -> Option<AccessPath> {
        let LatticeValue::Identity(mut cursor) = self.resolve_operand(ctx, operand) else {
            return None;
        };
        let mut offsets: Vec<i64> = Vec::new();
        let mut known = true;
        // Bounded like the underlying-object chase.
        for _ in 0..64 {
            let StaticRef::Instruction(instr) = cursor.value else {
                break;
            };
            let source = match &self.program().instr(instr).op {
                Op::Gep { base, offsets: ops } => {
                    for op in ops {
                        match self
                            .resolve_operand(cursor.ctx, op)
                            .as_constant()
                            .and_then(|c| c.as_i64())
                        {
                            Some(v) => offsets.push(v),
                            None => known = false,
                        }
                    }
                    base
                }
                Op::Cast { src } => src,
                _ => break,
            };
            match self.resolve_operand(cursor.ctx, source) {
                LatticeValue::Identity(next) => cursor = next,
                _ => break,
            }
        }
        Some(AccessPath {
            object: cursor,
            offsets: known.then_some(offsets),
        })
    }
}

struct LoadSearch {
    target: AccessPath,
    defs: Vec<LatticeValue>,
    blocker: Option<(CtxId, InstrId)>,
    reached_root: bool,
}

impl InstructionVisitor for LoadSearch {
    fn visit(&mut self, spec: &Speculation<'_>, ctx: CtxId, instr: InstrId) -> WalkStep {
        match &spec.program().instr(instr).op {
            Op::Store { ptr, value } => {
                let Some(path) = spec.access_path(ctx, ptr) else {
                    self.blocker = Some((ctx, instr));
                    return WalkStep::StopWalk;
                };
                match path.classify(&self.target, spec) {
                    Alias::Must => {
                        self.defs.push(spec.resolve_operand(ctx, value));
                        WalkStep::StopPath
                    }
                    Alias::May => {
                        self.blocker = Some((ctx, instr));
                        WalkStep::StopWalk
                    }
                    Alias::No => WalkStep::Continue,
                }
            }
            Op::Alloca
                if StaticRef::Instruction(instr) == self.target.object.value
                    && ctx == self.target.object.ctx =>
            {
                // The object's own allocation: nothing older can define it.
                WalkStep::StopPath
            }
            _ => WalkStep::Continue,
        }
    }

    fn should_enter_call(&mut self, spec: &Speculation<'_>, _ctx: CtxId, call: InstrId) -> bool {
        spec.program().instr(call).may_write_memory()
    }

    fn blocked_by_unexpanded_call(
        &mut self,
        _spec: &Speculation<'_>,
        ctx: CtxId,
        call: InstrId,
    ) -> bool {
        self.blocker = Some((ctx, call));
        true
    }

    fn reached_root_entry(&mut self, _spec: &Speculation<'_>, _ctx: CtxId) {
        self.reached_root = true;
    }
}

impl DependenceOracle for WalkLoadResolver {
    fn resolve_load(&self, spec: &Speculation<'_>, ctx: CtxId, load: InstrId) -> LoadResolution {
        let Op::Load { ptr } = &spec.program().instr(load).op else {
            return LoadResolution::Unresolved;
        };
        let Some(target) = spec.access_path(ctx, ptr) else {
            return LoadResolution::Unresolved;
        };
        if !spec.is_identified_object(target.object) {
            return LoadResolution::Unresolved;
        }
        let mut search = LoadSearch {
            target,
            defs: Vec::new(),
            blocker: None,
            reached_root: false,
        };
        let outcome = spec.walk_backward(ctx, load, true, &mut search);
        match outcome {
            WalkOutcome::Blocked | WalkOutcome::Stopped => match search.blocker {
                Some((blocking_ctx, instr)) => LoadResolution::BlockedOn {
                    instr,
                    ctx: blocking_ctx,
                },
                None => LoadResolution::Unresolved,
            },
            WalkOutcome::Completed => {
                if search.reached_root || search.defs.is_empty() {
                    return LoadResolution::Unresolved;
                }
                let first = search.defs[0];
                if search.defs.iter().all(|d| *d == first) && first.is_resolved() {
                    LoadResolution::Forwarded(first)
                } else {
                    LoadResolution::Unresolved
                }
            }
        }
    }
}
