//! External collaborator seams: dependence resolution and resource
//! recognition.
//!
//! The engine never answers memory-dependence or resource questions itself;
//! it asks through these traits. The defaults are fully conservative, so an
//! engine built with them still computes liveness and SSA-level constant
//! propagation, just without load forwarding or token promotion.

use crate::analysis::{CtxId, LatticeValue, Speculation};
use crate::ir::{Callee, InstrId, Op, Program};

/// Outcome of a load-forwarding attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadResolution {
    /// A unique reaching definition was found.
    Forwarded(LatticeValue),
    /// Resolution is blocked until a specific instruction in a specific
    /// context is better understood (an unexpanded call, an unresolved
    /// store address).
    BlockedOn {
        /// The blocking instruction.
        instr: InstrId,
        /// The context it lives in.
        ctx: CtxId,
    },
    /// Resolution is blocked on control flow in a context still settling.
    ///
    /// The bundled [`WalkLoadResolver`](crate::analysis::WalkLoadResolver)
    /// keys every block on the offending instruction and so only reports
    /// [`LoadResolution::BlockedOn`]; this variant is for oracles that reason
    /// about whole control-flow regions rather than single clobbers. The
    /// engine re-queues the load whenever the named context's CFG makes
    /// progress.
    BlockedOnCfg {
        /// The context whose CFG must settle first.
        ctx: CtxId,
    },
    /// No unique definition; the conservative answer.
    Unresolved,
}

/// Resolves loads to the stores that reach them.
pub trait DependenceOracle {
    /// Attempts to find the unique definition reaching `load` in `ctx`.
    fn resolve_load(&self, spec: &Speculation<'_>, ctx: CtxId, load: InstrId) -> LoadResolution;
}

/// An oracle that never resolves anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDependence;

impl DependenceOracle for NoDependence {
    fn resolve_load(&self, _spec: &Speculation<'_>, _ctx: CtxId, _load: InstrId) -> LoadResolution {
        LoadResolution::Unresolved
    }
}

/// Recognizes calls that acquire opaque resources.
///
/// A promoted call's result becomes a [`LatticeValue::ResourceToken`]: it
/// forwards freely through casts and copies, and comparisons against literals
/// can fold using only the guarantee that a fresh token is non-negative.
pub trait ResourceRecognizer {
    /// Whether this call acquires a resource whose handle the analysis may
    /// treat as a token.
    fn recognizes(&self, program: &Program, call: InstrId) -> bool;
}

/// A recognizer that promotes nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPromotion;

impl ResourceRecognizer for NoPromotion {
    fn recognizes(&self, _program: &Program, _call: InstrId) -> bool {
        false
    }
}

/// Promotes calls to external functions with specific names.
///
/// The usual configuration lists acquisition entry points such as `open`.
#[derive(Debug, Default)]
pub struct ExternalNameRecognizer {
    names: Vec<String>,
}

impl ExternalNameRecognizer {
    /// Creates a recognizer promoting calls to the named externals.
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl ResourceRecognizer for ExternalNameRecognizer {
    fn recognizes(&self, program: &Program, call: InstrId) -> bool {
        match &program.instr(call).op {
            Op::Call {
                callee: Callee::External(name),
                ..
            } => self.names.iter().any(|n| n == name),
            _ => false,
        }
    }
}
