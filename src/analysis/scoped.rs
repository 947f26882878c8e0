//! Scoped values and the improvement lattice.
//!
//! A value's identity in this analysis is always the pair of its static name
//! and the speculation context it lives in: the same instruction can resolve
//! to different constants in different peeled iterations of a loop. Lattice
//! entries move in one direction only, from [`LatticeValue::Unresolved`] to a
//! resolved form, and never change once resolved.

use crate::ir::{ConstValue, StaticRef};

/// Index of a context node within a [`ContextTree`](crate::analysis::ContextTree).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CtxId(pub(crate) usize);

/// Index of a peel attempt (iteration set) within a context tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeelId(pub(crate) usize);

impl std::fmt::Display for CtxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx{}", self.0)
    }
}

impl std::fmt::Display for PeelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "peel{}", self.0)
    }
}

/// A value under a specific speculation context.
///
/// Equality requires both halves: `(v, ctx1) != (v, ctx2)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopedValue {
    /// The static value name.
    pub value: StaticRef,
    /// The context scoping it.
    pub ctx: CtxId,
}

impl ScopedValue {
    /// Pairs a static value with a context.
    #[must_use]
    pub const fn new(value: StaticRef, ctx: CtxId) -> Self {
        Self { value, ctx }
    }
}

impl std::fmt::Display for ScopedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.value, self.ctx)
    }
}

/// What a scoped value is known to be.
///
/// The lattice is flat and set-once: entries go from `Unresolved` to exactly
/// one resolved form and stay there. Deriving a *different* resolved form for
/// an already-resolved entry is an invariant violation, not a lattice move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatticeValue {
    /// Nothing is known; the conservative answer.
    Unresolved,
    /// The value is a compile-time literal.
    Constant(ConstValue),
    /// The value is the same as another scoped value (a forwarded identity,
    /// or the value standing for itself when nothing better is known).
    Identity(ScopedValue),
    /// The value is an opaque handle produced by a recognized resource
    /// acquisition, scoped to the context that performed it. Tokens forward
    /// freely but never expose a literal payload.
    ResourceToken(ScopedValue),
}

impl LatticeValue {
    /// Whether this entry carries information beyond "unknown".
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        !matches!(self, Self::Unresolved)
    }

    /// The literal payload, if this is a constant.
    #[must_use]
    pub const fn as_constant(&self) -> Option<ConstValue> {
        match self {
            Self::Constant(c) => Some(*c),
            _ => None,
        }
    }

    /// The token, if this is a resource token.
    #[must_use]
    pub const fn as_token(&self) -> Option<ScopedValue> {
        match self {
            Self::ResourceToken(t) => Some(*t),
            _ => None,
        }
    }
}

impl std::fmt::Display for LatticeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unresolved => write!(f, "?"),
            Self::Constant(c) => write!(f, "{c}"),
            Self::Identity(v) => write!(f, "={v}"),
            Self::ResourceToken(t) => write!(f, "token({t})"),
        }
    }
}
