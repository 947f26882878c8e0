//! The speculative analysis itself.
//!
//! [`Speculation`] owns a tree of specialization contexts over a borrowed
//! [`Program`](crate::ir::Program) and refines it to a fixpoint: constants
//! flow through calls and peeled loop iterations, liveness flags prune
//! blocks and edges, and unused values are swept dead. [`FixpointDriver`]
//! runs the worklist; the oracle traits in [`oracle`] are the seams for
//! plugging in memory-dependence and resource-recognition policies.

mod context;
mod dce;
mod depend;
mod driver;
mod engine;
mod eval;
mod liveness;
mod oracle;
mod queue;
mod report;
mod scoped;
mod users;
mod walk;

pub use context::{
    BlockStatus, ContextKind, ContextNode, ContextTree, IterationStatus, PeelAttempt,
};
pub use depend::WalkLoadResolver;
pub use driver::FixpointDriver;
pub use engine::Speculation;
pub use oracle::{
    DependenceOracle, ExternalNameRecognizer, LoadResolution, NoDependence, NoPromotion,
    ResourceRecognizer,
};
pub use queue::{RecordingQueue, WorkItem, WorkQueue};
pub use report::ContextReport;
pub use scoped::{CtxId, LatticeValue, PeelId, ScopedValue};
pub use walk::{InstructionVisitor, WalkOutcome, WalkStep};
