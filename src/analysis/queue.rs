//! Work items and the queue seam.
//!
//! Every engine operation that discovers follow-on work enqueues it through
//! the [`WorkQueue`] trait instead of recursing, which keeps the analysis a
//! flat, single-threaded cooperative loop and makes each operation testable
//! in isolation with a [`RecordingQueue`].

use std::collections::VecDeque;

use crate::analysis::CtxId;
use crate::ir::{BlockId, InstrId, StaticRef};

/// One unit of pending analysis work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkItem {
    /// Recompute liveness for a block in a context.
    CheckBlock {
        /// The context.
        ctx: CtxId,
        /// The block.
        block: BlockId,
    },
    /// Try to resolve a value in a context.
    TryEvaluate {
        /// The context.
        ctx: CtxId,
        /// The value.
        value: StaticRef,
    },
    /// Try to forward a store to a load in a context.
    CheckLoad {
        /// The context.
        ctx: CtxId,
        /// The load instruction.
        load: InstrId,
    },
    /// Try to mark a value dead in a context.
    TryKill {
        /// The context.
        ctx: CtxId,
        /// The value.
        value: StaticRef,
    },
    /// Try to promote a call to a resource token in a context.
    PromoteResource {
        /// The context.
        ctx: CtxId,
        /// The call instruction.
        call: InstrId,
    },
}

/// Sink for discovered work.
///
/// The engine never pops work itself; a driver owns the queue and dispatches.
pub trait WorkQueue {
    /// Enqueues one item.
    fn enqueue(&mut self, item: WorkItem);

    /// Queues a block liveness recheck.
    fn queue_check_block(&mut self, ctx: CtxId, block: BlockId) {
        self.enqueue(WorkItem::CheckBlock { ctx, block });
    }

    /// Queues a value evaluation.
    fn queue_try_evaluate(&mut self, ctx: CtxId, value: StaticRef) {
        self.enqueue(WorkItem::TryEvaluate { ctx, value });
    }

    /// Queues a load-forwarding attempt.
    fn queue_check_load(&mut self, ctx: CtxId, load: InstrId) {
        self.enqueue(WorkItem::CheckLoad { ctx, load });
    }

    /// Queues a dead-value attempt.
    fn queue_try_kill(&mut self, ctx: CtxId, value: StaticRef) {
        self.enqueue(WorkItem::TryKill { ctx, value });
    }

    /// Queues a resource-promotion attempt.
    fn queue_promote_resource(&mut self, ctx: CtxId, call: InstrId) {
        self.enqueue(WorkItem::PromoteResource { ctx, call });
    }
}

impl WorkQueue for VecDeque<WorkItem> {
    fn enqueue(&mut self, item: WorkItem) {
        self.push_back(item);
    }
}

/// A queue that only records, for unit-testing single engine operations.
#[derive(Debug, Default)]
pub struct RecordingQueue {
    /// Everything enqueued, in order.
    pub items: Vec<WorkItem>,
}

impl RecordingQueue {
    /// Creates an empty recording queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkQueue for RecordingQueue {
    fn enqueue(&mut self, item: WorkItem) {
        self.items.push(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::BlockId;

    #[test]
    fn test_helpers_build_expected_items() {
        let mut q = RecordingQueue::new();
        q.queue_check_block(CtxId(0), BlockId(2));
        q.queue_try_kill(CtxId(1), StaticRef::Instruction(InstrId(4)));
        assert_eq!(
            q.items,
            vec![
                WorkItem::CheckBlock {
                    ctx: CtxId(0),
                    block: BlockId(2)
                },
                WorkItem::TryKill {
                    ctx: CtxId(1),
                    value: StaticRef::Instruction(InstrId(4))
                },
            ]
        );
    }

    #[test]
    fn test_vecdeque_is_a_queue() {
        let mut q: VecDeque<WorkItem> = VecDeque::new();
        q.queue_check_block(CtxId(0), BlockId(0));
        assert_eq!(q.len(), 1);
    }
}
