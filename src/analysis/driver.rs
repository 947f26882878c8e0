//! The worklist loop that drives an analysis to a fixpoint.

use std::collections::VecDeque;

use crate::analysis::{CtxId, Speculation, WorkItem, WorkQueue};
use crate::ir::FuncId;
use crate::Result;

/// Runs queued analysis steps until nothing is pending.
///
/// The driver owns the work queue; every step may push follow-on work onto
/// it. Each item kind is guarded by a cheap `should_*` predicate, so
/// re-queued duplicates cost one pop. Once the propagation queue first
/// drains, the driver seeds the dead-value sweep and keeps going until the
/// queue drains again.
#[derive(Debug, Default)]
pub struct FixpointDriver {
    pending: VecDeque<WorkItem>,
    steps: usize,
    swept: bool,
}

impl FixpointDriver {
    /// Creates an idle driver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the root context for `function` and queues its initial work.
    pub fn seed(&mut self, spec: &mut Speculation<'_>, function: FuncId) -> Result<CtxId> {
        spec.analyze_root(function, &mut self.pending)
    }

    /// Drains the queue, returning the number of steps this run executed.
    pub fn run(&mut self, spec: &mut Speculation<'_>) -> Result<usize> {
        let before = self.steps;
        loop {
            let Some(item) = self.pending.pop_front() else {
                if self.swept {
                    break;
                }
                // Forward propagation settled; unused values can now be
                // judged against the final liveness picture.
                spec.seed_dead_value_sweep(&mut self.pending);
                self.swept = true;
                continue;
            };
            self.steps += 1;
            match item {
                WorkItem::CheckBlock { ctx, block } => {
                    spec.check_block(ctx, block, &mut self.pending);
                }
                WorkItem::TryEvaluate { ctx, value } => {
                    spec.try_evaluate(ctx, value, &mut self.pending)?;
                }
                WorkItem::CheckLoad { ctx, load } => {
                    spec.check_load(ctx, load, &mut self.pending)?;
                }
                WorkItem::TryKill { ctx, value } => {
                    spec.try_kill_value(ctx, value, &mut self.pending);
                }
                WorkItem::PromoteResource { ctx, call } => {
                    spec.try_promote_resource(ctx, call, &mut self.pending)?;
                }
            }
        }
        Ok(self.steps - before)
    }

    /// Steps executed so far, across all runs.
    #[must_use]
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Whether work is pending.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }
}

impl WorkQueue for FixpointDriver {
    fn enqueue(&mut self, item: WorkItem) {
        self.pending.push_back(item);
    }
}
