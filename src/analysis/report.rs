//! Read-only summaries of a finished analysis.
//!
//! A [`ContextReport`] flattens one context's findings into sorted vectors
//! so callers can diff, print or score them without touching the tree's
//! internal maps. Reports nest the same way contexts do.

use crate::analysis::{ContextKind, CtxId, LatticeValue, Speculation};
use crate::ir::{BlockId, Callee, InstrId, Op, StaticRef};

/// One context's findings, with child contexts nested inside.
#[derive(Debug, Clone)]
pub struct ContextReport {
    /// The analyzed function's name.
    pub function: String,
    /// Human-readable description of where this context came from.
    pub kind: String,
    /// Values proven constant, identity-forwarded or token-carrying.
    pub improved_values: Vec<(StaticRef, LatticeValue)>,
    /// Blocks proven unreachable in this context.
    pub dead_blocks: Vec<BlockId>,
    /// Control edges proven untaken in this context.
    pub dead_edges: Vec<(BlockId, BlockId)>,
    /// Values proven unused in this context.
    pub dead_values: Vec<StaticRef>,
    /// Live known-callee calls that were not expanded into a child context.
    pub residual_calls: Vec<InstrId>,
    /// Reports for inline children and peel iterations.
    pub children: Vec<ContextReport>,
}

impl ContextReport {
    /// Improvements found in this context and all descendants.
    #[must_use]
    pub fn total_improvements(&self) -> usize {
        self.improved_values.len()
            + self
                .children
                .iter()
                .map(ContextReport::total_improvements)
                .sum::<usize>()
    }

    /// Dead blocks found in this context and all descendants.
    #[must_use]
    pub fn total_dead_blocks(&self) -> usize {
        self.dead_blocks.len()
            + self
                .children
                .iter()
                .map(ContextReport::total_dead_blocks)
                .sum::<usize>()
    }

    /// Contexts in this subtree, this one included.
    #[must_use]
    pub fn total_contexts(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(ContextReport::total_contexts)
            .sum::<usize>()
    }
}

fn ref_key(value: &StaticRef) -> (u8, usize, u32) {
    match *value {
        StaticRef::Instruction(instr) => (0, instr.0, 0),
        StaticRef::Argument(func, index) => (1, func.0, index),
    }
}

impl<'p> Speculation<'p> {
    /// Builds a nested report for the root context, or `None` before
    /// [`Speculation::analyze_root`] ran.
    #[must_use]
    pub fn report(&self) -> Option<ContextReport> {
        self.root().map(|root| self.report_for(root))
    }

    /// Builds a report for one context subtree.
    #[must_use]
    pub fn report_for(&self, ctx: CtxId) -> ContextReport {
        let program = self.program();
        let node = self.tree().node(ctx);
        let function = program.function(node.function);

        let kind = match node.kind {
            ContextKind::Inline { call_site: None } => "root".to_string(),
            ContextKind::Inline {
                call_site: Some((_, call)),
            } => format!("inlined at {call}"),
            ContextKind::Iteration { index, .. } => {
                format!("iteration {index} ({:?})", node.iter_status)
            }
        };

        let mut improved_values: Vec<_> = node
            .improved
            .iter()
            .map(|(value, lattice)| (*value, *lattice))
            .collect();
        improved_values.sort_by_key(|(value, _)| ref_key(value));

        let mut dead_blocks: Vec<_> = node
            .block_status
            .iter()
            .filter(|(_, status)| status.contains(crate::analysis::BlockStatus::DEAD))
            .map(|(block, _)| *block)
            .collect();
        dead_blocks.sort_by_key(|block| block.0);

        let mut dead_edges: Vec<_> = node.dead_edges.iter().copied().collect();
        dead_edges.sort_by_key(|(from, to)| (from.0, to.0));

        let mut dead_values: Vec<_> = node.dead_values.iter().copied().collect();
        dead_values.sort_by_key(ref_key);

        let mut residual_calls: Vec<_> = function
            .blocks
            .iter()
            .filter(|block| !node.block_is_dead(**block))
            .flat_map(|block| program.block(*block).instrs.iter())
            .filter(|instr| {
                matches!(
                    program.instr(**instr).op,
                    Op::Call {
                        callee: Callee::Known(_),
                        ..
                    }
                ) && node.inline_child(**instr).is_none()
                    && !node.value_is_marked_dead(StaticRef::Instruction(**instr))
            })
            .copied()
            .collect();
        residual_calls.sort_by_key(|instr| instr.0);

        let mut children: Vec<ContextReport> = Vec::new();
        let mut inline: Vec<_> = node.inline_children.iter().collect();
        inline.sort_by_key(|(call, _)| call.0);
        for (_, child) in inline {
            children.push(self.report_for(*child));
        }
        let mut peels: Vec<_> = node.peel_children.values().copied().collect();
        peels.sort_by_key(|peel| peel.0);
        for peel in peels {
            for &iteration in &self.tree().peel(peel).iterations {
                children.push(self.report_for(iteration));
            }
        }

        ContextReport {
            function: function.name.clone(),
            kind,
            improved_values,
            dead_blocks,
            dead_edges,
            dead_values,
            residual_calls,
            children,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::analysis::{FixpointDriver, Speculation};
    use crate::ir::{Callee, CmpPred, Op, Operand, ProgramBuilder, TypeKind};

    /// Reports mirror the context tree and carry the per-context findings.
    #[test]
    fn test_report_nests_inline_children() {
        let mut b = ProgramBuilder::new();
        let callee = b.function("is_five", &[("x", TypeKind::I32)], TypeKind::Bool);
        let centry = b.block(callee);
        let cmp = b.push(
            centry,
            TypeKind::Bool,
            Op::Compare {
                pred: CmpPred::Eq,
                lhs: Operand::arg(callee, 0),
                rhs: Operand::i32(5),
            },
        );
        b.push(
            centry,
            TypeKind::Void,
            Op::Return {
                value: Some(Operand::instr(cmp)),
            },
        );

        let main = b.function("main", &[], TypeKind::Bool);
        let entry = b.block(main);
        let call = b.push(
            entry,
            TypeKind::Bool,
            Op::Call {
                callee: Callee::Known(callee),
                args: vec![Operand::i32(5)],
            },
        );
        b.push(
            entry,
            TypeKind::Void,
            Op::Return {
                value: Some(Operand::instr(call)),
            },
        );
        let program = b.finish().unwrap();

        let mut spec = Speculation::new(&program);
        let mut driver = FixpointDriver::new();
        driver.seed(&mut spec, main).unwrap();
        driver.run(&mut spec).unwrap();

        let report = spec.report().unwrap();
        assert_eq!(report.function, "main");
        assert_eq!(report.kind, "root");
        assert_eq!(report.children.len(), 1);
        assert_eq!(report.children[0].function, "is_five");
        assert!(report.residual_calls.is_empty());
        assert!(report.total_improvements() >= 2);
        assert_eq!(report.total_contexts(), 2);
    }
}
