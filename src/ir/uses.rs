//! Static def-use index.
//!
//! Maps every value (instruction result or function argument) to the
//! instructions that mention it as an operand. Built once when the program is
//! finalized; each user appears at most once per used value, even when an
//! instruction mentions the same value in several operand slots.

use std::collections::HashMap;

use crate::ir::{InstrId, Instruction, StaticRef};

/// Users of every static value in a program.
#[derive(Debug, Default)]
pub struct UseIndex {
    users: HashMap<StaticRef, Vec<InstrId>>,
}

impl UseIndex {
    /// Builds the index over a finished instruction arena.
    pub(crate) fn build(instrs: &[Instruction]) -> Self {
        let mut users: HashMap<StaticRef, Vec<InstrId>> = HashMap::new();
        for instr in instrs {
            let mut seen: Vec<StaticRef> = Vec::new();
            for operand in instr.operands() {
                if let Some(value) = operand.as_value() {
                    if !seen.contains(&value) {
                        seen.push(value);
                        users.entry(value).or_default().push(instr.id);
                    }
                }
            }
        }
        Self { users }
    }

    /// The instructions using a value, in instruction order.
    #[must_use]
    pub fn users_of(&self, value: StaticRef) -> &[InstrId] {
        self.users.get(&value).map_or(&[], Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOp, BlockId, Op, Operand, TypeKind};

    #[test]
    fn test_duplicate_operand_indexed_once() {
        let instrs = vec![
            Instruction {
                id: InstrId(0),
                block: BlockId(0),
                ty: TypeKind::I32,
                op: Op::Alloca,
            },
            Instruction {
                id: InstrId(1),
                block: BlockId(0),
                ty: TypeKind::I32,
                op: Op::Binary {
                    op: BinOp::Add,
                    lhs: Operand::instr(InstrId(0)),
                    rhs: Operand::instr(InstrId(0)),
                },
            },
        ];
        let index = UseIndex::build(&instrs);
        assert_eq!(
            index.users_of(StaticRef::Instruction(InstrId(0))),
            &[InstrId(1)]
        );
        assert!(index
            .users_of(StaticRef::Instruction(InstrId(1)))
            .is_empty());
    }
}
