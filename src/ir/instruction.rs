//! Instructions, operands and static value references.
//!
//! The IR is SSA-flavoured: every instruction that produces a value is itself
//! the name of that value, and an operand refers to a producing instruction,
//! a function argument, or an inline literal. Ids are plain arena indices
//! into the owning [`Program`](crate::ir::Program).

use crate::ir::{BinOp, CmpPred, ConstValue};

/// Index of a function within a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncId(pub(crate) usize);

/// Index of a basic block within a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub(crate) usize);

/// Index of an instruction within a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub(crate) usize);

/// Index of a natural loop within a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(pub(crate) usize);

impl std::fmt::Display for FuncId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fn{}", self.0)
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b{}", self.0)
    }
}

impl std::fmt::Display for InstrId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "i{}", self.0)
    }
}

impl std::fmt::Display for LoopId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Value types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    /// No value (terminators, stores).
    Void,
    /// Boolean.
    Bool,
    /// 32-bit signed integer.
    I32,
    /// 64-bit signed integer.
    I64,
    /// Pointer.
    Ptr,
}

impl TypeKind {
    /// Whether a cast between two types preserves the bit pattern on common
    /// 64-bit targets (pointer/integer casts among 32/64-bit widths).
    #[must_use]
    pub const fn bit_compatible(self, other: TypeKind) -> bool {
        matches!(
            (self, other),
            (
                TypeKind::I32 | TypeKind::I64 | TypeKind::Ptr,
                TypeKind::I32 | TypeKind::I64 | TypeKind::Ptr
            )
        )
    }
}

/// The static half of a scoped value: a value name independent of any
/// speculation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StaticRef {
    /// The value produced by an instruction.
    Instruction(InstrId),
    /// A formal argument of a function.
    Argument(FuncId, u32),
}

impl std::fmt::Display for StaticRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Instruction(i) => write!(f, "{i}"),
            Self::Argument(func, idx) => write!(f, "{func}.arg{idx}"),
        }
    }
}

/// An instruction operand: a reference to a produced value or an inline literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    /// A reference to an instruction result or function argument.
    Value(StaticRef),
    /// An inline constant.
    Literal(ConstValue),
}

impl Operand {
    /// Operand referring to an instruction's result.
    #[must_use]
    pub const fn instr(id: InstrId) -> Self {
        Self::Value(StaticRef::Instruction(id))
    }

    /// Operand referring to a function argument.
    #[must_use]
    pub const fn arg(func: FuncId, index: u32) -> Self {
        Self::Value(StaticRef::Argument(func, index))
    }

    /// A 32-bit integer literal operand.
    #[must_use]
    pub const fn i32(value: i32) -> Self {
        Self::Literal(ConstValue::I32(value))
    }

    /// A 64-bit integer literal operand.
    #[must_use]
    pub const fn i64(value: i64) -> Self {
        Self::Literal(ConstValue::I64(value))
    }

    /// A boolean literal operand.
    #[must_use]
    pub const fn boolean(value: bool) -> Self {
        Self::Literal(ConstValue::Bool(value))
    }

    /// The static reference, if this operand names a value.
    #[must_use]
    pub const fn as_value(&self) -> Option<StaticRef> {
        match self {
            Self::Value(v) => Some(*v),
            Self::Literal(_) => None,
        }
    }
}

/// Who a call targets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Callee {
    /// A function defined in this program.
    Known(FuncId),
    /// An external function known only by name; its body is opaque.
    External(String),
    /// An indirect call through a value.
    Indirect(Operand),
}

/// Instruction payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Binary arithmetic or bitwise operation.
    Binary {
        /// The operator.
        op: BinOp,
        /// Left operand.
        lhs: Operand,
        /// Right operand.
        rhs: Operand,
    },
    /// Comparison producing a boolean.
    Compare {
        /// The predicate.
        pred: CmpPred,
        /// Left operand.
        lhs: Operand,
        /// Right operand.
        rhs: Operand,
    },
    /// Conversion to the instruction's result type.
    Cast {
        /// The value being converted.
        src: Operand,
    },
    /// Two-way value selection on a boolean condition.
    Select {
        /// The condition.
        cond: Operand,
        /// Value when the condition is true.
        on_true: Operand,
        /// Value when the condition is false.
        on_false: Operand,
    },
    /// SSA confluence: one incoming operand per predecessor edge.
    Phi {
        /// `(predecessor block, operand flowing along that edge)` pairs.
        incoming: Vec<(BlockId, Operand)>,
    },
    /// Conditional branch on a boolean.
    Branch {
        /// The condition.
        cond: Operand,
        /// Successor when true.
        on_true: BlockId,
        /// Successor when false.
        on_false: BlockId,
    },
    /// Unconditional jump.
    Jump {
        /// The successor.
        target: BlockId,
    },
    /// Multi-way branch on an integer.
    Switch {
        /// The scrutinee.
        value: Operand,
        /// `(case value, successor)` pairs.
        cases: Vec<(i64, BlockId)>,
        /// Successor when no case matches.
        default: BlockId,
    },
    /// Function call.
    Call {
        /// The callee.
        callee: Callee,
        /// Actual arguments.
        args: Vec<Operand>,
    },
    /// Return from the enclosing function.
    Return {
        /// The returned value, if the function returns one.
        value: Option<Operand>,
    },
    /// Memory read through a pointer.
    Load {
        /// The address.
        ptr: Operand,
    },
    /// Memory write through a pointer.
    Store {
        /// The address.
        ptr: Operand,
        /// The stored value.
        value: Operand,
    },
    /// Stack allocation; an identified memory object.
    Alloca,
    /// Address computation: base plus literal-or-value offsets.
    Gep {
        /// The base address.
        base: Operand,
        /// Offsets applied to the base.
        offsets: Vec<Operand>,
    },
}

/// An instruction: a typed [`Op`] placed in a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// This instruction's id.
    pub id: InstrId,
    /// The containing block.
    pub block: BlockId,
    /// The result type (`Void` for non-producing instructions).
    pub ty: TypeKind,
    /// The payload.
    pub op: Op,
}

impl Instruction {
    /// Whether this instruction ends a block.
    #[must_use]
    pub const fn is_terminator(&self) -> bool {
        matches!(
            self.op,
            Op::Branch { .. } | Op::Jump { .. } | Op::Switch { .. } | Op::Return { .. }
        )
    }

    /// Whether this instruction may write memory or have other externally
    /// visible effects. Calls are assumed effectful unless proven otherwise.
    #[must_use]
    pub const fn may_have_side_effects(&self) -> bool {
        matches!(self.op, Op::Store { .. } | Op::Call { .. })
    }

    /// Whether this instruction may write memory.
    #[must_use]
    pub const fn may_write_memory(&self) -> bool {
        matches!(self.op, Op::Store { .. } | Op::Call { .. })
    }

    /// Whether this instruction reads memory.
    #[must_use]
    pub const fn may_read_memory(&self) -> bool {
        matches!(self.op, Op::Load { .. } | Op::Call { .. })
    }

    /// The control-flow successors of this instruction, empty for
    /// non-terminators and returns.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match &self.op {
            Op::Branch {
                on_true, on_false, ..
            } => {
                if on_true == on_false {
                    vec![*on_true]
                } else {
                    vec![*on_true, *on_false]
                }
            }
            Op::Jump { target } => vec![*target],
            Op::Switch { cases, default, .. } => {
                let mut out: Vec<BlockId> = Vec::with_capacity(cases.len() + 1);
                for (_, target) in cases {
                    if !out.contains(target) {
                        out.push(*target);
                    }
                }
                if !out.contains(default) {
                    out.push(*default);
                }
                out
            }
            _ => Vec::new(),
        }
    }

    /// All operands of this instruction, in a fixed order.
    #[must_use]
    pub fn operands(&self) -> Vec<Operand> {
        match &self.op {
            Op::Binary { lhs, rhs, .. } | Op::Compare { lhs, rhs, .. } => vec![*lhs, *rhs],
            Op::Cast { src } => vec![*src],
            Op::Select {
                cond,
                on_true,
                on_false,
            } => vec![*cond, *on_true, *on_false],
            Op::Phi { incoming } => incoming.iter().map(|(_, op)| *op).collect(),
            Op::Branch { cond, .. } => vec![*cond],
            Op::Jump { .. } | Op::Alloca => Vec::new(),
            Op::Switch { value, .. } => vec![*value],
            Op::Call { callee, args } => {
                let mut out = Vec::with_capacity(args.len() + 1);
                if let Callee::Indirect(target) = callee {
                    out.push(*target);
                }
                out.extend(args.iter().copied());
                out
            }
            Op::Return { value } => value.iter().copied().collect(),
            Op::Load { ptr } => vec![*ptr],
            Op::Store { ptr, value } => vec![*ptr, *value],
            Op::Gep { base, offsets } => {
                let mut out = Vec::with_capacity(offsets.len() + 1);
                out.push(*base);
                out.extend(offsets.iter().copied());
                out
            }
        }
    }

    /// The incoming operand a phi carries for `pred`, if this is a phi with
    /// such an edge.
    #[must_use]
    pub fn phi_operand_for(&self, pred: BlockId) -> Option<Operand> {
        match &self.op {
            Op::Phi { incoming } => incoming
                .iter()
                .find(|(block, _)| *block == pred)
                .map(|(_, op)| *op),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instr(op: Op) -> Instruction {
        Instruction {
            id: InstrId(0),
            block: BlockId(0),
            ty: TypeKind::I32,
            op,
        }
    }

    #[test]
    fn test_successors_dedup() {
        let b = instr(Op::Branch {
            cond: Operand::boolean(true),
            on_true: BlockId(3),
            on_false: BlockId(3),
        });
        assert_eq!(b.successors(), vec![BlockId(3)]);

        let s = instr(Op::Switch {
            value: Operand::i32(0),
            cases: vec![(0, BlockId(1)), (1, BlockId(2)), (2, BlockId(1))],
            default: BlockId(2),
        });
        assert_eq!(s.successors(), vec![BlockId(1), BlockId(2)]);
    }

    #[test]
    fn test_operands_cover_phi_and_call() {
        let p = instr(Op::Phi {
            incoming: vec![
                (BlockId(1), Operand::i32(1)),
                (BlockId(2), Operand::instr(InstrId(7))),
            ],
        });
        assert_eq!(p.operands().len(), 2);

        let c = instr(Op::Call {
            callee: Callee::Indirect(Operand::instr(InstrId(9))),
            args: vec![Operand::i32(1)],
        });
        assert_eq!(c.operands().len(), 2);
    }

    #[test]
    fn test_effect_classification() {
        assert!(instr(Op::Store {
            ptr: Operand::instr(InstrId(1)),
            value: Operand::i32(0)
        })
        .may_have_side_effects());
        assert!(!instr(Op::Load {
            ptr: Operand::instr(InstrId(1))
        })
        .may_have_side_effects());
        assert!(instr(Op::Load {
            ptr: Operand::instr(InstrId(1))
        })
        .may_read_memory());
    }

    #[test]
    fn test_bit_compatible_casts() {
        assert!(TypeKind::I32.bit_compatible(TypeKind::Ptr));
        assert!(TypeKind::Ptr.bit_compatible(TypeKind::I64));
        assert!(!TypeKind::Bool.bit_compatible(TypeKind::I32));
    }
}
