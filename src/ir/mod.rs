//! A compact SSA program representation.
//!
//! The analysis operates over this IR: arena-allocated functions, blocks and
//! instructions addressed by index newtypes, with loop structure and a static
//! def-use index derived at build time. Programs are constructed through
//! [`ProgramBuilder`] and immutable once finished.

mod builder;
mod consts;
mod function;
mod instruction;
mod loops;
mod uses;

pub use builder::ProgramBuilder;
pub use consts::{BinOp, CmpPred, ConstValue};
pub use function::{Block, Function, Param, Program};
pub use instruction::{
    BlockId, Callee, FuncId, InstrId, Instruction, LoopId, Op, Operand, StaticRef, TypeKind,
};
pub use loops::LoopInfo;
