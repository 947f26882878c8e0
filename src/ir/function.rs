//! Programs, functions and basic blocks.
//!
//! [`Program`] is the arena owning every function, block and instruction,
//! together with the derived structures the analysis needs: predecessor
//! lists, the loop forest and the static def-use index. Programs are built
//! through [`ProgramBuilder`](crate::ir::ProgramBuilder) and immutable
//! afterwards, so derived structures never go stale.

use crate::ir::{
    loops::LoopForest, uses::UseIndex, BlockId, FuncId, InstrId, Instruction, LoopId, LoopInfo,
    Op, StaticRef, TypeKind,
};

/// A formal function parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    /// Parameter name, for diagnostics.
    pub name: String,
    /// Parameter type.
    pub ty: TypeKind,
}

/// A function definition.
#[derive(Debug, Clone)]
pub struct Function {
    /// This function's id.
    pub id: FuncId,
    /// Function name.
    pub name: String,
    /// Formal parameters.
    pub params: Vec<Param>,
    /// Declared return type.
    pub ret_ty: TypeKind,
    /// Whether the function takes a variable number of arguments.
    pub variadic: bool,
    /// The entry block (the first block added).
    pub entry: BlockId,
    /// All blocks, in creation order.
    pub blocks: Vec<BlockId>,
}

/// A basic block: a straight-line instruction sequence ending in a terminator.
#[derive(Debug, Clone)]
pub struct Block {
    /// This block's id.
    pub id: BlockId,
    /// The containing function.
    pub func: FuncId,
    /// Instructions in order; the last one is the terminator.
    pub instrs: Vec<InstrId>,
}

/// An immutable whole-program arena with derived analyses.
#[derive(Debug)]
pub struct Program {
    pub(crate) functions: Vec<Function>,
    pub(crate) blocks: Vec<Block>,
    pub(crate) instrs: Vec<Instruction>,
    /// Predecessor lists, indexed by block.
    pub(crate) preds: Vec<Vec<BlockId>>,
    pub(crate) loops: LoopForest,
    pub(crate) uses: UseIndex,
}

impl Program {
    /// Looks up a function by id.
    #[must_use]
    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.0]
    }

    /// All functions.
    pub fn functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.iter()
    }

    /// Looks up a block by id.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0]
    }

    /// Looks up an instruction by id.
    #[must_use]
    pub fn instr(&self, id: InstrId) -> &Instruction {
        &self.instrs[id.0]
    }

    /// The declared type of a static reference.
    #[must_use]
    pub fn type_of(&self, value: StaticRef) -> TypeKind {
        match value {
            StaticRef::Instruction(i) => self.instrs[i.0].ty,
            StaticRef::Argument(f, idx) => self.functions[f.0].params[idx as usize].ty,
        }
    }

    /// The block's terminator instruction.
    #[must_use]
    pub fn terminator(&self, block: BlockId) -> &Instruction {
        let last = self.blocks[block.0]
            .instrs
            .last()
            .copied()
            .unwrap_or(InstrId(0));
        &self.instrs[last.0]
    }

    /// Control-flow predecessors of a block.
    #[must_use]
    pub fn predecessors(&self, block: BlockId) -> &[BlockId] {
        &self.preds[block.0]
    }

    /// Control-flow successors of a block.
    #[must_use]
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.terminator(block).successors()
    }

    /// The innermost loop containing a block, if any.
    #[must_use]
    pub fn loop_of(&self, block: BlockId) -> Option<LoopId> {
        self.loops.loop_of(block)
    }

    /// Looks up a loop by id.
    #[must_use]
    pub fn loop_info(&self, id: LoopId) -> &LoopInfo {
        self.loops.info(id)
    }

    /// The loop scope an edge executes in: the scope of its source block.
    ///
    /// A latch or interior edge is scoped to its loop; an exit edge is scoped
    /// to the loop being exited; the preheader to header edge is scoped to the
    /// surrounding scope, since the preheader sits outside the loop.
    #[must_use]
    pub fn edge_scope(&self, from: BlockId, _to: BlockId) -> Option<LoopId> {
        self.loop_of(from)
    }

    /// Whether scope `outer` contains scope `inner`, where `None` is the
    /// function top level and contains everything.
    #[must_use]
    pub fn scope_contains(&self, outer: Option<LoopId>, inner: Option<LoopId>) -> bool {
        let Some(outer) = outer else { return true };
        let mut cursor = inner;
        while let Some(l) = cursor {
            if l == outer {
                return true;
            }
            cursor = self.loops.info(l).parent;
        }
        false
    }

    /// The child of `ancestor` on the nesting path down to `descendant`.
    ///
    /// Returns `descendant` itself when it is an immediate child of
    /// `ancestor`, and `None` when `descendant` is not nested inside
    /// `ancestor` at all.
    #[must_use]
    pub fn immediate_child_scope(
        &self,
        ancestor: Option<LoopId>,
        descendant: LoopId,
    ) -> Option<LoopId> {
        let mut cursor = descendant;
        loop {
            let parent = self.loops.info(cursor).parent;
            if parent == ancestor {
                return Some(cursor);
            }
            cursor = parent?;
        }
    }

    /// Static users of a value: every instruction with an operand naming it.
    #[must_use]
    pub fn users_of(&self, value: StaticRef) -> &[InstrId] {
        self.uses.users_of(value)
    }

    /// All loads in `func` whose block sits exactly at loop scope `scope`.
    #[must_use]
    pub fn loads_in_scope(&self, func: FuncId, scope: Option<LoopId>) -> Vec<InstrId> {
        let mut out = Vec::new();
        for &block in &self.functions[func.0].blocks {
            if self.loop_of(block) != scope {
                continue;
            }
            for &instr in &self.blocks[block.0].instrs {
                if matches!(self.instrs[instr.0].op, Op::Load { .. }) {
                    out.push(instr);
                }
            }
        }
        out
    }

    /// The index of an instruction within its block.
    #[must_use]
    pub fn position_in_block(&self, instr: InstrId) -> usize {
        let block = self.instrs[instr.0].block;
        self.blocks[block.0]
            .instrs
            .iter()
            .position(|&i| i == instr)
            .unwrap_or(0)
    }
}
