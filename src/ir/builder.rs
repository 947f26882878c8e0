//! Incremental program construction.
//!
//! [`ProgramBuilder`] wires functions, blocks and instructions together and
//! finalizes them into an immutable [`Program`], computing predecessor lists,
//! the loop forest and the def-use index in one pass. Well-formedness is
//! checked at [`ProgramBuilder::finish`]: every function needs at least one
//! block and every block a terminator in final position.

use crate::ir::{
    loops::LoopForest, uses::UseIndex, Block, BlockId, FuncId, Function, InstrId, Instruction, Op,
    Operand, Param, Program, TypeKind,
};
use crate::Result;

/// Builds a [`Program`] piece by piece.
///
/// The first block added to a function becomes its entry.
#[derive(Debug, Default)]
pub struct ProgramBuilder {
    functions: Vec<Function>,
    blocks: Vec<Block>,
    instrs: Vec<Instruction>,
}

impl ProgramBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a function with the given parameters and return type.
    pub fn function(&mut self, name: &str, params: &[(&str, TypeKind)], ret_ty: TypeKind) -> FuncId {
        let id = FuncId(self.functions.len());
        self.functions.push(Function {
            id,
            name: name.to_string(),
            params: params
                .iter()
                .map(|(name, ty)| Param {
                    name: (*name).to_string(),
                    ty: *ty,
                })
                .collect(),
            ret_ty,
            variadic: false,
            // Patched when the first block is added.
            entry: BlockId(0),
            blocks: Vec::new(),
        });
        id
    }

    /// Marks a function as variadic. Variadic callees are never inlined.
    pub fn set_variadic(&mut self, func: FuncId) {
        self.functions[func.0].variadic = true;
    }

    /// Adds a block to a function. The function's first block is its entry.
    pub fn block(&mut self, func: FuncId) -> BlockId {
        let id = BlockId(self.blocks.len());
        self.blocks.push(Block {
            id,
            func,
            instrs: Vec::new(),
        });
        let function = &mut self.functions[func.0];
        if function.blocks.is_empty() {
            function.entry = id;
        }
        function.blocks.push(id);
        id
    }

    /// Appends an instruction to a block and returns its id.
    pub fn push(&mut self, block: BlockId, ty: TypeKind, op: Op) -> InstrId {
        let id = InstrId(self.instrs.len());
        self.instrs.push(Instruction { id, block, ty, op });
        self.blocks[block.0].instrs.push(id);
        id
    }

    /// Appends an incoming (predecessor, operand) pair to a phi. Back-edge
    /// operands reference instructions created after the phi, so they are
    /// patched in rather than written up front.
    pub fn add_phi_incoming(&mut self, phi: InstrId, pred: BlockId, operand: Operand) {
        if let Op::Phi { incoming } = &mut self.instrs[phi.0].op {
            incoming.push((pred, operand));
        }
    }

    /// Finalizes the program: validates well-formedness and computes the
    /// derived predecessor lists, loop forest and def-use index.
    ///
    /// # Errors
    /// Returns [`Error::InvalidIr`](crate::Error::InvalidIr) when a function
    /// has no blocks, a block has no terminator, or a terminator appears
    /// before the end of a block.
    pub fn finish(self) -> Result<Program> {
        for function in &self.functions {
            if function.blocks.is_empty() {
                return Err(crate::Error::InvalidIr(format!(
                    "function '{}' has no blocks",
                    function.name
                )));
            }
        }
        for block in &self.blocks {
            match block.instrs.last() {
                Some(&last) if self.instrs[last.0].is_terminator() => {}
                _ => {
                    return Err(crate::Error::InvalidIr(format!(
                        "block {} has no terminator",
                        block.id
                    )))
                }
            }
            for &instr in &block.instrs[..block.instrs.len() - 1] {
                if self.instrs[instr.0].is_terminator() {
                    return Err(crate::Error::InvalidIr(format!(
                        "terminator {} is not last in block {}",
                        instr, block.id
                    )));
                }
            }
        }

        let mut preds: Vec<Vec<BlockId>> = vec![Vec::new(); self.blocks.len()];
        for block in &self.blocks {
            if let Some(&last) = block.instrs.last() {
                for target in self.instrs[last.0].successors() {
                    if target.0 >= self.blocks.len() {
                        return Err(crate::Error::InvalidIr(format!(
                            "block {} branches to missing block {}",
                            block.id, target
                        )));
                    }
                    preds[target.0].push(block.id);
                }
            }
        }

        let function_shapes: Vec<(FuncId, BlockId, Vec<BlockId>)> = self
            .functions
            .iter()
            .map(|f| (f.id, f.entry, f.blocks.clone()))
            .collect();
        let blocks = &self.blocks;
        let instrs = &self.instrs;
        let loops = LoopForest::compute(
            blocks.len(),
            &function_shapes,
            |block| {
                blocks[block.0]
                    .instrs
                    .last()
                    .map(|&last| instrs[last.0].successors())
                    .unwrap_or_default()
            },
            &preds,
        );
        let uses = UseIndex::build(&self.instrs);

        Ok(Program {
            functions: self.functions,
            blocks: self.blocks,
            instrs: self.instrs,
            preds,
            loops,
            uses,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Operand;

    #[test]
    fn test_missing_terminator_rejected() {
        let mut b = ProgramBuilder::new();
        let f = b.function("f", &[], TypeKind::Void);
        let entry = b.block(f);
        b.push(entry, TypeKind::Ptr, Op::Alloca);
        let err = b.finish().unwrap_err();
        assert!(err.to_string().contains("no terminator"));
    }

    #[test]
    fn test_empty_function_rejected() {
        let mut b = ProgramBuilder::new();
        b.function("f", &[], TypeKind::Void);
        let err = b.finish().unwrap_err();
        assert!(err.to_string().contains("has no blocks"));
    }

    #[test]
    fn test_preds_and_entry() {
        let mut b = ProgramBuilder::new();
        let f = b.function("f", &[("x", TypeKind::I32)], TypeKind::Void);
        let entry = b.block(f);
        let exit = b.block(f);
        b.push(entry, TypeKind::Void, Op::Jump { target: exit });
        b.push(exit, TypeKind::Void, Op::Return { value: None });
        let program = b.finish().unwrap();
        assert_eq!(program.function(f).entry, entry);
        assert_eq!(program.predecessors(exit), &[entry]);
        assert_eq!(program.successors(entry), vec![exit]);
        let _ = Operand::arg(f, 0);
    }
}
