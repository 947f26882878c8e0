// Copyright (c) 2025 Johann Kempter and contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # specfold
//!
//! Speculative, context-sensitive constant propagation and liveness analysis
//! for estimating the benefit of inlining call sites and peeling loop
//! iterations, without transforming the analyzed program.
//!
//! ## Overview
//!
//! `specfold` answers the question: *if* a given call were inlined, or a given
//! loop unrolled iteration by iteration, which values would become constant and
//! which blocks would die? It does this by building a tree of **speculation
//! contexts** over an SSA program:
//!
//! ```text
//!                    root (main)
//!                   /           \
//!        inline: f@call1     peel: loop L
//!              |             /    |     \
//!        inline: g@call3  iter0  iter1  iter2 [final]
//! ```
//!
//! Each context carries its own improvement map (what resolved to what), its
//! own block liveness state, and its own dead-value set. The same static
//! instruction can be a known constant in iteration 0 and unresolved in
//! iteration 1; identity is always the pair *(static value, context)*.
//!
//! ## Core pieces
//!
//! - [`ir`] - A compact SSA program representation with loop and def-use
//!   analysis, plus a builder for constructing programs.
//! - [`analysis`] - The context tree, the improvement lattice, the per-context
//!   CFG liveness engine, the value evaluator, use-graph propagation,
//!   dead-value elimination, context-aware code walkers, and the fixpoint
//!   driver.
//!
//! ## Example
//!
//! ```rust,ignore
//! use specfold::{analysis::{FixpointDriver, Speculation}, ir::ProgramBuilder};
//!
//! let program = build_program()?; // via ProgramBuilder
//! let mut spec = Speculation::new(&program);
//! let mut driver = FixpointDriver::new();
//! driver.seed(&mut spec, main_fn)?;
//! driver.run(&mut spec)?;
//! let report = spec.report().unwrap();
//! println!("{} values improved at the root", report.improved_values.len());
//! ```

#![deny(missing_docs)]
#![allow(clippy::result_large_err)]

#[macro_use]
mod error;

pub mod analysis;
pub mod ir;

pub use error::Error;

/// Convenience alias for `Result<T, specfold::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Common imports for working with this library.
pub mod prelude {
    pub use crate::analysis::{
        ContextKind, CtxId, FixpointDriver, IterationStatus, LatticeValue, PeelId, ScopedValue,
        Speculation, WorkItem, WorkQueue,
    };
    pub use crate::ir::{
        BlockId, ConstValue, FuncId, InstrId, LoopId, Op, Operand, Program, ProgramBuilder,
        StaticRef, TypeKind,
    };
    pub use crate::{Error, Result};
}
