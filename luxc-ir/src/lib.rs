//! Lux Compiler Intermediate Representation
//!
//! This crate is the middle end of the compiler: construction of a
//! control-flow graph IR from the AST, CFG analyses (dominators, natural
//! loops), and the optimization pipeline (SSA construction, global
//! value numbering, loop-invariant code motion, and load/store
//! scheduling). The passes after SSA construction are individually
//! toggle-able through [`passes::PassConfig`]; any subset must preserve
//! the program's observable global-state behavior.

pub mod analysis;
pub mod ir;
pub mod lowering;
pub mod passes;

pub use ir::{BasicBlock, Function, Instruction, Module, Terminator, Value};
pub use lowering::lower_program;
pub use passes::{run_pipeline, PassConfig};
