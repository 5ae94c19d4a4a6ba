//! Lux Bytecode Generation
//!
//! Flattens the optimized CFG IR into a single linear bytecode stream
//! for the Lux VM: a register-frame instruction set, one shared code
//! array, and a function table with entry offsets and frame sizes.

pub mod generation;
pub mod ops;

pub use generation::generate;
pub use ops::{FuncInfo, Op, Program, Reg};
