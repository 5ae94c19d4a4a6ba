//! Common types used throughout the compiler
//!
//! This module defines data types that are shared across multiple
//! compiler phases: identifier newtypes for IR entities, the fixed-point
//! number model of the target VM, and the operator enumerations shared
//! by the AST and the IR.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of an SSA value / instruction result within a function
pub type ValueId = u32;

/// Identifier of a basic block (its index within the function)
pub type BlockId = u32;

/// Index of a module-global storage slot
pub type GlobalId = u32;

/// Index of a function-local storage slot
pub type LocalId = u32;

/// Scale factor for quantizing float literals to fixed-point integers.
///
/// The target VM has no floating point; float literals in source text are
/// multiplied by this factor and truncated at the frontend boundary.
pub const FIXED_SCALE: i32 = 65535;

/// Quantize a float literal to the VM's fixed-point representation.
pub fn quantize(value: f64) -> i32 {
    (value * FIXED_SCALE as f64) as i32
}

/// Binary arithmetic operators (shared by AST and IR)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    /// Whether the operator is commutative (used for value-number canonicalization)
    pub fn is_commutative(&self) -> bool {
        matches!(self, BinaryOp::Add | BinaryOp::Mul)
    }

    /// Whether evaluating the operator can trap at runtime.
    /// Division and remainder fault on a zero divisor, so they must never
    /// be executed speculatively.
    pub fn can_trap(&self) -> bool {
        matches!(self, BinaryOp::Div | BinaryOp::Mod)
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Mod => "mod",
        };
        write!(f, "{}", s)
    }
}

/// Comparison operators (shared by AST and IR); results are 1 or 0
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    /// Whether operand order is irrelevant
    pub fn is_commutative(&self) -> bool {
        matches!(self, CompareOp::Eq | CompareOp::Ne)
    }

    /// Evaluate the comparison on two integers, producing the VM's 1/0 encoding.
    pub fn eval(&self, lhs: i32, rhs: i32) -> i32 {
        let result = match self {
            CompareOp::Lt => lhs < rhs,
            CompareOp::Gt => lhs > rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Eq => lhs == rhs,
            CompareOp::Ne => lhs != rhs,
        };
        result as i32
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Lt => "lt",
            CompareOp::Gt => "gt",
            CompareOp::Le => "le",
            CompareOp::Ge => "ge",
            CompareOp::Eq => "eq",
            CompareOp::Ne => "ne",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantize_truncates() {
        assert_eq!(quantize(1.0), 65535);
        assert_eq!(quantize(0.5), 32767);
        assert_eq!(quantize(0.0), 0);
    }

    #[test]
    fn test_commutativity() {
        assert!(BinaryOp::Add.is_commutative());
        assert!(BinaryOp::Mul.is_commutative());
        assert!(!BinaryOp::Sub.is_commutative());
        assert!(CompareOp::Eq.is_commutative());
        assert!(!CompareOp::Lt.is_commutative());
    }

    #[test]
    fn test_can_trap() {
        assert!(BinaryOp::Div.can_trap());
        assert!(BinaryOp::Mod.can_trap());
        assert!(!BinaryOp::Add.can_trap());
    }

    #[test]
    fn test_compare_eval() {
        assert_eq!(CompareOp::Lt.eval(1, 2), 1);
        assert_eq!(CompareOp::Lt.eval(2, 1), 0);
        assert_eq!(CompareOp::Eq.eval(3, 3), 1);
        assert_eq!(CompareOp::Ge.eval(3, 3), 1);
    }
}
