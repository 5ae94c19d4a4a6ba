//! The Lux VM instruction set
//!
//! A register-frame bytecode: every function executes in a frame of
//! `n_regs` registers and `n_locals` memory slots, with module globals
//! in a shared table. Jump targets are absolute indexes into the one
//! code array shared by all functions.

use luxc_common::{BinaryOp, CompareOp, GlobalId, LocalId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A frame register index
pub type Reg = u32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    /// dst = constant
    Ldc { dst: Reg, value: i32 },

    /// dst = src
    Mov { dst: Reg, src: Reg },

    /// dst = globals[slot]
    Ldg { dst: Reg, slot: GlobalId },

    /// globals[slot] = src
    Stg { slot: GlobalId, src: Reg },

    /// dst = locals[slot]
    Ldl { dst: Reg, slot: LocalId },

    /// locals[slot] = src
    Stl { slot: LocalId, src: Reg },

    /// dst = lhs op rhs (wrapping arithmetic, truncating division)
    Bin {
        op: BinaryOp,
        dst: Reg,
        lhs: Reg,
        rhs: Reg,
    },

    /// dst = lhs op rhs ? 1 : 0
    Cmp {
        op: CompareOp,
        dst: Reg,
        lhs: Reg,
        rhs: Reg,
    },

    /// Unconditional jump
    Jmp { target: usize },

    /// Jump when cond is zero, otherwise fall through
    Jz { cond: Reg, target: usize },

    /// dst = call functions[func](args)
    Call { dst: Reg, func: usize, args: Vec<Reg> },

    /// Return src, or 0 when absent
    Ret { src: Option<Reg> },

    /// Ordering barrier; a runtime no-op, kept in the stream so the
    /// hardware layer can observe store boundaries
    Fence,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Ldc { dst, value } => write!(f, "ldc  r{}, {}", dst, value),
            Op::Mov { dst, src } => write!(f, "mov  r{}, r{}", dst, src),
            Op::Ldg { dst, slot } => write!(f, "ldg  r{}, @{}", dst, slot),
            Op::Stg { slot, src } => write!(f, "stg  @{}, r{}", slot, src),
            Op::Ldl { dst, slot } => write!(f, "ldl  r{}, ${}", dst, slot),
            Op::Stl { slot, src } => write!(f, "stl  ${}, r{}", slot, src),
            Op::Bin { op, dst, lhs, rhs } => write!(f, "{}  r{}, r{}, r{}", op, dst, lhs, rhs),
            Op::Cmp { op, dst, lhs, rhs } => write!(f, "cmp.{}  r{}, r{}, r{}", op, dst, lhs, rhs),
            Op::Jmp { target } => write!(f, "jmp  {}", target),
            Op::Jz { cond, target } => write!(f, "jz   r{}, {}", cond, target),
            Op::Call { dst, func, args } => {
                write!(f, "call r{}, f{}(", dst, func)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "r{}", arg)?;
                }
                write!(f, ")")
            }
            Op::Ret { src: Some(src) } => write!(f, "ret  r{}", src),
            Op::Ret { src: None } => write!(f, "ret"),
            Op::Fence => write!(f, "fence"),
        }
    }
}

/// Table entry describing one compiled function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FuncInfo {
    pub name: String,
    /// Index of the first instruction in the shared code array
    pub entry: usize,
    pub n_params: usize,
    pub n_locals: usize,
    pub n_regs: usize,
}

/// A complete compiled program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub code: Vec<Op>,
    /// Global slot names; the index is the slot id
    pub globals: Vec<String>,
    pub functions: Vec<FuncInfo>,
}

impl Program {
    pub fn function(&self, name: &str) -> Option<(usize, &FuncInfo)> {
        self.functions
            .iter()
            .enumerate()
            .find(|(_, f)| f.name == name)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, name) in self.globals.iter().enumerate() {
            writeln!(f, "global @{} = {}", i, name)?;
        }
        for func in &self.functions {
            writeln!(
                f,
                "\nfn {} (entry {}, {} params, {} locals, {} regs)",
                func.name, func.entry, func.n_params, func.n_locals, func.n_regs
            )?;
            let end = self
                .functions
                .iter()
                .map(|g| g.entry)
                .filter(|&e| e > func.entry)
                .min()
                .unwrap_or(self.code.len());
            for pc in func.entry..end {
                writeln!(f, "{:4}: {}", pc, self.code[pc])?;
            }
        }
        Ok(())
    }
}
