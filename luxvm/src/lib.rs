//! Lux Virtual Machine
//!
//! A small register-frame interpreter for the bytecode produced by
//! `luxc-codegen`. Each call gets a frame of registers and local slots;
//! module globals live in one shared table for the life of the VM, the
//! way the hardware runtime keeps effect state across frames.
//!
//! The VM counts executed global loads and stores. The compiler's whole
//! contract is that optimization never changes the values in the global
//! table, while `fence` limits how far stores can be coalesced; the
//! counters make both ends of that contract observable in tests.
//!
//! Register and slot indexes inside the code array are trusted: the
//! bytecode comes from our own code generator. Everything that depends
//! on runtime values (division, call arity, jump targets, recursion
//! depth) is checked.

use luxc_codegen::{Op, Program};
use luxc_common::BinaryOp;
use std::collections::BTreeMap;
use thiserror::Error;

const MAX_CALL_DEPTH: usize = 64;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("unknown function `{0}`")]
    UnknownFunction(String),

    #[error("function `{function}` takes {expected} arguments, got {got}")]
    ArityMismatch {
        function: String,
        expected: usize,
        got: usize,
    },

    #[error("division by zero")]
    DivideByZero,

    #[error("call depth exceeded ({MAX_CALL_DEPTH})")]
    CallDepthExceeded,

    #[error("jump or fall-through to invalid code index {0}")]
    InvalidTarget(usize),
}

pub struct Vm {
    program: Program,
    globals: Vec<i32>,
    loads: u64,
    stores: u64,
}

impl Vm {
    pub fn new(program: Program) -> Self {
        let globals = vec![0; program.globals.len()];
        Self {
            program,
            globals,
            loads: 0,
            stores: 0,
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Call a function by name
    pub fn run(&mut self, name: &str, args: &[i32]) -> Result<i32, VmError> {
        let (index, _) = self
            .program
            .function(name)
            .ok_or_else(|| VmError::UnknownFunction(name.to_string()))?;
        log::debug!("vm: calling `{}`({:?})", name, args);
        self.call(index, args.to_vec(), 0)
    }

    /// Snapshot of the global table by name
    pub fn dump_globals(&self) -> BTreeMap<String, i32> {
        self.program
            .globals
            .iter()
            .cloned()
            .zip(self.globals.iter().copied())
            .collect()
    }

    pub fn global(&self, name: &str) -> Option<i32> {
        let index = self.program.globals.iter().position(|g| g == name)?;
        Some(self.globals[index])
    }

    /// Executed global loads since construction
    pub fn loads_executed(&self) -> u64 {
        self.loads
    }

    /// Executed global stores since construction
    pub fn stores_executed(&self) -> u64 {
        self.stores
    }

    fn call(&mut self, index: usize, args: Vec<i32>, depth: usize) -> Result<i32, VmError> {
        if depth >= MAX_CALL_DEPTH {
            return Err(VmError::CallDepthExceeded);
        }
        let info = &self.program.functions[index];
        if args.len() != info.n_params {
            return Err(VmError::ArityMismatch {
                function: info.name.clone(),
                expected: info.n_params,
                got: args.len(),
            });
        }

        let mut regs = vec![0i32; info.n_regs];
        regs[..args.len()].copy_from_slice(&args);
        let mut locals = vec![0i32; info.n_locals];
        let mut pc = info.entry;

        loop {
            let op = self
                .program
                .code
                .get(pc)
                .cloned()
                .ok_or(VmError::InvalidTarget(pc))?;
            pc += 1;
            match op {
                Op::Ldc { dst, value } => regs[dst as usize] = value,
                Op::Mov { dst, src } => regs[dst as usize] = regs[src as usize],
                Op::Ldg { dst, slot } => {
                    regs[dst as usize] = self.globals[slot as usize];
                    self.loads += 1;
                }
                Op::Stg { slot, src } => {
                    self.globals[slot as usize] = regs[src as usize];
                    self.stores += 1;
                }
                Op::Ldl { dst, slot } => regs[dst as usize] = locals[slot as usize],
                Op::Stl { slot, src } => locals[slot as usize] = regs[src as usize],
                Op::Bin { op, dst, lhs, rhs } => {
                    let lhs = regs[lhs as usize];
                    let rhs = regs[rhs as usize];
                    regs[dst as usize] = match op {
                        BinaryOp::Add => lhs.wrapping_add(rhs),
                        BinaryOp::Sub => lhs.wrapping_sub(rhs),
                        BinaryOp::Mul => lhs.wrapping_mul(rhs),
                        BinaryOp::Div => {
                            if rhs == 0 {
                                return Err(VmError::DivideByZero);
                            }
                            lhs.wrapping_div(rhs)
                        }
                        BinaryOp::Mod => {
                            if rhs == 0 {
                                return Err(VmError::DivideByZero);
                            }
                            lhs.wrapping_rem(rhs)
                        }
                    };
                }
                Op::Cmp { op, dst, lhs, rhs } => {
                    regs[dst as usize] = op.eval(regs[lhs as usize], regs[rhs as usize]);
                }
                Op::Jmp { target } => pc = target,
                Op::Jz { cond, target } => {
                    if regs[cond as usize] == 0 {
                        pc = target;
                    }
                }
                Op::Call { dst, func, args } => {
                    let values: Vec<i32> = args.iter().map(|&r| regs[r as usize]).collect();
                    regs[dst as usize] = self.call(func, values, depth + 1)?;
                }
                Op::Ret { src } => {
                    return Ok(match src {
                        Some(src) => regs[src as usize],
                        None => 0,
                    });
                }
                Op::Fence => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luxc_codegen::FuncInfo;
    use luxc_common::CompareOp;
    use pretty_assertions::assert_eq;

    fn one_function(name: &str, n_params: usize, n_regs: usize, code: Vec<Op>) -> Program {
        Program {
            code,
            globals: vec!["a".to_string()],
            functions: vec![FuncInfo {
                name: name.to_string(),
                entry: 0,
                n_params,
                n_locals: n_params,
                n_regs,
            }],
        }
    }

    #[test]
    fn test_arithmetic_and_return() {
        let program = one_function(
            "init",
            1,
            3,
            vec![
                Op::Ldc { dst: 1, value: 4 },
                Op::Bin {
                    op: BinaryOp::Mul,
                    dst: 2,
                    lhs: 0,
                    rhs: 1,
                },
                Op::Ret { src: Some(2) },
            ],
        );
        let mut vm = Vm::new(program);
        assert_eq!(vm.run("init", &[5]), Ok(20));
    }

    #[test]
    fn test_global_store_and_dump() {
        let program = one_function(
            "init",
            0,
            1,
            vec![
                Op::Ldc { dst: 0, value: 9 },
                Op::Stg { slot: 0, src: 0 },
                Op::Ret { src: None },
            ],
        );
        let mut vm = Vm::new(program);
        vm.run("init", &[]).unwrap();
        assert_eq!(vm.global("a"), Some(9));
        assert_eq!(vm.dump_globals().get("a"), Some(&9));
        assert_eq!(vm.stores_executed(), 1);
    }

    #[test]
    fn test_loop_with_conditional_jump() {
        // count r0 down from 5, accumulating into r1
        let program = one_function(
            "init",
            1,
            4,
            vec![
                Op::Ldc { dst: 1, value: 0 },  // 0: acc = 0
                Op::Ldc { dst: 2, value: 0 },  // 1: zero
                Op::Cmp {
                    op: CompareOp::Gt,
                    dst: 3,
                    lhs: 0,
                    rhs: 2,
                }, // 2: p > 0
                Op::Jz { cond: 3, target: 8 }, // 3: exit
                Op::Bin {
                    op: BinaryOp::Add,
                    dst: 1,
                    lhs: 1,
                    rhs: 0,
                }, // 4: acc += p
                Op::Ldc { dst: 2, value: 1 },  // 5
                Op::Bin {
                    op: BinaryOp::Sub,
                    dst: 0,
                    lhs: 0,
                    rhs: 2,
                }, // 6: p -= 1
                Op::Jmp { target: 1 },         // 7
                Op::Ret { src: Some(1) },      // 8
            ],
        );
        let mut vm = Vm::new(program);
        assert_eq!(vm.run("init", &[5]), Ok(15));
    }

    #[test]
    fn test_division_by_zero() {
        let program = one_function(
            "init",
            1,
            3,
            vec![
                Op::Ldc { dst: 1, value: 0 },
                Op::Bin {
                    op: BinaryOp::Div,
                    dst: 2,
                    lhs: 0,
                    rhs: 1,
                },
                Op::Ret { src: Some(2) },
            ],
        );
        let mut vm = Vm::new(program);
        assert_eq!(vm.run("init", &[7]), Err(VmError::DivideByZero));
    }

    #[test]
    fn test_unknown_function_and_arity() {
        let program = one_function("init", 1, 1, vec![Op::Ret { src: None }]);
        let mut vm = Vm::new(program);
        assert_eq!(
            vm.run("missing", &[]),
            Err(VmError::UnknownFunction("missing".to_string()))
        );
        assert_eq!(
            vm.run("init", &[1, 2]),
            Err(VmError::ArityMismatch {
                function: "init".to_string(),
                expected: 1,
                got: 2,
            })
        );
    }

    #[test]
    fn test_call_depth_limit() {
        // init() calls itself forever
        let program = one_function(
            "init",
            0,
            1,
            vec![
                Op::Call {
                    dst: 0,
                    func: 0,
                    args: vec![],
                },
                Op::Ret { src: Some(0) },
            ],
        );
        let mut vm = Vm::new(program);
        assert_eq!(vm.run("init", &[]), Err(VmError::CallDepthExceeded));
    }

    #[test]
    fn test_wrapping_arithmetic() {
        let program = one_function(
            "init",
            1,
            3,
            vec![
                Op::Ldc { dst: 1, value: 1 },
                Op::Bin {
                    op: BinaryOp::Add,
                    dst: 2,
                    lhs: 0,
                    rhs: 1,
                },
                Op::Ret { src: Some(2) },
            ],
        );
        let mut vm = Vm::new(program);
        assert_eq!(vm.run("init", &[i32::MAX]), Ok(i32::MIN));
    }

    #[test]
    fn test_fence_is_a_runtime_noop() {
        let program = one_function(
            "init",
            0,
            1,
            vec![
                Op::Ldc { dst: 0, value: 1 },
                Op::Stg { slot: 0, src: 0 },
                Op::Fence,
                Op::Ldc { dst: 0, value: 2 },
                Op::Stg { slot: 0, src: 0 },
                Op::Ret { src: None },
            ],
        );
        let mut vm = Vm::new(program);
        vm.run("init", &[]).unwrap();
        assert_eq!(vm.global("a"), Some(2));
        assert_eq!(vm.stores_executed(), 2);
    }
}
