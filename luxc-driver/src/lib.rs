//! Lux compiler driver
//!
//! Library entry points tying the pipeline together: source text →
//! AST → IR → optimization passes → bytecode program. The `luxc`
//! binary and the cross-pass equivalence tests both go through here.

use luxc_codegen::Program;
use luxc_common::CompilerError;
use luxc_ir::{Module, PassConfig};
use std::path::Path;

/// Compile source text down to IR, running the configured passes
pub fn compile_to_ir(
    source: &str,
    filename: &str,
    config: &PassConfig,
) -> Result<Module, CompilerError> {
    let program = luxc_frontend::parse_source(source, filename)?;
    let mut module = luxc_ir::lower_program(&program)?;
    luxc_ir::run_pipeline(&mut module, config)?;
    log::debug!(
        "compiled `{}`: {} functions, passes {}",
        filename,
        module.functions.len(),
        config
    );
    Ok(module)
}

/// Compile source text all the way to a bytecode program
pub fn compile_source(
    source: &str,
    filename: &str,
    config: &PassConfig,
) -> Result<Program, CompilerError> {
    let module = compile_to_ir(source, filename, config)?;
    luxc_codegen::generate(&module)
}

/// Compile a source file to a bytecode program
pub fn compile_file(path: &Path, config: &PassConfig) -> Result<Program, CompilerError> {
    let source = std::fs::read_to_string(path)?;
    let filename = path.to_string_lossy();
    compile_source(&source, &filename, config)
}
