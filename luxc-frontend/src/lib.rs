//! Lux Effect-Script Frontend
//!
//! Turns source text into an AST: an indentation-aware lexer followed by
//! a recursive descent parser. The language is a restricted imperative
//! scripting language for authoring real-time lighting and animation
//! effects: scalar fixed-point integers, `if`/`else`, `while`, bounded
//! `for x in N` loops, function calls, and an explicit `fence()` barrier
//! marking hardware-visible side effects.

pub mod ast;
pub mod lexer;
pub mod parser;

use luxc_common::CompilerError;

/// Convenience entry point: tokenize and parse a source string.
pub fn parse_source(source: &str, filename: &str) -> Result<ast::Program, CompilerError> {
    let tokens = lexer::tokenize(source, filename)?;
    let program = parser::parse(tokens)?;
    log::debug!(
        "parsed `{}`: {} globals, {} functions",
        filename,
        program.globals().count(),
        program.functions().count()
    );
    Ok(program)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_source_smoke() {
        let program = parse_source("a = Number()\n\ndef init(param):\n    a += 1\n", "<test>")
            .expect("program should parse");
        assert_eq!(program.globals().count(), 1);
        assert_eq!(program.functions().count(), 1);
    }
}
