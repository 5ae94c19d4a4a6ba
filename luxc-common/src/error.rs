//! Error handling for the Lux effect-script compiler
//!
//! All phases report through a single `CompilerError` enum. Errors are
//! local to the function being compiled; a failure in one function never
//! corrupts the IR of another.

use crate::source_loc::SourceLocation;
use thiserror::Error;

/// Main compiler error type that encompasses all phases of compilation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompilerError {
    #[error("Lexical error at {location}: {message}")]
    Lex {
        location: SourceLocation,
        message: String,
    },

    #[error("Parse error at {location}: {message}")]
    Parse {
        location: SourceLocation,
        message: String,
    },

    /// An AST node kind with no lowering rule. Fatal for the containing
    /// function; the construct is reported rather than guessed at.
    #[error("Unsupported construct in function `{function}`: {construct}")]
    UnsupportedConstruct { function: String, construct: String },

    /// A local variable read before any definition reaches the use.
    #[error("Undefined variable `{name}` in function `{function}`")]
    UndefinedVariable { function: String, name: String },

    /// A loop whose structure cannot be analyzed. Passes fall back to
    /// leaving such loops untouched; this error is only surfaced when a
    /// caller asks for strict diagnostics.
    #[error("Invalid loop form in function `{function}`: {message}")]
    InvalidLoopForm { function: String, message: String },

    /// A pass detected its own precondition broken. Never expected on
    /// correct input; carries a full IR dump for debugging.
    #[error("Internal invariant violation: {message}\n--- IR dump ---\n{ir_dump}")]
    InternalInvariantViolation { message: String, ir_dump: String },

    #[error("IO error: {message}")]
    Io { message: String },
}

impl CompilerError {
    pub fn lex(message: impl Into<String>, location: SourceLocation) -> Self {
        CompilerError::Lex {
            location,
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>, location: SourceLocation) -> Self {
        CompilerError::Parse {
            location,
            message: message.into(),
        }
    }

    pub fn unsupported(function: impl Into<String>, construct: impl Into<String>) -> Self {
        CompilerError::UnsupportedConstruct {
            function: function.into(),
            construct: construct.into(),
        }
    }

    pub fn undefined(function: impl Into<String>, name: impl Into<String>) -> Self {
        CompilerError::UndefinedVariable {
            function: function.into(),
            name: name.into(),
        }
    }

    pub fn invalid_loop(function: impl Into<String>, message: impl Into<String>) -> Self {
        CompilerError::InvalidLoopForm {
            function: function.into(),
            message: message.into(),
        }
    }

    pub fn invariant(message: impl Into<String>, ir_dump: impl Into<String>) -> Self {
        CompilerError::InternalInvariantViolation {
            message: message.into(),
            ir_dump: ir_dump.into(),
        }
    }
}

impl From<std::io::Error> for CompilerError {
    fn from(err: std::io::Error) -> Self {
        CompilerError::Io {
            message: err.to_string(),
        }
    }
}
