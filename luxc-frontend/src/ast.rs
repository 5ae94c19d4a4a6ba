//! Abstract Syntax Tree definitions for the Lux effect-scripting language
//!
//! The AST is built by the parser and consumed by the IR builder. Node
//! kinds form a closed set; the IR builder dispatches over them with a
//! total match, so adding a node kind here is a compile-time
//! exhaustiveness failure in the lowering table rather than a silent
//! default branch.

use luxc_common::{BinaryOp, CompareOp, SourceSpan};
use serde::{Deserialize, Serialize};

/// A complete source module: global declarations plus function definitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub items: Vec<Item>,
}

impl Program {
    /// Iterate over the names of declared module globals, in declaration order
    pub fn globals(&self) -> impl Iterator<Item = &str> {
        self.items.iter().filter_map(|item| match item {
            Item::GlobalDecl { name, .. } => Some(name.as_str()),
            Item::Function(_) => None,
        })
    }

    /// Iterate over function definitions, in source order
    pub fn functions(&self) -> impl Iterator<Item = &FunctionDef> {
        self.items.iter().filter_map(|item| match item {
            Item::Function(func) => Some(func),
            Item::GlobalDecl { .. } => None,
        })
    }
}

/// A top-level item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Item {
    /// `name = Number()` at module scope: declares a 32-bit fixed-point
    /// global, zero-initialized, owned by the module for the program's
    /// lifetime.
    GlobalDecl { name: String, span: SourceSpan },

    /// `def name(params): body`
    Function(FunctionDef),
}

/// A function definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
    pub span: SourceSpan,
}

/// Statements
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Stmt {
    /// `target = value` (also produced for `x = Number()` at function
    /// scope, with `value` rewritten to the literal 0)
    Assign {
        target: String,
        value: Expr,
        span: SourceSpan,
    },

    /// `target op= value`
    AugAssign {
        target: String,
        op: BinaryOp,
        value: Expr,
        span: SourceSpan,
    },

    /// `if test: then_body [else: else_body]`
    If {
        test: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
        span: SourceSpan,
    },

    /// `while test: body`
    While {
        test: Expr,
        body: Vec<Stmt>,
        span: SourceSpan,
    },

    /// `for var in count: body`, where `var` counts 0..count
    For {
        var: String,
        count: Expr,
        body: Vec<Stmt>,
        span: SourceSpan,
    },

    /// `return [value]`
    Return {
        value: Option<Expr>,
        span: SourceSpan,
    },

    /// `fence()`: explicit ordering barrier for hardware-visible stores
    Fence { span: SourceSpan },

    /// A bare expression evaluated for its side effects (calls)
    Expr { expr: Expr, span: SourceSpan },

    /// `pass`
    Pass { span: SourceSpan },
}

/// Expressions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// Integer literal (float literals are quantized to fixed-point by
    /// the parser and arrive here as integers)
    Int { value: i32, span: SourceSpan },

    /// Variable reference (parameter, local, or module global)
    Name { name: String, span: SourceSpan },

    /// Arithmetic: `lhs op rhs`
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: SourceSpan,
    },

    /// Comparison: `lhs op rhs`, yielding 1 or 0
    Compare {
        op: CompareOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: SourceSpan,
    },

    /// Call of another script function
    Call {
        callee: String,
        args: Vec<Expr>,
        span: SourceSpan,
    },
}

impl Expr {
    pub fn span(&self) -> &SourceSpan {
        match self {
            Expr::Int { span, .. }
            | Expr::Name { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Compare { span, .. }
            | Expr::Call { span, .. } => span,
        }
    }
}
