//! Recursive descent parser for the Lux effect-scripting language
//!
//! Parses the token stream into an AST. Suites may be written as an
//! indented block or inline after the colon (`if c: a += 1`), with
//! semicolons separating inline simple statements.

use crate::ast::*;
use crate::lexer::{Token, TokenType};
use luxc_common::{quantize, BinaryOp, CompareOp, CompilerError, SourceLocation, SourceSpan};
use std::collections::VecDeque;

/// Parse a token stream into a program
pub fn parse(tokens: Vec<Token>) -> Result<Program, CompilerError> {
    Parser::new(tokens).parse_program()
}

struct Parser {
    tokens: VecDeque<Token>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens: tokens.into(),
        }
    }

    // --- Token plumbing ---

    fn peek(&self) -> &TokenType {
        self.tokens
            .front()
            .map(|t| &t.token_type)
            .unwrap_or(&TokenType::Eof)
    }

    fn location(&self) -> SourceLocation {
        self.tokens
            .front()
            .map(|t| t.location.clone())
            .unwrap_or_else(SourceLocation::dummy)
    }

    fn advance(&mut self) -> Token {
        self.tokens.pop_front().unwrap_or(Token {
            token_type: TokenType::Eof,
            location: SourceLocation::dummy(),
        })
    }

    fn check(&self, token_type: &TokenType) -> bool {
        self.peek() == token_type
    }

    fn eat(&mut self, token_type: &TokenType) -> bool {
        if self.check(token_type) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token_type: TokenType, expected: &str) -> Result<Token, CompilerError> {
        if self.check(&token_type) {
            Ok(self.advance())
        } else {
            Err(CompilerError::parse(
                format!("expected {}, found {}", expected, self.peek()),
                self.location(),
            ))
        }
    }

    fn expect_identifier(&mut self, expected: &str) -> Result<(String, SourceLocation), CompilerError> {
        match self.peek() {
            TokenType::Identifier(_) => {
                let token = self.advance();
                match token.token_type {
                    TokenType::Identifier(name) => Ok((name, token.location)),
                    _ => unreachable!(),
                }
            }
            other => Err(CompilerError::parse(
                format!("expected {}, found {}", expected, other),
                self.location(),
            )),
        }
    }

    fn skip_newlines(&mut self) {
        while self.check(&TokenType::Newline) {
            self.advance();
        }
    }

    // --- Top level ---

    fn parse_program(&mut self) -> Result<Program, CompilerError> {
        let mut items = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek() {
                TokenType::Eof => break,
                TokenType::Def => items.push(Item::Function(self.parse_function()?)),
                TokenType::Identifier(_) => items.push(self.parse_global_decl()?),
                other => {
                    return Err(CompilerError::parse(
                        format!("expected `def` or a global declaration, found {}", other),
                        self.location(),
                    ));
                }
            }
        }
        Ok(Program { items })
    }

    /// `name = Number()` at module scope
    fn parse_global_decl(&mut self) -> Result<Item, CompilerError> {
        let (name, start) = self.expect_identifier("global name")?;
        self.expect(TokenType::Equal, "`=`")?;
        let (callee, _) = self.expect_identifier("`Number`")?;
        if callee != "Number" {
            return Err(CompilerError::parse(
                format!("module-level statements must be `name = Number()` declarations, found call to `{}`", callee),
                start,
            ));
        }
        self.expect(TokenType::LeftParen, "`(`")?;
        self.expect(TokenType::RightParen, "`)`")?;
        let end = self.location();
        self.expect(TokenType::Newline, "end of line")?;
        Ok(Item::GlobalDecl {
            name,
            span: SourceSpan::new(start, end),
        })
    }

    fn parse_function(&mut self) -> Result<FunctionDef, CompilerError> {
        let def = self.expect(TokenType::Def, "`def`")?;
        let (name, _) = self.expect_identifier("function name")?;
        self.expect(TokenType::LeftParen, "`(`")?;
        let mut params = Vec::new();
        if !self.check(&TokenType::RightParen) {
            loop {
                let (param, _) = self.expect_identifier("parameter name")?;
                params.push(param);
                if !self.eat(&TokenType::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenType::RightParen, "`)`")?;
        let body = self.parse_suite()?;
        let span = SourceSpan::at(def.location);
        Ok(FunctionDef {
            name,
            params,
            body,
            span,
        })
    }

    // --- Statements ---

    /// A suite is either an inline statement list or an indented block.
    fn parse_suite(&mut self) -> Result<Vec<Stmt>, CompilerError> {
        self.expect(TokenType::Colon, "`:`")?;
        if self.eat(&TokenType::Newline) {
            self.expect(TokenType::Indent, "an indented block")?;
            let mut stmts = Vec::new();
            loop {
                self.skip_newlines();
                if self.eat(&TokenType::Dedent) {
                    break;
                }
                if self.check(&TokenType::Eof) {
                    return Err(CompilerError::parse(
                        "unexpected end of file inside block",
                        self.location(),
                    ));
                }
                stmts.push(self.parse_statement()?);
            }
            Ok(stmts)
        } else {
            // Inline suite: simple statements separated by semicolons.
            let mut stmts = vec![self.parse_simple_statement()?];
            while self.eat(&TokenType::Semicolon) {
                if self.check(&TokenType::Newline) {
                    break; // trailing semicolon
                }
                stmts.push(self.parse_simple_statement()?);
            }
            self.expect(TokenType::Newline, "end of line")?;
            Ok(stmts)
        }
    }

    fn parse_statement(&mut self) -> Result<Stmt, CompilerError> {
        match self.peek() {
            TokenType::If => self.parse_if(),
            TokenType::While => self.parse_while(),
            TokenType::For => self.parse_for(),
            _ => {
                let stmt = self.parse_simple_statement()?;
                self.eat(&TokenType::Semicolon);
                self.expect(TokenType::Newline, "end of line")?;
                Ok(stmt)
            }
        }
    }

    fn parse_if(&mut self) -> Result<Stmt, CompilerError> {
        let start = self.expect(TokenType::If, "`if`")?.location;
        let test = self.parse_expression()?;
        let then_body = self.parse_suite()?;
        let mut else_body = Vec::new();
        // `else` appears at the same indentation, on its own line.
        let mut lookahead = 0usize;
        while matches!(
            self.tokens.get(lookahead).map(|t| &t.token_type),
            Some(TokenType::Newline)
        ) {
            lookahead += 1;
        }
        if matches!(
            self.tokens.get(lookahead).map(|t| &t.token_type),
            Some(TokenType::Else)
        ) {
            self.skip_newlines();
            self.advance(); // else
            else_body = self.parse_suite()?;
        }
        Ok(Stmt::If {
            test,
            then_body,
            else_body,
            span: SourceSpan::at(start),
        })
    }

    fn parse_while(&mut self) -> Result<Stmt, CompilerError> {
        let start = self.expect(TokenType::While, "`while`")?.location;
        let test = self.parse_expression()?;
        let body = self.parse_suite()?;
        Ok(Stmt::While {
            test,
            body,
            span: SourceSpan::at(start),
        })
    }

    fn parse_for(&mut self) -> Result<Stmt, CompilerError> {
        let start = self.expect(TokenType::For, "`for`")?.location;
        let (var, _) = self.expect_identifier("loop variable")?;
        self.expect(TokenType::In, "`in`")?;
        let count = self.parse_expression()?;
        let body = self.parse_suite()?;
        Ok(Stmt::For {
            var,
            count,
            body,
            span: SourceSpan::at(start),
        })
    }

    /// Statements that fit on one line: assignment, return, fence, pass,
    /// bare expression.
    fn parse_simple_statement(&mut self) -> Result<Stmt, CompilerError> {
        let location = self.location();
        match self.peek() {
            TokenType::Return => {
                self.advance();
                let value = if self.check(&TokenType::Newline)
                    || self.check(&TokenType::Semicolon)
                    || self.check(&TokenType::Eof)
                {
                    None
                } else {
                    Some(self.parse_expression()?)
                };
                Ok(Stmt::Return {
                    value,
                    span: SourceSpan::at(location),
                })
            }
            TokenType::Pass => {
                self.advance();
                Ok(Stmt::Pass {
                    span: SourceSpan::at(location),
                })
            }
            TokenType::Identifier(_) => {
                // Lookahead one token to distinguish assignment from a
                // bare expression statement.
                match self.tokens.get(1).map(|t| &t.token_type) {
                    Some(TokenType::Equal) => self.parse_assign(),
                    Some(
                        TokenType::PlusEqual
                        | TokenType::MinusEqual
                        | TokenType::StarEqual
                        | TokenType::SlashEqual
                        | TokenType::PercentEqual,
                    ) => self.parse_aug_assign(),
                    _ => self.parse_expr_statement(),
                }
            }
            _ => self.parse_expr_statement(),
        }
    }

    fn parse_assign(&mut self) -> Result<Stmt, CompilerError> {
        let (target, start) = self.expect_identifier("assignment target")?;
        self.expect(TokenType::Equal, "`=`")?;
        let value = self.parse_expression()?;
        // `x = Number()` at function scope declares a zero-initialized
        // local slot.
        let value = match value {
            Expr::Call {
                ref callee, ref args, ref span, ..
            } if callee == "Number" && args.is_empty() => Expr::Int {
                value: 0,
                span: span.clone(),
            },
            other => other,
        };
        Ok(Stmt::Assign {
            target,
            value,
            span: SourceSpan::at(start),
        })
    }

    fn parse_aug_assign(&mut self) -> Result<Stmt, CompilerError> {
        let (target, start) = self.expect_identifier("assignment target")?;
        let op = match self.advance().token_type {
            TokenType::PlusEqual => BinaryOp::Add,
            TokenType::MinusEqual => BinaryOp::Sub,
            TokenType::StarEqual => BinaryOp::Mul,
            TokenType::SlashEqual => BinaryOp::Div,
            TokenType::PercentEqual => BinaryOp::Mod,
            other => {
                return Err(CompilerError::parse(
                    format!("expected augmented assignment operator, found {}", other),
                    start,
                ));
            }
        };
        let value = self.parse_expression()?;
        Ok(Stmt::AugAssign {
            target,
            op,
            value,
            span: SourceSpan::at(start),
        })
    }

    fn parse_expr_statement(&mut self) -> Result<Stmt, CompilerError> {
        let location = self.location();
        let expr = self.parse_expression()?;
        // `fence()` is a statement of its own in the IR.
        if let Expr::Call { callee, args, .. } = &expr {
            if callee == "fence" && args.is_empty() {
                return Ok(Stmt::Fence {
                    span: SourceSpan::at(location),
                });
            }
        }
        Ok(Stmt::Expr {
            expr,
            span: SourceSpan::at(location),
        })
    }

    // --- Expressions ---

    fn parse_expression(&mut self) -> Result<Expr, CompilerError> {
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, CompilerError> {
        let lhs = self.parse_arith()?;
        let op = match self.peek() {
            TokenType::Less => CompareOp::Lt,
            TokenType::Greater => CompareOp::Gt,
            TokenType::LessEqual => CompareOp::Le,
            TokenType::GreaterEqual => CompareOp::Ge,
            TokenType::EqualEqual => CompareOp::Eq,
            TokenType::BangEqual => CompareOp::Ne,
            _ => return Ok(lhs),
        };
        let location = self.advance().location;
        let rhs = self.parse_arith()?;
        Ok(Expr::Compare {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            span: SourceSpan::at(location),
        })
    }

    fn parse_arith(&mut self) -> Result<Expr, CompilerError> {
        let mut lhs = self.parse_term()?;
        loop {
            let op = match self.peek() {
                TokenType::Plus => BinaryOp::Add,
                TokenType::Minus => BinaryOp::Sub,
                _ => break,
            };
            let location = self.advance().location;
            let rhs = self.parse_term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span: SourceSpan::at(location),
            };
        }
        Ok(lhs)
    }

    fn parse_term(&mut self) -> Result<Expr, CompilerError> {
        let mut lhs = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                TokenType::Star => BinaryOp::Mul,
                TokenType::Slash => BinaryOp::Div,
                TokenType::Percent => BinaryOp::Mod,
                _ => break,
            };
            let location = self.advance().location;
            let rhs = self.parse_factor()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
                span: SourceSpan::at(location),
            };
        }
        Ok(lhs)
    }

    fn parse_factor(&mut self) -> Result<Expr, CompilerError> {
        if self.check(&TokenType::Minus) {
            let location = self.advance().location;
            let operand = self.parse_factor()?;
            // Negation lowers to `0 - x`; the IR has no unary operator.
            if let Expr::Int { value, span } = operand {
                return Ok(Expr::Int {
                    value: value.wrapping_neg(),
                    span,
                });
            }
            let span = SourceSpan::at(location);
            return Ok(Expr::Binary {
                op: BinaryOp::Sub,
                lhs: Box::new(Expr::Int {
                    value: 0,
                    span: span.clone(),
                }),
                rhs: Box::new(operand),
                span,
            });
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<Expr, CompilerError> {
        let location = self.location();
        match self.peek().clone() {
            TokenType::IntLiteral(value) => {
                self.advance();
                Ok(Expr::Int {
                    value,
                    span: SourceSpan::at(location),
                })
            }
            TokenType::FloatLiteral(value) => {
                self.advance();
                // Floats are quantized to the VM's fixed-point scale here,
                // at the frontend boundary. Everything downstream is i32.
                Ok(Expr::Int {
                    value: quantize(value),
                    span: SourceSpan::at(location),
                })
            }
            TokenType::Identifier(name) => {
                self.advance();
                if self.eat(&TokenType::LeftParen) {
                    let mut args = Vec::new();
                    if !self.check(&TokenType::RightParen) {
                        loop {
                            args.push(self.parse_expression()?);
                            if !self.eat(&TokenType::Comma) {
                                break;
                            }
                        }
                    }
                    self.expect(TokenType::RightParen, "`)`")?;
                    Ok(Expr::Call {
                        callee: name,
                        args,
                        span: SourceSpan::at(location),
                    })
                } else {
                    Ok(Expr::Name {
                        name,
                        span: SourceSpan::at(location),
                    })
                }
            }
            TokenType::LeftParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(TokenType::RightParen, "`)`")?;
                Ok(expr)
            }
            other => Err(CompilerError::parse(
                format!("expected an expression, found {}", other),
                location,
            )),
        }
    }
}
