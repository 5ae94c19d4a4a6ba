//! Lexer for the Lux effect-scripting language
//!
//! Tokenizes source text into a stream of tokens. Block structure is
//! significant indentation in the Python style: the lexer emits
//! `Indent`/`Dedent` tokens by comparing each logical line's leading
//! spaces against an indent stack, and a `Newline` token at the end of
//! every logical line.

use luxc_common::{CompilerError, SourceLocation};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Token types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TokenType {
    // Literals
    IntLiteral(i32),
    FloatLiteral(f64),

    // Identifiers and keywords
    Identifier(String),
    Def,
    If,
    Else,
    While,
    For,
    In,
    Return,
    Pass,

    // Operators
    Plus,         // +
    Minus,        // -
    Star,         // *
    Slash,        // /
    Percent,      // %
    Equal,        // =
    Less,         // <
    Greater,      // >
    LessEqual,    // <=
    GreaterEqual, // >=
    EqualEqual,   // ==
    BangEqual,    // !=

    // Augmented assignment
    PlusEqual,    // +=
    MinusEqual,   // -=
    StarEqual,    // *=
    SlashEqual,   // /=
    PercentEqual, // %=

    // Delimiters
    LeftParen,  // (
    RightParen, // )
    Comma,      // ,
    Colon,      // :
    Semicolon,  // ;

    // Layout
    Newline,
    Indent,
    Dedent,
    Eof,
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::IntLiteral(v) => write!(f, "integer `{}`", v),
            TokenType::FloatLiteral(v) => write!(f, "float `{}`", v),
            TokenType::Identifier(name) => write!(f, "identifier `{}`", name),
            TokenType::Def => write!(f, "`def`"),
            TokenType::If => write!(f, "`if`"),
            TokenType::Else => write!(f, "`else`"),
            TokenType::While => write!(f, "`while`"),
            TokenType::For => write!(f, "`for`"),
            TokenType::In => write!(f, "`in`"),
            TokenType::Return => write!(f, "`return`"),
            TokenType::Pass => write!(f, "`pass`"),
            TokenType::Plus => write!(f, "`+`"),
            TokenType::Minus => write!(f, "`-`"),
            TokenType::Star => write!(f, "`*`"),
            TokenType::Slash => write!(f, "`/`"),
            TokenType::Percent => write!(f, "`%`"),
            TokenType::Equal => write!(f, "`=`"),
            TokenType::Less => write!(f, "`<`"),
            TokenType::Greater => write!(f, "`>`"),
            TokenType::LessEqual => write!(f, "`<=`"),
            TokenType::GreaterEqual => write!(f, "`>=`"),
            TokenType::EqualEqual => write!(f, "`==`"),
            TokenType::BangEqual => write!(f, "`!=`"),
            TokenType::PlusEqual => write!(f, "`+=`"),
            TokenType::MinusEqual => write!(f, "`-=`"),
            TokenType::StarEqual => write!(f, "`*=`"),
            TokenType::SlashEqual => write!(f, "`/=`"),
            TokenType::PercentEqual => write!(f, "`%=`"),
            TokenType::LeftParen => write!(f, "`(`"),
            TokenType::RightParen => write!(f, "`)`"),
            TokenType::Comma => write!(f, "`,`"),
            TokenType::Colon => write!(f, "`:`"),
            TokenType::Semicolon => write!(f, "`;`"),
            TokenType::Newline => write!(f, "newline"),
            TokenType::Indent => write!(f, "indent"),
            TokenType::Dedent => write!(f, "dedent"),
            TokenType::Eof => write!(f, "end of file"),
        }
    }
}

/// A token with its source location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub token_type: TokenType,
    pub location: SourceLocation,
}

impl Token {
    fn new(token_type: TokenType, location: SourceLocation) -> Self {
        Self {
            token_type,
            location,
        }
    }
}

/// Tokenize a complete source string
pub fn tokenize(source: &str, filename: &str) -> Result<Vec<Token>, CompilerError> {
    let mut tokens = Vec::new();
    let mut indent_stack: Vec<usize> = vec![0];
    let mut line_no: u32 = 0;
    let mut last_location = SourceLocation::new(filename, 1, 1);

    for line in source.lines() {
        line_no += 1;

        // Leading indentation. Tabs are rejected to keep block structure
        // unambiguous on mixed editors.
        let mut indent = 0usize;
        let mut chars = line.char_indices().peekable();
        while let Some(&(_, c)) = chars.peek() {
            match c {
                ' ' => {
                    indent += 1;
                    chars.next();
                }
                '\t' => {
                    return Err(CompilerError::lex(
                        "tab character in indentation; use spaces",
                        SourceLocation::new(filename, line_no, (indent + 1) as u32),
                    ));
                }
                _ => break,
            }
        }

        // Blank lines and comment-only lines do not affect indentation.
        let rest: &str = &line[indent..];
        if rest.is_empty() || rest.starts_with('#') {
            continue;
        }

        let line_start = SourceLocation::new(filename, line_no, (indent + 1) as u32);
        adjust_indentation(&mut tokens, &mut indent_stack, indent, &line_start)?;

        tokenize_line(rest, indent, filename, line_no, &mut tokens)?;

        last_location = SourceLocation::new(filename, line_no, (line.len() + 1) as u32);
        tokens.push(Token::new(TokenType::Newline, last_location.clone()));
    }

    // Close any open blocks at end of file.
    while indent_stack.len() > 1 {
        indent_stack.pop();
        tokens.push(Token::new(TokenType::Dedent, last_location.clone()));
    }
    tokens.push(Token::new(TokenType::Eof, last_location));

    Ok(tokens)
}

/// Emit Indent/Dedent tokens for a change in leading whitespace
fn adjust_indentation(
    tokens: &mut Vec<Token>,
    indent_stack: &mut Vec<usize>,
    indent: usize,
    location: &SourceLocation,
) -> Result<(), CompilerError> {
    let current = *indent_stack.last().unwrap_or(&0);
    if indent > current {
        indent_stack.push(indent);
        tokens.push(Token::new(TokenType::Indent, location.clone()));
    } else if indent < current {
        while *indent_stack.last().unwrap_or(&0) > indent {
            indent_stack.pop();
            tokens.push(Token::new(TokenType::Dedent, location.clone()));
        }
        if *indent_stack.last().unwrap_or(&0) != indent {
            return Err(CompilerError::lex(
                "unindent does not match any outer indentation level",
                location.clone(),
            ));
        }
    }
    Ok(())
}

/// Tokenize the content of one line (after its indentation)
fn tokenize_line(
    rest: &str,
    indent: usize,
    filename: &str,
    line_no: u32,
    tokens: &mut Vec<Token>,
) -> Result<(), CompilerError> {
    let chars: Vec<char> = rest.chars().collect();
    let mut pos = 0usize;

    while pos < chars.len() {
        let c = chars[pos];
        let column = (indent + pos + 1) as u32;
        let location = SourceLocation::new(filename, line_no, column);

        match c {
            ' ' => {
                pos += 1;
            }
            '#' => break, // comment to end of line
            '0'..='9' => {
                let start = pos;
                while pos < chars.len() && chars[pos].is_ascii_digit() {
                    pos += 1;
                }
                let mut is_float = false;
                if pos < chars.len()
                    && chars[pos] == '.'
                    && pos + 1 < chars.len()
                    && chars[pos + 1].is_ascii_digit()
                {
                    is_float = true;
                    pos += 1;
                    while pos < chars.len() && chars[pos].is_ascii_digit() {
                        pos += 1;
                    }
                }
                let text: String = chars[start..pos].iter().collect();
                let token_type = if is_float {
                    let value = text.parse::<f64>().map_err(|_| {
                        CompilerError::lex(format!("invalid float literal `{}`", text), location.clone())
                    })?;
                    TokenType::FloatLiteral(value)
                } else {
                    let value = text.parse::<i32>().map_err(|_| {
                        CompilerError::lex(
                            format!("integer literal `{}` out of range", text),
                            location.clone(),
                        )
                    })?;
                    TokenType::IntLiteral(value)
                };
                tokens.push(Token::new(token_type, location));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = pos;
                while pos < chars.len() && (chars[pos].is_ascii_alphanumeric() || chars[pos] == '_')
                {
                    pos += 1;
                }
                let text: String = chars[start..pos].iter().collect();
                let token_type = match text.as_str() {
                    "def" => TokenType::Def,
                    "if" => TokenType::If,
                    "else" => TokenType::Else,
                    "while" => TokenType::While,
                    "for" => TokenType::For,
                    "in" => TokenType::In,
                    "return" => TokenType::Return,
                    "pass" => TokenType::Pass,
                    _ => TokenType::Identifier(text),
                };
                tokens.push(Token::new(token_type, location));
            }
            _ => {
                let next = chars.get(pos + 1).copied();
                let (token_type, width) = match (c, next) {
                    ('+', Some('=')) => (TokenType::PlusEqual, 2),
                    ('-', Some('=')) => (TokenType::MinusEqual, 2),
                    ('*', Some('=')) => (TokenType::StarEqual, 2),
                    ('/', Some('=')) => (TokenType::SlashEqual, 2),
                    ('%', Some('=')) => (TokenType::PercentEqual, 2),
                    ('=', Some('=')) => (TokenType::EqualEqual, 2),
                    ('!', Some('=')) => (TokenType::BangEqual, 2),
                    ('<', Some('=')) => (TokenType::LessEqual, 2),
                    ('>', Some('=')) => (TokenType::GreaterEqual, 2),
                    ('+', _) => (TokenType::Plus, 1),
                    ('-', _) => (TokenType::Minus, 1),
                    ('*', _) => (TokenType::Star, 1),
                    ('/', _) => (TokenType::Slash, 1),
                    ('%', _) => (TokenType::Percent, 1),
                    ('=', _) => (TokenType::Equal, 1),
                    ('<', _) => (TokenType::Less, 1),
                    ('>', _) => (TokenType::Greater, 1),
                    ('(', _) => (TokenType::LeftParen, 1),
                    (')', _) => (TokenType::RightParen, 1),
                    (',', _) => (TokenType::Comma, 1),
                    (':', _) => (TokenType::Colon, 1),
                    (';', _) => (TokenType::Semicolon, 1),
                    _ => {
                        return Err(CompilerError::lex(
                            format!("unexpected character `{}`", c),
                            location,
                        ));
                    }
                };
                tokens.push(Token::new(token_type, location));
                pos += width;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn types(source: &str) -> Vec<TokenType> {
        tokenize(source, "<test>")
            .unwrap()
            .into_iter()
            .map(|t| t.token_type)
            .collect()
    }

    #[test]
    fn test_simple_line() {
        assert_eq!(
            types("a += 1"),
            vec![
                TokenType::Identifier("a".to_string()),
                TokenType::PlusEqual,
                TokenType::IntLiteral(1),
                TokenType::Newline,
                TokenType::Eof,
            ]
        );
    }

    #[test]
    fn test_indent_dedent() {
        let tokens = types("if a:\n    a += 1\nb = 2");
        assert!(tokens.contains(&TokenType::Indent));
        assert!(tokens.contains(&TokenType::Dedent));
        // Dedent comes before the `b` identifier
        let dedent_pos = tokens.iter().position(|t| *t == TokenType::Dedent).unwrap();
        let b_pos = tokens
            .iter()
            .position(|t| *t == TokenType::Identifier("b".to_string()))
            .unwrap();
        assert!(dedent_pos < b_pos);
    }

    #[test]
    fn test_dedent_at_eof() {
        let tokens = types("if a:\n    if b:\n        c = 1");
        let dedents = tokens.iter().filter(|t| **t == TokenType::Dedent).count();
        assert_eq!(dedents, 2);
        assert_eq!(tokens.last(), Some(&TokenType::Eof));
    }

    #[test]
    fn test_blank_and_comment_lines_ignored() {
        let tokens = types("a = 1\n\n# comment\na = 2");
        assert!(!tokens.contains(&TokenType::Indent));
        assert!(!tokens.contains(&TokenType::Dedent));
    }

    #[test]
    fn test_float_literal() {
        let tokens = types("x = 0.5");
        assert!(tokens.contains(&TokenType::FloatLiteral(0.5)));
    }

    #[test]
    fn test_compare_operators() {
        let tokens = types("a < b <= c == d != e >= f > g");
        assert!(tokens.contains(&TokenType::Less));
        assert!(tokens.contains(&TokenType::LessEqual));
        assert!(tokens.contains(&TokenType::EqualEqual));
        assert!(tokens.contains(&TokenType::BangEqual));
        assert!(tokens.contains(&TokenType::GreaterEqual));
        assert!(tokens.contains(&TokenType::Greater));
    }

    #[test]
    fn test_bad_unindent() {
        let err = tokenize("if a:\n    b = 1\n  c = 2", "<test>").unwrap_err();
        assert!(matches!(err, CompilerError::Lex { .. }));
    }

    #[test]
    fn test_tab_rejected() {
        let err = tokenize("if a:\n\tb = 1", "<test>").unwrap_err();
        assert!(matches!(err, CompilerError::Lex { .. }));
    }
}
