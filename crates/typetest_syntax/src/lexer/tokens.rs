//! Token types for the test-file lexer.
//!
//! ## Notes
//! - Only punctuation that shapes call structure gets its own variant; every other operator is carried as
//!   [`TokenKind::Operator`] with its spelling.

use crate::ast::Span;

/// Kind of token produced by the lexer.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // ========== Identifiers and Literals ==========
    Ident(String),
    Str(String),
    Template(TemplateToken),
    Number(String),
    Regex(String),

    // ========== Structural punctuation ==========
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Semicolon,
    Dot,
    QuestionDot,
    FatArrow,

    // ========== Everything else ==========
    Operator(String),
    Eof,
}

/// A lexed template literal.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateToken {
    /// Escape-processed text; `None` when the template contains `${...}`.
    pub cooked: Option<String>,
    pub raw: String,
}

/// A token with its kind and source span.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    /// Construct a new token.
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// Words after which a `/` starts a regular expression rather than a division.
pub const REGEX_PREFIX_KEYWORDS: &[&str] = &[
    "return",
    "typeof",
    "instanceof",
    "in",
    "of",
    "new",
    "delete",
    "void",
    "throw",
    "case",
    "do",
    "else",
    "yield",
    "await",
];

/// Keywords that are never the callee of a call, even when followed by `(`.
pub const NON_CALLEE_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "function", "return", "typeof", "void", "delete", "throw", "case", "else",
    "do", "with", "in", "of", "instanceof", "yield", "await", "async", "class", "extends", "const", "let", "var",
    "new", "export", "default",
];

/// Keywords whose following identifier is a declared name, not an expression.
pub const DECLARING_KEYWORDS: &[&str] = &["function", "class"];
