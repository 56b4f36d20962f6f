//! Syntax diagnostics.

use thiserror::Error;

use crate::ast::Span;

/// A lexer or parser error with its location.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at {}..{}", span.start, span.end)]
pub struct SyntaxError {
    pub message: String,
    pub span: Span,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }
}
