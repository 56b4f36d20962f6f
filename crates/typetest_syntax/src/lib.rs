//! Syntax frontend for test files: lexer, call-structure parser, AST, diagnostics.
//!
//! This crate is dependency-light and intended to serve as the default AST-parse service of the typetest engine. It
//! recovers exactly the structure static test collection needs (identifiers, member access, calls, tagged templates,
//! parenthesised sequences and literals), each with its byte range in the source.
//!
//! ## Notes
//! - This crate is intentionally “syntax-only”: it does not resolve names, evaluate code, or type-check.
//! - Anything outside call structure (operators, keywords, declarations) is kept as opaque tokens or nested blocks
//!   so calls inside callbacks are still reachable.
//!
//! ## Examples
//! ```rust
//! use typetest_syntax::{lexer, parser};
//!
//! let tokens = lexer::lex("test('adds', () => {})").unwrap();
//! let program = parser::parse(&tokens).unwrap();
//! assert_eq!(program.body.len(), 1);
//! ```

pub mod ast;
pub mod diagnostics;
pub mod lexer;
pub mod parser;

pub use diagnostics::SyntaxError;

/// Lex and parse `source` in one step.
///
/// ## Errors
/// Returns every lexer error if lexing fails, otherwise every parser error.
pub fn parse_source(source: &str) -> Result<ast::Program, Vec<SyntaxError>> {
    let tokens = lexer::lex(source)?;
    parser::parse(&tokens)
}
