//! Call-structure parser for test files
//!
//! Converts a token stream into a [`Program`] whose nodes are calls, member accesses, tagged templates, literals and
//! bracketed groups. Everything else (operators, keywords, declarations) is skipped while still descending into
//! nested brackets, so calls inside callbacks stay reachable.
//!
//! ## Examples
//!
//! ```rust
//! use typetest_syntax::ast::Expr;
//! use typetest_syntax::{lexer, parser};
//!
//! let tokens = lexer::lex("describe.skip('math', () => { it('adds', () => {}) })").unwrap();
//! let program = parser::parse(&tokens).unwrap();
//! assert!(matches!(program.body[0].node, Expr::Call(_)));
//! assert_eq!(program.calls().len(), 2);
//! ```

use crate::ast::*;
use crate::diagnostics::SyntaxError;
use crate::lexer::tokens::{DECLARING_KEYWORDS, NON_CALLEE_KEYWORDS};
use crate::lexer::{Token, TokenKind};

// NOTE: split across files with `include!` so every parser method lives in one module.

include!("parser/core.rs");
include!("parser/helpers.rs");
include!("parser/expr.rs");
include!("parser/api.rs");
include!("parser/tests.rs");
