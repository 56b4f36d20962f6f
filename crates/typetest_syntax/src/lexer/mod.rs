//! Lexer for ECMAScript/TypeScript test files
//!
//! Handles tokenization including:
//! - Identifiers (including `$`, `_`, `#private` and Unicode letters)
//! - String, template and numeric literals
//! - Regular expression literals (disambiguated from division by the previous token)
//! - Line and block comments (skipped)
//! - Structural punctuation; every other operator becomes an opaque `Operator` token
//!
//! ## Module Structure
//!
//! - `tokens` - Token types (TokenKind, Token, TemplateToken)
//! - `strings` - String/template/regex scanning and escape processing

mod strings;
pub mod tokens;

pub use tokens::{TemplateToken, Token, TokenKind};

use crate::ast::Span;
use crate::diagnostics::SyntaxError;
use tokens::REGEX_PREFIX_KEYWORDS;

/// Lexer for test-file source code.
///
/// Converts source text into a stream of tokens whose spans are byte offsets into the source.
pub struct Lexer<'a> {
    source: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
    current_pos: usize,
    tokens: Vec<Token>,
    errors: Vec<SyntaxError>,
}

impl<'a> Lexer<'a> {
    /// Create a new lexer for the given source code.
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
            current_pos: 0,
            tokens: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Tokenize the entire source code.
    ///
    /// Returns a vector of tokens on success, or a vector of errors on failure.
    /// The token stream always ends with an `Eof` token.
    pub fn tokenize(mut self) -> Result<Vec<Token>, Vec<SyntaxError>> {
        self.skip_hashbang();

        while !self.is_at_end() {
            self.scan_token();
        }

        let end = self.source.len();
        self.tokens.push(Token::new(TokenKind::Eof, Span::new(end, end)));

        if self.errors.is_empty() {
            Ok(self.tokens)
        } else {
            Err(self.errors)
        }
    }

    // ========================================================================
    // Core character handling
    // ========================================================================

    fn is_at_end(&mut self) -> bool {
        self.chars.peek().is_none()
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().map(|(_, c)| *c)
    }

    fn peek_next(&self) -> Option<char> {
        let mut iter = self.source[self.current_pos..].chars();
        iter.next();
        iter.next()
    }

    fn advance(&mut self) -> Option<char> {
        if let Some((pos, c)) = self.chars.next() {
            self.current_pos = pos + c.len_utf8();
            Some(c)
        } else {
            None
        }
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        self.tokens.push(Token::new(kind, Span::new(start, self.current_pos)));
    }

    fn error(&mut self, message: &str, start: usize) {
        self.errors
            .push(SyntaxError::new(message, Span::new(start, self.current_pos)));
    }

    // ========================================================================
    // Main scanning dispatch
    // ========================================================================

    fn scan_token(&mut self) {
        let start = self.current_pos;

        let Some(c) = self.advance() else {
            return;
        };

        match c {
            c if c.is_whitespace() => {}

            '/' => self.scan_slash(start),
            '\'' | '"' => self.scan_string(c, start),
            '`' => self.scan_template(start),

            '(' => self.push(TokenKind::LParen, start),
            ')' => self.push(TokenKind::RParen, start),
            '[' => self.push(TokenKind::LBracket, start),
            ']' => self.push(TokenKind::RBracket, start),
            '{' => self.push(TokenKind::LBrace, start),
            '}' => self.push(TokenKind::RBrace, start),
            ',' => self.push(TokenKind::Comma, start),
            ';' => self.push(TokenKind::Semicolon, start),

            '.' => {
                if self.peek().is_some_and(|n| n.is_ascii_digit()) {
                    self.scan_number(start);
                } else if self.peek() == Some('.') && self.peek_next() == Some('.') {
                    self.advance();
                    self.advance();
                    self.push(TokenKind::Operator("...".to_string()), start);
                } else {
                    self.push(TokenKind::Dot, start);
                }
            }
            '?' => {
                // `a?.b` is optional chaining, `a ?.5 : 1` is a ternary.
                if self.peek() == Some('.') && !self.peek_next().is_some_and(|n| n.is_ascii_digit()) {
                    self.advance();
                    self.push(TokenKind::QuestionDot, start);
                } else {
                    self.push(TokenKind::Operator("?".to_string()), start);
                }
            }
            '=' => {
                if self.match_char('>') {
                    self.push(TokenKind::FatArrow, start);
                } else {
                    self.push(TokenKind::Operator("=".to_string()), start);
                }
            }
            '#' if self.peek().is_some_and(is_ident_start) => self.scan_ident(start),

            c if c.is_ascii_digit() => self.scan_number(start),
            c if is_ident_start(c) => self.scan_ident(start),

            other => self.push(TokenKind::Operator(other.to_string()), start),
        }
    }

    fn skip_hashbang(&mut self) {
        if self.source.starts_with("#!") {
            while let Some(c) = self.peek() {
                if c == '\n' {
                    break;
                }
                self.advance();
            }
        }
    }

    fn scan_slash(&mut self, start: usize) {
        if self.match_char('/') {
            while let Some(c) = self.peek() {
                if c == '\n' {
                    break;
                }
                self.advance();
            }
        } else if self.match_char('*') {
            if !self.skip_block_comment() {
                self.error("Unterminated block comment", start);
            }
        } else if self.regex_allowed() {
            self.scan_regex(start);
        } else if self.match_char('=') {
            self.push(TokenKind::Operator("/=".to_string()), start);
        } else {
            self.push(TokenKind::Operator("/".to_string()), start);
        }
    }

    /// Consume a block comment body after `/*`. Returns `false` at EOF.
    fn skip_block_comment(&mut self) -> bool {
        while let Some(c) = self.advance() {
            if c == '*' && self.match_char('/') {
                return true;
            }
        }
        false
    }

    /// A `/` starts a regex when the previous token cannot end an expression.
    fn regex_allowed(&self) -> bool {
        match self.tokens.last().map(|t| &t.kind) {
            None => true,
            Some(TokenKind::Ident(word)) => REGEX_PREFIX_KEYWORDS.contains(&word.as_str()),
            Some(
                TokenKind::RParen
                | TokenKind::RBracket
                | TokenKind::RBrace
                | TokenKind::Str(_)
                | TokenKind::Template(_)
                | TokenKind::Number(_)
                | TokenKind::Regex(_),
            ) => false,
            Some(_) => true,
        }
    }

    fn scan_number(&mut self, start: usize) {
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                self.advance();
            } else if (c == '+' || c == '-')
                && self.source[..self.current_pos].ends_with(['e', 'E'])
                && !self.source[start..].starts_with("0x")
            {
                self.advance();
            } else {
                break;
            }
        }
        let raw = self.source[start..self.current_pos].to_string();
        self.push(TokenKind::Number(raw), start);
    }

    fn scan_ident(&mut self, start: usize) {
        while let Some(c) = self.peek() {
            if is_ident_continue(c) {
                self.advance();
            } else {
                break;
            }
        }
        let name = self.source[start..self.current_pos].to_string();
        self.push(TokenKind::Ident(name), start);
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$' || c == '\u{200c}' || c == '\u{200d}'
}

/// Tokenize source code.
///
/// ## Errors
/// Returns every unterminated string/template/comment/regex found in the source.
#[tracing::instrument(skip_all, fields(source_len = source.len()))]
pub fn lex(source: &str) -> Result<Vec<Token>, Vec<SyntaxError>> {
    Lexer::new(source).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_call_tokens_and_spans() {
        let tokens = lex("test('a', fn)").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Ident("test".to_string()));
        assert_eq!(tokens[0].span, Span::new(0, 4));
        assert_eq!(tokens[2].kind, TokenKind::Str("a".to_string()));
        assert_eq!(tokens[2].span, Span::new(5, 8));
        assert_eq!(tokens.last().unwrap().kind, TokenKind::Eof);
    }

    #[test]
    fn test_comments_are_skipped() {
        let k = kinds("// test('x')\n/* describe('y') */ it");
        assert_eq!(k, vec![TokenKind::Ident("it".to_string()), TokenKind::Eof]);
    }

    #[test]
    fn test_regex_vs_division() {
        let k = kinds("a / b");
        assert_eq!(k[1], TokenKind::Operator("/".to_string()));

        let k = kinds("x = /it\\('/g");
        assert_eq!(k[2], TokenKind::Regex("/it\\('/g".to_string()));
    }

    #[test]
    fn test_template_with_substitution_has_no_cooked_text() {
        let k = kinds("`a ${ {b: `c`} } d`");
        match &k[0] {
            TokenKind::Template(t) => {
                assert!(t.cooked.is_none());
                assert_eq!(t.raw, "a ${ {b: `c`} } d");
            }
            other => panic!("expected template, got {other:?}"),
        }
    }

    #[test]
    fn test_string_escapes() {
        let k = kinds(r#"'it\'s' "tab\there" '\u{41}\x42'"#);
        assert_eq!(k[0], TokenKind::Str("it's".to_string()));
        assert_eq!(k[1], TokenKind::Str("tab\there".to_string()));
        assert_eq!(k[2], TokenKind::Str("AB".to_string()));
    }

    #[test]
    fn test_optional_chaining_vs_ternary() {
        let k = kinds("a?.b");
        assert_eq!(k[1], TokenKind::QuestionDot);
        let k = kinds("a?.5:1");
        assert_eq!(k[1], TokenKind::Operator("?".to_string()));
    }

    #[test]
    fn test_unterminated_string_is_an_error() {
        let errs = lex("test('oops)\n").unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].message.contains("Unterminated string"));
    }

    #[test]
    fn test_multibyte_offsets() {
        let tokens = lex("'é' x").unwrap();
        assert_eq!(tokens[0].span, Span::new(0, 4));
        assert_eq!(tokens[1].span, Span::new(5, 6));
    }
}
