//! String, template and regex literal scanning.

use super::Lexer;
use super::tokens::{TemplateToken, TokenKind};

/// The literal ran off the end of its line or of the file.
struct Unterminated;

impl<'a> Lexer<'a> {
    pub(super) fn scan_string(&mut self, quote: char, start: usize) {
        match self.read_string(quote) {
            Ok(value) => self.push(TokenKind::Str(value), start),
            Err(Unterminated) => self.error("Unterminated string literal", start),
        }
    }

    pub(super) fn scan_template(&mut self, start: usize) {
        match self.read_template() {
            Ok(template) => self.push(TokenKind::Template(template), start),
            Err(Unterminated) => self.error("Unterminated template literal", start),
        }
    }

    pub(super) fn scan_regex(&mut self, start: usize) {
        let mut in_class = false;
        loop {
            match self.advance() {
                None | Some('\n') | Some('\r') => {
                    self.error("Unterminated regular expression", start);
                    return;
                }
                Some('\\') => {
                    self.advance();
                }
                Some('[') => in_class = true,
                Some(']') => in_class = false,
                Some('/') if !in_class => break,
                Some(_) => {}
            }
        }
        while self.peek().is_some_and(|c| c.is_ascii_alphanumeric()) {
            self.advance();
        }
        let literal = self.source[start..self.current_pos].to_string();
        self.push(TokenKind::Regex(literal), start);
    }

    // ========================================================================
    // Literal bodies
    // ========================================================================

    /// Read a quoted string after its opening quote.
    fn read_string(&mut self, quote: char) -> Result<String, Unterminated> {
        let mut value = String::new();
        loop {
            match self.advance() {
                None | Some('\n') | Some('\r') => return Err(Unterminated),
                Some(c) if c == quote => return Ok(value),
                Some('\\') => self.read_escape(&mut value),
                Some(c) => value.push(c),
            }
        }
    }

    /// Read a template literal after its opening backtick.
    fn read_template(&mut self) -> Result<TemplateToken, Unterminated> {
        let content_start = self.current_pos;
        let mut cooked = String::new();
        let mut has_substitution = false;
        loop {
            match self.advance() {
                None => return Err(Unterminated),
                Some('`') => break,
                Some('\\') => self.read_escape(&mut cooked),
                Some('$') if self.peek() == Some('{') => {
                    self.advance();
                    has_substitution = true;
                    self.skip_substitution()?;
                }
                Some(c) => cooked.push(c),
            }
        }
        // The closing backtick is one byte.
        let raw = self.source[content_start..self.current_pos - 1].to_string();
        Ok(TemplateToken {
            cooked: (!has_substitution).then_some(cooked),
            raw,
        })
    }

    /// Skip a `${ ... }` body, including nested braces, strings, templates and comments.
    fn skip_substitution(&mut self) -> Result<(), Unterminated> {
        let mut depth = 1usize;
        while let Some(c) = self.advance() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                '\'' | '"' => {
                    self.read_string(c)?;
                }
                '`' => {
                    self.read_template()?;
                }
                '/' if self.peek() == Some('/') => {
                    while self.peek().is_some_and(|n| n != '\n') {
                        self.advance();
                    }
                }
                '/' if self.peek() == Some('*') => {
                    self.advance();
                    if !self.skip_block_comment() {
                        return Err(Unterminated);
                    }
                }
                _ => {}
            }
        }
        Err(Unterminated)
    }

    // ========================================================================
    // Escapes
    // ========================================================================

    fn read_escape(&mut self, out: &mut String) {
        let Some(c) = self.advance() else {
            return;
        };
        match c {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            'v' => out.push('\u{b}'),
            '0' if !self.peek().is_some_and(|n| n.is_ascii_digit()) => out.push('\0'),
            'x' => match self.read_hex_digits(2) {
                Some(code) => out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER)),
                None => out.push('x'),
            },
            'u' => self.read_unicode_escape(out),
            // Line continuations contribute nothing.
            '\r' => {
                self.match_char('\n');
            }
            '\n' | '\u{2028}' | '\u{2029}' => {}
            other => out.push(other),
        }
    }

    fn read_unicode_escape(&mut self, out: &mut String) {
        let code = if self.match_char('{') {
            let code = self.read_hex_digits(6);
            if !self.match_char('}') {
                out.push(char::REPLACEMENT_CHARACTER);
                return;
            }
            code
        } else {
            self.read_hex_digits(4)
        };
        let Some(code) = code else {
            out.push('u');
            return;
        };

        // High surrogate followed by `\uXXXX` low surrogate.
        if (0xD800..0xDC00).contains(&code) && self.source[self.current_pos..].starts_with("\\u") {
            let low = u32::from_str_radix(self.source.get(self.current_pos + 2..self.current_pos + 6).unwrap_or(""), 16);
            if let Ok(low @ 0xDC00..=0xDFFF) = low {
                for _ in 0..6 {
                    self.advance();
                }
                let combined = 0x10000 + ((code - 0xD800) << 10) + (low - 0xDC00);
                out.push(char::from_u32(combined).unwrap_or(char::REPLACEMENT_CHARACTER));
                return;
            }
        }
        out.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
    }

    /// Read up to `max` hex digits. Returns `None` when none were present.
    fn read_hex_digits(&mut self, max: usize) -> Option<u32> {
        let mut value = 0u32;
        let mut count = 0;
        while count < max {
            match self.peek().and_then(|c| c.to_digit(16)) {
                Some(digit) => {
                    self.advance();
                    value = value * 16 + digit;
                    count += 1;
                }
                None => break,
            }
        }
        (count > 0).then_some(value)
    }
}
