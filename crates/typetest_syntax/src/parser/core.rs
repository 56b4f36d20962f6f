/// Parser core type and entrypoint.
///
/// ## Notes
/// - This file is `include!`'d into `crate::parser`.
/// - The parser never gives up on a file: stray closing brackets are reported and skipped, unclosed ones are
///   reported at their opener, and parsing continues so every problem surfaces in one pass.
pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    errors: Vec<SyntaxError>,
}

impl<'a> Parser<'a> {
    /// Create a new parser for a token stream.
    ///
    /// ## Parameters
    /// - `tokens`: Token stream produced by `typetest_syntax::lexer`, terminated by `Eof`.
    pub fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            errors: Vec::new(),
        }
    }

    /// Parse the entire token stream into a [`Program`].
    ///
    /// ## Errors
    /// Returns every [`SyntaxError`] found. Bracket mismatches are the only syntax this parser rejects.
    pub fn parse(mut self) -> Result<Program, Vec<SyntaxError>> {
        let Some(last) = self.tokens.last() else {
            return Ok(Program {
                body: Vec::new(),
                span: Span::default(),
            });
        };
        let span = Span::new(0, last.span.end);

        let body = self.sequence(None);

        if self.errors.is_empty() {
            Ok(Program { body, span })
        } else {
            Err(self.errors)
        }
    }
}
