/// Token-stream navigation helpers.
impl<'a> Parser<'a> {
    // ========================================================================
    // Token navigation
    // ========================================================================

    fn is_at_end(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn peek(&self) -> &'a Token {
        let tokens: &'a [Token] = self.tokens;
        &tokens[self.pos.min(tokens.len() - 1)]
    }

    fn peek_next(&self) -> &'a Token {
        let tokens: &'a [Token] = self.tokens;
        &tokens[(self.pos + 1).min(tokens.len() - 1)]
    }

    fn advance(&mut self) -> &'a Token {
        let token = self.peek();
        if !self.is_at_end() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(kind)
    }

    fn match_token(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    /// Span of the most recently consumed token.
    fn previous_span(&self) -> Span {
        self.tokens[self.pos.saturating_sub(1)].span
    }

    /// Consume the closing bracket of a group opened at `open`, or report it unclosed.
    ///
    /// ## Returns
    /// The end offset of the group.
    fn close_group(&mut self, close: &TokenKind, open: &Token) -> usize {
        if self.match_token(close) {
            self.previous_span().end
        } else {
            self.errors.push(SyntaxError::new(
                format!("Unclosed '{}'", bracket_text(&open.kind)),
                open.span,
            ));
            self.previous_span().end.max(open.span.end)
        }
    }

    /// Report and skip a closing bracket that does not close the current group.
    ///
    /// ## Returns
    /// `true` when a stray bracket was consumed.
    fn skip_stray_close(&mut self, close: Option<&TokenKind>) -> bool {
        let token = self.peek();
        let is_close = matches!(
            token.kind,
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace
        );
        if !is_close || close.is_some_and(|c| self.check(c)) {
            return false;
        }
        self.errors.push(SyntaxError::new(
            format!("Unexpected '{}'", bracket_text(&token.kind)),
            token.span,
        ));
        self.advance();
        true
    }
}

fn bracket_text(kind: &TokenKind) -> &'static str {
    match kind {
        TokenKind::LParen => "(",
        TokenKind::RParen => ")",
        TokenKind::LBracket => "[",
        TokenKind::RBracket => "]",
        TokenKind::LBrace => "{",
        TokenKind::RBrace => "}",
        _ => "?",
    }
}
