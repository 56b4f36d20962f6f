/// Expression parsing: sequences, comma-separated elements, primaries and postfix chains.
impl<'a> Parser<'a> {
    // ========================================================================
    // Sequences
    // ========================================================================

    /// Parse items until `close` (not consumed) or end of input. Separators and opaque tokens are dropped.
    fn sequence(&mut self, close: Option<&TokenKind>) -> Vec<Spanned<Expr>> {
        let mut items = Vec::new();
        while !self.is_at_end() && !close.is_some_and(|c| self.check(c)) {
            if self.skip_stray_close(close) {
                continue;
            }
            if let Some(item) = self.item() {
                items.push(item);
            }
        }
        items
    }

    /// Parse comma-separated elements until `close` (not consumed).
    ///
    /// ## Notes
    /// - An element made of several items (e.g. `async () => {}`) becomes one [`Expr::Compound`].
    /// - An element with no structure at all (e.g. `-`) becomes [`Expr::Opaque`].
    /// - Empty elements (trailing commas, holes) are dropped.
    fn elements(&mut self, close: &TokenKind) -> Vec<Spanned<Expr>> {
        let mut out = Vec::new();
        loop {
            let start = self.pos;
            let mut items = Vec::new();
            while !self.is_at_end() && !self.check(close) && !self.check(&TokenKind::Comma) {
                if self.skip_stray_close(Some(close)) {
                    continue;
                }
                if let Some(item) = self.item() {
                    items.push(item);
                }
            }
            if self.pos > start {
                let span = self.tokens[start].span.merge(self.previous_span());
                let element = match items.len() {
                    0 => Spanned::new(Expr::Opaque, span),
                    1 => items.remove(0),
                    _ => Spanned::new(Expr::Compound(items), span),
                };
                out.push(element);
            }
            if !self.match_token(&TokenKind::Comma) {
                break;
            }
        }
        out
    }

    // ========================================================================
    // Items
    // ========================================================================

    /// Parse one item, consuming at least one token. Returns `None` for tokens without structure.
    fn item(&mut self) -> Option<Spanned<Expr>> {
        let token = self.peek();
        match &token.kind {
            TokenKind::Ident(name) if DECLARING_KEYWORDS.contains(&name.as_str()) => {
                self.advance();
                // `function it() {}` declares `it`; it is not a reference.
                if matches!(self.peek().kind, TokenKind::Ident(_)) {
                    self.advance();
                }
                None
            }
            TokenKind::Ident(name) if NON_CALLEE_KEYWORDS.contains(&name.as_str()) => {
                self.advance();
                None
            }
            TokenKind::Dot | TokenKind::QuestionDot => {
                // Member access on something that does not chain, e.g. after a block.
                self.advance();
                if matches!(self.peek().kind, TokenKind::Ident(_)) {
                    self.advance();
                }
                None
            }
            TokenKind::Ident(_)
            | TokenKind::Str(_)
            | TokenKind::Template(_)
            | TokenKind::Number(_)
            | TokenKind::Regex(_)
            | TokenKind::LParen
            | TokenKind::LBracket => {
                let primary = self.primary();
                let expr = self.postfix(primary);
                Some(self.method_definition(expr))
            }
            TokenKind::LBrace => Some(self.block()),
            TokenKind::Eof => None,
            _ => {
                self.advance();
                None
            }
        }
    }

    fn primary(&mut self) -> Spanned<Expr> {
        let token = self.advance();
        let node = match &token.kind {
            TokenKind::Ident(name) => Expr::Ident(name.clone()),
            TokenKind::Str(value) => Expr::Str(value.clone()),
            TokenKind::Template(template) => Expr::Template(TemplateLit {
                cooked: template.cooked.clone(),
                raw: template.raw.clone(),
            }),
            TokenKind::Number(raw) => Expr::Number(raw.clone()),
            TokenKind::LParen => {
                let items = self.elements(&TokenKind::RParen);
                let end = self.close_group(&TokenKind::RParen, token);
                return Spanned::new(Expr::Paren(items), Span::new(token.span.start, end));
            }
            TokenKind::LBracket => {
                let items = self.elements(&TokenKind::RBracket);
                let end = self.close_group(&TokenKind::RBracket, token);
                return Spanned::new(Expr::Array(items), Span::new(token.span.start, end));
            }
            _ => Expr::Opaque,
        };
        Spanned::new(node, token.span)
    }

    fn block(&mut self) -> Spanned<Expr> {
        let open = self.advance();
        let items = self.sequence(Some(&TokenKind::RBrace));
        let end = self.close_group(&TokenKind::RBrace, open);
        Spanned::new(Expr::Block(items), Span::new(open.span.start, end))
    }

    // ========================================================================
    // Postfix chains
    // ========================================================================

    /// Apply `.name`, `?.name`, `[expr]`, `(args)` and tagged templates to `expr`.
    fn postfix(&mut self, mut expr: Spanned<Expr>) -> Spanned<Expr> {
        loop {
            match &self.peek().kind {
                TokenKind::Dot => {
                    let TokenKind::Ident(name) = &self.peek_next().kind else {
                        break;
                    };
                    self.advance();
                    let name_span = self.advance().span;
                    expr = member(expr, MemberProp::Name(name.clone()), name_span.end);
                }
                TokenKind::QuestionDot => match &self.peek_next().kind {
                    TokenKind::Ident(name) => {
                        self.advance();
                        let name_span = self.advance().span;
                        expr = member(expr, MemberProp::Name(name.clone()), name_span.end);
                    }
                    TokenKind::LParen => {
                        self.advance();
                        expr = self.call(expr);
                    }
                    TokenKind::LBracket => {
                        self.advance();
                        expr = self.computed_member(expr);
                    }
                    _ => break,
                },
                TokenKind::LParen => expr = self.call(expr),
                TokenKind::LBracket => expr = self.computed_member(expr),
                TokenKind::Template(template) => {
                    let token = self.advance();
                    let quasi = Spanned::new(
                        TemplateLit {
                            cooked: template.cooked.clone(),
                            raw: template.raw.clone(),
                        },
                        token.span,
                    );
                    let span = expr.span.merge(token.span);
                    expr = Spanned::new(
                        Expr::TaggedTemplate {
                            tag: Box::new(expr),
                            quasi,
                        },
                        span,
                    );
                }
                _ => break,
            }
        }
        expr
    }

    fn call(&mut self, callee: Spanned<Expr>) -> Spanned<Expr> {
        let open = self.advance();
        let args = self.elements(&TokenKind::RParen);
        let end = self.close_group(&TokenKind::RParen, open);
        let span = Span::new(callee.span.start, end);
        Spanned::new(
            Expr::Call(CallExpr {
                callee: Box::new(callee),
                args,
            }),
            span,
        )
    }

    fn computed_member(&mut self, object: Spanned<Expr>) -> Spanned<Expr> {
        let open = self.advance();
        let mut items = self.elements(&TokenKind::RBracket);
        let end = self.close_group(&TokenKind::RBracket, open);
        let inner_span = Span::new(open.span.end, end.saturating_sub(1).max(open.span.end));
        let inner = if items.len() == 1 {
            items.remove(0)
        } else {
            Spanned::new(Expr::Compound(items), inner_span)
        };
        member(object, MemberProp::Computed(Box::new(inner)), end)
    }

    /// `name(params) { body }` in a class or object literal defines a method; it is not a call.
    fn method_definition(&mut self, expr: Spanned<Expr>) -> Spanned<Expr> {
        let is_method = matches!(&expr.node, Expr::Call(call) if call.callee.node.as_ident().is_some());
        if !is_method || !self.check(&TokenKind::LBrace) {
            return expr;
        }
        let Spanned { node, span } = expr;
        match node {
            Expr::Call(call) => {
                let params_span = Span::new(call.callee.span.end, span.end);
                let body = self.block();
                let full = span.merge(body.span);
                Spanned::new(
                    Expr::Compound(vec![
                        *call.callee,
                        Spanned::new(Expr::Paren(call.args), params_span),
                        body,
                    ]),
                    full,
                )
            }
            other => Spanned::new(other, span),
        }
    }
}

fn member(object: Spanned<Expr>, property: MemberProp, end: usize) -> Spanned<Expr> {
    let span = Span::new(object.span.start, end);
    Spanned::new(
        Expr::Member {
            object: Box::new(object),
            property,
        },
        span,
    )
}
