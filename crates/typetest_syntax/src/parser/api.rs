/// Parse a token stream into a [`Program`].
///
/// This is the main public entrypoint for parsing.
///
/// ## Parameters
/// - `tokens`: Token stream produced by `typetest_syntax::lexer`.
///
/// ## Errors
/// Returns `Err(Vec<SyntaxError>)` when brackets are mismatched or unclosed.
#[tracing::instrument(skip_all, fields(token_count = tokens.len()))]
pub fn parse(tokens: &[Token]) -> Result<Program, Vec<SyntaxError>> {
    Parser::new(tokens).parse()
}
