//! Abstract Syntax Tree definitions for test files.
//!
//! The tree only models call structure. Every node carries its byte range so callers can attribute locations in
//! the source back to the enclosing call.

/// Source location span (byte offsets, half-open)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset < self.end
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A node with source location
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }
}

/// A parsed file: the top-level sequence of expressions.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Spanned<Expr>>,
    pub span: Span,
}

/// Template literal contents.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateLit {
    /// Escape-processed text; `None` when the template has `${...}` substitutions.
    pub cooked: Option<String>,
    /// Source text between the backticks.
    pub raw: String,
}

/// Property side of a member access.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberProp {
    /// `object.name` / `object?.name`
    Name(String),
    /// `object[expr]`
    Computed(Box<Spanned<Expr>>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub callee: Box<Spanned<Expr>>,
    pub args: Vec<Spanned<Expr>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Ident(String),
    Str(String),
    Template(TemplateLit),
    Number(String),
    Member {
        object: Box<Spanned<Expr>>,
        property: MemberProp,
    },
    Call(CallExpr),
    TaggedTemplate {
        tag: Box<Spanned<Expr>>,
        quasi: Spanned<TemplateLit>,
    },
    /// `( a, b )`; one entry per comma-separated element.
    Paren(Vec<Spanned<Expr>>),
    /// `[ a, b ]`
    Array(Vec<Spanned<Expr>>),
    /// `{ ... }`: object literal or statement block, flattened.
    Block(Vec<Spanned<Expr>>),
    /// Several adjacent expressions forming one element, e.g. `async () => {}`.
    Compound(Vec<Spanned<Expr>>),
    /// Keyword, regex literal or anything else with no call structure.
    Opaque,
}

impl Expr {
    /// Direct children in source order.
    pub fn children(&self) -> Vec<&Spanned<Expr>> {
        match self {
            Expr::Member { object, property } => {
                let mut out = vec![object.as_ref()];
                if let MemberProp::Computed(inner) = property {
                    out.push(inner.as_ref());
                }
                out
            }
            Expr::Call(call) => std::iter::once(call.callee.as_ref()).chain(call.args.iter()).collect(),
            Expr::TaggedTemplate { tag, .. } => vec![tag.as_ref()],
            Expr::Paren(items) | Expr::Array(items) | Expr::Block(items) | Expr::Compound(items) => {
                items.iter().collect()
            }
            Expr::Ident(_) | Expr::Str(_) | Expr::Template(_) | Expr::Number(_) | Expr::Opaque => Vec::new(),
        }
    }

    /// Identifier name, if this is a bare identifier.
    pub fn as_ident(&self) -> Option<&str> {
        match self {
            Expr::Ident(name) => Some(name),
            _ => None,
        }
    }
}

impl Program {
    /// Visit every node in pre-order.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Spanned<Expr>)) {
        for node in &self.body {
            walk_node(node, visit);
        }
    }

    /// Visit every call expression in pre-order, outer calls before the calls nested in them.
    pub fn calls(&self) -> Vec<(&Spanned<Expr>, &CallExpr)> {
        let mut out = Vec::new();
        self.walk(&mut |node| {
            if let Expr::Call(call) = &node.node {
                out.push((node, call));
            }
        });
        out
    }
}

fn walk_node<'a>(node: &'a Spanned<Expr>, visit: &mut dyn FnMut(&'a Spanned<Expr>)) {
    visit(node);
    for child in node.node.children() {
        walk_node(child, visit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_contains_is_half_open() {
        let span = Span::new(10, 20);
        assert!(span.contains(10));
        assert!(span.contains(19));
        assert!(!span.contains(20));
        assert!(!span.contains(9));
    }

    #[test]
    fn test_span_merge() {
        let merged = Span::new(5, 8).merge(Span::new(2, 6));
        assert_eq!(merged, Span::new(2, 8));
    }
}
