use crate::language::{errors::SyntaxError, parser, span::Span};
use std::fmt;
use std::rc::Rc;

#[derive(Clone, Debug)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Int(i64),
    Bool(bool),
    Str(String),
    Symbol(String),
    List(Vec<Expr>),
}

/// Equality is structural: spans are ignored.
impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }

    pub fn symbol(name: impl Into<String>, span: Span) -> Self {
        Self::new(ExprKind::Symbol(name.into()), span)
    }

    pub fn list(items: Vec<Expr>, span: Span) -> Self {
        Self::new(ExprKind::List(items), span)
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match &self.kind {
            ExprKind::Symbol(name) => Some(name),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Expr]> {
        match &self.kind {
            ExprKind::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn head(&self) -> Option<&str> {
        self.as_list()?.first()?.as_symbol()
    }

    /// Arguments of a list form whose head is the symbol `name`.
    pub fn match_form(&self, name: &str) -> Option<&[Expr]> {
        if self.head() == Some(name) {
            self.as_list().map(|items| &items[1..])
        } else {
            None
        }
    }

    /// Copy of the tree with every span replaced by `span`.
    pub fn respan(&self, span: Span) -> Expr {
        let kind = match &self.kind {
            ExprKind::List(items) => {
                ExprKind::List(items.iter().map(|item| item.respan(span)).collect())
            }
            other => other.clone(),
        };
        Expr { kind, span }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn display_inner(expr: &Expr, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
            match &expr.kind {
                ExprKind::Int(value) => write!(f, "{value}"),
                ExprKind::Bool(value) => write!(f, "{value}"),
                ExprKind::Str(value) => write!(f, "{value:?}"),
                ExprKind::Symbol(name) => write!(f, "{name}"),
                ExprKind::List(items) => {
                    // top-level style forms break across lines, everything else stays inline
                    let block = matches!(expr.head(), Some("do" | "fun" | "struct" | "template"))
                        && items.len() > 2;
                    write!(f, "(")?;
                    for (idx, item) in items.iter().enumerate() {
                        if idx > 0 {
                            if block && idx >= 2 && item.as_list().is_some() {
                                writeln!(f)?;
                                write!(f, "{:indent$}", "", indent = indent + 2)?;
                            } else {
                                write!(f, " ")?;
                            }
                        }
                        display_inner(item, f, indent + 2)?;
                    }
                    write!(f, ")")
                }
            }
        }
        display_inner(self, f, 0)
    }
}

/// Where a fragment's spans point: the text it was parsed from.
#[derive(Debug, PartialEq, Eq)]
pub struct Origin {
    pub name: String,
    pub text: String,
}

/// Immutable handle to a piece of syntax. Cloning copies the handle, not the tree.
#[derive(Clone, Debug)]
pub struct Fragment {
    root: Rc<Expr>,
    origin: Rc<Origin>,
}

impl PartialEq for Fragment {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.root, &other.root) || self.root == other.root
    }
}

impl Fragment {
    pub fn new(root: Expr, origin: Rc<Origin>) -> Self {
        Self {
            root: Rc::new(root),
            origin,
        }
    }

    /// Parses a whole unit; the forms are grouped under a synthetic `(do ...)`.
    pub fn parse_unit(name: &str, text: &str) -> Result<Fragment, SyntaxError> {
        let forms = parser::parse_forms(text)?;
        let span = Span::new(0, text.len());
        let mut items = Vec::with_capacity(forms.len() + 1);
        items.push(Expr::symbol("do", span));
        items.extend(forms);
        Ok(Fragment::new(Expr::list(items, span), origin(name, text)))
    }

    /// Parses exactly one expression.
    pub fn parse_expr(name: &str, text: &str) -> Result<Fragment, SyntaxError> {
        let mut forms = parser::parse_forms(text)?;
        if forms.len() != 1 {
            return Err(SyntaxError::new(
                format!("expected a single expression, found {}", forms.len()),
                Span::new(0, text.len()),
            ));
        }
        Ok(Fragment::new(forms.remove(0), origin(name, text)))
    }

    pub fn root(&self) -> &Expr {
        &self.root
    }

    pub fn origin(&self) -> &Rc<Origin> {
        &self.origin
    }

    pub fn name(&self) -> &str {
        &self.origin.name
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}

fn origin(name: &str, text: &str) -> Rc<Origin> {
    Rc::new(Origin {
        name: name.to_string(),
        text: text.to_string(),
    })
}
