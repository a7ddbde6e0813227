use crate::language::{
    ast::{Expr, ExprKind, Fragment},
    errors::SyntaxError,
    parser::is_symbol,
    span::Span,
    types::TypeRef,
};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HoleKind {
    Ident,
    Type,
    Fragment,
}

impl HoleKind {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            "ident" => Some(HoleKind::Ident),
            "type" => Some(HoleKind::Type),
            "fragment" => Some(HoleKind::Fragment),
            _ => None,
        }
    }
}

impl fmt::Display for HoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HoleKind::Ident => write!(f, "an identifier"),
            HoleKind::Type => write!(f, "a type"),
            HoleKind::Fragment => write!(f, "a fragment"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Binding {
    Ident(String),
    Type(TypeRef),
    Fragment(Fragment),
}

impl Binding {
    pub fn ident(name: impl Into<String>) -> Self {
        Binding::Ident(name.into())
    }

    pub fn kind(&self) -> HoleKind {
        match self {
            Binding::Ident(_) => HoleKind::Ident,
            Binding::Type(_) => HoleKind::Type,
            Binding::Fragment(_) => HoleKind::Fragment,
        }
    }

    fn to_expr(&self, span: Span) -> Expr {
        match self {
            Binding::Ident(name) => Expr::symbol(name.clone(), span),
            Binding::Type(ty) => ty.expr().respan(span),
            Binding::Fragment(fragment) => fragment.root().respan(span),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Bindings {
    entries: BTreeMap<String, Binding>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, hole: impl Into<String>, binding: Binding) -> Self {
        self.entries.insert(hole.into(), binding);
        self
    }

    pub fn insert(&mut self, hole: impl Into<String>, binding: Binding) {
        self.entries.insert(hole.into(), binding);
    }

    pub fn get(&self, hole: &str) -> Option<&Binding> {
        self.entries.get(hole)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TemplateBindingError {
    #[error("hole `${hole}` of template `{template}` has no binding")]
    Unbound { template: String, hole: String },
    #[error("hole `${hole}` expects {expected}, but was bound to {found}")]
    KindMismatch {
        hole: String,
        expected: HoleKind,
        found: HoleKind,
    },
    #[error("binding `{hole}` does not name a hole of template `{template}`")]
    Unexpected { template: String, hole: String },
    #[error("`{value}` is not a valid identifier for hole `${hole}`")]
    InvalidIdentifier { hole: String, value: String },
}

enum Piece<'a> {
    Text(&'a str),
    Hole(&'a str),
}

enum SymbolShape<'a> {
    Plain,
    Hole(&'a str),
    Pasted(Vec<Piece<'a>>),
}

fn is_hole_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
        && !name.starts_with(|ch: char| ch.is_ascii_digit())
}

fn shape(symbol: &str) -> Result<SymbolShape<'_>, String> {
    if let Some(name) = symbol.strip_prefix('$') {
        if is_hole_name(name) {
            return Ok(SymbolShape::Hole(name));
        }
    }
    if !symbol.contains("${") {
        return Ok(SymbolShape::Plain);
    }
    let mut pieces = Vec::new();
    let mut rest = symbol;
    while let Some(start) = rest.find("${") {
        if start > 0 {
            pieces.push(Piece::Text(&rest[..start]));
        }
        let after = &rest[start + 2..];
        let Some(close) = after.find('}') else {
            return Err(format!("unclosed `${{` in `{symbol}`"));
        };
        let name = &after[..close];
        if !is_hole_name(name) {
            return Err(format!("invalid hole name `{name}` in `{symbol}`"));
        }
        pieces.push(Piece::Hole(name));
        rest = &after[close + 1..];
    }
    if !rest.is_empty() {
        pieces.push(Piece::Text(rest));
    }
    Ok(SymbolShape::Pasted(pieces))
}

/// A fragment with typed holes. Holes are `$name` for a whole symbol or `${name}` pasted
/// inside a larger identifier.
#[derive(Clone, Debug)]
pub struct Template {
    name: String,
    holes: BTreeMap<String, HoleKind>,
    body: Fragment,
}

impl Template {
    pub fn new(
        name: impl Into<String>,
        holes: impl IntoIterator<Item = (String, HoleKind)>,
        body: Fragment,
    ) -> Result<Self, SyntaxError> {
        let template = Self {
            name: name.into(),
            holes: holes.into_iter().collect(),
            body,
        };
        template.check_holes(template.body.root())?;
        Ok(template)
    }

    /// Reads `(template ((hole kind) ...) form ...)`. A single body form is the instantiated
    /// root; several forms are grouped under `(do ...)`.
    pub fn parse(name: &str, text: &str) -> Result<Self, SyntaxError> {
        let unit = Fragment::parse_unit(name, text)?;
        let forms = unit.root().match_form("do").unwrap_or(&[]);
        let [form] = forms else {
            return Err(SyntaxError::new(
                "expected exactly one `(template ...)` form",
                unit.root().span,
            ));
        };
        let Some(args) = form.match_form("template") else {
            return Err(SyntaxError::new("expected a `(template ...)` form", form.span));
        };
        let Some((header, body)) = args.split_first() else {
            return Err(SyntaxError::new("template is missing its hole list", form.span));
        };
        let Some(entries) = header.as_list() else {
            return Err(SyntaxError::new("expected a list of `(hole kind)` pairs", header.span));
        };
        let mut holes = Vec::new();
        for entry in entries {
            let pair = entry.as_list().unwrap_or(&[]);
            let (Some(hole), Some(kind)) = (
                pair.first().and_then(Expr::as_symbol),
                pair.get(1).and_then(Expr::as_symbol),
            ) else {
                return Err(SyntaxError::new("expected `(hole kind)`", entry.span));
            };
            let Some(kind) = HoleKind::parse(kind).filter(|_| pair.len() == 2) else {
                return Err(SyntaxError::new(format!("unknown hole kind `{kind}`"), entry.span)
                    .with_help("hole kinds are `ident`, `type` and `fragment`"));
            };
            if !is_hole_name(hole) {
                return Err(SyntaxError::new(format!("invalid hole name `{hole}`"), entry.span));
            }
            if holes.iter().any(|(existing, _)| existing == hole) {
                return Err(SyntaxError::new(format!("hole `{hole}` declared twice"), entry.span));
            }
            holes.push((hole.to_string(), kind));
        }
        let root = match body {
            [] => return Err(SyntaxError::new("template has an empty body", form.span)),
            [single] => single.clone(),
            many => {
                let mut items = vec![Expr::symbol("do", form.span)];
                items.extend(many.iter().cloned());
                Expr::list(items, form.span)
            }
        };
        Template::new(name, holes, Fragment::new(root, unit.origin().clone()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hole_kind(&self, hole: &str) -> Option<HoleKind> {
        self.holes.get(hole).copied()
    }

    fn check_holes(&self, expr: &Expr) -> Result<(), SyntaxError> {
        match &expr.kind {
            ExprKind::Symbol(symbol) => {
                let shape = shape(symbol).map_err(|message| SyntaxError::new(message, expr.span))?;
                let referenced: Vec<(&str, bool)> = match &shape {
                    SymbolShape::Plain => Vec::new(),
                    SymbolShape::Hole(name) => vec![(*name, false)],
                    SymbolShape::Pasted(pieces) => pieces
                        .iter()
                        .filter_map(|piece| match piece {
                            Piece::Hole(name) => Some((*name, true)),
                            Piece::Text(_) => None,
                        })
                        .collect(),
                };
                for (name, pasted) in referenced {
                    match self.holes.get(name) {
                        None => {
                            return Err(SyntaxError::new(
                                format!("hole `${name}` is not declared by template `{}`", self.name),
                                expr.span,
                            ));
                        }
                        Some(kind) if pasted && *kind != HoleKind::Ident => {
                            return Err(SyntaxError::new(
                                format!("hole `${name}` is {kind} and cannot be pasted into `{symbol}`"),
                                expr.span,
                            ));
                        }
                        Some(_) => {}
                    }
                }
                Ok(())
            }
            ExprKind::List(items) => items.iter().try_for_each(|item| self.check_holes(item)),
            _ => Ok(()),
        }
    }

    /// Substitutes every hole and returns a new fragment. Bindings are validated up front, so
    /// a mismatch never produces a partially substituted tree.
    pub fn instantiate(&self, bindings: &Bindings) -> Result<Fragment, TemplateBindingError> {
        for (hole, binding) in &bindings.entries {
            let Some(expected) = self.holes.get(hole) else {
                return Err(TemplateBindingError::Unexpected {
                    template: self.name.clone(),
                    hole: hole.clone(),
                });
            };
            if binding.kind() != *expected {
                return Err(TemplateBindingError::KindMismatch {
                    hole: hole.clone(),
                    expected: *expected,
                    found: binding.kind(),
                });
            }
            if let Binding::Ident(value) = binding {
                if !is_symbol(value) || value.contains('$') {
                    return Err(TemplateBindingError::InvalidIdentifier {
                        hole: hole.clone(),
                        value: value.clone(),
                    });
                }
            }
        }
        if let Some(hole) = self.holes.keys().find(|hole| bindings.get(hole).is_none()) {
            return Err(TemplateBindingError::Unbound {
                template: self.name.clone(),
                hole: hole.clone(),
            });
        }
        let root = self.substitute(self.body.root(), bindings);
        Ok(Fragment::new(root, self.body.origin().clone()))
    }

    fn substitute(&self, expr: &Expr, bindings: &Bindings) -> Expr {
        match &expr.kind {
            ExprKind::Symbol(symbol) => match shape(symbol) {
                Ok(SymbolShape::Hole(name)) => match bindings.get(name) {
                    Some(binding) => binding.to_expr(expr.span),
                    None => expr.clone(),
                },
                Ok(SymbolShape::Pasted(pieces)) => {
                    let mut pasted = String::new();
                    for piece in pieces {
                        match piece {
                            Piece::Text(text) => pasted.push_str(text),
                            Piece::Hole(name) => match bindings.get(name) {
                                Some(Binding::Ident(value)) => pasted.push_str(value),
                                _ => pasted.push_str(&format!("${{{name}}}")),
                            },
                        }
                    }
                    Expr::symbol(pasted, expr.span)
                }
                Ok(SymbolShape::Plain) | Err(_) => expr.clone(),
            },
            ExprKind::List(items) => Expr::list(
                items.iter().map(|item| self.substitute(item, bindings)).collect(),
                expr.span,
            ),
            _ => expr.clone(),
        }
    }
}
