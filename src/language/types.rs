use crate::language::{
    ast::{Expr, ExprKind, Fragment},
    errors::SyntaxError,
    parser::is_symbol,
};
use std::cell::OnceCell;
use std::fmt;
use std::rc::Rc;

pub const PRIMITIVE_TYPES: &[&str] = &["unit", "bool", "u8", "i64", "u64", "str"];

/// A syntactic type expression, e.g. `i64` or `(ptr (seq u8))`.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeRef(Fragment);

impl TypeRef {
    pub fn parse(text: &str) -> Result<Self, SyntaxError> {
        Self::from_fragment(Fragment::parse_expr("<type>", text)?)
    }

    pub fn from_fragment(fragment: Fragment) -> Result<Self, SyntaxError> {
        validate_type_expr(fragment.root())?;
        Ok(Self(fragment))
    }

    pub fn expr(&self) -> &Expr {
        self.0.root()
    }

    pub fn fragment(&self) -> &Fragment {
        &self.0
    }

    /// Identifier-safe spelling used to derive generated names.
    pub fn mangled(&self) -> String {
        fn mangle(expr: &Expr) -> String {
            match &expr.kind {
                ExprKind::Symbol(name) => name.clone(),
                ExprKind::List(items) => items.iter().map(mangle).collect::<Vec<_>>().join("_"),
                _ => String::new(),
            }
        }
        mangle(self.expr())
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expr())
    }
}

fn validate_type_expr(expr: &Expr) -> Result<(), SyntaxError> {
    match &expr.kind {
        ExprKind::Symbol(name) if is_symbol(name) && !name.contains('$') => Ok(()),
        ExprKind::List(items) => match items.as_slice() {
            [head, inner] if matches!(head.as_symbol(), Some("ptr" | "seq")) => {
                validate_type_expr(inner)
            }
            _ => Err(SyntaxError::new(
                format!("`{expr}` is not a type"),
                expr.span,
            )
            .with_help("compound types are `(ptr T)` and `(seq T)`")),
        },
        _ => Err(SyntaxError::new(format!("`{expr}` is not a type"), expr.span)),
    }
}

#[derive(Clone, Debug)]
pub enum Type {
    Unit,
    Bool,
    U8,
    I64,
    U64,
    Str,
    Ptr(Box<Type>),
    Seq(Box<Type>),
    Struct(Rc<StructType>),
}

impl PartialEq for Type {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Type::Unit, Type::Unit)
            | (Type::Bool, Type::Bool)
            | (Type::U8, Type::U8)
            | (Type::I64, Type::I64)
            | (Type::U64, Type::U64)
            | (Type::Str, Type::Str) => true,
            (Type::Ptr(a), Type::Ptr(b)) | (Type::Seq(a), Type::Seq(b)) => a == b,
            (Type::Struct(a), Type::Struct(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Type {
    pub fn primitive(name: &str) -> Option<Type> {
        match name {
            "unit" => Some(Type::Unit),
            "bool" => Some(Type::Bool),
            "u8" => Some(Type::U8),
            "i64" => Some(Type::I64),
            "u64" => Some(Type::U64),
            "str" => Some(Type::Str),
            _ => None,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            Type::Unit | Type::Str | Type::Seq(_) => 0,
            Type::Bool | Type::U8 => 1,
            Type::I64 | Type::U64 | Type::Ptr(_) => 8,
            Type::Struct(def) => def.layout().map_or(0, |layout| layout.size),
        }
    }

    pub fn align(&self) -> u64 {
        match self {
            Type::Unit | Type::Str | Type::Seq(_) | Type::Bool | Type::U8 => 1,
            Type::I64 | Type::U64 | Type::Ptr(_) => 8,
            Type::Struct(def) => def.layout().map_or(1, |layout| layout.align),
        }
    }

    /// Strings and sequences live outside the heap and have no byte representation.
    pub fn is_storable(&self) -> bool {
        !matches!(self, Type::Str | Type::Seq(_))
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, Type::U8 | Type::I64 | Type::U64)
    }

    pub fn pointee(&self) -> Option<&Type> {
        match self {
            Type::Ptr(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&Rc<StructType>> {
        match self {
            Type::Struct(def) => Some(def),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Unit => write!(f, "unit"),
            Type::Bool => write!(f, "bool"),
            Type::U8 => write!(f, "u8"),
            Type::I64 => write!(f, "i64"),
            Type::U64 => write!(f, "u64"),
            Type::Str => write!(f, "str"),
            Type::Ptr(inner) => write!(f, "(ptr {inner})"),
            Type::Seq(inner) => write!(f, "(seq {inner})"),
            Type::Struct(def) => write!(f, "{}", def.name),
        }
    }
}

#[derive(Debug)]
pub struct StructType {
    pub name: String,
    layout: OnceCell<StructLayout>,
}

#[derive(Debug)]
pub struct StructLayout {
    pub fields: Vec<Field>,
    pub size: u64,
    pub align: u64,
}

#[derive(Debug)]
pub struct Field {
    pub name: String,
    pub ty: Type,
    pub offset: u64,
}

pub fn align_up(value: u64, align: u64) -> u64 {
    checked_align_up(value, align).unwrap_or(u64::MAX)
}

/// `None` when rounding up would overflow.
pub fn checked_align_up(value: u64, align: u64) -> Option<u64> {
    value.checked_next_multiple_of(align.max(1))
}

impl StructType {
    /// A declared struct whose layout is filled in once its field types are known.
    pub fn declare(name: impl Into<String>) -> Rc<Self> {
        Rc::new(Self {
            name: name.into(),
            layout: OnceCell::new(),
        })
    }

    pub fn layout(&self) -> Option<&StructLayout> {
        self.layout.get()
    }

    /// C-style layout: each field at its natural alignment, size rounded to the struct's.
    pub fn set_fields(&self, fields: Vec<(String, Type)>) {
        let mut offset = 0;
        let mut align = 1;
        let mut laid_out = Vec::with_capacity(fields.len());
        for (name, ty) in fields {
            offset = align_up(offset, ty.align());
            align = align.max(ty.align());
            let size = ty.size();
            laid_out.push(Field { name, ty, offset });
            offset += size;
        }
        let _ = self.layout.set(StructLayout {
            fields: laid_out,
            size: align_up(offset, align),
            align,
        });
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.layout()?.fields.iter().find(|field| field.name == name)
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.layout()?.fields.iter().position(|field| field.name == name)
    }
}
