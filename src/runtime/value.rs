use crate::language::types::{StructType, Type};
use crate::runtime::error::{RuntimeError, RuntimeResult};
use std::fmt;
use std::rc::Rc;

#[derive(Clone, Debug)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Str(Rc<str>),
    Ptr(Pointer),
    Struct(StructValue),
    Seq(SeqValue),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Pointer {
    pub addr: u64,
    pub target: Type,
}

#[derive(Clone, Debug)]
pub struct StructValue {
    pub ty: Rc<StructType>,
    pub fields: Vec<Value>,
}

impl StructValue {
    pub fn get_field(&self, name: &str) -> Option<&Value> {
        self.ty.field_index(name).and_then(|idx| self.fields.get(idx))
    }
}

/// A plain, fixed sequence of elements already encoded to bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct SeqValue {
    pub elem: Type,
    pub len: u64,
    pub bytes: Rc<[u8]>,
}

impl SeqValue {
    pub fn new(elem: Type, values: &[Value]) -> RuntimeResult<Self> {
        let mut bytes = Vec::with_capacity(values.len() * elem.size() as usize);
        for value in values {
            bytes.extend(encode(value, &elem)?);
        }
        Ok(Self {
            elem,
            len: values.len() as u64,
            bytes: bytes.into(),
        })
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Unit, Value::Unit) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Ptr(a), Value::Ptr(b)) => a.addr == b.addr,
            (Value::Struct(a), Value::Struct(b)) => Rc::ptr_eq(&a.ty, &b.ty) && a.fields == b.fields,
            (Value::Seq(a), Value::Seq(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    pub fn str(text: &str) -> Self {
        Value::Str(text.into())
    }

    pub fn seq(elem: Type, values: &[Value]) -> RuntimeResult<Self> {
        SeqValue::new(elem, values).map(Value::Seq)
    }

    /// The all-zero value of `ty`: null pointers, empty sequences, zeroed struct fields.
    pub fn zeroed(ty: &Type) -> Self {
        match ty {
            Type::Unit => Value::Unit,
            Type::Bool => Value::Bool(false),
            Type::U8 | Type::I64 | Type::U64 => Value::Int(0),
            Type::Str => Value::str(""),
            Type::Ptr(target) => Value::Ptr(Pointer {
                addr: 0,
                target: (**target).clone(),
            }),
            Type::Seq(elem) => Value::Seq(SeqValue {
                elem: (**elem).clone(),
                len: 0,
                bytes: Vec::new().into(),
            }),
            Type::Struct(def) => Value::Struct(StructValue {
                ty: def.clone(),
                fields: def
                    .layout()
                    .map(|layout| layout.fields.iter().map(|field| Value::zeroed(&field.ty)).collect())
                    .unwrap_or_default(),
            }),
        }
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::Unit => "unit".into(),
            Value::Bool(_) => "bool".into(),
            Value::Int(_) => "integer".into(),
            Value::Str(_) => "str".into(),
            Value::Ptr(ptr) => format!("(ptr {})", ptr.target),
            Value::Struct(value) => value.ty.name.clone(),
            Value::Seq(seq) => format!("(seq {})", seq.elem),
        }
    }

    pub fn as_int(&self) -> RuntimeResult<i64> {
        match self {
            Value::Int(value) => Ok(*value),
            Value::Bool(value) => Ok(*value as i64),
            other => Err(RuntimeError::mismatch(format!(
                "expected an integer, found {}",
                other.type_name()
            ))),
        }
    }

    pub fn as_bool(&self) -> RuntimeResult<bool> {
        match self {
            Value::Bool(value) => Ok(*value),
            Value::Int(value) => Ok(*value != 0),
            other => Err(RuntimeError::mismatch(format!(
                "expected a bool, found {}",
                other.type_name()
            ))),
        }
    }

    pub fn as_ptr(&self) -> RuntimeResult<&Pointer> {
        match self {
            Value::Ptr(ptr) => Ok(ptr),
            other => Err(RuntimeError::mismatch(format!(
                "expected a pointer, found {}",
                other.type_name()
            ))),
        }
    }

    pub fn as_seq(&self) -> RuntimeResult<&SeqValue> {
        match self {
            Value::Seq(seq) => Ok(seq),
            other => Err(RuntimeError::mismatch(format!(
                "expected a sequence, found {}",
                other.type_name()
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
            Value::Ptr(ptr) => write!(f, "{:#x}", ptr.addr),
            Value::Struct(value) => {
                write!(f, "{} {{", value.ty.name)?;
                let names = value
                    .ty
                    .layout()
                    .map(|layout| layout.fields.iter().map(|field| field.name.as_str()).collect())
                    .unwrap_or_else(Vec::new);
                for (idx, field) in value.fields.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {}: {field}", names.get(idx).unwrap_or(&"?"))?;
                }
                write!(f, " }}")
            }
            Value::Seq(seq) => write!(f, "<seq of {} {}>", seq.len, seq.elem),
        }
    }
}

/// Byte representation of `value` when stored as `ty`.
pub fn encode(value: &Value, ty: &Type) -> RuntimeResult<Vec<u8>> {
    let mut out = vec![0; ty.size() as usize];
    encode_into(value, ty, &mut out)?;
    Ok(out)
}

fn encode_into(value: &Value, ty: &Type, out: &mut [u8]) -> RuntimeResult<()> {
    match (ty, value) {
        (Type::Unit, Value::Unit) => {}
        (Type::Bool, value) => out[0] = value.as_bool()? as u8,
        (Type::U8, value) => out[0] = value.as_int()? as u8,
        (Type::I64 | Type::U64, value) => out.copy_from_slice(&value.as_int()?.to_le_bytes()),
        (Type::Ptr(_), Value::Ptr(ptr)) => out.copy_from_slice(&ptr.addr.to_le_bytes()),
        (Type::Ptr(_), Value::Int(addr)) => out.copy_from_slice(&addr.to_le_bytes()),
        (Type::Struct(def), Value::Struct(instance)) if Rc::ptr_eq(def, &instance.ty) => {
            let Some(layout) = def.layout() else {
                return Err(RuntimeError::mismatch(format!("`{}` has no layout", def.name)));
            };
            for (field, value) in layout.fields.iter().zip(&instance.fields) {
                let start = field.offset as usize;
                let end = start + field.ty.size() as usize;
                encode_into(value, &field.ty, &mut out[start..end])?;
            }
        }
        (ty, value) => {
            return Err(RuntimeError::mismatch(format!(
                "cannot store {} as {ty}",
                value.type_name()
            )));
        }
    }
    Ok(())
}

pub fn decode(ty: &Type, bytes: &[u8]) -> RuntimeResult<Value> {
    let word = |bytes: &[u8]| {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&bytes[..8]);
        buf
    };
    Ok(match ty {
        Type::Unit => Value::Unit,
        Type::Bool => Value::Bool(bytes[0] != 0),
        Type::U8 => Value::Int(bytes[0] as i64),
        Type::I64 | Type::U64 => Value::Int(i64::from_le_bytes(word(bytes))),
        Type::Ptr(target) => Value::Ptr(Pointer {
            addr: u64::from_le_bytes(word(bytes)),
            target: (**target).clone(),
        }),
        Type::Struct(def) => {
            let Some(layout) = def.layout() else {
                return Err(RuntimeError::mismatch(format!("`{}` has no layout", def.name)));
            };
            let fields = layout
                .fields
                .iter()
                .map(|field| {
                    let start = field.offset as usize;
                    decode(&field.ty, &bytes[start..start + field.ty.size() as usize])
                })
                .collect::<RuntimeResult<Vec<_>>>()?;
            Value::Struct(StructValue {
                ty: def.clone(),
                fields,
            })
        }
        Type::Str | Type::Seq(_) => {
            return Err(RuntimeError::mismatch(format!("{ty} cannot be loaded from memory")));
        }
    })
}
