use crate::language::compiler::module::{FunctionHandle, Module};
use crate::language::types::{StructType, Type};
use crate::runtime::value::Value;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl BinaryOp {
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "%" => BinaryOp::Rem,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::Le,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::Ge,
            "==" => BinaryOp::Eq,
            "!=" => BinaryOp::Ne,
            _ => return None,
        })
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem
        )
    }
}

/// Call target. Functions of the module being executed are addressed by index so a module
/// never holds a reference to itself.
#[derive(Clone, Debug)]
pub enum Callee {
    Local(usize),
    External(FunctionHandle),
}

/// Lowered, name-resolved function bodies executed by the runtime machine.
#[derive(Clone, Debug)]
pub enum Code {
    Const(Value),
    Local(usize),
    SetLocal(usize, Box<Code>),
    Global(usize),
    SetGlobal(usize, Box<Code>),
    ExternalGlobal(Module, usize),
    Block(Vec<Code>),
    If {
        cond: Box<Code>,
        then: Box<Code>,
        otherwise: Option<Box<Code>>,
    },
    While {
        cond: Box<Code>,
        body: Box<Code>,
    },
    Binary(BinaryOp, Box<Code>, Box<Code>),
    Not(Box<Code>),
    And(Box<Code>, Box<Code>),
    Or(Box<Code>, Box<Code>),
    Call {
        callee: Callee,
        args: Vec<Code>,
    },
    /// Pointer to a field: base address plus a fixed offset.
    FieldPtr {
        base: Box<Code>,
        offset: u64,
        target: Type,
    },
    FieldGet {
        base: Box<Code>,
        index: usize,
    },
    Make {
        ty: Rc<StructType>,
        fields: Vec<Code>,
    },
    Load {
        ptr: Box<Code>,
        ty: Type,
    },
    Store {
        ptr: Box<Code>,
        value: Box<Code>,
        ty: Type,
    },
    Cast {
        value: Box<Code>,
        to: Type,
    },
    Offset {
        ptr: Box<Code>,
        count: Box<Code>,
        stride: u64,
    },
    Addr(Box<Code>),
    SeqLit {
        elem: Type,
        items: Vec<Code>,
    },
    SeqLen(Box<Code>),
    SeqCopy {
        dst: Box<Code>,
        seq: Box<Code>,
    },
}
