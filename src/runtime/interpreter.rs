use crate::language::compiler::{
    ir::{BinaryOp, Callee, Code},
    module::{FunctionBody, FunctionHandle, Module},
};
use crate::language::types::Type;
use crate::runtime::{
    error::{RuntimeError, RuntimeResult},
    heap::Heap,
    value::{decode, encode, Pointer, StructValue, Value},
};
use std::rc::Rc;

/// Deepest nesting of expression evaluation, calls included. Sized so a debug build on a
/// 2 MiB thread reports an error before the native stack runs out.
pub const MAX_EVAL_DEPTH: usize = 256;

/// Executes lowered module code against a single heap. One machine outlives every module
/// compiled by its compiler, so heap contents survive reloads.
pub struct Machine {
    heap: Heap,
    depth: usize,
}

struct Frame<'m> {
    module: &'m Module,
    locals: Vec<Value>,
}

impl Machine {
    pub fn new(heap_limit: u64) -> Self {
        Self {
            heap: Heap::with_limit(heap_limit),
            depth: 0,
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn call(&mut self, handle: &FunctionHandle, args: Vec<Value>) -> RuntimeResult<Value> {
        self.invoke(handle.module(), handle.index(), args)
    }

    /// Evaluates module-level code (global initialisers) in a fresh frame of `module`.
    pub(crate) fn evaluate(
        &mut self,
        module: &Module,
        locals: usize,
        code: &Code,
    ) -> RuntimeResult<Value> {
        let mut frame = Frame {
            module,
            locals: vec![Value::Unit; locals],
        };
        self.eval(&mut frame, code)
    }

    fn invoke(&mut self, module: &Module, index: usize, args: Vec<Value>) -> RuntimeResult<Value> {
        let function = module.function_at(index);
        if args.len() != function.params.len() {
            return Err(RuntimeError::ArityMismatch {
                name: function.name.clone(),
                expected: function.params.len(),
                received: args.len(),
            });
        }
        match &function.body {
            FunctionBody::Native(native) => native(self, args),
            FunctionBody::Code { locals, code } => {
                let mut slots = args;
                slots.resize((*locals).max(slots.len()), Value::Unit);
                let mut frame = Frame {
                    module,
                    locals: slots,
                };
                self.eval(&mut frame, code)
            }
        }
    }

    fn eval(&mut self, frame: &mut Frame<'_>, code: &Code) -> RuntimeResult<Value> {
        if self.depth >= MAX_EVAL_DEPTH {
            return Err(RuntimeError::StackOverflow {
                limit: MAX_EVAL_DEPTH,
            });
        }
        self.depth += 1;
        let result = self.eval_code(frame, code);
        self.depth -= 1;
        result
    }

    fn eval_code(&mut self, frame: &mut Frame<'_>, code: &Code) -> RuntimeResult<Value> {
        match code {
            Code::Const(value) => Ok(value.clone()),
            Code::Local(slot) => Ok(frame.locals[*slot].clone()),
            Code::SetLocal(slot, value) => {
                let value = self.eval(frame, value)?;
                frame.locals[*slot] = value;
                Ok(Value::Unit)
            }
            Code::Global(index) => Ok(frame.module.global_value(*index)),
            Code::SetGlobal(index, value) => {
                let value = self.eval(frame, value)?;
                frame.module.set_global_value(*index, value);
                Ok(Value::Unit)
            }
            Code::ExternalGlobal(module, index) => Ok(module.global_value(*index)),
            Code::Block(items) => {
                let mut last = Value::Unit;
                for item in items {
                    last = self.eval(frame, item)?;
                }
                Ok(last)
            }
            Code::If {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(frame, cond)?.as_bool()? {
                    self.eval(frame, then)
                } else if let Some(otherwise) = otherwise {
                    self.eval(frame, otherwise)
                } else {
                    Ok(Value::Unit)
                }
            }
            Code::While { cond, body } => {
                while self.eval(frame, cond)?.as_bool()? {
                    self.eval(frame, body)?;
                }
                Ok(Value::Unit)
            }
            Code::Binary(op, left, right) => {
                let left = self.eval(frame, left)?;
                let right = self.eval(frame, right)?;
                eval_binary(*op, left, right)
            }
            Code::Not(value) => Ok(Value::Bool(!self.eval(frame, value)?.as_bool()?)),
            Code::And(left, right) => Ok(Value::Bool(
                self.eval(frame, left)?.as_bool()? && self.eval(frame, right)?.as_bool()?,
            )),
            Code::Or(left, right) => Ok(Value::Bool(
                self.eval(frame, left)?.as_bool()? || self.eval(frame, right)?.as_bool()?,
            )),
            Code::Call { callee, args } => {
                let values = args
                    .iter()
                    .map(|arg| self.eval(frame, arg))
                    .collect::<RuntimeResult<Vec<_>>>()?;
                match callee {
                    Callee::Local(index) => {
                        let module = frame.module;
                        self.invoke(module, *index, values)
                    }
                    Callee::External(handle) => self.invoke(handle.module(), handle.index(), values),
                }
            }
            _ => self.eval_memory(frame, code),
        }
    }

    /// Struct, pointer and sequence forms. Kept out of `eval_code` so the recursive hot path
    /// keeps a small stack frame.
    #[inline(never)]
    fn eval_memory(&mut self, frame: &mut Frame<'_>, code: &Code) -> RuntimeResult<Value> {
        match code {
            Code::FieldPtr {
                base,
                offset,
                target,
            } => {
                let base = self.eval(frame, base)?;
                let ptr = base.as_ptr()?;
                Ok(Value::Ptr(Pointer {
                    addr: ptr.addr.wrapping_add(*offset),
                    target: target.clone(),
                }))
            }
            Code::FieldGet { base, index } => match self.eval(frame, base)? {
                Value::Struct(instance) => instance.fields.get(*index).cloned().ok_or_else(|| {
                    RuntimeError::UnknownField {
                        field: index.to_string(),
                        ty: instance.ty.name.clone(),
                    }
                }),
                other => Err(RuntimeError::mismatch(format!(
                    "field access on {}",
                    other.type_name()
                ))),
            },
            Code::Make { ty, fields } => {
                let fields = fields
                    .iter()
                    .map(|field| self.eval(frame, field))
                    .collect::<RuntimeResult<Vec<_>>>()?;
                Ok(Value::Struct(StructValue {
                    ty: ty.clone(),
                    fields,
                }))
            }
            Code::Load { ptr, ty } => {
                let ptr = self.eval(frame, ptr)?;
                let bytes = self.heap.read(ptr.as_ptr()?.addr, ty.size())?;
                decode(ty, bytes)
            }
            Code::Store { ptr, value, ty } => {
                let ptr = self.eval(frame, ptr)?;
                let value = self.eval(frame, value)?;
                let bytes = encode(&value, ty)?;
                self.heap.write(ptr.as_ptr()?.addr, &bytes)?;
                Ok(Value::Unit)
            }
            Code::Cast { value, to } => {
                let value = self.eval(frame, value)?;
                cast(value, to)
            }
            Code::Offset { ptr, count, stride } => {
                let ptr = self.eval(frame, ptr)?;
                let count = self.eval(frame, count)?.as_int()?;
                let ptr = ptr.as_ptr()?;
                let delta = count.wrapping_mul(*stride as i64);
                Ok(Value::Ptr(Pointer {
                    addr: (ptr.addr as i64).wrapping_add(delta) as u64,
                    target: ptr.target.clone(),
                }))
            }
            Code::Addr(ptr) => {
                let ptr = self.eval(frame, ptr)?;
                Ok(Value::Int(ptr.as_ptr()?.addr as i64))
            }
            Code::SeqLit { elem, items } => {
                let values = items
                    .iter()
                    .map(|item| self.eval(frame, item))
                    .collect::<RuntimeResult<Vec<_>>>()?;
                Value::seq(elem.clone(), &values)
            }
            Code::SeqLen(seq) => {
                let seq = self.eval(frame, seq)?;
                Ok(Value::Int(seq.as_seq()?.len as i64))
            }
            Code::SeqCopy { dst, seq } => {
                let dst = self.eval(frame, dst)?;
                let seq = self.eval(frame, seq)?;
                self.heap.write(dst.as_ptr()?.addr, &seq.as_seq()?.bytes)?;
                Ok(Value::Unit)
            }
            other => Err(RuntimeError::mismatch(format!(
                "unexpected code in memory evaluation: {other:?}"
            ))),
        }
    }
}

fn eval_binary(op: BinaryOp, left: Value, right: Value) -> RuntimeResult<Value> {
    use BinaryOp::*;
    if let Eq | Ne = op {
        let equal = values_equal(&left, &right)?;
        return Ok(Value::Bool(if op == Eq { equal } else { !equal }));
    }
    let (a, b) = (left.as_int()?, right.as_int()?);
    let result = match op {
        Add => Value::Int(a.wrapping_add(b)),
        Sub => Value::Int(a.wrapping_sub(b)),
        Mul => Value::Int(a.wrapping_mul(b)),
        Div => Value::Int(a.checked_div(b).ok_or_else(division_by_zero)?),
        Rem => Value::Int(a.checked_rem(b).ok_or_else(division_by_zero)?),
        Lt => Value::Bool(a < b),
        Le => Value::Bool(a <= b),
        Gt => Value::Bool(a > b),
        Ge => Value::Bool(a >= b),
        Eq | Ne => unreachable!(),
    };
    Ok(result)
}

fn division_by_zero() -> RuntimeError {
    RuntimeError::Panic {
        message: "division by zero".into(),
    }
}

fn values_equal(left: &Value, right: &Value) -> RuntimeResult<bool> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Ok(a == b),
        (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
        (Value::Str(a), Value::Str(b)) => Ok(a == b),
        (Value::Ptr(a), Value::Ptr(b)) => Ok(a.addr == b.addr),
        (Value::Ptr(ptr), Value::Int(addr)) | (Value::Int(addr), Value::Ptr(ptr)) => {
            Ok(ptr.addr == *addr as u64)
        }
        (Value::Unit, Value::Unit) => Ok(true),
        (left, right) => Err(RuntimeError::mismatch(format!(
            "cannot compare {} with {}",
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn cast(value: Value, to: &Type) -> RuntimeResult<Value> {
    match (value, to) {
        (Value::Int(v), Type::U8) => Ok(Value::Int(v & 0xff)),
        (Value::Int(v), Type::I64 | Type::U64) => Ok(Value::Int(v)),
        (Value::Int(v), Type::Bool) => Ok(Value::Bool(v != 0)),
        (Value::Bool(v), ty) if ty.is_integer() => Ok(Value::Int(v as i64)),
        (Value::Bool(v), Type::Bool) => Ok(Value::Bool(v)),
        (Value::Int(v), Type::Ptr(target)) => Ok(Value::Ptr(Pointer {
            addr: v as u64,
            target: (**target).clone(),
        })),
        (Value::Ptr(ptr), Type::Ptr(target)) => Ok(Value::Ptr(Pointer {
            addr: ptr.addr,
            target: (**target).clone(),
        })),
        (Value::Ptr(ptr), ty) if ty.is_integer() => Ok(Value::Int(ptr.addr as i64)),
        (Value::Struct(instance), Type::Struct(def)) if Rc::ptr_eq(&instance.ty, def) => {
            Ok(Value::Struct(instance))
        }
        (Value::Str(text), Type::Str) => Ok(Value::Str(text)),
        (Value::Seq(seq), Type::Seq(elem)) if seq.elem == **elem => Ok(Value::Seq(seq)),
        (Value::Unit, Type::Unit) => Ok(Value::Unit),
        (value, to) => Err(RuntimeError::mismatch(format!(
            "cannot cast {} to {to}",
            value.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_division_by_zero_panics() {
        let err = eval_binary(BinaryOp::Div, Value::Int(1), Value::Int(0)).expect_err("panic");
        assert!(matches!(err, RuntimeError::Panic { .. }));
    }

    #[test]
    fn pointers_compare_against_null() {
        let ptr = Value::Ptr(Pointer {
            addr: 0,
            target: Type::U8,
        });
        let equal = eval_binary(BinaryOp::Eq, ptr, Value::Int(0)).expect("compare");
        assert_eq!(equal, Value::Bool(true));
    }

    #[test]
    fn casts_truncate_to_u8_and_retarget_pointers() {
        assert_eq!(cast(Value::Int(258), &Type::U8).expect("cast"), Value::Int(2));
        let ptr = cast(Value::Int(64), &Type::Ptr(Box::new(Type::I64))).expect("cast");
        assert_eq!(ptr.as_ptr().expect("ptr").target, Type::I64);
    }
}
