use crate::language::compiler::module::{
    Function, FunctionBody, Module, ModuleData, ModuleId, Native,
};
use crate::language::types::Type;
use crate::runtime::{
    error::{RuntimeError, RuntimeResult},
    interpreter::Machine,
    value::{Pointer, Value},
};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

pub const BASE_MODULE_NAME: &str = "base";

fn byte_ptr() -> Type {
    Type::Ptr(Box::new(Type::U8))
}

/// The host library every module resolves against last.
pub fn base_module(id: ModuleId) -> Module {
    let natives: Vec<(&str, Vec<(&str, Type)>, Type, Native)> = vec![
        ("malloc", vec![("size", Type::U64)], byte_ptr(), native_malloc as Native),
        ("free", vec![("ptr", byte_ptr())], Type::Unit, native_free as Native),
        (
            "memcpy",
            vec![("dst", byte_ptr()), ("src", byte_ptr()), ("len", Type::U64)],
            Type::Unit,
            native_memcpy as Native,
        ),
        (
            "memset",
            vec![("dst", byte_ptr()), ("byte", Type::U8), ("len", Type::U64)],
            Type::Unit,
            native_memset as Native,
        ),
        ("panic", vec![("message", Type::Str)], Type::Unit, native_panic as Native),
        ("print", vec![("message", Type::Str)], Type::Unit, native_print as Native),
        ("print_int", vec![("value", Type::I64)], Type::Unit, native_print_int as Native),
        ("sleep_ms", vec![("millis", Type::U64)], Type::Unit, native_sleep_ms as Native),
    ];
    let mut functions = Vec::with_capacity(natives.len());
    let mut function_index = HashMap::new();
    for (name, params, ret, native) in natives {
        function_index.insert(name.to_string(), functions.len());
        functions.push(Function {
            name: name.to_string(),
            params: params
                .into_iter()
                .map(|(param, ty)| (param.to_string(), ty))
                .collect(),
            ret,
            body: FunctionBody::Native(native),
        });
    }
    Module(Rc::new(ModuleData {
        id,
        name: BASE_MODULE_NAME.to_string(),
        deps: Vec::new(),
        functions,
        function_index,
        types: HashMap::new(),
        globals: Vec::new(),
        global_values: RefCell::new(Vec::new()),
    }))
}

fn address(value: &Value) -> RuntimeResult<u64> {
    match value {
        Value::Ptr(ptr) => Ok(ptr.addr),
        Value::Int(addr) => Ok(*addr as u64),
        other => Err(RuntimeError::mismatch(format!(
            "expected a pointer, found {}",
            other.type_name()
        ))),
    }
}

fn text(value: &Value) -> RuntimeResult<&str> {
    match value {
        Value::Str(text) => Ok(text),
        other => Err(RuntimeError::mismatch(format!(
            "expected a str, found {}",
            other.type_name()
        ))),
    }
}

fn native_malloc(machine: &mut Machine, args: Vec<Value>) -> RuntimeResult<Value> {
    // Negative requests read as oversized and hit the heap limit.
    let size = u64::try_from(args[0].as_int()?).unwrap_or(u64::MAX);
    let addr = machine.heap_mut().alloc(size);
    Ok(Value::Ptr(Pointer {
        addr,
        target: Type::U8,
    }))
}

fn native_free(machine: &mut Machine, args: Vec<Value>) -> RuntimeResult<Value> {
    machine.heap_mut().free(address(&args[0])?)?;
    Ok(Value::Unit)
}

fn native_memcpy(machine: &mut Machine, args: Vec<Value>) -> RuntimeResult<Value> {
    let (dst, src) = (address(&args[0])?, address(&args[1])?);
    machine.heap_mut().copy(dst, src, args[2].as_int()? as u64)?;
    Ok(Value::Unit)
}

fn native_memset(machine: &mut Machine, args: Vec<Value>) -> RuntimeResult<Value> {
    let dst = address(&args[0])?;
    let byte = args[1].as_int()? as u8;
    machine.heap_mut().fill(dst, args[2].as_int()? as u64, byte)?;
    Ok(Value::Unit)
}

fn native_panic(_: &mut Machine, args: Vec<Value>) -> RuntimeResult<Value> {
    Err(RuntimeError::Panic {
        message: text(&args[0])?.to_string(),
    })
}

fn native_print(_: &mut Machine, args: Vec<Value>) -> RuntimeResult<Value> {
    println!("{}", text(&args[0])?);
    Ok(Value::Unit)
}

fn native_print_int(_: &mut Machine, args: Vec<Value>) -> RuntimeResult<Value> {
    println!("{}", args[0].as_int()?);
    Ok(Value::Unit)
}

fn native_sleep_ms(_: &mut Machine, args: Vec<Value>) -> RuntimeResult<Value> {
    std::thread::sleep(Duration::from_millis(args[0].as_int()?.max(0) as u64));
    Ok(Value::Unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malloc_and_free_go_through_the_machine_heap() {
        let base = base_module(ModuleId(0));
        let mut machine = Machine::new(1 << 16);
        let malloc = base.function("malloc").expect("malloc");
        let free = base.function("free").expect("free");
        let ptr = machine.call(&malloc, vec![Value::Int(24)]).expect("malloc");
        assert_eq!(machine.heap().live_blocks(), 1);
        machine.call(&free, vec![ptr]).expect("free");
        assert_eq!(machine.heap().live_blocks(), 0);
    }

    #[test]
    fn panic_surfaces_as_a_runtime_error() {
        let base = base_module(ModuleId(0));
        let mut machine = Machine::new(1 << 16);
        let panic = base.function("panic").expect("panic");
        let err = machine
            .call(&panic, vec![Value::str("boom")])
            .expect_err("panic");
        assert_eq!(
            err,
            RuntimeError::Panic {
                message: "boom".into()
            }
        );
    }
}
