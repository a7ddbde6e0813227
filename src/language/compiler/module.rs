use crate::language::compiler::ir::Code;
use crate::language::types::{StructType, Type};
use crate::runtime::{error::RuntimeResult, interpreter::Machine, value::Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(pub u64);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub type Native = fn(&mut Machine, Vec<Value>) -> RuntimeResult<Value>;

#[derive(Clone)]
pub enum FunctionBody {
    Code { locals: usize, code: Code },
    Native(Native),
}

impl fmt::Debug for FunctionBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionBody::Code { locals, code } => f
                .debug_struct("Code")
                .field("locals", locals)
                .field("code", code)
                .finish(),
            FunctionBody::Native(_) => write!(f, "<native>"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<(String, Type)>,
    pub ret: Type,
    pub body: FunctionBody,
}

#[derive(Debug)]
pub(crate) struct Global {
    pub name: String,
    pub ty: Type,
}

pub(crate) struct ModuleData {
    pub id: ModuleId,
    pub name: String,
    pub deps: Vec<Module>,
    pub functions: Vec<Function>,
    pub function_index: HashMap<String, usize>,
    pub types: HashMap<String, Rc<StructType>>,
    pub globals: Vec<Global>,
    pub global_values: RefCell<Vec<Value>>,
}

/// A compiled unit. Cloning shares the same compiled code and global state.
#[derive(Clone)]
pub struct Module(pub(crate) Rc<ModuleData>);

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.0.id)
            .field("name", &self.0.name)
            .finish()
    }
}

impl PartialEq for Module {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Module {
    pub fn id(&self) -> ModuleId {
        self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Declared dependencies in resolution order.
    pub fn dependencies(&self) -> &[Module] {
        &self.0.deps
    }

    pub fn function(&self, name: &str) -> Option<FunctionHandle> {
        self.0
            .function_index
            .get(name)
            .map(|&index| FunctionHandle::new(self.clone(), index))
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.0.functions.iter().map(|function| function.name.as_str())
    }

    pub fn type_named(&self, name: &str) -> Option<TypeHandle> {
        self.0.types.get(name).map(|ty| TypeHandle {
            module: self.clone(),
            ty: ty.clone(),
        })
    }

    /// Current value of a module global.
    pub fn global(&self, name: &str) -> Option<Value> {
        let index = self.global_index(name)?;
        self.0.global_values.borrow().get(index).cloned()
    }

    pub(crate) fn global_index(&self, name: &str) -> Option<usize> {
        self.0.globals.iter().position(|global| global.name == name)
    }

    pub(crate) fn global_type(&self, index: usize) -> Option<&Type> {
        self.0.globals.get(index).map(|global| &global.ty)
    }

    pub(crate) fn global_value(&self, index: usize) -> Value {
        self.0
            .global_values
            .borrow()
            .get(index)
            .cloned()
            .unwrap_or(Value::Unit)
    }

    pub(crate) fn set_global_value(&self, index: usize, value: Value) {
        if let Some(slot) = self.0.global_values.borrow_mut().get_mut(index) {
            *slot = value;
        }
    }

    pub(crate) fn function_at(&self, index: usize) -> &Function {
        &self.0.functions[index]
    }
}

/// A callable export. The handle keeps its module's code alive, but calling it after the
/// module was unloaded is not supported.
#[derive(Clone)]
pub struct FunctionHandle {
    module: Module,
    index: usize,
}

impl fmt::Debug for FunctionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.module.name(), self.name())
    }
}

impl FunctionHandle {
    pub(crate) fn new(module: Module, index: usize) -> Self {
        Self { module, index }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.function().name
    }

    pub fn arity(&self) -> usize {
        self.function().params.len()
    }

    pub fn params(&self) -> &[(String, Type)] {
        &self.function().params
    }

    pub fn return_type(&self) -> &Type {
        &self.function().ret
    }

    fn function(&self) -> &Function {
        self.module.function_at(self.index)
    }
}

#[derive(Clone, Debug)]
pub struct TypeHandle {
    module: Module,
    ty: Rc<StructType>,
}

impl TypeHandle {
    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn name(&self) -> &str {
        &self.ty.name
    }

    pub fn ty(&self) -> Type {
        Type::Struct(self.ty.clone())
    }

    pub fn size(&self) -> u64 {
        self.ty().size()
    }

    pub fn struct_type(&self) -> &Rc<StructType> {
        &self.ty
    }
}
