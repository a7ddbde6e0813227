pub mod base;
pub mod ir;
mod lower;
pub mod module;

pub use lower::{is_reserved, SPECIAL_FORMS};
pub use module::{FunctionHandle, Module, ModuleId, TypeHandle};

use crate::language::{
    ast::{Fragment, Origin},
    errors::SyntaxError,
    span::Span,
};
use crate::language::synth::SynthRegistry;
use crate::runtime::{error::RuntimeResult, heap::Heap, interpreter::Machine, value::Value};
use lower::LowerError;
use miette::{Diagnostic, NamedSource, SourceSpan};
use module::ModuleData;
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;
use thiserror::Error;

pub const DEFAULT_HEAP_LIMIT: u64 = 64 * 1024 * 1024;

/// What gets compiled: source text or an already-built fragment, named for diagnostics.
#[derive(Clone, Debug)]
pub enum Unit {
    /// `origin` names the text in diagnostics, usually the file path.
    Source {
        name: String,
        origin: String,
        text: String,
    },
    Fragment { name: String, fragment: Fragment },
}

impl Unit {
    pub fn source(name: impl Into<String>, text: impl Into<String>) -> Self {
        let name = name.into();
        Unit::Source {
            origin: name.clone(),
            name,
            text: text.into(),
        }
    }

    /// Source read from `path`; diagnostics show the path instead of the module name.
    pub fn file(name: impl Into<String>, path: &Path, text: impl Into<String>) -> Self {
        Unit::Source {
            name: name.into(),
            origin: path.display().to_string(),
            text: text.into(),
        }
    }

    pub fn fragment(name: impl Into<String>, fragment: Fragment) -> Self {
        Unit::Fragment {
            name: name.into(),
            fragment,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Unit::Source { name, .. } | Unit::Fragment { name, .. } => name,
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
#[error("{message}")]
#[diagnostic(code(cauldron::compile))]
pub struct CompileError {
    pub unit: String,
    pub message: String,
    pub line: usize,
    pub column: usize,
    #[source_code]
    src: NamedSource<String>,
    #[label("{message}")]
    span: SourceSpan,
    #[help]
    help: Option<String>,
}

impl CompileError {
    fn at(unit: &str, origin: &Origin, span: Span, message: String, help: Option<String>) -> Self {
        let (line, column) = span.line_col(&origin.text);
        Self {
            unit: unit.to_string(),
            message,
            line,
            column,
            src: NamedSource::new(origin.name.clone(), origin.text.clone()),
            span: span.into(),
            help,
        }
    }

    fn syntax(unit: &str, origin: &str, text: &str, err: SyntaxError) -> Self {
        let origin = Origin {
            name: origin.to_string(),
            text: text.to_string(),
        };
        Self::at(unit, &origin, err.span, err.message, err.help)
    }

    fn lower(unit: &str, origin: &Origin, err: LowerError) -> Self {
        Self::at(unit, origin, err.span, err.message, err.help)
    }

    pub fn help_text(&self) -> Option<&str> {
        self.help.as_deref()
    }

    /// Name of the source the diagnostic points into.
    pub fn source_name(&self) -> &str {
        self.src.name()
    }

    pub fn offset(&self) -> usize {
        self.span.offset()
    }
}

/// Compiles units into modules and owns the machine that runs them. Every module produced by
/// one compiler shares its heap.
pub struct Compiler {
    machine: Machine,
    base: Module,
    next_id: u64,
    pub(crate) synth: SynthRegistry,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self::with_heap_limit(DEFAULT_HEAP_LIMIT)
    }

    pub fn with_heap_limit(limit: u64) -> Self {
        Self {
            machine: Machine::new(limit),
            base: base::base_module(ModuleId(0)),
            next_id: 1,
            synth: SynthRegistry::default(),
        }
    }

    pub fn base(&self) -> &Module {
        &self.base
    }

    pub fn heap(&self) -> &Heap {
        self.machine.heap()
    }

    pub fn machine_mut(&mut self) -> &mut Machine {
        &mut self.machine
    }

    pub fn call(&mut self, handle: &FunctionHandle, args: Vec<Value>) -> RuntimeResult<Value> {
        self.machine.call(handle, args)
    }

    /// Compiles `unit` against `deps` and runs its global initialisers. Names resolve to the
    /// unit's own definitions first, then `deps` in order, then the base library.
    pub fn compile(&mut self, unit: Unit, deps: &[Module]) -> Result<Module, CompileError> {
        let (name, fragment) = match unit {
            Unit::Source { name, origin, text } => {
                let fragment = Fragment::parse_unit(&origin, &text)
                    .map_err(|err| CompileError::syntax(&name, &origin, &text, err))?;
                (name, fragment)
            }
            Unit::Fragment { name, fragment } => (name, fragment),
        };
        log::debug!(
            "compiling `{name}` against [{}]",
            deps.iter().map(Module::name).collect::<Vec<_>>().join(", ")
        );
        let lowered = lower::lower_unit(fragment.root(), deps, &self.base)
            .map_err(|err| CompileError::lower(&name, fragment.origin(), err))?;

        let id = ModuleId(self.next_id);
        self.next_id += 1;
        let module = Module(Rc::new(ModuleData {
            id,
            name: name.clone(),
            deps: deps.to_vec(),
            global_values: RefCell::new(vec![Value::Unit; lowered.globals.len()]),
            functions: lowered.functions,
            function_index: lowered.function_index,
            types: lowered.types,
            globals: lowered.globals,
        }));
        for init in &lowered.initialisers {
            let value = self
                .machine
                .evaluate(&module, init.locals, &init.code)
                .map_err(|err| {
                    let origin = fragment.origin();
                    let global = &module.0.globals[init.global].name;
                    CompileError::at(
                        &name,
                        origin,
                        init.span,
                        format!("initialiser of global `{global}` failed: {err}"),
                        None,
                    )
                })?;
            module.set_global_value(init.global, value);
        }
        log::debug!("compiled `{name}` as module {id}");
        Ok(module)
    }
}

#[cfg(test)]
mod tests;
