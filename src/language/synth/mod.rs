//! Generic container synthesis: reference-counted wrappers and inline-storage arrays, built
//! by instantiating fixed templates and compiling the result.

pub mod templates;

use crate::language::{
    ast::{Expr, Fragment},
    compiler::{CompileError, Compiler, Module, ModuleId, Unit},
    template::{Binding, Bindings, Template, TemplateBindingError},
    types::TypeRef,
};
use miette::Diagnostic;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SynthError {
    #[error(transparent)]
    Template(#[from] TemplateBindingError),
    #[error(transparent)]
    #[diagnostic(transparent)]
    Compile(#[from] CompileError),
    #[error("`{name}` is already defined in this session")]
    DuplicateDefinition { name: String },
    #[error("invalid fragment for `{name}`: {message}")]
    InvalidFragment { name: String, message: String },
}

/// Synthesized modules of the current session, keyed by generated name.
#[derive(Default)]
pub(crate) struct SynthRegistry {
    rc: HashMap<String, Module>,
    arrays: HashMap<String, Module>,
}

impl SynthRegistry {
    /// Drops entries whose module was unloaded so the name can be declared again.
    pub(crate) fn forget(&mut self, removed: &[ModuleId]) {
        self.rc.retain(|_, module| !removed.contains(&module.id()));
        self.arrays.retain(|_, module| !removed.contains(&module.id()));
    }
}

/// Deterministic name of the array type over `element`, e.g. `array_ptr_u8`.
pub fn array_name(element: &TypeRef) -> String {
    format!("array_{}", element.mangled())
}

fn load_template(name: &str, text: &str) -> Result<Template, SynthError> {
    Template::parse(name, text).map_err(|err| SynthError::InvalidFragment {
        name: name.to_string(),
        message: err.message,
    })
}

impl Compiler {
    /// Synthesizes the reference-counted wrapper `wrapper` around `inner`. A `(struct ...)`
    /// fragment is spliced into the generated module and becomes the payload type; anything
    /// else is read as a type expression.
    pub fn declare_rc(&mut self, wrapper: &str, inner: Fragment) -> Result<Module, SynthError> {
        if self.synth.rc.contains_key(wrapper) {
            return Err(SynthError::DuplicateDefinition {
                name: wrapper.to_string(),
            });
        }
        let (declaration, payload) = match inner.root().match_form("struct") {
            Some(args) => {
                let name = args.first().and_then(Expr::as_symbol).ok_or_else(|| {
                    SynthError::InvalidFragment {
                        name: wrapper.to_string(),
                        message: "struct declaration has no name".into(),
                    }
                })?;
                let name_fragment =
                    Fragment::new(Expr::symbol(name, inner.root().span), inner.origin().clone());
                (inner.clone(), name_fragment)
            }
            None => {
                let empty = Fragment::parse_expr("<empty>", "(do)").map_err(|err| {
                    SynthError::InvalidFragment {
                        name: wrapper.to_string(),
                        message: err.message,
                    }
                })?;
                (empty, inner)
            }
        };
        let payload = TypeRef::from_fragment(payload).map_err(|err| SynthError::InvalidFragment {
            name: wrapper.to_string(),
            message: err.message,
        })?;

        let template = load_template("rc", templates::RC_TEMPLATE)?;
        let bindings = Bindings::new()
            .bind("w", Binding::ident(wrapper))
            .bind("T", Binding::Type(payload.clone()))
            .bind("inner", Binding::Fragment(declaration));
        let fragment = template.instantiate(&bindings)?;
        let module = self.compile(Unit::fragment(wrapper, fragment), &[])?;
        log::info!("synthesized rc wrapper `{wrapper}` over {payload}");
        self.synth.rc.insert(wrapper.to_string(), module.clone());
        Ok(module)
    }

    /// Synthesizes `array_<element>`: an rc wrapper whose payload is a length header followed
    /// by inline elements, plus the module of array operations compiled against it. Returns
    /// the operations module; the rc module is its only dependency.
    pub fn declare_array(&mut self, element: &TypeRef) -> Result<Module, SynthError> {
        let name = array_name(element);
        if self.synth.arrays.contains_key(&name) {
            return Err(SynthError::DuplicateDefinition { name });
        }
        let bindings = Bindings::new()
            .bind("a", Binding::ident(name.as_str()))
            .bind("T", Binding::Type(element.clone()));
        let header = load_template("array_header", templates::HEADER_TEMPLATE)?
            .instantiate(&bindings)?;
        let ops = load_template("array", templates::ARRAY_TEMPLATE)?.instantiate(&bindings)?;

        let rc = self.declare_rc(&name, header)?;
        let module = match self.compile(Unit::fragment(format!("{name}_ops"), ops), &[rc]) {
            Ok(module) => module,
            Err(err) => {
                self.synth.rc.remove(&name);
                return Err(err.into());
            }
        };
        log::info!("synthesized array type `{name}`");
        self.synth.arrays.insert(name, module.clone());
        Ok(module)
    }

    /// The operations module of a previously declared array type.
    pub fn array_module(&self, element: &TypeRef) -> Option<Module> {
        self.synth.arrays.get(&array_name(element)).cloned()
    }

    pub fn rc_module(&self, wrapper: &str) -> Option<Module> {
        self.synth.rc.get(wrapper).cloned()
    }

    pub(crate) fn forget_synthesized(&mut self, removed: &[ModuleId]) {
        self.synth.forget(removed);
    }
}

#[cfg(test)]
mod tests;
