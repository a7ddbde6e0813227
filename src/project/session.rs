//! Prepares the fixed dependency set a hot module compiles against.

use crate::{
    language::{
        compiler::{Compiler, Module},
        synth::{array_name, SynthError},
    },
    project::{
        graph::ModuleLoader,
        manifest::{HotSettings, Manifest},
    },
};
use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SessionError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Synth(#[from] SynthError),
    #[error("module `{name}` from {} failed to compile", path.display())]
    Module { name: String, path: PathBuf },
    #[error("module `{name}` depends on `{dep}`, which is not loaded")]
    MissingDependency { name: String, dep: String },
}

/// A loader whose graph already holds every synthesized container and `[[modules]]` entry.
pub struct Session {
    pub loader: ModuleLoader,
    pub deps: Vec<Module>,
    pub hot: HotSettings,
}

impl Session {
    /// Session without a manifest: an empty dependency set and default settings.
    pub fn standalone(heap_limit: u64) -> Self {
        Self {
            loader: ModuleLoader::new(Compiler::with_heap_limit(heap_limit)),
            deps: Vec::new(),
            hot: HotSettings::default(),
        }
    }

    /// Synthesizes the manifest's arrays, then compiles its modules in order. A module may
    /// name an earlier module or an array (`array_<elem>`) as a dependency; an array brings
    /// in both its ops and rc modules. Every step is fatal; a half-prepared session is never
    /// returned.
    pub fn prepare(manifest: &Manifest) -> Result<Self, SessionError> {
        let mut session = Self::standalone(manifest.heap_limit);
        session.hot = manifest.hot.clone();

        let mut named: Vec<(String, Vec<Module>)> = Vec::new();
        let mut containers = Vec::with_capacity(manifest.arrays.len() * 2);
        for element in &manifest.arrays {
            let ops = session.loader.compiler_mut().declare_array(element)?;
            let rc = ops.dependencies()[0].clone();
            session.loader.adopt(rc.clone());
            session.loader.adopt(ops.clone());
            named.push((array_name(element), vec![ops.clone(), rc.clone()]));
            containers.push(ops);
            containers.push(rc);
        }

        for entry in &manifest.modules {
            let mut deps = Vec::with_capacity(entry.deps.len());
            for dep in &entry.deps {
                let modules = named
                    .iter()
                    .find(|(name, _)| name == dep)
                    .map(|(_, modules)| modules.clone())
                    .ok_or_else(|| SessionError::MissingDependency {
                        name: entry.name.clone(),
                        dep: dep.clone(),
                    })?;
                deps.extend(modules);
            }
            let module = session
                .loader
                .load_named(&entry.name, &entry.path, &deps)
                .ok_or_else(|| SessionError::Module {
                    name: entry.name.clone(),
                    path: entry.path.clone(),
                })?;
            named.push((entry.name.clone(), vec![module.clone()]));
            session.deps.push(module);
        }
        session.deps.extend(containers);

        log::info!(
            "session ready: {} dependencies, {} modules loaded",
            session.deps.len(),
            session.loader.graph().len()
        );
        Ok(session)
    }
}
