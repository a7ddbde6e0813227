use crate::diagnostics::report_compile_error;
use crate::language::compiler::{Compiler, Module, ModuleId, Unit};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs;
use std::path::Path;

/// Loaded modules and their dependency edges. An edge `A -> B` exists iff `A` was compiled
/// with `B` as a declared dependency; edges never change after insertion.
#[derive(Default)]
pub struct ModuleGraph {
    modules: BTreeMap<ModuleId, Module>,
    edges: BTreeMap<ModuleId, Vec<ModuleId>>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, module: Module) {
        let deps = module.dependencies().iter().map(Module::id).collect();
        self.edges.insert(module.id(), deps);
        self.modules.insert(module.id(), module);
    }

    pub fn contains(&self, id: ModuleId) -> bool {
        self.modules.contains_key(&id)
    }

    pub fn get(&self, id: ModuleId) -> Option<&Module> {
        self.modules.get(&id)
    }

    /// Most recently loaded module with the given name.
    pub fn find(&self, name: &str) -> Option<&Module> {
        self.modules.values().rev().find(|module| module.name() == name)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    pub fn dependencies(&self, id: ModuleId) -> &[ModuleId] {
        self.edges.get(&id).map(Vec::as_slice).unwrap_or_default()
    }

    /// Modules that import `id` directly.
    pub fn dependents(&self, id: ModuleId) -> Vec<ModuleId> {
        self.edges
            .iter()
            .filter(|(_, deps)| deps.contains(&id))
            .map(|(importer, _)| *importer)
            .collect()
    }

    /// Every module that reaches `id` through dependency edges, nearest first. The module
    /// itself is not included.
    pub fn find_all_dependents(&self, id: ModuleId) -> Vec<ModuleId> {
        let mut seen = HashSet::from([id]);
        let mut queue = VecDeque::from([id]);
        let mut found = Vec::new();
        while let Some(current) = queue.pop_front() {
            for importer in self.dependents(current) {
                if seen.insert(importer) {
                    found.push(importer);
                    queue.push_back(importer);
                }
            }
        }
        log::debug!("module {id} has {} transitive dependents", found.len());
        found
    }

    /// Removes `id` together with everything depending on it and returns the removed modules.
    pub fn remove_with_dependents(&mut self, id: ModuleId) -> Vec<Module> {
        let mut doomed = vec![id];
        doomed.extend(self.find_all_dependents(id));
        doomed
            .into_iter()
            .filter_map(|victim| {
                self.edges.remove(&victim);
                self.modules.remove(&victim)
            })
            .collect()
    }
}

/// Reads and compiles module files, keeping the graph in step with what is loaded.
pub struct ModuleLoader {
    compiler: Compiler,
    graph: ModuleGraph,
}

impl ModuleLoader {
    pub fn new(compiler: Compiler) -> Self {
        Self {
            compiler,
            graph: ModuleGraph::new(),
        }
    }

    pub fn compiler(&self) -> &Compiler {
        &self.compiler
    }

    pub fn compiler_mut(&mut self) -> &mut Compiler {
        &mut self.compiler
    }

    pub fn graph(&self) -> &ModuleGraph {
        &self.graph
    }

    /// Compiles the file at `path` against `deps`. Failures are logged with their diagnostic
    /// and leave the graph untouched.
    pub fn load_module(&mut self, path: &Path, deps: &[Module]) -> Option<Module> {
        self.load_named(&module_name(path), path, deps)
    }

    /// Like [`ModuleLoader::load_module`] with an explicit module name.
    pub fn load_named(&mut self, name: &str, path: &Path, deps: &[Module]) -> Option<Module> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                log::error!("failed to read {}: {err}", path.display());
                return None;
            }
        };
        match self.compiler.compile(Unit::file(name, path, text), deps) {
            Ok(module) => {
                log::info!(
                    "loaded module `{}` ({}) from {}",
                    module.name(),
                    module.id(),
                    path.display()
                );
                self.graph.insert(module.clone());
                Some(module)
            }
            Err(err) => {
                report_compile_error(path, err);
                None
            }
        }
    }

    /// Registers a module compiled outside the loader, such as a synthesized container.
    pub fn adopt(&mut self, module: Module) {
        self.graph.insert(module);
    }

    /// Unloads `module` and every module depending on it in one step. Returns the removed ids.
    pub fn unload_module(&mut self, module: &Module) -> Vec<ModuleId> {
        let removed: Vec<ModuleId> = self
            .graph
            .remove_with_dependents(module.id())
            .iter()
            .map(Module::id)
            .collect();
        self.compiler.forget_synthesized(&removed);
        log::info!(
            "unloaded module `{}` ({}) and {} dependents",
            module.name(),
            module.id(),
            removed.len().saturating_sub(1)
        );
        removed
    }
}

/// Module name derived from a file path: its stem.
pub fn module_name(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("main")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn compile(loader: &mut ModuleLoader, name: &str, text: &str, deps: &[Module]) -> Module {
        let module = loader
            .compiler_mut()
            .compile(Unit::source(name, text), deps)
            .expect("compile");
        loader.adopt(module.clone());
        module
    }

    #[test]
    fn finds_transitive_dependents_breadth_first() {
        let mut loader = ModuleLoader::new(Compiler::new());
        let a = compile(&mut loader, "a", "(fun a () i64 1)", &[]);
        let b = compile(&mut loader, "b", "(fun b () i64 (a))", &[a.clone()]);
        let c = compile(&mut loader, "c", "(fun c () i64 (b))", &[b.clone()]);
        let unrelated = compile(&mut loader, "d", "(fun d () i64 4)", &[]);

        let graph = loader.graph();
        assert_eq!(graph.find_all_dependents(a.id()), vec![b.id(), c.id()]);
        assert_eq!(graph.find_all_dependents(b.id()), vec![c.id()]);
        assert!(graph.find_all_dependents(c.id()).is_empty());
        assert!(graph.find_all_dependents(unrelated.id()).is_empty());
        assert_eq!(graph.dependencies(c.id()), &[b.id()]);
    }

    #[test]
    fn diamond_dependents_are_reported_once() {
        let mut loader = ModuleLoader::new(Compiler::new());
        let base = compile(&mut loader, "root", "(fun r () i64 1)", &[]);
        let left = compile(&mut loader, "left", "(fun l () i64 (r))", &[base.clone()]);
        let right = compile(&mut loader, "right", "(fun rr () i64 (r))", &[base.clone()]);
        let top = compile(
            &mut loader,
            "top",
            "(fun t () i64 (+ (l) (rr)))",
            &[left.clone(), right.clone()],
        );
        let dependents = loader.graph().find_all_dependents(base.id());
        assert_eq!(dependents, vec![left.id(), right.id(), top.id()]);
    }

    #[test]
    fn unloading_removes_the_module_and_its_dependents() {
        let mut loader = ModuleLoader::new(Compiler::new());
        let a = compile(&mut loader, "a", "(fun a () i64 1)", &[]);
        let b = compile(&mut loader, "b", "(fun b () i64 (a))", &[a.clone()]);
        let c = compile(&mut loader, "c", "(fun c () i64 (b))", &[b.clone()]);

        let removed = loader.unload_module(&b);
        assert_eq!(removed, vec![b.id(), c.id()]);
        assert!(loader.graph().contains(a.id()));
        assert!(!loader.graph().contains(b.id()));
        assert!(!loader.graph().contains(c.id()));
        assert!(loader.graph().dependents(a.id()).is_empty());
    }

    #[test]
    fn load_failures_leave_the_graph_untouched() {
        let dir = tempdir().expect("tempdir");
        let good = dir.path().join("good.cld");
        let bad = dir.path().join("bad.cld");
        fs::write(&good, "(fun ok () i64 1)").expect("write");
        fs::write(&bad, "(fun broken () i64 (nope))").expect("write");

        let mut loader = ModuleLoader::new(Compiler::new());
        let module = loader.load_module(&good, &[]).expect("load good");
        assert_eq!(module.name(), "good");
        assert!(loader.load_module(&bad, &[module.clone()]).is_none());
        assert!(loader.load_module(&dir.path().join("missing.cld"), &[]).is_none());
        assert_eq!(loader.graph().len(), 1);
        assert_eq!(loader.graph().find("good"), Some(&module));
    }

    #[test]
    fn unloading_a_synthesized_array_frees_its_name() {
        let mut loader = ModuleLoader::new(Compiler::new());
        let element = crate::language::types::TypeRef::parse("i64").expect("type");
        let ops = loader
            .compiler_mut()
            .declare_array(&element)
            .expect("declare");
        let rc = ops.dependencies()[0].clone();
        loader.adopt(rc.clone());
        loader.adopt(ops.clone());

        let removed = loader.unload_module(&rc);
        assert_eq!(removed, vec![rc.id(), ops.id()]);
        assert!(loader.compiler().array_module(&element).is_none());
        loader
            .compiler_mut()
            .declare_array(&element)
            .expect("declare again after unload");
    }
}
